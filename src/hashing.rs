//! Digests for generated cards and run manifests.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 of bytes as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Serialize with object keys sorted at every level, no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(value)?;
    sort_keys(&mut value);
    serde_json::to_string(&value)
}

fn sort_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, mut child) in entries {
                sort_keys(&mut child);
                map.insert(key, child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sort_keys),
        _ => {}
    }
}

/// Digest over the canonical JSON of a manifest body.
pub fn manifest_digest<T: Serialize>(body: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(body)?.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_ignores_key_order() {
        let a = json!({"code": "00045", "card": {"w": 1, "h": 2}});
        let b = json!({"card": {"h": 2, "w": 1}, "code": "00045"});
        assert_eq!(manifest_digest(&a).unwrap(), manifest_digest(&b).unwrap());
        assert_eq!(canonical_json(&b).unwrap(), r#"{"card":{"h":2,"w":1},"code":"00045"}"#);
    }
}
