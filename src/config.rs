//! Event configuration.
//!
//! A single JSON file, every key optional. CLI flags override whatever is
//! read here.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phone::DEFAULT_DIAL_CODE;

pub const DEFAULT_CONFIG_FILE: &str = "invitecard.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_registry")]
    pub registry: PathBuf,
    /// Prefix of the URL encoded in each QR code; the code is appended.
    #[serde(default = "default_verify_base_url")]
    pub verify_base_url: String,
    /// Where the card PNGs are published, for the dispatch log.
    #[serde(default = "default_card_base_url")]
    pub card_base_url: String,
    #[serde(default = "default_dial_code")]
    pub dial_code: String,
    #[serde(default)]
    pub card: CardPaths,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPaths {
    /// Layout JSON; absent means the stock layout.
    #[serde(default = "default_layout")]
    pub layout: PathBuf,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_whatsapp_template")]
    pub whatsapp_template: PathBuf,
    #[serde(default = "default_sms_template")]
    pub sms_template: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    #[serde(default = "default_log")]
    pub log: PathBuf,
    /// Twilio content template used for WhatsApp sends.
    #[serde(default)]
    pub whatsapp_content_sid: Option<String>,
    #[serde(default = "default_sms_api_url")]
    pub sms_api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_registry() -> PathBuf { PathBuf::from("wedding_invites.ods") }
fn default_verify_base_url() -> String { "http://localhost:5000/c".to_string() }
fn default_card_base_url() -> String { "http://localhost:5000/png".to_string() }
fn default_dial_code() -> String { DEFAULT_DIAL_CODE.to_string() }
fn default_layout() -> PathBuf { PathBuf::from("card_layout.json") }
fn default_out_dir() -> PathBuf { PathBuf::from("cards") }
fn default_whatsapp_template() -> PathBuf { PathBuf::from("message_whatsapp.txt") }
fn default_sms_template() -> PathBuf { PathBuf::from("message_sms.txt") }
fn default_log() -> PathBuf { PathBuf::from("twilio_send_log.jsonl") }
fn default_sms_api_url() -> String { "https://www.sms.co.tz/api.php".to_string() }
fn default_bind() -> String { "0.0.0.0:5000".to_string() }

impl Default for CardPaths {
    fn default() -> Self {
        Self {
            layout: default_layout(),
            out_dir: default_out_dir(),
            whatsapp_template: default_whatsapp_template(),
            sms_template: default_sms_template(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            log: default_log(),
            whatsapp_content_sid: None,
            sms_api_url: default_sms_api_url(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            verify_base_url: default_verify_base_url(),
            card_base_url: default_card_base_url(),
            dial_code: default_dial_code(),
            card: CardPaths::default(),
            dispatch: DispatchConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_default() {
        let config = AppConfig::load(Path::new("/nonexistent/invitecard.json")).unwrap();
        assert_eq!(config.dial_code, "255");
        assert_eq!(config.server.bind, "0.0.0.0:5000");
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            r#"{"verifyBaseUrl": "https://invites.example/c", "dispatch": {"whatsappContentSid": "HX1"}}"#,
        )
        .unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.verify_base_url, "https://invites.example/c");
        assert_eq!(config.dispatch.whatsapp_content_sid.as_deref(), Some("HX1"));
        assert_eq!(config.dispatch.log, PathBuf::from("twilio_send_log.jsonl"));
        assert_eq!(config.card.out_dir, PathBuf::from("cards"));
    }

    #[test]
    fn test_bad_json_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
