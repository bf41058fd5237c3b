//! Phone numbers in the destination country's international form.

use thiserror::Error;

pub const DEFAULT_DIAL_CODE: &str = "255";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("No phone number")]
    Missing,

    #[error("Invalid phone number: {0}")]
    Invalid(String),
}

/// `0712345678` -> `+255712345678` for dial code `255`.
///
/// Keeps digits and `+`, then applies the country's trunk-prefix rules.
/// The result must be `+` followed by 10 to 15 digits.
pub fn to_international(raw: &str, dial_code: &str) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Err(PhoneError::Missing);
    }

    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    let formatted = if let Some(local) = cleaned.strip_prefix('0') {
        format!("+{dial_code}{local}")
    } else if cleaned.starts_with('+') {
        cleaned
    } else if cleaned.starts_with(dial_code) {
        format!("+{cleaned}")
    } else {
        format!("+{dial_code}{cleaned}")
    };

    if is_valid_international(&formatted) {
        Ok(formatted)
    } else {
        Err(PhoneError::Invalid(trimmed.to_string()))
    }
}

/// Gateway form: international digits without the `+`.
pub fn to_gateway(raw: &str, dial_code: &str) -> Result<String, PhoneError> {
    to_international(raw, dial_code).map(|p| p.trim_start_matches('+').to_string())
}

pub fn is_valid_international(phone: &str) -> bool {
    match phone.strip_prefix('+') {
        Some(digits) => (10..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
