//! Guest records as read from the registry sheet.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuestType {
    #[default]
    Single,
    Double,
}

impl GuestType {
    /// Lenient parse of the sheet's type column. Anything that is not
    /// "double" counts as a single invitation.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("double") => GuestType::Double,
            _ => GuestType::Single,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GuestType::Single => "Single",
            GuestType::Double => "Double",
        }
    }

    /// Label printed on the card.
    pub fn label(&self) -> &'static str {
        match self {
            GuestType::Single => "SINGLE",
            GuestType::Double => "DOUBLE",
        }
    }
}

impl fmt::Display for GuestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub guest_type: GuestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub code: String,
}
