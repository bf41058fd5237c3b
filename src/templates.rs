//! Templates - Card Layout and Message Text

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

pub const CODE_PLACEHOLDER: &str = "{code}";

const DEFAULT_WHATSAPP: &str = "Mwaliko wa harusi. Namba ya mwaliko *{code}*";
const DEFAULT_SMS: &str = "Mwaliko wa harusi. Namba ya mwaliko {code}";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Cannot read card template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid card template {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where things go on the blank card. Every field has a default matching
/// the stock invitation artwork.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTemplate {
    #[serde(default = "default_background")]
    pub background: PathBuf,
    #[serde(default = "default_fonts")]
    pub name_fonts: Vec<PathBuf>,
    #[serde(default = "default_label_fonts")]
    pub label_fonts: Vec<PathBuf>,
    #[serde(default = "default_name_size")]
    pub name_size: f32,
    /// Baseline-ish: bottom edge of the name text, from the top.
    #[serde(default = "default_name_bottom")]
    pub name_bottom_y: u32,
    #[serde(default = "default_label_size")]
    pub label_size: f32,
    #[serde(default = "default_qr_size")]
    pub qr_size: u32,
    #[serde(default = "default_margin")]
    pub margin: u32,
    #[serde(default = "default_quiet_zone")]
    pub qr_quiet_zone: u32,
    #[serde(default = "default_label_spacing")]
    pub label_spacing: u32,
    #[serde(default = "default_qr_label_spacing")]
    pub qr_label_spacing: u32,
    #[serde(default)]
    pub text_color: [u8; 3],
}

fn default_background() -> PathBuf { PathBuf::from("blank_invite.png") }
fn default_fonts() -> Vec<PathBuf> {
    [
        "/usr/share/fonts/truetype/dejavu/DejaVuSerif-Bold.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSerif-Bold.ttf",
        "/System/Library/Fonts/Supplemental/Times New Roman Bold.ttf",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}
fn default_label_fonts() -> Vec<PathBuf> {
    [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}
fn default_name_size() -> f32 { 50.0 }
fn default_name_bottom() -> u32 { 670 }
fn default_label_size() -> f32 { 38.0 }
fn default_qr_size() -> u32 { 300 }
fn default_margin() -> u32 { 40 }
fn default_quiet_zone() -> u32 { 4 }
fn default_label_spacing() -> u32 { 8 }
fn default_qr_label_spacing() -> u32 { 20 }

impl Default for CardTemplate {
    fn default() -> Self {
        Self {
            background: default_background(),
            name_fonts: default_fonts(),
            label_fonts: default_label_fonts(),
            name_size: default_name_size(),
            name_bottom_y: default_name_bottom(),
            label_size: default_label_size(),
            qr_size: default_qr_size(),
            margin: default_margin(),
            qr_quiet_zone: default_quiet_zone(),
            label_spacing: default_label_spacing(),
            qr_label_spacing: default_qr_label_spacing(),
            text_color: [0, 0, 0],
        }
    }
}

impl CardTemplate {
    /// Load a layout file; a missing file means the stock layout.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| TemplateError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The two invitation texts sent alongside a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplates {
    pub whatsapp: String,
    pub sms: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            whatsapp: DEFAULT_WHATSAPP.to_string(),
            sms: DEFAULT_SMS.to_string(),
        }
    }
}

impl MessageTemplates {
    /// Read both templates; an unreadable file falls back to the built-in text.
    pub fn load(whatsapp: &Path, sms: &Path) -> Self {
        Self {
            whatsapp: read_or_default(whatsapp, DEFAULT_WHATSAPP),
            sms: read_or_default(sms, DEFAULT_SMS),
        }
    }

    pub fn whatsapp_for(&self, code: &str) -> String {
        render(&self.whatsapp, code)
    }

    pub fn sms_for(&self, code: &str) -> String {
        render(&self.sms, code)
    }
}

/// Substitute every `{code}` verbatim.
pub fn render(template: &str, code: &str) -> String {
    template.replace(CODE_PLACEHOLDER, code)
}

fn read_or_default(path: &Path, fallback: &str) -> String {
    match fs::read_to_string(path) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "message template unavailable, using default");
            fallback.to_string()
        }
    }
}
