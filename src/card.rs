//! Card Rendering - Name, Labels and QR on the Blank Invitation

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageError, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use qrcode::{Color, EcLevel, QrCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::code::normalize_code;
use crate::guest::GuestRecord;
use crate::templates::CardTemplate;

#[derive(Debug, Error)]
pub enum CardError {
    #[error("Cannot load card background {path}: {source}")]
    Background {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("Guest {0:?} has no usable code")]
    MissingCode(String),

    #[error("Code {0:?} cannot be used as a file name")]
    UnsafeCode(String),

    #[error("QR encoding failed: {0}")]
    Qr(String),

    #[error("Card {width}x{height} too small for a {qr}px QR with {margin}px margin")]
    Layout { width: u32, height: u32, qr: u32, margin: u32 },

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] ImageError),
}

struct Fonts {
    name: Option<FontVec>,
    label: Option<FontVec>,
}

pub struct CardRenderer {
    template: CardTemplate,
    background: RgbImage,
    fonts: Fonts,
    verify_base_url: String,
}

impl CardRenderer {
    /// Load the background named by the template.
    pub fn new(template: CardTemplate, verify_base_url: &str) -> Result<Self, CardError> {
        let background = image::open(&template.background)
            .map_err(|source| CardError::Background {
                path: template.background.clone(),
                source,
            })?
            .to_rgb8();
        Ok(Self::with_background(template, background, verify_base_url))
    }

    pub fn with_background(template: CardTemplate, background: RgbImage, verify_base_url: &str) -> Self {
        let fonts = Fonts {
            name: first_loadable_font(&template.name_fonts),
            label: first_loadable_font(&template.label_fonts),
        };
        if fonts.name.is_none() {
            warn!("no name font could be loaded, cards will carry no name text");
        }
        if fonts.label.is_none() {
            warn!("no label font could be loaded, cards will carry no type/code labels");
        }
        Self {
            template,
            background,
            fonts,
            verify_base_url: verify_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The URL embedded in the QR code, always with the canonical code.
    pub fn invitation_url(&self, code: &str) -> Option<String> {
        normalize_code(code).map(|code| format!("{}/{}", self.verify_base_url, code))
    }

    pub fn render(&self, guest: &GuestRecord) -> Result<RgbImage, CardError> {
        let code = normalize_code(&guest.code).ok_or_else(|| CardError::MissingCode(guest.name.clone()))?;
        let url = self
            .invitation_url(&code)
            .ok_or_else(|| CardError::MissingCode(guest.name.clone()))?;

        let t = &self.template;
        let mut card = self.background.clone();
        let (width, height) = card.dimensions();
        let color = Rgb(t.text_color);

        let layout_err = || CardError::Layout {
            width,
            height,
            qr: t.qr_size,
            margin: t.margin,
        };
        let qr_x = width.checked_sub(t.qr_size + t.margin).ok_or_else(layout_err)?;
        let qr_y = height.checked_sub(t.qr_size + t.margin).ok_or_else(layout_err)?;

        if let Some(font) = &self.fonts.name {
            let scale = PxScale::from(t.name_size);
            let (w, h) = text_size(scale, font, &guest.name);
            let x = (width / 2) as i32 - (w / 2) as i32;
            let y = t.name_bottom_y as i32 - h as i32;
            draw_text_mut(&mut card, color, x, y, scale, font, &guest.name);
        }

        let qr = qr_image(&url, t.qr_size, t.qr_quiet_zone)?;
        imageops::overlay(&mut card, &qr, qr_x as i64, qr_y as i64);

        if let Some(font) = &self.fonts.label {
            let scale = PxScale::from(t.label_size);
            let label = guest.guest_type.label();
            let (type_w, type_h) = text_size(scale, font, label);
            let (code_w, code_h) = text_size(scale, font, &code);
            let center = (qr_x + t.qr_size / 2) as i32;

            let code_y = qr_y as i32 - t.qr_label_spacing as i32 - code_h as i32;
            let type_y = code_y - t.label_spacing as i32 - type_h as i32;
            draw_text_mut(&mut card, color, center - (type_w / 2) as i32, type_y, scale, font, label);
            draw_text_mut(&mut card, color, center - (code_w / 2) as i32, code_y, scale, font, &code);
        }

        debug!(code = %code, url = %url, "rendered card");
        Ok(card)
    }
}

/// Black-on-white QR of `data`, `size` pixels square including the quiet zone.
pub fn qr_image(data: &str, size: u32, quiet_zone: u32) -> Result<RgbImage, CardError> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)
        .map_err(|e| CardError::Qr(e.to_string()))?;
    let width = code.width() as u32;
    let span = width + 2 * quiet_zone;

    let mut modules = GrayImage::from_pixel(span, span, Luma([255]));
    for (i, color) in code.to_colors().into_iter().enumerate() {
        if color == Color::Dark {
            let i = i as u32;
            modules.put_pixel(i % width + quiet_zone, i / width + quiet_zone, Luma([0]));
        }
    }

    let scaled = imageops::resize(&modules, size, size, FilterType::Nearest);
    Ok(DynamicImage::ImageLuma8(scaled).to_rgb8())
}

pub fn encode_png(card: &RgbImage) -> Result<Vec<u8>, CardError> {
    let mut bytes = Vec::new();
    card.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Folder-safe form of a guest name: `Jane & John Doe` -> `Jane_John_Doe`.
pub fn sanitize_folder_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_whitespace() || c == '&' || c == '.' || c == '_' {
            pending_sep = true;
        } else if c.is_alphanumeric() || c == '-' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        }
    }
    out
}

/// True when `code` can name a folder and file without leaving the output
/// directory or tripping over reserved characters on common filesystems.
pub fn is_file_safe_code(code: &str) -> bool {
    !code.is_empty()
        && !code.starts_with('.')
        && !code.contains("..")
        && !code
            .chars()
            .any(|c| c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
}

fn first_loadable_font(candidates: &[PathBuf]) -> Option<FontVec> {
    candidates.iter().find_map(|path| load_font(path))
}

fn load_font(path: &Path) -> Option<FontVec> {
    let bytes = fs::read(path).ok()?;
    match FontVec::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping unreadable font");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::GuestType;

    fn renderer(width: u32, height: u32) -> CardRenderer {
        let template = CardTemplate {
            name_fonts: vec![],
            label_fonts: vec![],
            qr_size: 120,
            margin: 10,
            ..CardTemplate::default()
        };
        let background = RgbImage::from_pixel(width, height, Rgb([200, 180, 150]));
        CardRenderer::with_background(template, background, "http://invites.example/c/")
    }

    fn guest(code: &str) -> GuestRecord {
        GuestRecord {
            name: "Jane Doe".into(),
            guest_type: GuestType::Double,
            phone: None,
            code: code.into(),
        }
    }

    #[test]
    fn test_invitation_url_is_canonical() {
        let r = renderer(400, 400);
        assert_eq!(r.invitation_url("45").as_deref(), Some("http://invites.example/c/00045"));
        assert_eq!(r.invitation_url("VIP-1").as_deref(), Some("http://invites.example/c/VIP-1"));
        assert_eq!(r.invitation_url(" "), None);
    }

    #[test]
    fn test_render_places_qr_bottom_right() {
        let r = renderer(400, 300);
        let card = r.render(&guest("00045")).unwrap();
        assert_eq!(card.dimensions(), (400, 300));
        // Quiet zone corner of the QR is white, background elsewhere untouched.
        assert_eq!(card.get_pixel(400 - 10 - 120 + 1, 300 - 10 - 120 + 1), &Rgb([255, 255, 255]));
        assert_eq!(card.get_pixel(5, 5), &Rgb([200, 180, 150]));
    }

    #[test]
    fn test_render_rejects_tiny_background() {
        let r = renderer(100, 100);
        assert!(matches!(r.render(&guest("1")), Err(CardError::Layout { .. })));
    }

    #[test]
    fn test_qr_has_dark_modules() {
        let qr = qr_image("http://invites.example/c/00045", 100, 4);
        let qr = qr.unwrap();
        assert_eq!(qr.dimensions(), (100, 100));
        assert!(qr.pixels().any(|p| p.0 == [0, 0, 0]));
        assert_eq!(qr.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_png_signature() {
        let png = encode_png(&RgbImage::new(2, 2)).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("Jane & John Doe"), "Jane_John_Doe");
        assert_eq!(sanitize_folder_name("  Mr. Smith  "), "Mr_Smith");
        assert_eq!(sanitize_folder_name("Anna-Marie (VIP)!"), "Anna-Marie_VIP");
        assert_eq!(sanitize_folder_name("Zoë__Ng"), "Zoë_Ng");
    }

    #[test]
    fn test_file_safe_code() {
        for code in ["00045", "VIP-1", "VIP 1", "123456"] {
            assert!(is_file_safe_code(code), "{code}");
        }
        for code in ["A/B", "x/../../escaped", "..", ".hidden", "a\\b", "C:1", "", "a\tb"] {
            assert!(!is_file_safe_code(code), "{code:?}");
        }
    }
}
