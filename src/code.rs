//! Invitation Codes - Canonical Form
//!
//! Every producer (card generator, dispatch) and consumer (verification
//! service) goes through `normalize_code` so a code resolves identically
//! whether it was typed, scanned, or read back from a numeric cell that
//! dropped its leading zeros.

use crate::source::Cell;

/// Width of a canonical numeric code.
pub const CODE_WIDTH: usize = 5;

/// Canonicalize a raw code string.
///
/// Returns `None` for empty input and the `nan` sentinel spreadsheets
/// emit for blank numeric cells.
pub fn normalize_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return None;
    }

    let digits = strip_float_artifact(trimmed);
    if is_all_digits(digits) {
        Some(pad_code(digits))
    } else {
        Some(trimmed.to_string())
    }
}

/// Canonicalize a spreadsheet cell.
pub fn normalize_cell(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Empty => None,
        Cell::Text(text) => normalize_code(text),
        Cell::Number(value) => normalize_code(&render_number(*value)?),
    }
}

/// Left-pad with zeros to `CODE_WIDTH`. Longer input is returned as is.
pub fn pad_code(digits: &str) -> String {
    format!("{digits:0>width$}", width = CODE_WIDTH)
}

/// True for exactly `CODE_WIDTH` ASCII digits.
pub fn is_canonical(code: &str) -> bool {
    code.len() == CODE_WIDTH && is_all_digits(code)
}

pub(crate) fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Render a numeric cell the way a human would have typed it.
///
/// Integral values drop the fractional part; `NaN` and infinities have no
/// textual form.
pub(crate) fn render_number(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Some(format!("{}", value as i64))
    } else {
        Some(value.to_string())
    }
}

// "123.0" and "123.00" come from float round-trips through the sheet.
fn strip_float_artifact(s: &str) -> &str {
    match s.rsplit_once('.') {
        Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b == b'0') => head,
        _ => s,
    }
}
