//! Guest Registry - Code-Keyed Lookup
//!
//! Built fresh from the sheet on every load; nothing is cached between
//! calls. Lookup tolerates codes stored as text in one export and as
//! numbers in another.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::code::{is_all_digits, normalize_cell, pad_code, normalize_code};
use crate::guest::{GuestRecord, GuestType};
use crate::source::{OdsSource, Row, SourceError, TabularSource};

pub const COL_NAME: usize = 0;
pub const COL_TYPE: usize = 1;
pub const COL_PHONE: usize = 2;
pub const COL_CODE: usize = 3;

/// Guest list plus the code index over it.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    guests: Vec<GuestRecord>,
    by_code: HashMap<String, usize>,
}

/// A successful lookup and the registry key that matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub guest: &'a GuestRecord,
    pub key: &'a str,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-extracted records. Later duplicates win.
    pub fn from_guests(guests: impl IntoIterator<Item = GuestRecord>) -> Self {
        let mut registry = Self::new();
        for guest in guests {
            registry.insert(guest);
        }
        registry
    }

    /// Read a registry, degrading to empty when the source is unusable.
    pub fn load(source: &dyn TabularSource) -> Self {
        match Self::try_load(source) {
            Ok(registry) => registry,
            Err(e) => {
                warn!(source = %source.describe(), error = %e, "guest registry unavailable");
                Self::new()
            }
        }
    }

    pub fn try_load(source: &dyn TabularSource) -> Result<Self, SourceError> {
        let rows = source.rows()?;
        let registry = Self::from_guests(rows.iter().skip(1).filter_map(guest_from_row));
        debug!(
            source = %source.describe(),
            rows = rows.len().saturating_sub(1),
            guests = registry.len(),
            "loaded guest registry"
        );
        Ok(registry)
    }

    pub fn insert(&mut self, guest: GuestRecord) {
        match self.by_code.get(&guest.code) {
            Some(&idx) => {
                debug!(code = %guest.code, "duplicate code, later row wins");
                self.guests[idx] = guest;
            }
            None => {
                self.by_code.insert(guest.code.clone(), self.guests.len());
                self.guests.push(guest);
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<&GuestRecord> {
        self.by_code.get(code).map(|&idx| &self.guests[idx])
    }

    /// Resolve a human-supplied code.
    ///
    /// Tries the normalized input, then the raw input, then the
    /// zero-padded digits.
    pub fn resolve(&self, input: &str) -> Option<Resolved<'_>> {
        if let Some(normalized) = normalize_code(input) {
            if let Some(hit) = self.entry(&normalized) {
                return Some(hit);
            }
        }
        if let Some(hit) = self.entry(input) {
            return Some(hit);
        }
        let trimmed = input.trim();
        if is_all_digits(trimmed) {
            return self.entry(&pad_code(trimmed));
        }
        None
    }

    fn entry(&self, key: &str) -> Option<Resolved<'_>> {
        let (key, &idx) = self.by_code.get_key_value(key)?;
        Some(Resolved {
            guest: &self.guests[idx],
            key: key.as_str(),
        })
    }

    /// Guests in sheet order, one per code.
    pub fn guests(&self) -> &[GuestRecord] {
        &self.guests
    }

    pub fn len(&self) -> usize {
        self.guests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }
}

/// Extract a usable record from one sheet row.
///
/// Rows without a name or a code are dropped.
pub fn guest_from_row(row: &Row) -> Option<GuestRecord> {
    let text = |col: usize| row.get(col).and_then(|c| c.as_text());

    let name = text(COL_NAME).filter(|n| !n.eq_ignore_ascii_case("nan"))?;
    let code = row.get(COL_CODE).and_then(normalize_cell)?;
    let guest_type = GuestType::parse(text(COL_TYPE).as_deref());
    let phone = text(COL_PHONE).filter(|p| !p.eq_ignore_ascii_case("nan"));

    Some(GuestRecord {
        name,
        guest_type,
        phone,
        code,
    })
}

/// Where the service gets its registry from.
pub trait RegistryProvider: Send + Sync {
    fn registry(&self) -> Registry;
}

/// Re-reads the spreadsheet on every call.
#[derive(Debug, Clone)]
pub struct SpreadsheetRegistry {
    source: OdsSource,
}

impl SpreadsheetRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            source: OdsSource::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.source.path()
    }
}

impl RegistryProvider for SpreadsheetRegistry {
    fn registry(&self) -> Registry {
        Registry::load(&self.source)
    }
}

/// A fixed registry, never refreshed.
impl RegistryProvider for Registry {
    fn registry(&self) -> Registry {
        self.clone()
    }
}
