//! Registry Audit - Rule/Report Separation
//!
//! Rules look at the raw sheet rows and produce structured findings; the
//! report decides whether anything blocks a run. The loader itself stays
//! lenient, this is where data problems get surfaced to a human.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::code::{is_canonical, normalize_cell};
use crate::phone::{to_international, PhoneError};
use crate::registry::{guest_from_row, COL_CODE, COL_PHONE};
use crate::source::{Cell, Row};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub rule: String,
    pub severity: Severity,
    /// 1-based sheet row, header included.
    pub row: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub rows: usize,
    pub usable: usize,
    pub findings: Vec<Finding>,
}

impl AuditReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn count(&self, rule: &str) -> usize {
        self.findings.iter().filter(|f| f.rule == rule).count()
    }
}

/// Data rows with their 1-based sheet row number.
pub struct SheetRows<'a> {
    pub rows: Vec<(usize, &'a Row)>,
}

pub trait AuditRule {
    fn name(&self) -> &'static str;
    fn check(&self, sheet: &SheetRows<'_>, ctx: &AuditContext) -> Vec<Finding>;
}

#[derive(Debug, Clone)]
pub struct AuditContext {
    pub dial_code: String,
}

// --- Concrete Rules ---

/// Rows the loader will drop.
pub struct UnusableRowRule;

impl AuditRule for UnusableRowRule {
    fn name(&self) -> &'static str { "unusable_row" }

    fn check(&self, sheet: &SheetRows<'_>, _ctx: &AuditContext) -> Vec<Finding> {
        sheet
            .rows
            .iter()
            .filter(|(_, row)| !row.iter().all(Cell::is_empty) && guest_from_row(row).is_none())
            .map(|(line, _)| Finding {
                rule: self.name().to_string(),
                severity: Severity::Warning,
                row: *line,
                message: "Row has no name or no code and will be skipped".to_string(),
                code: None,
            })
            .collect()
    }
}

/// Two rows normalizing to the same code; the later one shadows the first.
pub struct DuplicateCodeRule;

impl AuditRule for DuplicateCodeRule {
    fn name(&self) -> &'static str { "duplicate_code" }

    fn check(&self, sheet: &SheetRows<'_>, _ctx: &AuditContext) -> Vec<Finding> {
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut findings = vec![];
        for (line, row) in &sheet.rows {
            let Some(guest) = guest_from_row(row) else { continue };
            if let Some(first) = first_seen.get(&guest.code) {
                findings.push(Finding {
                    rule: self.name().to_string(),
                    severity: Severity::Error,
                    row: *line,
                    message: format!("Code also used on row {first}; this row wins"),
                    code: Some(guest.code),
                });
            } else {
                first_seen.insert(guest.code, *line);
            }
        }
        findings
    }
}

/// Codes that are not five digits, or were stored as numbers.
pub struct CodeFormRule;

impl AuditRule for CodeFormRule {
    fn name(&self) -> &'static str { "code_form" }

    fn check(&self, sheet: &SheetRows<'_>, _ctx: &AuditContext) -> Vec<Finding> {
        let mut findings = vec![];
        for (line, row) in &sheet.rows {
            let Some(cell) = row.get(COL_CODE) else { continue };
            let Some(code) = normalize_cell(cell) else { continue };

            let message = if !is_canonical(&code) {
                format!("Code {code:?} is not a 5-digit code")
            } else if matches!(cell, Cell::Number(_)) {
                "Code stored as a number; store it as text to keep leading zeros".to_string()
            } else if cell.as_text().as_deref() != Some(code.as_str()) {
                "Code stored without leading zeros".to_string()
            } else {
                continue;
            };
            findings.push(Finding {
                rule: self.name().to_string(),
                severity: Severity::Info,
                row: *line,
                message,
                code: Some(code),
            });
        }
        findings
    }
}

/// Phone numbers that dispatch would skip.
pub struct PhoneRule;

impl AuditRule for PhoneRule {
    fn name(&self) -> &'static str { "phone" }

    fn check(&self, sheet: &SheetRows<'_>, ctx: &AuditContext) -> Vec<Finding> {
        let mut findings = vec![];
        for (line, row) in &sheet.rows {
            let Some(guest) = guest_from_row(row) else { continue };
            let raw = row.get(COL_PHONE).and_then(Cell::as_text).unwrap_or_default();
            let (severity, message) = match to_international(&raw, &ctx.dial_code) {
                Ok(_) => continue,
                Err(PhoneError::Missing) => (Severity::Info, "No phone number, guest will be skipped".to_string()),
                Err(e) => (Severity::Warning, e.to_string()),
            };
            findings.push(Finding {
                rule: self.name().to_string(),
                severity,
                row: *line,
                message,
                code: Some(guest.code),
            });
        }
        findings
    }
}

/// Runs every rule over a sheet.
pub struct Auditor {
    rules: Vec<Box<dyn AuditRule>>,
    ctx: AuditContext,
}

impl Auditor {
    pub fn new(dial_code: &str) -> Self {
        Self {
            rules: vec![
                Box::new(UnusableRowRule),
                Box::new(DuplicateCodeRule),
                Box::new(CodeFormRule),
                Box::new(PhoneRule),
            ],
            ctx: AuditContext {
                dial_code: dial_code.to_string(),
            },
        }
    }

    /// `rows` is the whole sheet, header first.
    pub fn audit(&self, rows: &[Row]) -> AuditReport {
        let sheet = SheetRows {
            rows: rows.iter().enumerate().skip(1).map(|(i, r)| (i + 1, r)).collect(),
        };

        let mut findings = vec![];
        for rule in &self.rules {
            findings.extend(rule.check(&sheet, &self.ctx));
        }
        findings.sort_by_key(|f| f.row);

        AuditReport {
            rows: sheet.rows.len(),
            usable: sheet.rows.iter().filter(|(_, r)| guest_from_row(r).is_some()).count(),
            findings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.into())
    }

    fn sheet() -> Vec<Row> {
        vec![
            vec![text("Name"), text("Type"), text("Phone"), text("Code")],
            vec![text("Jane Doe"), text("Double"), text("0712345678"), text("00045")],
            vec![text("John Roe"), text("Single"), Cell::Empty, Cell::Number(45.0)],
            vec![text("No Code"), text("Single"), text("0712000000")],
            vec![],
            vec![text("Guest"), Cell::Empty, text("12"), text("VIP-1")],
        ]
    }

    #[test]
    fn test_audit_findings() {
        let report = Auditor::new("255").audit(&sheet());
        assert_eq!(report.rows, 5);
        assert_eq!(report.usable, 3);
        assert_eq!(report.count("unusable_row"), 1);
        assert_eq!(report.count("duplicate_code"), 1);
        assert!(report.has_errors());

        let dup = report.findings.iter().find(|f| f.rule == "duplicate_code").unwrap();
        assert_eq!(dup.row, 3);
        assert_eq!(dup.code.as_deref(), Some("00045"));

        // numeric 45 and non-canonical VIP-1
        assert_eq!(report.count("code_form"), 2);
        // missing phone on row 3, invalid on row 6
        assert_eq!(report.count("phone"), 2);
    }

    #[test]
    fn test_clean_sheet() {
        let rows = vec![
            vec![text("Name")],
            vec![text("Jane Doe"), text("Double"), text("0712345678"), text("00045")],
        ];
        let report = Auditor::new("255").audit(&rows);
        assert!(report.findings.is_empty());
        assert!(!report.has_errors());
    }
}
