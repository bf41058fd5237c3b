//! Tabular Source - Spreadsheet Rows as Typed Cells
//!
//! One reader abstraction, one implementation. The OpenDocument
//! spreadsheet is a zip archive whose `content.xml` holds the table; cells
//! keep their declared value type so callers can tell a numeric code that
//! dropped its leading zeros from a text code.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::code::render_number;

/// Repeat counts above this are styling padding, not data.
const MAX_REPEAT: usize = 1024;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Registry source not found: {0}")]
    Missing(PathBuf),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a spreadsheet archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Malformed spreadsheet XML: {0}")]
    Xml(String),
}

impl From<quick_xml::Error> for SourceError {
    fn from(e: quick_xml::Error) -> Self {
        SourceError::Xml(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(t) => t.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    /// Text as a human sees it in the sheet.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(t) => {
                let t = t.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Cell::Number(v) => render_number(*v),
        }
    }
}

pub type Row = Vec<Cell>;

/// Anything that yields spreadsheet rows.
pub trait TabularSource {
    fn describe(&self) -> String;
    fn rows(&self) -> Result<Vec<Row>, SourceError>;
}

/// OpenDocument spreadsheet (`.ods`); reads the first table only.
#[derive(Debug, Clone)]
pub struct OdsSource {
    path: PathBuf,
}

impl OdsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_content_xml(&self) -> Result<String, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::Missing(self.path.clone()));
        }
        let io_err = |source| SourceError::Io {
            path: self.path.clone(),
            source,
        };
        let file = File::open(&self.path).map_err(io_err)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let mut entry = archive.by_name("content.xml")?;
        let mut xml = String::new();
        entry.read_to_string(&mut xml).map_err(io_err)?;
        Ok(xml)
    }
}

impl TabularSource for OdsSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn rows(&self) -> Result<Vec<Row>, SourceError> {
        let xml = self.read_content_xml()?;
        parse_content_xml(&xml)
    }
}

#[derive(Default)]
struct PendingCell {
    value: Option<f64>,
    text: String,
    paragraphs: usize,
    repeat: usize,
}

impl PendingCell {
    fn open(e: &BytesStart<'_>) -> Result<Self, SourceError> {
        let mut cell = PendingCell {
            repeat: 1,
            ..Default::default()
        };
        let mut numeric = false;
        let mut value = None;
        for attr in e.attributes() {
            let attr = attr.map_err(|e| SourceError::Xml(e.to_string()))?;
            let text = attr.unescape_value()?;
            match attr.key.as_ref() {
                b"office:value-type" => {
                    numeric = matches!(text.as_ref(), "float" | "percentage" | "currency");
                }
                b"office:value" => value = text.parse::<f64>().ok(),
                b"table:number-columns-repeated" => cell.repeat = parse_repeat(&text),
                _ => {}
            }
        }
        if numeric {
            cell.value = value;
        }
        Ok(cell)
    }

    fn finish(self) -> (Cell, usize) {
        let cell = match self.value {
            Some(v) => Cell::Number(v),
            None if self.text.is_empty() => Cell::Empty,
            None => Cell::Text(self.text),
        };
        (cell, self.repeat)
    }
}

/// Parse the first `table:table` of an ODS `content.xml`.
pub fn parse_content_xml(xml: &str) -> Result<Vec<Row>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<Row> = Vec::new();
    let mut row: Option<Row> = None;
    let mut cell: Option<PendingCell> = None;
    let mut in_paragraph = false;
    let mut annotation_depth = 0usize;
    let mut row_repeat = 1usize;
    let mut table_depth = 0usize;
    let mut tables_seen = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"table:table" => {
                    table_depth += 1;
                    tables_seen += 1;
                }
                _ if tables_seen != 1 || table_depth == 0 => {}
                b"table:table-row" => {
                    row = Some(Vec::new());
                    row_repeat = repeat_count(&e, "table:number-rows-repeated")?;
                }
                b"table:table-cell" | b"table:covered-table-cell" => {
                    cell = Some(PendingCell::open(&e)?);
                }
                // Cell comments carry their own paragraphs.
                b"office:annotation" => annotation_depth += 1,
                b"text:p" if annotation_depth == 0 => {
                    if let Some(c) = cell.as_mut() {
                        if c.paragraphs > 0 {
                            c.text.push('\n');
                        }
                        c.paragraphs += 1;
                        in_paragraph = true;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                _ if tables_seen != 1 || table_depth == 0 => {}
                b"table:table-cell" | b"table:covered-table-cell" => {
                    if let Some(r) = row.as_mut() {
                        let (value, repeat) = PendingCell::open(&e)?.finish();
                        push_repeated(r, value, repeat);
                    }
                }
                b"text:s" => {
                    if let (Some(c), true) = (cell.as_mut(), in_paragraph) {
                        let count = e
                            .try_get_attribute("text:c")
                            .ok()
                            .flatten()
                            .and_then(|a| a.unescape_value().ok()?.parse::<usize>().ok())
                            .unwrap_or(1)
                            .min(MAX_REPEAT);
                        c.text.extend(std::iter::repeat(' ').take(count));
                    }
                }
                b"text:line-break" => {
                    if let (Some(c), true) = (cell.as_mut(), in_paragraph) {
                        c.text.push('\n');
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let (Some(c), true) = (cell.as_mut(), in_paragraph) {
                    c.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if let (Some(c), true) = (cell.as_mut(), in_paragraph) {
                    c.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"table:table" => {
                    table_depth = table_depth.saturating_sub(1);
                }
                _ if tables_seen != 1 || table_depth == 0 => {}
                b"office:annotation" => annotation_depth = annotation_depth.saturating_sub(1),
                b"text:p" => in_paragraph = false,
                b"table:table-cell" | b"table:covered-table-cell" => {
                    if let (Some(r), Some(c)) = (row.as_mut(), cell.take()) {
                        let (value, repeat) = c.finish();
                        push_repeated(r, value, repeat);
                    }
                }
                b"table:table-row" => {
                    if let Some(mut r) = row.take() {
                        while r.last().is_some_and(Cell::is_empty) {
                            r.pop();
                        }
                        // Empty repeated rows are padding, count them once.
                        let copies = if r.is_empty() { 1 } else { row_repeat };
                        for _ in 1..copies {
                            rows.push(r.clone());
                        }
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    while rows.last().is_some_and(|r| r.is_empty()) {
        rows.pop();
    }
    Ok(rows)
}

fn parse_repeat(raw: &str) -> usize {
    raw.parse::<usize>().unwrap_or(1).clamp(1, MAX_REPEAT)
}

fn repeat_count(e: &BytesStart<'_>, key: &str) -> Result<usize, SourceError> {
    match e.try_get_attribute(key).map_err(|e| SourceError::Xml(e.to_string()))? {
        Some(attr) => Ok(parse_repeat(&attr.unescape_value()?)),
        None => Ok(1),
    }
}

fn push_repeated(row: &mut Row, cell: Cell, repeat: usize) {
    for _ in 1..repeat {
        row.push(cell.clone());
    }
    row.push(cell);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0"
    xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0"
    xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0">
  <office:body><office:spreadsheet>
    <table:table table:name="Guests">
      <table:table-row>
        <table:table-cell office:value-type="string"><text:p>Name</text:p></table:table-cell>
        <table:table-cell office:value-type="string"><text:p>Type</text:p></table:table-cell>
      </table:table-row>
      <table:table-row>
        <table:table-cell office:value-type="string"><text:p>Jane &amp; John</text:p></table:table-cell>
        <table:table-cell table:number-columns-repeated="2"/>
        <table:table-cell office:value-type="float" office:value="45"><text:p>45</text:p></table:table-cell>
        <table:table-cell table:number-columns-repeated="1000"/>
      </table:table-row>
      <table:table-row>
        <table:table-cell office:value-type="string"><text:p>A<text:s text:c="2"/>B</text:p></table:table-cell>
      </table:table-row>
      <table:table-row table:number-rows-repeated="1000"><table:table-cell/></table:table-row>
    </table:table>
    <table:table table:name="Other">
      <table:table-row><table:table-cell><text:p>ignored</text:p></table:table-cell></table:table-row>
    </table:table>
  </office:spreadsheet></office:body>
</office:document-content>"#;

    #[test]
    fn test_parses_typed_cells() {
        let rows = parse_content_xml(SHEET).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[1],
            vec![
                Cell::Text("Jane & John".into()),
                Cell::Empty,
                Cell::Empty,
                Cell::Number(45.0),
            ]
        );
        assert_eq!(rows[2], vec![Cell::Text("A  B".into())]);
    }

    fn table(body: &str) -> String {
        format!(
            r#"<office:document-content xmlns:office="o" xmlns:table="t" xmlns:text="x"><office:body><office:spreadsheet><table:table>{body}</table:table></office:spreadsheet></office:body></office:document-content>"#
        )
    }

    #[test]
    fn test_cell_comments_are_not_values() {
        let xml = table(
            r#"<table:table-row>
                <table:table-cell office:value-type="string"><office:annotation><text:p>check spelling</text:p></office:annotation><text:p>Jane Doe</text:p></table:table-cell>
                <table:table-cell office:value-type="string"><text:p>00045</text:p><office:annotation><text:p>reprinted</text:p><text:p>twice</text:p></office:annotation></table:table-cell>
            </table:table-row>"#,
        );
        let rows = parse_content_xml(&xml).unwrap();
        assert_eq!(
            rows,
            vec![vec![Cell::Text("Jane Doe".into()), Cell::Text("00045".into())]]
        );
    }

    #[test]
    fn test_repeated_rows_are_expanded() {
        let xml = table(
            r#"<table:table-row><table:table-cell><text:p>Name</text:p></table:table-cell></table:table-row>
            <table:table-row table:number-rows-repeated="2"><table:table-cell><text:p>Same</text:p></table:table-cell></table:table-row>
            <table:table-row table:number-rows-repeated="3"><table:table-cell/></table:table-row>
            <table:table-row><table:table-cell><text:p>Last</text:p></table:table-cell></table:table-row>
            <table:table-row table:number-rows-repeated="1048570"><table:table-cell/></table:table-row>"#,
        );
        let rows = parse_content_xml(&xml).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Cell::Text("Name".into())],
                vec![Cell::Text("Same".into())],
                vec![Cell::Text("Same".into())],
                vec![],
                vec![Cell::Text("Last".into())],
            ]
        );
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(Cell::Number(712345678.0).as_text().as_deref(), Some("712345678"));
        assert_eq!(Cell::Text("  ".into()).as_text(), None);
        assert_eq!(Cell::Empty.as_text(), None);
    }

    #[test]
    fn test_missing_file() {
        let err = OdsSource::new("/nonexistent/guests.ods").rows().unwrap_err();
        assert!(matches!(err, SourceError::Missing(_)));
    }
}
