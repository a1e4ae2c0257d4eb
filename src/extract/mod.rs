//! Extractors: one per [`FormatKind`], each turning raw bytes into a [`CanonicalTable`].
//!
//! Most callers go through [`extractor_for`], which maps a detected format onto its
//! extractor. Format-specific extractors are also available directly:
//!
//! - [`delimited`]: CSV/TSV-like text with delimiter and encoding detection
//! - [`spreadsheet`]: workbooks read with `calamine`
//! - [`markup`]: the first data table of an HTML or XML document
//! - [`json`]: arrays/objects of records and NDJSON
//!
//! Shared rules: whitespace-only cells become [`crate::types::Value::Null`] and rows are never
//! dropped silently; a row that cannot be represented fails the whole extraction.

pub mod delimited;
pub mod encoding;
pub mod json;
pub mod markup;
pub mod spreadsheet;

use crate::detect::{FormatKind, MarkupKind};
use crate::error::ExtractionError;
use crate::types::CanonicalTable;

pub use delimited::DelimitedExtractor;
pub use encoding::{decode_text, TextEncoding};
pub use json::JsonExtractor;
pub use markup::{HtmlExtractor, XmlExtractor};
pub use spreadsheet::SpreadsheetExtractor;

/// Output of a successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub table: CanonicalTable,
    /// Non-fatal issues (e.g. unresolved formulas surfaced as null).
    pub warnings: Vec<String>,
}

impl Extraction {
    pub fn new(table: CanonicalTable) -> Self {
        Self {
            table,
            warnings: Vec::new(),
        }
    }
}

/// Capability implemented by every extractor.
pub trait Extractor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Convert `content` into a canonical table.
    fn extract(&self, content: &[u8]) -> Result<Extraction, ExtractionError>;
}

/// How to choose the sheet when extracting a workbook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SheetSelection {
    /// The first sheet (default).
    #[default]
    First,
    /// A sheet by name.
    Name(String),
    /// A sheet by zero-based position.
    Index(usize),
}

/// Per-run extraction options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractOptions {
    pub sheet: SheetSelection,
    /// Force a delimiter instead of sniffing one.
    pub delimiter: Option<u8>,
}

/// The extractor for `kind`, or `None` for [`FormatKind::Unknown`].
pub fn extractor_for(kind: FormatKind, options: &ExtractOptions) -> Option<Box<dyn Extractor>> {
    match kind {
        FormatKind::Delimited => Some(Box::new(DelimitedExtractor::new(options.delimiter))),
        FormatKind::Spreadsheet => Some(Box::new(SpreadsheetExtractor::new(options.sheet.clone()))),
        FormatKind::Markup(MarkupKind::Html) => Some(Box::new(HtmlExtractor)),
        FormatKind::Markup(MarkupKind::Xml) => Some(Box::new(XmlExtractor)),
        FormatKind::Json => Some(Box::new(JsonExtractor)),
        FormatKind::Unknown => None,
    }
}
