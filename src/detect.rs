//! Format detection.
//!
//! [`detect`] picks an extraction strategy from the filename extension and a content sample.
//! The extension is only a hint: binary formats must carry their byte signature, and a text
//! extension on a binary payload is rejected.

use std::fmt;
use std::path::Path;

use serde::{Serialize, Serializer};

/// Number of leading bytes inspected when sniffing content.
pub const SNIFF_LEN: usize = 8 * 1024;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Markup flavour handled by the markup extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkupKind {
    Html,
    Xml,
}

/// The closed set of formats the pipeline can extract.
///
/// Serializes as its display name (`"delimited"`, `"html"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    /// Comma/semicolon/tab separated text.
    Delimited,
    /// Workbook formats (`.xlsx`, `.xls`, `.ods`, ...).
    Spreadsheet,
    /// HTML or XML documents.
    Markup(MarkupKind),
    /// JSON array/object or NDJSON.
    Json,
    /// No extractor matches.
    Unknown,
}

impl FormatKind {
    /// Parse a format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Some(Self::Delimited),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Self::Spreadsheet),
            "html" | "htm" => Some(Self::Markup(MarkupKind::Html)),
            "xml" => Some(Self::Markup(MarkupKind::Xml)),
            "json" | "ndjson" => Some(Self::Json),
            _ => None,
        }
    }

    fn is_binary(self) -> bool {
        matches!(self, Self::Spreadsheet)
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FormatKind::Delimited => "delimited",
            FormatKind::Spreadsheet => "spreadsheet",
            FormatKind::Markup(MarkupKind::Html) => "html",
            FormatKind::Markup(MarkupKind::Xml) => "xml",
            FormatKind::Json => "json",
            FormatKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl Serialize for FormatKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Select an extraction strategy for `filename` whose content starts with `sample`.
///
/// Deterministic: the same filename and bytes always give the same answer. Only the first
/// [`SNIFF_LEN`] bytes of `sample` are inspected.
pub fn detect(filename: &str, sample: &[u8]) -> FormatKind {
    let sample = &sample[..sample.len().min(SNIFF_LEN)];
    let sniffed = sniff(sample);
    let hinted = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(FormatKind::from_extension);

    match (hinted, sniffed) {
        (Some(hint), sniffed) if hint.is_binary() => {
            if sniffed == Some(hint) {
                hint
            } else {
                FormatKind::Unknown
            }
        }
        (Some(_), Some(sniffed)) if sniffed.is_binary() => FormatKind::Unknown,
        (Some(hint), _) => hint,
        (None, Some(sniffed)) => sniffed,
        (None, None) => FormatKind::Unknown,
    }
}

/// Content-only classification.
fn sniff(sample: &[u8]) -> Option<FormatKind> {
    if sample.starts_with(ZIP_MAGIC) || sample.starts_with(OLE_MAGIC) {
        return Some(FormatKind::Spreadsheet);
    }
    if sample.contains(&0) {
        return None;
    }

    let body = sample.strip_prefix(UTF8_BOM).unwrap_or(sample);
    let start = body.iter().position(|b| !b.is_ascii_whitespace())?;
    let body = &body[start..];
    let lowered = String::from_utf8_lossy(body).to_ascii_lowercase();

    match body[0] {
        b'<' if lowered.contains("<html") || lowered.contains("<table") => {
            Some(FormatKind::Markup(MarkupKind::Html))
        }
        b'<' => Some(FormatKind::Markup(MarkupKind::Xml)),
        b'{' | b'[' => Some(FormatKind::Json),
        _ => {
            let first_line = lowered.lines().next().unwrap_or("");
            if first_line.contains([',', ';', '\t']) {
                Some(FormatKind::Delimited)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_case_insensitive() {
        assert_eq!(detect("DATA.CSV", b"a,b\n1,2\n"), FormatKind::Delimited);
        assert_eq!(detect("page.HTM", b"<html></html>"), FormatKind::Markup(MarkupKind::Html));
    }

    #[test]
    fn spreadsheet_extension_requires_signature() {
        assert_eq!(detect("book.xlsx", b"PK\x03\x04rest"), FormatKind::Spreadsheet);
        assert_eq!(detect("bad.xlsx", b"id,name\n1,Alice\n"), FormatKind::Unknown);
        let mut ole = OLE_MAGIC.to_vec();
        ole.extend_from_slice(b"....");
        assert_eq!(detect("legacy.xls", &ole), FormatKind::Spreadsheet);
    }

    #[test]
    fn text_extension_on_binary_payload_is_rejected() {
        assert_eq!(detect("data.csv", b"PK\x03\x04rest"), FormatKind::Unknown);
    }

    #[test]
    fn sniffs_when_extension_missing() {
        assert_eq!(detect("upload", b"PK\x03\x04"), FormatKind::Spreadsheet);
        assert_eq!(
            detect("upload", b"  <!DOCTYPE html><HTML><body>"),
            FormatKind::Markup(MarkupKind::Html)
        );
        assert_eq!(
            detect("upload", b"<?xml version=\"1.0\"?><rows/>"),
            FormatKind::Markup(MarkupKind::Xml)
        );
        assert_eq!(detect("upload", b"[{\"a\":1}]"), FormatKind::Json);
        assert_eq!(detect("upload", b"\xEF\xBB\xBFa;b\n1;2"), FormatKind::Delimited);
        assert_eq!(detect("upload.bin", b"just words"), FormatKind::Unknown);
        assert_eq!(detect("upload", b""), FormatKind::Unknown);
    }

    #[test]
    fn detection_is_deterministic() {
        let bytes = b"x\ty\n1\t2\n";
        let first = detect("noext", bytes);
        for _ in 0..10 {
            assert_eq!(detect("noext", bytes), first);
        }
    }
}
