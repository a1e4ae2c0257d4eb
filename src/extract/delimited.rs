//! Delimited-text extraction (CSV, TSV, semicolon-separated).

use tracing::debug;

use crate::error::ExtractionError;
use crate::types::{dedupe_headers, CanonicalTable, Value};

use super::encoding::{decode_text, TextEncoding};
use super::{Extraction, Extractor};

/// Delimiters considered by [`sniff_delimiter`], in tie-break order.
pub const CANDIDATE_DELIMITERS: [u8; 3] = [b',', b';', b'\t'];

/// Extracts CSV-like text.
///
/// Rules:
///
/// - text is decoded with the UTF-8 → UTF-8 BOM → Latin-1 chain
/// - the delimiter is sniffed from the header line unless one is forced
/// - the first non-blank line is the header; repeated names get `_2`, `_3`, ... suffixes
/// - short rows are padded with nulls; rows wider than the header fail the extraction
/// - empty lines are skipped; whitespace-only lines are skipped too unless the header has a
///   single column, where they are null rows
#[derive(Debug, Clone, Default)]
pub struct DelimitedExtractor {
    delimiter: Option<u8>,
}

impl DelimitedExtractor {
    pub fn new(delimiter: Option<u8>) -> Self {
        Self { delimiter }
    }
}

impl Extractor for DelimitedExtractor {
    fn name(&self) -> &'static str {
        "delimited"
    }

    fn extract(&self, content: &[u8]) -> Result<Extraction, ExtractionError> {
        let (text, encoding) = decode_text(content);
        let delimiter = self.delimiter.unwrap_or_else(|| sniff_delimiter(&text));
        debug!(?encoding, delimiter = %(delimiter as char).escape_default(), "delimited extraction");

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(text.as_bytes());
        let mut records = rdr.records();

        let header = loop {
            match records.next() {
                None => return Err(ExtractionError::NoHeader),
                Some(record) => {
                    let record = record?;
                    if record.iter().any(|f| !f.trim().is_empty()) {
                        break record;
                    }
                }
            }
        };
        let columns = dedupe_headers(header.iter());
        let width = columns.len();

        let mut rows: Vec<Vec<Value>> = Vec::new();
        for result in records {
            let record = result?;
            // A whitespace-only line carries no cells, except in a single-column file where it
            // is a null value.
            if width > 1 && record.len() == 1 && record.get(0).is_some_and(|f| f.trim().is_empty()) {
                continue;
            }

            let user_row = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(rows.len() + 2);
            if record.len() > width && record.iter().skip(width).any(|f| !f.trim().is_empty()) {
                return Err(ExtractionError::RaggedRow {
                    row: user_row,
                    expected: width,
                    actual: record.len(),
                });
            }

            let mut row: Vec<Value> = record.iter().take(width).map(Value::text).collect();
            row.resize(width, Value::Null);
            rows.push(row);
        }

        let mut out = Extraction::new(CanonicalTable::try_new(columns, rows)?);
        if encoding == TextEncoding::Latin1 {
            out.warnings
                .push("input is not valid UTF-8; decoded as Latin-1".to_string());
        }
        Ok(out)
    }
}

/// Pick the delimiter that occurs most often (outside quotes) on the first non-blank line.
///
/// Ties resolve in [`CANDIDATE_DELIMITERS`] order; no candidate at all means a single column,
/// for which comma is as good as any.
pub fn sniff_delimiter(text: &str) -> u8 {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut in_quotes = false;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|&d| d == b) {
            counts[i] += 1;
        }
    }

    let mut best = 0;
    for i in 1..counts.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    CANDIDATE_DELIMITERS[best]
}
