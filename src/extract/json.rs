//! JSON extraction.
//!
//! Supported inputs:
//! - an array of objects: `[{"a":1}, {"a":2}]` (nested objects/arrays are kept as JSON text)
//! - an array of scalars: becomes a single `value` column
//! - an object of arrays: `{"a":[1,2],"b":[3]}`, shorter columns padded with null
//! - a single object: one row
//! - newline-delimited JSON (NDJSON), when the whole input is not a single JSON value

use serde_json::{Map, Value as Json};

use crate::error::ExtractionError;
use crate::types::{CanonicalTable, Value};

use super::encoding::decode_text;
use super::{Extraction, Extractor};

/// Column name used for arrays of scalars.
pub const SCALAR_COLUMN: &str = "value";

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extract(&self, content: &[u8]) -> Result<Extraction, ExtractionError> {
        let (text, _) = decode_text(content);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ExtractionError::NoHeader);
        }

        let table = match serde_json::from_str::<Json>(trimmed) {
            Ok(Json::Array(items)) => items_to_table(&items)?,
            Ok(Json::Object(obj)) if obj.values().any(Json::is_array) => columns_to_table(&obj)?,
            Ok(obj @ Json::Object(_)) => items_to_table(std::slice::from_ref(&obj))?,
            Ok(scalar) => items_to_table(std::slice::from_ref(&scalar))?,
            Err(whole_err) => {
                let mut items = Vec::new();
                for line in trimmed.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    match serde_json::from_str::<Json>(line) {
                        Ok(v) => items.push(v),
                        // Report the error of the whole-document parse; it is the more useful one
                        // when the input was meant as a single document.
                        Err(_) => return Err(whole_err.into()),
                    }
                }
                items_to_table(&items)?
            }
        };
        Ok(Extraction::new(table))
    }
}

fn items_to_table(items: &[Json]) -> Result<CanonicalTable, ExtractionError> {
    let mut columns: Vec<String> = Vec::new();
    for item in items {
        match item {
            Json::Object(obj) => {
                for key in obj.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
            _ => {
                if !columns.iter().any(|c| c == SCALAR_COLUMN) {
                    columns.push(SCALAR_COLUMN.to_string());
                }
            }
        }
    }

    let rows = items
        .iter()
        .map(|item| {
            columns
                .iter()
                .map(|col| match item {
                    Json::Object(obj) => obj.get(col).map_or(Value::Null, Value::from_json),
                    scalar if col == SCALAR_COLUMN => Value::from_json(scalar),
                    _ => Value::Null,
                })
                .collect()
        })
        .collect();

    Ok(CanonicalTable::try_new(columns, rows)?)
}

fn columns_to_table(obj: &Map<String, Json>) -> Result<CanonicalTable, ExtractionError> {
    let height = obj
        .values()
        .map(|v| v.as_array().map_or(1, Vec::len))
        .max()
        .unwrap_or(0);

    let columns: Vec<String> = obj.keys().cloned().collect();
    let rows = (0..height)
        .map(|i| {
            obj.values()
                .map(|v| match v {
                    Json::Array(items) => items.get(i).map_or(Value::Null, Value::from_json),
                    single if i == 0 => Value::from_json(single),
                    _ => Value::Null,
                })
                .collect()
        })
        .collect();

    Ok(CanonicalTable::try_new(columns, rows)?)
}
