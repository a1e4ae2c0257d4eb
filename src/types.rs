//! Core data model shared by every pipeline stage.
//!
//! Extractors produce a [`CanonicalTable`], transform steps replace it with a new one, and the
//! loader consumes the final instance. Cells are [`Value`]s stored row-major in column order.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;

/// A single scalar cell in a [`CanonicalTable`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Calendar date (serialized as `YYYY-MM-DD`).
    Date(NaiveDate),
}

impl Value {
    /// Builds a string cell, mapping whitespace-only text to [`Value::Null`].
    pub fn text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Value::Null
        } else {
            Value::Utf8(trimmed.to_owned())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell, if it holds a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts a JSON scalar into a cell. Objects and arrays become their JSON text.
    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => n.as_f64().map(Value::Float64).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::text(s),
            other => Value::Utf8(other.to_string()),
        }
    }

    /// Stable textual key used for equality-based grouping (e.g. deduplication).
    ///
    /// Values of different variants never share a key.
    pub fn group_key(&self) -> String {
        match self {
            Value::Null => "n:".to_string(),
            Value::Int64(v) => format!("i:{v}"),
            Value::Float64(v) => format!("f:{v}"),
            Value::Bool(v) => format!("b:{v}"),
            Value::Utf8(v) => format!("s:{v}"),
            Value::Date(v) => format!("d:{v}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Utf8(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
        }
    }
}

/// Returned by [`CanonicalTable::try_new`] when rows and columns disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    DuplicateColumn(String),
    RowWidth { row: usize, expected: usize, actual: usize },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::DuplicateColumn(name) => write!(f, "duplicate column '{name}'"),
            ShapeError::RowWidth {
                row,
                expected,
                actual,
            } => write!(f, "row {row} has {actual} cells, expected {expected}"),
        }
    }
}

impl std::error::Error for ShapeError {}

/// The pipeline's format-independent in-memory table.
///
/// Invariants (enforced by [`CanonicalTable::try_new`]):
///
/// - column names are unique (case-sensitive)
/// - every row has exactly one cell per column; missing cells are [`Value::Null`]
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl CanonicalTable {
    /// Create a table, validating the shape invariants.
    pub fn try_new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, ShapeError> {
        let mut seen = HashMap::with_capacity(columns.len());
        for name in &columns {
            if seen.insert(name.as_str(), ()).is_some() {
                return Err(ShapeError::DuplicateColumn(name.clone()));
            }
        }
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(ShapeError::RowWidth {
                    row: idx,
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    /// Build a table from parts the caller already knows to be well-formed.
    pub(crate) fn from_parts(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    /// A table with the given columns and no rows.
    pub fn empty(columns: Vec<String>) -> Result<Self, ShapeError> {
        Self::try_new(columns, Vec::new())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell lookup by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.index_of(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Total number of null cells.
    pub fn null_count(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.iter().filter(|v| v.is_null()).count())
            .sum()
    }

    /// Consume the table into its parts.
    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<Value>>) {
        (self.columns, self.rows)
    }

    /// Create a new table containing only rows that match `predicate`.
    pub fn filter_rows<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&[Value]) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|row| predicate(row.as_slice()))
            .cloned()
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Create a new table by rewriting the cell at `idx` in every row.
    pub fn map_column<F>(&self, idx: usize, mut mapper: F) -> Self
    where
        F: FnMut(&Value) -> Value,
    {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut out = row.clone();
                if let Some(cell) = out.get_mut(idx) {
                    *cell = mapper(&row[idx]);
                }
                out
            })
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Fallible variant of [`Self::map_column`]; `mapper` receives the row index.
    pub fn try_map_column<F, E>(&self, idx: usize, mut mapper: F) -> Result<Self, E>
    where
        F: FnMut(usize, &Value) -> Result<Value, E>,
    {
        let mut rows = Vec::with_capacity(self.rows.len());
        for (row_idx, row) in self.rows.iter().enumerate() {
            let mut out = row.clone();
            if let Some(cell) = out.get_mut(idx) {
                *cell = mapper(row_idx, &row[idx])?;
            }
            rows.push(out);
        }
        Ok(Self {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// One JSON object per row, keys in column order.
    pub fn to_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(name, cell)| {
                        let json = serde_json::to_value(cell).unwrap_or(serde_json::Value::Null);
                        (name.clone(), json)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Make header names unique by suffixing repeats with `_2`, `_3`, ...
///
/// Blank headers are named `column_<n>` (1-based position) before de-duplication.
pub fn dedupe_headers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut taken: HashMap<String, ()> = HashMap::new();
    let mut out = Vec::new();
    for (pos, name) in raw.into_iter().enumerate() {
        let trimmed = name.as_ref().trim();
        let base = if trimmed.is_empty() {
            format!("column_{}", pos + 1)
        } else {
            trimmed.to_string()
        };

        let n = counts.entry(base.clone()).or_insert(0);
        *n += 1;
        let mut candidate = if *n == 1 {
            base.clone()
        } else {
            format!("{base}_{n}")
        };
        // A literal "a_2" header may already exist; keep bumping.
        while taken.contains_key(&candidate) {
            *n += 1;
            candidate = format!("{base}_{n}");
        }
        taken.insert(candidate.clone(), ());
        out.push(candidate);
    }
    out
}

/// An uploaded file as received from the host.
///
/// The adapter owns it until it is handed to an extractor.
#[derive(Clone, PartialEq, Eq)]
pub struct RawUpload {
    pub content: Vec<u8>,
    pub filename: String,
    /// Advisory only; the detector decides the real format.
    pub content_type: Option<String>,
    /// Caller-supplied source id; see [`RawUpload::source_id`].
    pub source_id: Option<String>,
}

impl RawUpload {
    pub fn new(content: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            filename: filename.into(),
            content_type: None,
            source_id: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// The caller-supplied source id, else [`Self::default_source_id`].
    pub fn source_id(&self) -> String {
        match &self.source_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => self.default_source_id(),
        }
    }

    /// Filename stem with spaces replaced by underscores.
    pub fn default_source_id(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("upload")
            .replace(' ', "_")
    }
}

impl fmt::Debug for RawUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawUpload")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("source_id", &self.source_id)
            .field("bytes", &self.content.len())
            .finish()
    }
}
