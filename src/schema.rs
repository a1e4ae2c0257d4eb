//! Schema inference over a finished [`CanonicalTable`], and a versioned per-source registry.
//!
//! The inferred type of a column is the narrowest of `integer`, `number`, `boolean`, `date`,
//! `string` that holds every non-null cell. Text cells are inspected too, so a delimited
//! column of `"1"`, `"2"` infers as `integer`. A column with no non-null cell is `null`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::Serialize;

use crate::transform::DEFAULT_DATE_FORMAT;
use crate::types::{CanonicalTable, Value};

/// Logical type of an inferred column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Null,
    Integer,
    Number,
    Boolean,
    Date,
    String,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Null => "null",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::String => "string",
        }
    }

    fn of(v: &Value) -> Self {
        match v {
            Value::Null => FieldType::Null,
            Value::Int64(_) => FieldType::Integer,
            Value::Float64(_) => FieldType::Number,
            Value::Bool(_) => FieldType::Boolean,
            Value::Date(_) => FieldType::Date,
            Value::Utf8(s) => {
                let s = s.trim();
                if s.parse::<i64>().is_ok() {
                    FieldType::Integer
                } else if s.parse::<f64>().is_ok_and(f64::is_finite) {
                    FieldType::Number
                } else if s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false") {
                    FieldType::Boolean
                } else if NaiveDate::parse_from_str(s, DEFAULT_DATE_FORMAT).is_ok() {
                    FieldType::Date
                } else {
                    FieldType::String
                }
            }
        }
    }

    fn widen(self, other: Self) -> Self {
        use FieldType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Null, x) | (x, Null) => x,
            (Integer, Number) | (Number, Integer) => Number,
            _ => String,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// Ordered field list of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Infer the schema of `table`.
pub fn infer_schema(table: &CanonicalTable) -> TableSchema {
    let fields = table
        .columns()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut field_type = FieldType::Null;
            let mut nullable = false;
            for row in table.rows() {
                let cell = &row[i];
                nullable |= cell.is_null();
                field_type = field_type.widen(FieldType::of(cell));
            }
            FieldSchema {
                name: name.clone(),
                field_type,
                nullable,
            }
        })
        .collect();
    TableSchema { fields }
}

/// A field whose type or nullability changed between two schema versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub name: String,
    pub old_type: FieldType,
    pub new_type: FieldType,
    pub old_nullable: bool,
    pub new_nullable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    pub added: Vec<FieldSchema>,
    pub removed: Vec<FieldSchema>,
    pub changed: Vec<FieldChange>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Differences going from `old` to `new`. Field order is not compared.
pub fn diff(old: &TableSchema, new: &TableSchema) -> SchemaDiff {
    let mut out = SchemaDiff::default();
    for field in &new.fields {
        match old.field(&field.name) {
            None => out.added.push(field.clone()),
            Some(prev) if prev != field => out.changed.push(FieldChange {
                name: field.name.clone(),
                old_type: prev.field_type,
                new_type: field.field_type,
                old_nullable: prev.nullable,
                new_nullable: field.nullable,
            }),
            Some(_) => {}
        }
    }
    out.removed = old
        .fields
        .iter()
        .filter(|f| new.field(&f.name).is_none())
        .cloned()
        .collect();
    out
}

/// Outcome of [`SchemaRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaVersion {
    pub source_id: String,
    pub version: u32,
    /// Whether this registration created a new version.
    pub changed: bool,
    /// Difference from the previous version; empty for the first version or when unchanged.
    pub diff: SchemaDiff,
}

/// Keeps every schema version seen per source id.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    versions: Mutex<HashMap<String, Vec<TableSchema>>>,
}

#[derive(Debug, thiserror::Error)]
#[error("schema registry unavailable")]
pub struct RegistryPoisoned;

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `schema` for `source_id`; the version only bumps when the schema differs from the
    /// latest one.
    pub fn register(&self, source_id: &str, schema: TableSchema) -> Result<SchemaVersion, RegistryPoisoned> {
        let mut guard = self.versions.lock().map_err(|_| RegistryPoisoned)?;
        let history = guard.entry(source_id.to_string()).or_default();

        let (changed, diff) = match history.last() {
            None => (true, SchemaDiff::default()),
            Some(latest) if *latest == schema => (false, SchemaDiff::default()),
            Some(latest) => (true, diff(latest, &schema)),
        };
        if changed {
            history.push(schema);
        }
        Ok(SchemaVersion {
            source_id: source_id.to_string(),
            version: history.len() as u32,
            changed,
            diff,
        })
    }

    /// Latest schema for `source_id`.
    pub fn latest(&self, source_id: &str) -> Option<TableSchema> {
        let guard = self.versions.lock().ok()?;
        guard.get(source_id).and_then(|h| h.last().cloned())
    }

    /// A specific version (1-based).
    pub fn version(&self, source_id: &str, version: u32) -> Option<TableSchema> {
        let guard = self.versions.lock().ok()?;
        let idx = usize::try_from(version).ok()?.checked_sub(1)?;
        guard.get(source_id).and_then(|h| h.get(idx).cloned())
    }
}
