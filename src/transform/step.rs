//! The step catalog: every transformation a transform spec may name.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::NaiveDate;

use crate::error::TransformError;
use crate::types::{CanonicalTable, Value};

/// Default format for string → date coercion.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Target type of a `coerce_type` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoerceTarget {
    Integer,
    Number,
    Boolean,
    Date,
    String,
}

impl CoerceTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "integer" | "int" => Some(Self::Integer),
            "number" | "float" => Some(Self::Number),
            "boolean" | "bool" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "string" | "text" => Some(Self::String),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::String => "string",
        }
    }
}

/// What a `coerce_type` step does with a value it cannot convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnCoercionError {
    /// Replace the value with null.
    #[default]
    Null,
    /// Fail the whole pipeline.
    Abort,
}

/// Comparison used by `filter_rows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    IsNull,
    NotNull,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" | "==" => Some(Self::Eq),
            "ne" | "!=" => Some(Self::Ne),
            "gt" | ">" => Some(Self::Gt),
            "ge" | ">=" => Some(Self::Ge),
            "lt" | "<" => Some(Self::Lt),
            "le" | "<=" => Some(Self::Le),
            "contains" => Some(Self::Contains),
            "is_null" => Some(Self::IsNull),
            "not_null" => Some(Self::NotNull),
            _ => None,
        }
    }

    /// Whether the op compares against a `value` parameter.
    pub fn takes_value(self) -> bool {
        !matches!(self, Self::IsNull | Self::NotNull)
    }

    /// Null cells only ever match [`FilterOp::IsNull`].
    fn matches(self, cell: &Value, value: &Value) -> bool {
        match self {
            Self::IsNull => cell.is_null(),
            Self::NotNull => !cell.is_null(),
            _ if cell.is_null() => false,
            Self::Contains => cell.to_string().contains(&value.to_string()),
            op => match compare(cell, value) {
                Some(ord) => match op {
                    Self::Eq => ord == Ordering::Equal,
                    Self::Ne => ord != Ordering::Equal,
                    Self::Gt => ord == Ordering::Greater,
                    Self::Ge => ord != Ordering::Less,
                    Self::Lt => ord == Ordering::Less,
                    Self::Le => ord != Ordering::Greater,
                    _ => false,
                },
                // Incomparable values are never equal.
                None => op == Self::Ne,
            },
        }
    }
}

/// A validated, strongly typed transformation.
///
/// Every step is pure: [`TransformStep::apply`] reads its input table and returns a new one.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStep {
    RenameColumn {
        from: String,
        to: String,
    },
    DropColumn {
        column: String,
    },
    UppercaseColumn {
        column: String,
    },
    LowercaseColumn {
        column: String,
    },
    CoerceType {
        column: String,
        to: CoerceTarget,
        format: Option<String>,
        on_error: OnCoercionError,
    },
    FilterRows {
        column: String,
        op: FilterOp,
        value: Value,
    },
    FillNull {
        column: String,
        value: Value,
    },
    /// Drop rows with a null in any of `columns` (any column when empty).
    DropNull {
        columns: Vec<String>,
    },
    /// Keep the first row per key over `columns` (all columns when empty).
    Deduplicate {
        columns: Vec<String>,
    },
}

impl TransformStep {
    /// Catalog name of the step.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RenameColumn { .. } => "rename_column",
            Self::DropColumn { .. } => "drop_column",
            Self::UppercaseColumn { .. } => "uppercase_column",
            Self::LowercaseColumn { .. } => "lowercase_column",
            Self::CoerceType { .. } => "coerce_type",
            Self::FilterRows { .. } => "filter_rows",
            Self::FillNull { .. } => "fill_null",
            Self::DropNull { .. } => "drop_null",
            Self::Deduplicate { .. } => "deduplicate",
        }
    }

    /// Columns that must exist in the input table.
    pub fn required_columns(&self) -> Vec<&str> {
        match self {
            Self::RenameColumn { from, .. } => vec![from.as_str()],
            Self::DropColumn { column }
            | Self::UppercaseColumn { column }
            | Self::LowercaseColumn { column }
            | Self::CoerceType { column, .. }
            | Self::FilterRows { column, .. }
            | Self::FillNull { column, .. } => vec![column.as_str()],
            Self::DropNull { columns } | Self::Deduplicate { columns } => {
                columns.iter().map(String::as_str).collect()
            }
        }
    }

    /// Fails with [`TransformError::MissingColumns`] if `table` lacks a required column.
    pub fn check_columns(&self, table: &CanonicalTable) -> Result<(), TransformError> {
        let missing: Vec<String> = self
            .required_columns()
            .into_iter()
            .filter(|c| table.index_of(c).is_none())
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TransformError::MissingColumns {
                step_name: self.name().to_string(),
                missing_columns: missing,
            })
        }
    }

    /// Apply the step to `table`, producing a new table.
    pub fn apply(&self, table: &CanonicalTable) -> Result<CanonicalTable, TransformError> {
        self.check_columns(table)?;
        let idx = |name: &str| table.index_of(name).unwrap_or_default();

        let out = match self {
            Self::RenameColumn { from, to } => {
                if from != to && table.index_of(to).is_some() {
                    return Err(TransformError::DuplicateColumn {
                        step_name: self.name().to_string(),
                        column: to.clone(),
                    });
                }
                let (mut columns, rows) = table.clone().into_parts();
                columns[idx(from)] = to.clone();
                CanonicalTable::from_parts(columns, rows)
            }
            Self::DropColumn { column } => {
                let drop = idx(column);
                let (mut columns, mut rows) = table.clone().into_parts();
                columns.remove(drop);
                for row in &mut rows {
                    row.remove(drop);
                }
                CanonicalTable::from_parts(columns, rows)
            }
            Self::UppercaseColumn { column } => table.map_column(idx(column), |v| match v {
                Value::Utf8(s) => Value::Utf8(s.to_uppercase()),
                other => other.clone(),
            }),
            Self::LowercaseColumn { column } => table.map_column(idx(column), |v| match v {
                Value::Utf8(s) => Value::Utf8(s.to_lowercase()),
                other => other.clone(),
            }),
            Self::CoerceType {
                column,
                to,
                format,
                on_error,
            } => {
                let format = format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
                table.try_map_column(idx(column), |row, v| match coerce(v, *to, format) {
                    Some(out) => Ok(out),
                    None if *on_error == OnCoercionError::Null => Ok(Value::Null),
                    None => Err(TransformError::Coercion {
                        step_name: self.name().to_string(),
                        column: column.clone(),
                        row,
                        raw: v.to_string(),
                        target: to.label().to_string(),
                    }),
                })?
            }
            Self::FilterRows { column, op, value } => {
                let i = idx(column);
                table.filter_rows(|row| op.matches(&row[i], value))
            }
            Self::FillNull { column, value } => table.map_column(idx(column), |v| {
                if v.is_null() {
                    value.clone()
                } else {
                    v.clone()
                }
            }),
            Self::DropNull { columns } => {
                let idxs = key_indexes(table, columns);
                table.filter_rows(|row| idxs.iter().all(|&i| !row[i].is_null()))
            }
            Self::Deduplicate { columns } => {
                let idxs = key_indexes(table, columns);
                let mut seen: HashSet<Vec<String>> = HashSet::new();
                table.filter_rows(|row| seen.insert(idxs.iter().map(|&i| row[i].group_key()).collect()))
            }
        };
        Ok(out)
    }
}

/// Indexes of `columns`, or of every column when `columns` is empty.
fn key_indexes(table: &CanonicalTable, columns: &[String]) -> Vec<usize> {
    if columns.is_empty() {
        (0..table.column_count()).collect()
    } else {
        columns.iter().filter_map(|c| table.index_of(c)).collect()
    }
}

/// `None` when `v` cannot be represented as `to`. Nulls stay null.
fn coerce(v: &Value, to: CoerceTarget, date_format: &str) -> Option<Value> {
    if v.is_null() {
        return Some(Value::Null);
    }
    match to {
        CoerceTarget::String => Some(Value::Utf8(v.to_string())),
        CoerceTarget::Integer => match v {
            Value::Int64(i) => Some(Value::Int64(*i)),
            // `as` saturates; only whole floats inside the i64 range convert.
            Value::Float64(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Some(Value::Int64(*f as i64))
            }
            Value::Utf8(s) => s.trim().parse::<i64>().ok().map(Value::Int64),
            _ => None,
        },
        CoerceTarget::Number => match v {
            Value::Int64(i) => Some(Value::Float64(*i as f64)),
            Value::Float64(f) => Some(Value::Float64(*f)),
            Value::Utf8(s) => s.trim().parse::<f64>().ok().map(Value::Float64),
            _ => None,
        },
        CoerceTarget::Boolean => match v {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Int64(i) => Some(Value::Bool(*i != 0)),
            Value::Utf8(s) => parse_bool(s).map(Value::Bool),
            _ => None,
        },
        CoerceTarget::Date => match v {
            Value::Date(d) => Some(Value::Date(*d)),
            Value::Utf8(s) => NaiveDate::parse_from_str(s.trim(), date_format)
                .ok()
                .map(Value::Date),
            _ => None,
        },
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Order two cells; strings that look like numbers or dates compare as such.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Utf8(x), Value::Utf8(y)) => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => match (parse_date(x), parse_date(y)) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            },
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Utf8(y)) => parse_date(y).map(|y| x.cmp(&y)),
        (Value::Utf8(x), Value::Date(y)) => parse_date(x).map(|x| x.cmp(y)),
        _ => {
            let x = numeric(a)?;
            let y = numeric(b)?;
            x.partial_cmp(&y)
        }
    }
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Utf8(s) => s.trim().parse::<f64>().ok(),
        other => other.as_f64(),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DEFAULT_DATE_FORMAT).ok()
}
