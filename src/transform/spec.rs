//! Transform specs: the caller-facing `{step_name, parameters}` records, and their validation
//! against the step catalog.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::ValidationError;
use crate::types::Value;

use super::step::{CoerceTarget, FilterOp, OnCoercionError, TransformStep};

/// Every step name [`compile`] accepts.
pub const STEP_CATALOG: [&str; 9] = [
    "rename_column",
    "drop_column",
    "uppercase_column",
    "lowercase_column",
    "coerce_type",
    "filter_rows",
    "fill_null",
    "drop_null",
    "deduplicate",
];

/// One unvalidated entry of a transform spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub step_name: String,
    #[serde(default)]
    pub parameters: Map<String, Json>,
}

impl StepSpec {
    /// Build a spec entry; non-object `parameters` are treated as empty.
    pub fn new(step_name: impl Into<String>, parameters: Json) -> Self {
        let parameters = match parameters {
            Json::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            step_name: step_name.into(),
            parameters,
        }
    }
}

/// Parse a transform spec document (a JSON array).
///
/// Each entry is either an explicit record, `{"step_name": "drop_column", "parameters":
/// {"column": "name"}}`, or the single-key shorthand `{"drop_column": "name"}` /
/// `{"rename_column": {"from": "a", "to": "b"}}`. A scalar or array shorthand value fills the
/// step's primary parameter.
pub fn parse_transform_spec(doc: &Json) -> Result<Vec<StepSpec>, ValidationError> {
    let entries = doc
        .as_array()
        .ok_or_else(|| ValidationError::MalformedSpec("transform spec must be an array".into()))?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let obj = entry.as_object().ok_or_else(|| {
                ValidationError::MalformedSpec(format!("entry {i} is not an object"))
            })?;
            if obj.contains_key("step_name") {
                return serde_json::from_value::<StepSpec>(entry.clone())
                    .map_err(|e| ValidationError::MalformedSpec(format!("entry {i}: {e}")));
            }

            let mut iter = obj.iter();
            match (iter.next(), iter.next()) {
                (Some((name, Json::Object(params))), None) => {
                    Ok(StepSpec::new(name.clone(), Json::Object(params.clone())))
                }
                (Some((name, value)), None) => {
                    let primary = primary_parameter(name)
                        .ok_or_else(|| ValidationError::UnknownStep(name.clone()))?;
                    let mut params = Map::new();
                    params.insert(primary.to_string(), value.clone());
                    Ok(StepSpec {
                        step_name: name.clone(),
                        parameters: params,
                    })
                }
                _ => Err(ValidationError::MalformedSpec(format!(
                    "entry {i} must have exactly one key or a 'step_name'"
                ))),
            }
        })
        .collect()
}

fn primary_parameter(step_name: &str) -> Option<&'static str> {
    match step_name {
        "drop_column" | "uppercase_column" | "lowercase_column" | "fill_null" | "coerce_type"
        | "filter_rows" => Some("column"),
        "drop_null" | "deduplicate" => Some("columns"),
        "rename_column" => Some("from"),
        _ => None,
    }
}

/// Validate every spec entry against the catalog, before any data is touched.
///
/// Unknown step names and missing/ill-typed parameters fail with [`ValidationError`].
pub fn compile(specs: &[StepSpec]) -> Result<Vec<TransformStep>, ValidationError> {
    specs.iter().map(compile_one).collect()
}

fn compile_one(spec: &StepSpec) -> Result<TransformStep, ValidationError> {
    let p = Params {
        step: &spec.step_name,
        map: &spec.parameters,
    };
    let step = match spec.step_name.as_str() {
        "rename_column" => TransformStep::RenameColumn {
            from: p.string("from")?,
            to: p.string("to")?,
        },
        "drop_column" => TransformStep::DropColumn {
            column: p.string("column")?,
        },
        "uppercase_column" => TransformStep::UppercaseColumn {
            column: p.string("column")?,
        },
        "lowercase_column" => TransformStep::LowercaseColumn {
            column: p.string("column")?,
        },
        "coerce_type" => {
            let to = p.string("to")?;
            let on_error = match p.opt_string("on_error")?.as_deref() {
                None | Some("null") => OnCoercionError::Null,
                Some("abort") => OnCoercionError::Abort,
                Some(other) => return Err(p.invalid("on_error", format!("expected 'null' or 'abort', got '{other}'"))),
            };
            TransformStep::CoerceType {
                column: p.string("column")?,
                to: CoerceTarget::parse(&to)
                    .ok_or_else(|| p.invalid("to", format!("unsupported type '{to}'")))?,
                format: p.opt_string("format")?,
                on_error,
            }
        }
        "filter_rows" => {
            let op_name = p.string("op")?;
            let op = FilterOp::parse(&op_name)
                .ok_or_else(|| p.invalid("op", format!("unsupported operator '{op_name}'")))?;
            let value = match p.map.get("value") {
                Some(v) if !v.is_object() && !v.is_array() => Value::from_json(v),
                Some(_) => return Err(p.invalid("value", "expected a scalar".to_string())),
                None if op.takes_value() => return Err(p.invalid("value", "required".to_string())),
                None => Value::Null,
            };
            TransformStep::FilterRows {
                column: p.string("column")?,
                op,
                value,
            }
        }
        "fill_null" => {
            let value = match p.map.get("value") {
                Some(v) if !v.is_null() && !v.is_object() && !v.is_array() => Value::from_json(v),
                _ => return Err(p.invalid("value", "expected a non-null scalar".to_string())),
            };
            TransformStep::FillNull {
                column: p.string("column")?,
                value,
            }
        }
        "drop_null" => TransformStep::DropNull {
            columns: p.columns("columns")?,
        },
        "deduplicate" => TransformStep::Deduplicate {
            columns: p.columns("columns")?,
        },
        other => return Err(ValidationError::UnknownStep(other.to_string())),
    };
    Ok(step)
}

struct Params<'a> {
    step: &'a str,
    map: &'a Map<String, Json>,
}

impl Params<'_> {
    fn invalid(&self, parameter: &str, message: String) -> ValidationError {
        ValidationError::InvalidParameter {
            step: self.step.to_string(),
            parameter: parameter.to_string(),
            message,
        }
    }

    fn opt_string(&self, name: &str) -> Result<Option<String>, ValidationError> {
        match self.map.get(name) {
            None | Some(Json::Null) => Ok(None),
            Some(Json::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid(name, "expected a non-empty string".to_string())),
        }
    }

    fn string(&self, name: &str) -> Result<String, ValidationError> {
        self.opt_string(name)?
            .ok_or_else(|| self.invalid(name, "required".to_string()))
    }

    /// A string or an array of strings; absent means "all columns".
    fn columns(&self, name: &str) -> Result<Vec<String>, ValidationError> {
        match self.map.get(name) {
            None | Some(Json::Null) => Ok(Vec::new()),
            Some(Json::String(s)) => Ok(vec![s.clone()]),
            Some(Json::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(name, "expected an array of strings".to_string()))
                })
                .collect(),
            Some(_) => Err(self.invalid(name, "expected a string or an array of strings".to_string())),
        }
    }
}
