//! Transformation: an ordered list of pure steps applied to a [`CanonicalTable`].
//!
//! Callers describe steps as [`StepSpec`] records (or the shorthand accepted by
//! [`parse_transform_spec`]). [`compile`] validates the whole list against the step catalog
//! before any data is touched; [`run`] then applies the typed steps in order, each one
//! producing a new table.
//!
//! ```rust
//! use dynamic_etl::transform::{compile, run, StepSpec};
//! use dynamic_etl::types::{CanonicalTable, Value};
//! use serde_json::json;
//!
//! let table = CanonicalTable::try_new(
//!     vec!["id".into(), "name".into()],
//!     vec![vec![Value::Utf8("1".into()), Value::Utf8("ada".into())]],
//! )
//! .unwrap();
//!
//! let steps = compile(&[
//!     StepSpec::new("uppercase_column", json!({"column": "name"})),
//!     StepSpec::new("drop_column", json!({"column": "id"})),
//! ])
//! .unwrap();
//! let out = run(&table, &steps).unwrap();
//! assert_eq!(out.table.columns(), ["name"]);
//! assert_eq!(out.table.get(0, "name"), Some(&Value::Utf8("ADA".into())));
//! ```

pub mod spec;
pub mod step;

use serde::Serialize;
use tracing::debug;

use crate::error::TransformError;
use crate::types::CanonicalTable;

pub use spec::{compile, parse_transform_spec, StepSpec, STEP_CATALOG};
pub use step::{CoerceTarget, FilterOp, OnCoercionError, TransformStep, DEFAULT_DATE_FORMAT};

/// Row counts around one applied step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step_name: String,
    pub rows_before: usize,
    pub rows_after: usize,
}

/// Result of [`run`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub table: CanonicalTable,
    pub reports: Vec<StepReport>,
}

/// Apply `steps` to `table` in order.
///
/// The input table is never modified. The first failing step aborts the run; its error names
/// the step.
pub fn run(table: &CanonicalTable, steps: &[TransformStep]) -> Result<TransformOutput, TransformError> {
    let mut current = table.clone();
    let mut reports = Vec::with_capacity(steps.len());

    for step in steps {
        let rows_before = current.row_count();
        current = step.apply(&current)?;
        debug!(
            step = step.name(),
            rows_before,
            rows_after = current.row_count(),
            "transform step applied"
        );
        reports.push(StepReport {
            step_name: step.name().to_string(),
            rows_before,
            rows_after: current.row_count(),
        });
    }

    Ok(TransformOutput {
        table: current,
        reports,
    })
}
