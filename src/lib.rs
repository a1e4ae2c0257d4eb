//! `dynamic-etl` turns an uploaded file of unknown type into a [`types::CanonicalTable`], applies
//! a declared list of transform steps, and hands the result to a destination sink.
//!
//! The primary entrypoint is [`adapter::Adapter::process`]: one call per upload, returning a
//! [`adapter::PipelineResult`] that is either a success summary or a failure naming the stage
//! and a stable reason code.
//!
//! ## What you can upload
//!
//! **File formats (detected from the extension, confirmed by sniffing the content):**
//!
//! - **Delimited text**: `.csv`, `.tsv`, `.txt` (delimiter among comma, semicolon, tab;
//!   UTF-8, UTF-8 with BOM or Latin-1)
//! - **Spreadsheets**: `.xlsx`, `.xlsm`, `.xlsb`, `.xls`, `.ods` (first sheet unless one is
//!   selected)
//! - **Markup**: `.html`/`.htm` (first consistent `<table>`), `.xml` (first repeating record
//!   group)
//! - **JSON**: `.json`/`.ndjson` (arrays of objects, objects of arrays, NDJSON)
//!
//! A spreadsheet extension on a file without a workbook signature is rejected at the detect
//! stage; it is never handed to the spreadsheet parser.
//!
//! **Values:**
//!
//! Cells are [`types::Value`]s: [`types::Value::Utf8`], [`types::Value::Int64`],
//! [`types::Value::Float64`], [`types::Value::Bool`], [`types::Value::Date`] and
//! [`types::Value::Null`]. Whitespace-only cells are null in every format. Delimited text is
//! extracted as strings; use the `coerce_type` step to type a column.
//!
//! ## Quick example
//!
//! ```rust
//! use dynamic_etl::adapter::{Adapter, Stage};
//! use dynamic_etl::load::{Destination, MemorySink, WriteMode};
//! use dynamic_etl::transform::parse_transform_spec;
//! use dynamic_etl::types::RawUpload;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let destination = Destination::new(Arc::new(MemorySink::new(WriteMode::Append)));
//! let steps = parse_transform_spec(&json!([
//!     {"coerce_type": {"column": "age", "to": "integer"}},
//!     {"filter_rows": {"column": "age", "op": "ge", "value": 18}},
//! ]))
//! .unwrap();
//!
//! let upload = RawUpload::new("name;age\nAda;36\nTim;12\n", "people.csv");
//! let result = Adapter::default().process(upload, &steps, &destination);
//! assert_eq!(result.summary().map(|s| s.row_count), Some(1));
//!
//! // A step on a column that does not exist fails the transform stage.
//! let bad = parse_transform_spec(&json!([{"uppercase_column": "missing"}])).unwrap();
//! let upload = RawUpload::new("name\nAda\n", "people.csv");
//! let failure = Adapter::default().process(upload, &bad, &destination);
//! let failure = failure.failure().unwrap();
//! assert_eq!((failure.stage, failure.reason.as_str()), (Stage::Transform, "missing_columns"));
//! ```
//!
//! ## Modules
//!
//! - [`detect`]: format detection from filename and content
//! - [`extract`]: one extractor per format
//! - [`transform`]: the step catalog, transform-spec validation and the ordered runner
//! - [`load`]: the sink capability, built-in sinks and retrying loader
//! - [`adapter`]: the per-upload state machine and result surface
//! - [`schema`]: schema inference and a versioned registry
//! - [`batch`]: many uploads on a worker pool
//! - [`observability`]: outcome observers with severity-based alerting
//! - [`config`], [`telemetry`]: layered configuration and subscriber setup for binaries
//! - [`types`], [`error`]: shared data model and error types

pub mod adapter;
pub mod batch;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod load;
pub mod observability;
pub mod schema;
pub mod telemetry;
pub mod transform;
pub mod types;

pub use adapter::{process, Adapter, PipelineResult};
pub use error::PipelineError;
