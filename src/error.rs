use std::time::Duration;

use thiserror::Error;

use crate::types::ShapeError;

/// A file could not be converted into a canonical table.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Underlying I/O error while reading the payload.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited-text parse error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Workbook could not be opened or read.
    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// JSON payload is not valid JSON/NDJSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML payload is not well-formed.
    #[error("xml error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// No header row was found (empty or whitespace-only input).
    #[error("no header row found")]
    NoHeader,

    /// A data row has more cells than the header declares.
    #[error("ragged row {row}: {actual} cells but header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// Markup contains no element with a repeating, consistent row structure.
    #[error("no data table found in markup")]
    NoTable,

    /// The requested sheet does not exist.
    #[error("sheet not found: {0}")]
    SheetNotFound(String),

    /// Any other structural problem with the input.
    #[error("malformed input: {0}")]
    Malformed(String),
}

impl From<ShapeError> for ExtractionError {
    fn from(e: ShapeError) -> Self {
        ExtractionError::Malformed(e.to_string())
    }
}

/// A transform spec failed validation against the step catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("step '{step}': invalid parameter '{parameter}': {message}")]
    InvalidParameter {
        step: String,
        parameter: String,
        message: String,
    },

    #[error("malformed transform spec: {0}")]
    MalformedSpec(String),
}

/// A transform step could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("step '{step_name}' requires missing columns {missing_columns:?}")]
    MissingColumns {
        step_name: String,
        missing_columns: Vec<String>,
    },

    #[error("step '{step_name}': cannot coerce '{raw}' at row {row} of column '{column}' to {target}")]
    Coercion {
        step_name: String,
        column: String,
        row: usize,
        raw: String,
        target: String,
    },

    #[error("step '{step_name}' would create duplicate column '{column}'")]
    DuplicateColumn { step_name: String, column: String },
}

/// The destination sink did not accept the table.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The sink could not be reached; worth retrying.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// The sink refused the table; retrying cannot help.
    #[error("sink rejected table: {0}")]
    Rejected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The load deadline passed before the sink committed; nothing was written.
    #[error("load did not commit within {0:?}")]
    DeadlineExceeded(Duration),
}

impl LoadError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LoadError::Unavailable(_))
    }
}

/// Error type covering every stage of a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The file format is unsupported, ambiguous, or contradicts its extension.
    #[error("unsupported format for '{filename}'")]
    Detection { filename: String },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("upload of {size} bytes exceeds limit of {limit} bytes")]
    UploadTooLarge { size: usize, limit: usize },

    #[error("stage did not finish within {0:?}")]
    Timeout(Duration),

    #[error("run cancelled")]
    Cancelled,

    /// A stage worker could not be started or died without reporting.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stable machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::Detection { .. } => "unsupported_format",
            PipelineError::Extraction(ExtractionError::NoTable) => "no_table_found",
            PipelineError::Extraction(_) => "malformed_input",
            PipelineError::Validation(ValidationError::UnknownStep(_)) => "unknown_step",
            PipelineError::Validation(_) => "invalid_parameter",
            PipelineError::Transform(TransformError::MissingColumns { .. }) => "missing_columns",
            PipelineError::Transform(TransformError::Coercion { .. }) => "coercion_failed",
            PipelineError::Transform(TransformError::DuplicateColumn { .. }) => "duplicate_column",
            PipelineError::Load(LoadError::Rejected(_)) => "sink_rejected",
            PipelineError::Load(LoadError::DeadlineExceeded(_)) => "timeout",
            PipelineError::Load(_) => "sink_unavailable",
            PipelineError::UploadTooLarge { .. } => "upload_too_large",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Internal(_) => "internal_error",
        }
    }
}
