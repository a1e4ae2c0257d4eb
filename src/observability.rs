use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::adapter::{RunFailure, RunSummary};
use crate::detect::FormatKind;
use crate::error::{ExtractionError, LoadError, PipelineError};

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational event.
    Info,
    /// The run stopped for a reason outside the data (cancellation, size limit).
    Warning,
    /// The input or the transform spec is bad.
    Error,
    /// Infrastructure trouble: sink down, I/O failure, timeout.
    Critical,
}

/// What a run was working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub source_id: String,
    pub filename: String,
    /// [`FormatKind::Unknown`] until detection succeeds.
    pub format: FormatKind,
}

/// Observer interface for run outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait PipelineObserver: Send + Sync {
    /// Called when a run succeeds.
    fn on_success(&self, _ctx: &RunContext, _summary: &RunSummary) {}

    /// Called when a run fails.
    fn on_failure(&self, _ctx: &RunContext, _severity: Severity, _failure: &RunFailure) {}

    /// Called when a failure meets the adapter's alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &RunContext, severity: Severity, failure: &RunFailure) {
        self.on_failure(ctx, severity, failure)
    }
}

/// Severity of a failed run.
pub fn severity_for(error: &PipelineError) -> Severity {
    match error {
        PipelineError::Extraction(ExtractionError::Io(_)) => Severity::Critical,
        PipelineError::Extraction(ExtractionError::Csv(e)) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
            Severity::Critical
        }
        PipelineError::Load(LoadError::Unavailable(_) | LoadError::Io(_) | LoadError::DeadlineExceeded(_)) => {
            Severity::Critical
        }
        PipelineError::Timeout(_) | PipelineError::Internal(_) => Severity::Critical,
        PipelineError::Cancelled | PipelineError::UploadTooLarge { .. } => Severity::Warning,
        PipelineError::Detection { .. }
        | PipelineError::Extraction(_)
        | PipelineError::Validation(_)
        | PipelineError::Transform(_)
        | PipelineError::Load(_) => Severity::Error,
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl PipelineObserver for CompositeObserver {
    fn on_success(&self, ctx: &RunContext, summary: &RunSummary) {
        for o in &self.observers {
            o.on_success(ctx, summary);
        }
    }

    fn on_failure(&self, ctx: &RunContext, severity: Severity, failure: &RunFailure) {
        for o in &self.observers {
            o.on_failure(ctx, severity, failure);
        }
    }

    fn on_alert(&self, ctx: &RunContext, severity: Severity, failure: &RunFailure) {
        for o in &self.observers {
            o.on_alert(ctx, severity, failure);
        }
    }
}

/// Emits run outcomes as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_success(&self, ctx: &RunContext, summary: &RunSummary) {
        info!(
            source_id = %ctx.source_id,
            filename = %ctx.filename,
            format = %ctx.format,
            rows = summary.row_count,
            columns = summary.column_names.len(),
            "run succeeded"
        );
    }

    fn on_failure(&self, ctx: &RunContext, severity: Severity, failure: &RunFailure) {
        warn!(
            source_id = %ctx.source_id,
            filename = %ctx.filename,
            format = %ctx.format,
            ?severity,
            stage = failure.stage.as_str(),
            reason = %failure.reason,
            cause = %failure.cause_detail,
            "run failed"
        );
    }

    fn on_alert(&self, ctx: &RunContext, severity: Severity, failure: &RunFailure) {
        error!(
            source_id = %ctx.source_id,
            filename = %ctx.filename,
            ?severity,
            stage = failure.stage.as_str(),
            reason = %failure.reason,
            cause = %failure.cause_detail,
            "ALERT: run failed"
        );
    }
}

/// Appends one JSON object per event to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, event: serde_json::Value) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{event}");
        }
    }

    fn failure_event(kind: &str, ctx: &RunContext, severity: Severity, failure: &RunFailure) -> serde_json::Value {
        json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "event": kind,
            "severity": severity,
            "source_id": ctx.source_id,
            "filename": ctx.filename,
            "format": ctx.format,
            "stage": failure.stage,
            "reason": failure.reason,
            "cause": failure.cause_detail,
        })
    }
}

impl PipelineObserver for FileObserver {
    fn on_success(&self, ctx: &RunContext, summary: &RunSummary) {
        self.append(json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "event": "success",
            "source_id": ctx.source_id,
            "filename": ctx.filename,
            "format": ctx.format,
            "rows": summary.row_count,
            "columns": summary.column_names,
        }));
    }

    fn on_failure(&self, ctx: &RunContext, severity: Severity, failure: &RunFailure) {
        self.append(Self::failure_event("failure", ctx, severity, failure));
    }

    fn on_alert(&self, ctx: &RunContext, severity: Severity, failure: &RunFailure) {
        self.append(Self::failure_event("alert", ctx, severity, failure));
    }
}
