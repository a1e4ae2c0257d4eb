//! The adapter: one request-scoped `process` call composing detect, extract, transform and load.
//!
//! A run moves through [`RunState`]s strictly in order. The first failing stage ends the run in
//! `Failed(stage)`, and only the adapter turns the internal error into the caller-facing
//! [`RunFailure`] (`stage`, stable `reason` code, one-line `cause_detail`).
//!
//! Extraction and load can be bounded by timeouts ([`AdapterOptions`]); a load that misses its
//! deadline has committed nothing. Cancellation
//! ([`CancelFlag`]) is observed between stages only; a stage in flight always runs to its own end.
//!
//! ```rust
//! use dynamic_etl::adapter::Adapter;
//! use dynamic_etl::load::{Destination, MemorySink, WriteMode};
//! use dynamic_etl::transform::StepSpec;
//! use dynamic_etl::types::RawUpload;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let sink = Arc::new(MemorySink::new(WriteMode::Overwrite));
//! let destination = Destination::new(sink.clone());
//! let upload = RawUpload::new("id,name\n1,Alice\n2,Bob\n", "data.csv");
//! let steps = [StepSpec::new("drop_column", json!({"column": "name"}))];
//!
//! let result = Adapter::default().process(upload, &steps, &destination);
//! let summary = result.summary().expect("run succeeded");
//! assert_eq!(summary.row_count, 2);
//! assert_eq!(summary.column_names, ["id"]);
//! assert_eq!(sink.row_count(), 2);
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::detect::{detect, FormatKind, SNIFF_LEN};
use crate::error::{LoadError, PipelineError};
use crate::extract::{extractor_for, ExtractOptions};
use crate::load::{Deadline, Destination, DestinationConfig, LoadReceipt, Loader, RetryPolicy};
use crate::observability::{severity_for, PipelineObserver, RunContext, Severity};
use crate::schema::{infer_schema, SchemaRegistry, SchemaVersion, TableSchema};
use crate::transform::{self, compile, parse_transform_spec, StepReport, StepSpec};
use crate::types::RawUpload;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Detect,
    Extract,
    Transform,
    Load,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Detect => "detect",
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Received,
    Detected,
    Extracted,
    Transformed,
    Loaded,
    Succeeded,
    Failed(Stage),
}

impl RunState {
    /// State reached once `stage` completes.
    fn after(stage: Stage) -> RunState {
        match stage {
            Stage::Validate => RunState::Received,
            Stage::Detect => RunState::Detected,
            Stage::Extract => RunState::Extracted,
            Stage::Transform => RunState::Transformed,
            Stage::Load => RunState::Loaded,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed(_))
    }
}

/// Data-quality counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleaningStats {
    pub rows_before: usize,
    pub rows_after: usize,
    pub nulls_before: usize,
    pub nulls_after: usize,
    /// Rows removed by `deduplicate` steps.
    pub duplicates_dropped: usize,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub source_id: String,
    pub format: FormatKind,
    pub row_count: usize,
    pub column_names: Vec<String>,
    /// Wall time per executed stage, keyed by stage name.
    pub per_stage_timing_ms: BTreeMap<Stage, u64>,
    pub steps: Vec<StepReport>,
    pub cleaning: CleaningStats,
    pub schema: TableSchema,
    /// Present when the adapter has a schema registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<SchemaVersion>,
    pub load: LoadReceipt,
    pub load_attempts: u32,
    /// Non-fatal extraction and registry issues.
    pub warnings: Vec<String>,
}

/// Caller-facing description of a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub source_id: String,
    pub stage: Stage,
    /// Stable snake_case reason code.
    pub reason: String,
    /// Human-readable cause.
    pub cause_detail: String,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineResult {
    Success(RunSummary),
    Failure(RunFailure),
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResult::Success(_))
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            PipelineResult::Success(s) => Some(s),
            PipelineResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            PipelineResult::Success(_) => None,
            PipelineResult::Failure(f) => Some(f),
        }
    }

    /// Terminal state of the run.
    pub fn state(&self) -> RunState {
        match self {
            PipelineResult::Success(_) => RunState::Succeeded,
            PipelineResult::Failure(f) => RunState::Failed(f.stage),
        }
    }
}

/// Shared cancellation flag; cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run limits and extraction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOptions {
    /// The extract stage runs on a helper thread; the run stops waiting for it at the limit.
    pub extract_timeout: Option<Duration>,
    /// Covers all load attempts together. Checked before each attempt and by the sink before it
    /// commits, so a timed-out load has written nothing.
    pub load_timeout: Option<Duration>,
    pub max_upload_bytes: Option<usize>,
    pub retry: RetryPolicy,
    pub extract: ExtractOptions,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for AdapterOptions {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            extract_timeout: cfg.extract_timeout_ms.map(Duration::from_millis),
            load_timeout: cfg.load_timeout_ms.map(Duration::from_millis),
            max_upload_bytes: cfg.max_upload_bytes,
            retry: RetryPolicy {
                max_retries: cfg.load.max_retries,
                backoff: Duration::from_millis(cfg.load.backoff_ms),
            },
            extract: ExtractOptions::default(),
        }
    }
}

/// Composes the pipeline stages for a host service.
pub struct Adapter {
    options: AdapterOptions,
    observer: Option<Arc<dyn PipelineObserver>>,
    alert_at_or_above: Severity,
    registry: Option<Arc<SchemaRegistry>>,
}

impl Default for Adapter {
    fn default() -> Self {
        Self::new(AdapterOptions::default())
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("options", &self.options)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("registry_set", &self.registry.is_some())
            .finish()
    }
}

impl Adapter {
    pub fn new(options: AdapterOptions) -> Self {
        Self {
            options,
            observer: None,
            alert_at_or_above: Severity::Critical,
            registry: None,
        }
    }

    /// Report outcomes to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Severity at which failures are also reported through `on_alert` (default: critical).
    pub fn with_alert_threshold(mut self, severity: Severity) -> Self {
        self.alert_at_or_above = severity;
        self
    }

    /// Record the schema of every successful run, per source id.
    pub fn with_schema_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    /// Run `upload` through the pipeline.
    pub fn process(&self, upload: RawUpload, steps: &[StepSpec], destination: &Destination) -> PipelineResult {
        self.process_with_cancel(upload, steps, destination, &CancelFlag::default())
    }

    /// Like [`Self::process`], stopping at the next stage boundary once `cancel` is set.
    pub fn process_with_cancel(
        &self,
        upload: RawUpload,
        steps: &[StepSpec],
        destination: &Destination,
        cancel: &CancelFlag,
    ) -> PipelineResult {
        let mut run = Run::new(&upload);
        debug!(source_id = %run.ctx.source_id, filename = %run.ctx.filename, "run received");
        let outcome = self.execute(&mut run, upload, steps, destination, cancel);
        self.finish(run, outcome)
    }

    /// Like [`Self::process`], with the transform spec as a JSON document (explicit or shorthand
    /// entries). An unparseable document fails the run at the validate stage.
    pub fn process_document(
        &self,
        upload: RawUpload,
        transform_spec: &serde_json::Value,
        destination: &Destination,
    ) -> PipelineResult {
        match parse_transform_spec(transform_spec) {
            Ok(steps) => self.process(upload, &steps, destination),
            Err(e) => {
                let mut run = Run::new(&upload);
                run.state = RunState::Failed(Stage::Validate);
                self.finish(
                    run,
                    Err(Failed {
                        stage: Stage::Validate,
                        error: e.into(),
                    }),
                )
            }
        }
    }

    fn execute(
        &self,
        run: &mut Run,
        upload: RawUpload,
        specs: &[StepSpec],
        destination: &Destination,
        cancel: &CancelFlag,
    ) -> Result<RunSummary, Failed> {
        let max_upload_bytes = self.options.max_upload_bytes;
        let steps = run.stage(Stage::Validate, || {
            if let Some(limit) = max_upload_bytes {
                if upload.content.len() > limit {
                    return Err(PipelineError::UploadTooLarge {
                        size: upload.content.len(),
                        limit,
                    });
                }
            }
            Ok(compile(specs)?)
        })?;

        run.checkpoint(cancel, Stage::Detect)?;
        let format = run.stage(Stage::Detect, || {
            let sample = &upload.content[..upload.content.len().min(SNIFF_LEN)];
            match detect(&upload.filename, sample) {
                FormatKind::Unknown => Err(PipelineError::Detection {
                    filename: upload.filename.clone(),
                }),
                kind => Ok(kind),
            }
        })?;
        run.ctx.format = format;

        run.checkpoint(cancel, Stage::Extract)?;
        let extract_options = self.options.extract.clone();
        let extract_timeout = self.options.extract_timeout;
        let content = upload.content;
        let filename = upload.filename;
        let extraction = run.stage(Stage::Extract, move || {
            let extractor = extractor_for(format, &extract_options).ok_or(PipelineError::Detection { filename })?;
            run_bounded(extract_timeout, move || Ok(extractor.extract(&content)?))
        })?;
        let mut warnings = extraction.warnings;
        let table = extraction.table;
        debug!(
            source_id = %run.ctx.source_id,
            rows = table.row_count(),
            columns = table.column_count(),
            "extracted"
        );

        run.checkpoint(cancel, Stage::Transform)?;
        let output = run.stage(Stage::Transform, || Ok(transform::run(&table, &steps)?))?;
        let cleaning = CleaningStats {
            rows_before: table.row_count(),
            rows_after: output.table.row_count(),
            nulls_before: table.null_count(),
            nulls_after: output.table.null_count(),
            duplicates_dropped: output
                .reports
                .iter()
                .filter(|r| r.step_name == "deduplicate")
                .map(|r| r.rows_before - r.rows_after)
                .sum(),
        };
        drop(table);

        let table = output.table;
        let schema = infer_schema(&table);
        let row_count = table.row_count();
        let column_names = table.columns().to_vec();

        run.checkpoint(cancel, Stage::Load)?;
        let sink = destination.sink();
        let loader = Loader::new(self.options.retry);
        let deadline = Deadline::from_timeout(self.options.load_timeout);
        let delivery = run.stage(Stage::Load, || match loader.load(&table, sink.as_ref(), deadline) {
            Ok(delivery) => Ok(delivery),
            Err(LoadError::DeadlineExceeded(limit)) => Err(PipelineError::Timeout(limit)),
            Err(e) => Err(e.into()),
        })?;

        let schema_version = self.registry.as_ref().and_then(|registry| {
            match registry.register(&run.ctx.source_id, schema.clone()) {
                Ok(version) => Some(version),
                Err(e) => {
                    warnings.push(format!("schema not recorded: {e}"));
                    None
                }
            }
        });

        Ok(RunSummary {
            source_id: run.ctx.source_id.clone(),
            format,
            row_count,
            column_names,
            per_stage_timing_ms: run.timings.clone(),
            steps: output.reports,
            cleaning,
            schema,
            schema_version,
            load: delivery.receipt,
            load_attempts: delivery.attempts,
            warnings,
        })
    }

    fn finish(&self, mut run: Run, outcome: Result<RunSummary, Failed>) -> PipelineResult {
        match outcome {
            Ok(summary) => {
                run.transition(RunState::Succeeded);
                info!(
                    source_id = %summary.source_id,
                    format = %summary.format,
                    rows = summary.row_count,
                    elapsed_ms = run.started.elapsed().as_millis() as u64,
                    "run succeeded"
                );
                if let Some(obs) = &self.observer {
                    obs.on_success(&run.ctx, &summary);
                }
                PipelineResult::Success(summary)
            }
            Err(Failed { stage, error }) => {
                let failure = RunFailure {
                    source_id: run.ctx.source_id.clone(),
                    stage,
                    reason: error.reason().to_string(),
                    cause_detail: error.to_string(),
                };
                let severity = severity_for(&error);
                warn!(
                    source_id = %failure.source_id,
                    stage = stage.as_str(),
                    reason = %failure.reason,
                    cause = %failure.cause_detail,
                    "run failed"
                );
                if let Some(obs) = &self.observer {
                    obs.on_failure(&run.ctx, severity, &failure);
                    if severity >= self.alert_at_or_above {
                        obs.on_alert(&run.ctx, severity, &failure);
                    }
                }
                PipelineResult::Failure(failure)
            }
        }
    }
}

/// Run one upload with default options: the `process(raw_bytes, filename, transform_spec,
/// destination_config)` entry point for hosts that hold everything as plain data.
pub fn process(
    raw_bytes: Vec<u8>,
    filename: &str,
    transform_spec: &serde_json::Value,
    destination: &DestinationConfig,
) -> PipelineResult {
    Adapter::default().process_document(
        RawUpload::new(raw_bytes, filename),
        transform_spec,
        &Destination::from_config(destination),
    )
}

struct Failed {
    stage: Stage,
    error: PipelineError,
}

/// Bookkeeping for one run.
struct Run {
    ctx: RunContext,
    state: RunState,
    timings: BTreeMap<Stage, u64>,
    started: Instant,
}

impl Run {
    fn new(upload: &RawUpload) -> Self {
        Self {
            ctx: RunContext {
                source_id: upload.source_id(),
                filename: upload.filename.clone(),
                format: FormatKind::Unknown,
            },
            state: RunState::Received,
            timings: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    fn transition(&mut self, to: RunState) {
        if self.state != to {
            debug!(source_id = %self.ctx.source_id, from = ?self.state, to = ?to, "run state");
            self.state = to;
        }
    }

    /// Time `f` as `stage` and move to the matching state.
    fn stage<T>(&mut self, stage: Stage, f: impl FnOnce() -> Result<T, PipelineError>) -> Result<T, Failed> {
        let start = Instant::now();
        let out = f();
        self.timings.insert(stage, start.elapsed().as_millis() as u64);
        match out {
            Ok(v) => {
                self.transition(RunState::after(stage));
                Ok(v)
            }
            Err(error) => {
                self.transition(RunState::Failed(stage));
                Err(Failed { stage, error })
            }
        }
    }

    /// Abort before `next` starts when the run was cancelled.
    fn checkpoint(&mut self, cancel: &CancelFlag, next: Stage) -> Result<(), Failed> {
        if cancel.is_cancelled() {
            self.transition(RunState::Failed(next));
            return Err(Failed {
                stage: next,
                error: PipelineError::Cancelled,
            });
        }
        Ok(())
    }
}

/// Run `f` on a helper thread and stop waiting after `timeout`. Without a timeout `f` runs
/// inline. A timed-out worker is left to finish on its own; its result is discarded.
fn run_bounded<T, F>(timeout: Option<Duration>, f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    let Some(limit) = timeout else {
        return f();
    };

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("etl-stage".into())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| PipelineError::Internal(format!("cannot start stage worker: {e}")))?;

    match rx.recv_timeout(limit) {
        Ok(out) => out,
        Err(RecvTimeoutError::Timeout) => Err(PipelineError::Timeout(limit)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(PipelineError::Internal("stage worker exited without a result".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{MemorySink, WriteMode};
    use serde_json::json;

    fn memory() -> (Arc<MemorySink>, Destination) {
        let sink = Arc::new(MemorySink::new(WriteMode::Overwrite));
        let dest = Destination::new(sink.clone());
        (sink, dest)
    }

    #[test]
    fn run_bounded_inline_without_timeout() {
        assert_eq!(run_bounded(None, || Ok(7)).unwrap(), 7);
    }

    #[test]
    fn run_bounded_times_out() {
        let err = run_bounded(Some(Duration::from_millis(10)), || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(_)));
    }

    #[test]
    fn run_bounded_reports_worker_panic() {
        let err = run_bounded::<(), _>(Some(Duration::from_secs(5)), || panic!("boom")).unwrap_err();
        assert_eq!(err.reason(), "internal_error");
    }

    #[test]
    fn unknown_step_fails_before_detection() {
        let (sink, dest) = memory();
        // Not a valid file either: validation must win.
        let upload = RawUpload::new(vec![0u8, 1, 2], "blob.bin");
        let result = Adapter::default().process(upload, &[StepSpec::new("explode", json!({}))], &dest);
        let failure = result.failure().unwrap();
        assert_eq!(failure.stage, Stage::Validate);
        assert_eq!(failure.reason, "unknown_step");
        assert_eq!(result.state(), RunState::Failed(Stage::Validate));
        assert_eq!(sink.row_count(), 0);
    }

    #[test]
    fn upload_limit_is_enforced() {
        let (_, dest) = memory();
        let adapter = Adapter::new(AdapterOptions {
            max_upload_bytes: Some(4),
            ..AdapterOptions::default()
        });
        let result = adapter.process(RawUpload::new("a,b\n1,2\n", "x.csv"), &[], &dest);
        assert_eq!(result.failure().unwrap().reason, "upload_too_large");
    }

    #[test]
    fn cancelled_before_start_stops_at_detect() {
        let (_, dest) = memory();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result =
            Adapter::default().process_with_cancel(RawUpload::new("a\n1\n", "x.csv"), &[], &dest, &cancel);
        let failure = result.failure().unwrap();
        assert_eq!(failure.stage, Stage::Detect);
        assert_eq!(failure.reason, "cancelled");
    }

    #[test]
    fn cancel_between_stages_fails_the_next_stage() {
        let upload = RawUpload::new("a\n1\n", "x.csv");
        let cancel = CancelFlag::new();
        let mut run = Run::new(&upload);
        run.stage(Stage::Validate, || Ok(())).map_err(|f| f.error).unwrap();
        run.checkpoint(&cancel, Stage::Detect).map_err(|f| f.error).unwrap();
        run.stage(Stage::Detect, || Ok(())).map_err(|f| f.error).unwrap();
        assert_eq!(run.state, RunState::after(Stage::Detect));

        cancel.cancel();
        let failed = run.checkpoint(&cancel, Stage::Extract).unwrap_err();
        assert_eq!(failed.stage, Stage::Extract);
        assert_eq!(failed.error.reason(), "cancelled");
        assert_eq!(run.state, RunState::Failed(Stage::Extract));
        assert!(!run.timings.contains_key(&Stage::Extract));
    }

    /// Raises a shared cancel flag while committing.
    struct CancellingSink {
        inner: MemorySink,
        cancel: CancelFlag,
    }

    impl crate::load::Sink for CancellingSink {
        fn name(&self) -> &str {
            "cancelling"
        }

        fn accept(&self, table: &crate::types::CanonicalTable, deadline: Deadline) -> Result<LoadReceipt, LoadError> {
            self.cancel.cancel();
            self.inner.accept(table, deadline)
        }
    }

    #[test]
    fn cancel_during_a_stage_lets_it_finish_and_stops_the_next_run() {
        let cancel = CancelFlag::new();
        let sink = Arc::new(CancellingSink {
            inner: MemorySink::new(WriteMode::Append),
            cancel: cancel.clone(),
        });
        let dest = Destination::new(sink.clone());
        let adapter = Adapter::default();

        let first = adapter.process_with_cancel(RawUpload::new("a\n1\n", "x.csv"), &[], &dest, &cancel);
        assert!(first.is_success());
        assert!(cancel.is_cancelled());

        let second = adapter.process_with_cancel(RawUpload::new("a\n2\n", "x.csv"), &[], &dest, &cancel);
        let failure = second.failure().unwrap();
        assert_eq!((failure.stage, failure.reason.as_str()), (Stage::Detect, "cancelled"));
        assert_eq!(sink.inner.row_count(), 1);
    }

    #[test]
    fn slow_extraction_times_out_before_load() {
        let (sink, dest) = memory();
        let mut body = String::from("id,name,city\n");
        for i in 0..300_000 {
            body.push_str(&format!("{i},user_{i},Berlin\n"));
        }
        let adapter = Adapter::new(AdapterOptions {
            extract_timeout: Some(Duration::from_millis(1)),
            ..AdapterOptions::default()
        });
        let result = adapter.process(RawUpload::new(body, "big.csv"), &[], &dest);

        let failure = result.failure().unwrap();
        assert_eq!((failure.stage, failure.reason.as_str()), (Stage::Extract, "timeout"));
        assert_eq!(result.state(), RunState::Failed(Stage::Extract));
        assert_eq!(sink.row_count(), 0);
    }

    #[test]
    fn summary_carries_timings_and_cleaning_stats() {
        let (_, dest) = memory();
        let upload = RawUpload::new("k,v\n1,a\n1,a\n2,\n", "pairs.csv");
        let steps = [
            StepSpec::new("deduplicate", json!({})),
            StepSpec::new("fill_null", json!({"column": "v", "value": "z"})),
        ];
        let result = Adapter::default().process(upload, &steps, &dest);
        let summary = result.summary().unwrap();
        assert_eq!(summary.source_id, "pairs");
        assert_eq!(summary.format, FormatKind::Delimited);
        assert_eq!(summary.row_count, 2);
        assert_eq!(
            summary.cleaning,
            CleaningStats {
                rows_before: 3,
                rows_after: 2,
                nulls_before: 1,
                nulls_after: 0,
                duplicates_dropped: 1,
            }
        );
        let stages: Vec<Stage> = summary.per_stage_timing_ms.keys().copied().collect();
        assert_eq!(
            stages,
            [Stage::Validate, Stage::Detect, Stage::Extract, Stage::Transform, Stage::Load]
        );
        assert_eq!(summary.load_attempts, 1);
    }

    #[test]
    fn result_serializes_with_status_tag() {
        let (_, dest) = memory();
        let result = Adapter::default().process(RawUpload::new("a\n1\n", "x.csv"), &[], &dest);
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["status"], "success");
        assert_eq!(v["format"], "delimited");
        assert!(v["per_stage_timing_ms"]["extract"].is_u64());
    }

    #[test]
    fn document_parse_errors_fail_at_validate() {
        let (_, dest) = memory();
        let result = Adapter::default().process_document(
            RawUpload::new("a\n1\n", "x.csv"),
            &json!({"not": "an array"}),
            &dest,
        );
        let failure = result.failure().unwrap();
        assert_eq!(failure.stage, Stage::Validate);
        assert_eq!(failure.reason, "invalid_parameter");
    }
}
