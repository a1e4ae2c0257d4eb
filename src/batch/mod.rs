//! Batch processing: many uploads as independent runs on a worker pool.
//!
//! Runs share nothing but the destinations their jobs name. Results come back in job order.
//! Besides the pool size, [`BatchOptions::max_in_flight`] throttles how many runs execute at
//! once, and [`BatchMetrics`] exposes live counters while a batch is running.

mod metrics;
mod semaphore;

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::adapter::{Adapter, CancelFlag, PipelineResult};
use crate::config::BatchConfig;
use crate::load::Destination;
use crate::transform::StepSpec;
use crate::types::RawUpload;

pub use metrics::{BatchEvent, BatchMetrics, BatchMetricsSnapshot, BatchObserver};

use semaphore::Semaphore;

/// Configuration for the [`BatchRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Worker threads; `None` uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Upper bound on concurrently executing runs; `None` means one per worker.
    pub max_in_flight: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

impl From<&BatchConfig> for BatchOptions {
    fn from(cfg: &BatchConfig) -> Self {
        Self {
            num_threads: cfg.num_threads,
            max_in_flight: cfg.max_in_flight,
        }
    }
}

/// One upload of a batch.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub upload: RawUpload,
    pub steps: Vec<StepSpec>,
    pub destination: Destination,
}

impl BatchJob {
    pub fn new(upload: RawUpload, steps: Vec<StepSpec>, destination: Destination) -> Self {
        Self {
            upload,
            steps,
            destination,
        }
    }
}

/// Runs batches of uploads through one [`Adapter`].
pub struct BatchRunner {
    pool: ThreadPool,
    max_in_flight: usize,
    adapter: Arc<Adapter>,
    observer: Option<Arc<dyn BatchObserver>>,
    metrics: Arc<BatchMetrics>,
    cancel: CancelFlag,
}

impl BatchRunner {
    /// Zero counts in `opts` are treated as one.
    pub fn new(adapter: Arc<Adapter>, opts: BatchOptions) -> Result<Self, ThreadPoolBuildError> {
        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("etl-batch-{i}"))
            .build()?;

        Ok(Self {
            pool,
            max_in_flight: opts.max_in_flight.unwrap_or(n_threads).max(1),
            adapter,
            observer: None,
            metrics: Arc::new(BatchMetrics::new()),
            cancel: CancelFlag::new(),
        })
    }

    /// Attach an observer for batch events.
    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Handle to the live metrics.
    pub fn metrics(&self) -> Arc<BatchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Setting this flag stops every pending and in-flight run at its next stage boundary.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Process `jobs`; the result at index `i` belongs to `jobs[i]`.
    pub fn run(&self, jobs: Vec<BatchJob>) -> Vec<PipelineResult> {
        let start = Instant::now();
        self.metrics.begin_batch();
        self.emit(BatchEvent::BatchStarted { jobs: jobs.len() });
        info!(jobs = jobs.len(), max_in_flight = self.max_in_flight, "batch started");

        let sem = Semaphore::new(self.max_in_flight);
        let results: Vec<PipelineResult> = self.pool.install(|| {
            jobs.into_par_iter()
                .map(|job| {
                    let permit = sem.acquire();
                    if !permit.waited.is_zero() {
                        self.metrics.on_throttle_wait(permit.waited);
                        self.emit(BatchEvent::ThrottleWaited {
                            duration: permit.waited,
                        });
                    }

                    let source_id = job.upload.source_id();
                    self.metrics.on_run_start();
                    self.emit(BatchEvent::RunStarted {
                        source_id: source_id.clone(),
                    });
                    debug!(source_id = %source_id, "batch run started");

                    let result =
                        self.adapter
                            .process_with_cancel(job.upload, &job.steps, &job.destination, &self.cancel);

                    self.metrics.on_run_end(result.is_success());
                    self.emit(BatchEvent::RunFinished {
                        source_id,
                        success: result.is_success(),
                    });
                    drop(permit);
                    result
                })
                .collect()
        });

        let elapsed = start.elapsed();
        self.metrics.end_batch(elapsed);
        let snapshot = self.metrics.snapshot();
        info!(%snapshot, "batch finished");
        self.emit(BatchEvent::BatchFinished {
            elapsed,
            metrics: snapshot,
        });
        results
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}
