use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Events emitted by the [`super::BatchRunner`].
#[derive(Debug, Clone)]
pub enum BatchEvent {
    BatchStarted { jobs: usize },
    ThrottleWaited { duration: Duration },
    RunStarted { source_id: String },
    RunFinished { source_id: String, success: bool },
    BatchFinished {
        elapsed: Duration,
        metrics: BatchMetricsSnapshot,
    },
}

/// Observer hook for batch events.
pub trait BatchObserver: Send + Sync {
    fn on_event(&self, event: &BatchEvent);
}

/// Live counters for the current batch; snapshot them at any time.
#[derive(Debug, Default)]
pub struct BatchMetrics {
    batch_id: AtomicU64,
    elapsed_ns: AtomicU64,

    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_runs: AtomicUsize,
    max_active_runs: AtomicUsize,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_batch(&self) {
        self.batch_id.fetch_add(1, Ordering::SeqCst);
        for counter in [
            &self.elapsed_ns,
            &self.runs_started,
            &self.runs_succeeded,
            &self.runs_failed,
            &self.throttle_wait_ns,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.active_runs.store(0, Ordering::SeqCst);
        self.max_active_runs.store(0, Ordering::SeqCst);
    }

    pub(crate) fn end_batch(&self, elapsed: Duration) {
        self.elapsed_ns.store(saturating_nanos(elapsed), Ordering::SeqCst);
    }

    pub(crate) fn on_run_start(&self) {
        self.runs_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_runs.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn on_run_end(&self, success: bool) {
        if success {
            self.runs_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.runs_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.active_runs.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn on_throttle_wait(&self, d: Duration) {
        self.throttle_wait_ns.fetch_add(saturating_nanos(d), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> BatchMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        BatchMetricsSnapshot {
            batch_id: self.batch_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            runs_started: self.runs_started.load(Ordering::SeqCst),
            runs_succeeded: self.runs_succeeded.load(Ordering::SeqCst),
            runs_failed: self.runs_failed.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_runs: self.max_active_runs.load(Ordering::SeqCst),
        }
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Immutable snapshot of [`BatchMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchMetricsSnapshot {
    pub batch_id: u64,
    /// `None` while the batch is still running.
    pub elapsed: Option<Duration>,
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub throttle_wait: Duration,
    pub max_active_runs: usize,
}

impl fmt::Display for BatchMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch_id={}, runs={}/{} ok, failed={}, max_active_runs={}, throttle_wait={:?}, elapsed={:?}",
            self.batch_id,
            self.runs_succeeded,
            self.runs_started,
            self.runs_failed,
            self.max_active_runs,
            self.throttle_wait,
            self.elapsed
        )
    }
}
