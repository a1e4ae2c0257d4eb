//! Loading: hand a finished [`CanonicalTable`] to a destination sink.
//!
//! The destination is a [`Sink`] capability. Sinks commit a table all-or-nothing: either every
//! row is visible afterwards or none is. [`Loader`] wraps a sink with bounded retries for
//! transient failures ([`LoadError::Unavailable`]); every other failure is returned at once.
//!
//! A load may carry a [`Deadline`]. The loader checks it before every attempt and before every
//! backoff sleep, and sinks check it right before their commit point, so a load reported as
//! timed out has committed nothing.

mod jsonl;
mod memory;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LoadError;
use crate::types::CanonicalTable;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;

/// What a sink reports after committing a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReceipt {
    /// Sink name, for diagnostics.
    pub sink: String,
    /// Rows committed by this call.
    pub rows_written: usize,
    /// Rows held by the destination after the commit.
    pub total_rows: usize,
}

/// How a sink combines a new table with what it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Append,
    Overwrite,
}

/// Destination capability.
///
/// Implementations must commit all-or-nothing and own their locking discipline; the same sink
/// may be shared by concurrent runs.
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Commit `table`.
    ///
    /// Call [`Deadline::check`] immediately before the commit point; once it fails nothing may
    /// be committed.
    fn accept(&self, table: &CanonicalTable, deadline: Deadline) -> Result<LoadReceipt, LoadError>;
}

/// Latest instant at which a load may still commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    /// Unbounded.
    pub fn none() -> Self {
        Self::default()
    }

    /// `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget,
        }
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or_else(Self::none, Self::after)
    }

    /// The duration the deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    pub fn check(&self) -> Result<(), LoadError> {
        if self.is_expired() {
            Err(LoadError::DeadlineExceeded(self.budget))
        } else {
            Ok(())
        }
    }
}

/// Declarative destination, as found in configuration or a CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationConfig {
    /// A fresh in-memory sink (useful for dry runs).
    Memory {
        #[serde(default)]
        mode: WriteMode,
    },
    /// A JSON-lines file, one object per row.
    JsonLines {
        path: PathBuf,
        #[serde(default)]
        mode: WriteMode,
    },
}

impl Default for DestinationConfig {
    fn default() -> Self {
        DestinationConfig::Memory {
            mode: WriteMode::default(),
        }
    }
}

/// A shareable handle to a sink.
#[derive(Clone)]
pub struct Destination {
    sink: Arc<dyn Sink>,
}

impl Destination {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    /// Build the sink a config describes.
    pub fn from_config(config: &DestinationConfig) -> Self {
        let sink: Arc<dyn Sink> = match config {
            DestinationConfig::Memory { mode } => Arc::new(MemorySink::new(*mode)),
            DestinationConfig::JsonLines { path, mode } => Arc::new(JsonLinesSink::new(path, *mode)),
        };
        Self { sink }
    }

    pub fn sink(&self) -> Arc<dyn Sink> {
        Arc::clone(&self.sink)
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("sink", &self.sink.name())
            .finish()
    }
}

/// Commit `table` to the destination `config` describes, without retries or deadline.
pub fn load(table: &CanonicalTable, config: &DestinationConfig) -> Result<LoadReceipt, LoadError> {
    Destination::from_config(config).sink().accept(table, Deadline::none())
}

/// Bounded retry with doubling backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
    }
}

/// A successful load and how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receipt: LoadReceipt,
    pub attempts: u32,
}

/// Runs sink commits under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Loader {
    policy: RetryPolicy,
}

impl Loader {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Commit `table` to `sink`, retrying transient failures until `deadline`.
    ///
    /// Returns the last error once retries are exhausted, or
    /// [`LoadError::DeadlineExceeded`] when the deadline leaves no room for another attempt.
    pub fn load(&self, table: &CanonicalTable, sink: &dyn Sink, deadline: Deadline) -> Result<Delivery, LoadError> {
        let mut attempt: u32 = 0;
        loop {
            deadline.check()?;
            attempt += 1;
            match sink.accept(table, deadline) {
                Ok(receipt) => {
                    if attempt > 1 {
                        info!(sink = sink.name(), attempt, "load succeeded after retry");
                    }
                    return Ok(Delivery {
                        receipt,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_transient() && attempt <= self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt - 1);
                    if deadline.remaining().is_some_and(|left| left <= delay) {
                        warn!(sink = sink.name(), attempt, error = %e, "load failed; no time left to retry");
                        return Err(LoadError::DeadlineExceeded(deadline.budget()));
                    }
                    warn!(
                        sink = sink.name(),
                        attempt,
                        max_attempts = self.policy.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "load failed; retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    warn!(sink = sink.name(), attempt, error = %e, "load failed");
                    return Err(e);
                }
            }
        }
    }
}
