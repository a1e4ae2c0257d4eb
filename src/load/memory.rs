use std::sync::Mutex;

use crate::error::LoadError;
use crate::types::CanonicalTable;

use super::{Deadline, LoadReceipt, Sink, WriteMode};

/// Holds committed rows in memory.
///
/// Appending a table whose columns differ from the stored ones is rejected.
#[derive(Debug, Default)]
pub struct MemorySink {
    mode: WriteMode,
    state: Mutex<Option<CanonicalTable>>,
}

impl MemorySink {
    pub fn new(mode: WriteMode) -> Self {
        Self {
            mode,
            state: Mutex::new(None),
        }
    }

    /// Copy of everything committed so far.
    pub fn snapshot(&self) -> Option<CanonicalTable> {
        self.state.lock().ok().and_then(|g| g.clone())
    }

    pub fn row_count(&self) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(CanonicalTable::row_count))
            .unwrap_or(0)
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn accept(&self, table: &CanonicalTable, deadline: Deadline) -> Result<LoadReceipt, LoadError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| LoadError::Unavailable("memory sink lock poisoned".into()))?;

        // Build the full next state first; the swap below is the commit point.
        let next = match (self.mode, guard.as_ref()) {
            (WriteMode::Append, Some(existing)) => {
                if existing.columns() != table.columns() {
                    return Err(LoadError::Rejected(format!(
                        "columns {:?} do not match stored columns {:?}",
                        table.columns(),
                        existing.columns()
                    )));
                }
                let (columns, mut rows) = existing.clone().into_parts();
                rows.extend(table.rows().iter().cloned());
                CanonicalTable::from_parts(columns, rows)
            }
            _ => table.clone(),
        };

        let total_rows = next.row_count();
        deadline.check()?;
        *guard = Some(next);
        Ok(LoadReceipt {
            sink: self.name().to_string(),
            rows_written: table.row_count(),
            total_rows,
        })
    }
}
