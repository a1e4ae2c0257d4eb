use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tempfile::NamedTempFile;

use crate::error::LoadError;
use crate::types::CanonicalTable;

use super::{Deadline, LoadReceipt, Sink, WriteMode};

/// One lock per target file, shared by every sink in the process that writes to it.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    locks.entry(key).or_default().clone()
}

/// Writes rows as JSON objects, one per line.
///
/// Each commit writes the complete new file next to the target and renames it into place, so
/// readers see either the old or the new contents. Sinks for the same path serialize their
/// commits, so concurrent appends from separate runs all land.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    mode: WriteMode,
    lock: Arc<Mutex<()>>,
}

impl JsonLinesSink {
    pub fn new(path: impl AsRef<Path>, mode: WriteMode) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            lock: path_lock(&path),
            path,
            mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn existing(&self) -> Result<Vec<u8>, LoadError> {
        match fs::read(&self.path) {
            Ok(mut bytes) => {
                if !bytes.is_empty() && !bytes.ends_with(b"\n") {
                    bytes.push(b'\n');
                }
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Sink for JsonLinesSink {
    fn name(&self) -> &str {
        "json_lines"
    }

    fn accept(&self, table: &CanonicalTable, deadline: Deadline) -> Result<LoadReceipt, LoadError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| LoadError::Unavailable("json-lines sink lock poisoned".into()))?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir).map_err(|e| {
            LoadError::Unavailable(format!("cannot stage file in {}: {e}", dir.display()))
        })?;

        let prefix = match self.mode {
            WriteMode::Append => self.existing()?,
            WriteMode::Overwrite => Vec::new(),
        };
        let kept_rows = prefix.iter().filter(|&&b| b == b'\n').count();

        let mut out = BufWriter::new(tmp);
        out.write_all(&prefix)?;
        for record in table.to_records() {
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;
        }
        let tmp = out.into_inner().map_err(|e| LoadError::Io(e.into_error()))?;
        tmp.as_file().sync_all()?;
        deadline.check()?;
        tmp.persist(&self.path).map_err(|e| LoadError::Io(e.error))?;

        Ok(LoadReceipt {
            sink: self.name().to_string(),
            rows_written: table.row_count(),
            total_rows: kept_rows + table.row_count(),
        })
    }
}
