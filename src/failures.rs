use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::catalog::ItemKind;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source_url: String,
    pub item_id: String,
    pub item_kind: ItemKind,
    /// Stable error label, see `SyncError::kind`.
    pub kind: String,
    pub reason: String,
    pub attempted_at: DateTime<Utc>,
}

/// Append-only JSON-lines log of per-item failures. Records are buffered in
/// memory during a batch and appended to the file on `flush`; existing lines
/// are never rewritten except by an explicit `clear`.
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    pending: Mutex<Vec<FailureRecord>>,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, record: FailureRecord) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Append buffered records to the log file. Returns how many were written.
    pub fn flush(&self) -> Result<usize> {
        let drained: Vec<FailureRecord> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };
        if drained.is_empty() {
            return Ok(0);
        }
        let mut buf = Vec::new();
        for record in &drained {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        file.sync_data()?;
        debug!(path = %self.path.display(), count = drained.len(), "failure records appended");
        Ok(drained.len())
    }

    /// Every record in the log file, oldest first. Lines that do not parse are
    /// skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<FailureRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        let mut out = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FailureRecord>(&line) {
                Ok(record) => out.push(record),
                Err(e) => warn!(line = idx + 1, error = %e, "skipping malformed failure record"),
            }
        }
        Ok(out)
    }

    /// Remove the log file. Returns how many records it held.
    pub fn clear(&self) -> Result<usize> {
        let count = self.read_all()?.len();
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(count)
    }
}
