//! Per item-class resume cursors.
//!
//! File shape: `{"sets": {"last_index": 300, "total_processed": 300}, ...}`.
//! `last_index` is the scan offset the next batch starts at.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::catalog::ItemKind;
use crate::error::{Result, SyncError};
use crate::util::fs::write_atomic;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredCursor {
    #[serde(default)]
    last_index: usize,
    #[serde(default)]
    total_processed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub item_class: ItemKind,
    pub next_index: usize,
    pub total_processed: usize,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, StoredCursor>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let corrupt = |reason: String| SyncError::CheckpointCorruption {
            path: self.path.clone(),
            reason,
        };
        let text = std::fs::read_to_string(&self.path).map_err(|e| corrupt(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))
    }

    fn save(&self, cursors: &BTreeMap<String, StoredCursor>) -> Result<()> {
        let body = serde_json::to_vec_pretty(cursors)?;
        write_atomic(&self.path, &body)?;
        Ok(())
    }

    pub fn get(&self, kind: ItemKind) -> Result<Checkpoint> {
        let cursor = self
            .load()?
            .get(kind.class_label())
            .copied()
            .unwrap_or_default();
        Ok(Checkpoint {
            item_class: kind,
            next_index: cursor.last_index,
            total_processed: cursor.total_processed,
        })
    }

    pub fn all(&self) -> Result<Vec<Checkpoint>> {
        ItemKind::ALL.iter().map(|k| self.get(*k)).collect()
    }

    pub fn next_start(&self, kind: ItemKind) -> Result<usize> {
        Ok(self.get(kind)?.next_index)
    }

    /// Move the cursor forward by the requested window size and add the
    /// number of rows the batch actually attempted.
    pub fn advance(&self, kind: ItemKind, by: usize, processed: usize) -> Result<Checkpoint> {
        let mut cursors = self.load()?;
        let cursor = cursors.entry(kind.class_label().to_string()).or_default();
        cursor.last_index = cursor.last_index.saturating_add(by);
        cursor.total_processed = cursor.total_processed.saturating_add(processed);
        let updated = *cursor;
        self.save(&cursors)?;
        info!(
            class = kind.class_label(),
            next_index = updated.last_index,
            total_processed = updated.total_processed,
            "checkpoint advanced"
        );
        Ok(Checkpoint {
            item_class: kind,
            next_index: updated.last_index,
            total_processed: updated.total_processed,
        })
    }

    /// Reset one class, or every class when `kind` is `None`.
    pub fn reset(&self, kind: Option<ItemKind>) -> Result<()> {
        let mut cursors = self.load()?;
        match kind {
            Some(k) => {
                cursors.insert(k.class_label().to_string(), StoredCursor::default());
            }
            None => {
                for k in ItemKind::ALL {
                    cursors.insert(k.class_label().to_string(), StoredCursor::default());
                }
            }
        }
        self.save(&cursors)?;
        info!(class = kind.map(|k| k.class_label()).unwrap_or("all"), "checkpoint reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_advance_and_reset_independently() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("extract_progress.json"));
        assert_eq!(store.next_start(ItemKind::Set).unwrap(), 0);

        store.advance(ItemKind::Set, 100, 37).unwrap();
        store.advance(ItemKind::Set, 100, 100).unwrap();
        store.advance(ItemKind::Minifig, 50, 50).unwrap();

        let set = store.get(ItemKind::Set).unwrap();
        assert_eq!((set.next_index, set.total_processed), (200, 137));

        store.reset(Some(ItemKind::Set)).unwrap();
        assert_eq!(store.next_start(ItemKind::Set).unwrap(), 0);
        assert_eq!(store.next_start(ItemKind::Minifig).unwrap(), 50);

        store.reset(None).unwrap();
        assert!(store.all().unwrap().iter().all(|c| c.next_index == 0));
    }

    #[test]
    fn reads_existing_progress_file_shape() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("extract_progress.json");
        std::fs::write(
            &path,
            r#"{"sets": {"last_index": 1200, "total_processed": 1187}, "minifigs": {"last_index": 0, "total_processed": 0}}"#,
        )
        .unwrap();
        let store = CheckpointStore::new(&path);
        assert_eq!(store.next_start(ItemKind::Set).unwrap(), 1200);
    }

    #[test]
    fn garbage_is_checkpoint_corruption() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("extract_progress.json");
        std::fs::write(&path, "[1,2").unwrap();
        let err = CheckpointStore::new(&path).next_start(ItemKind::Set).unwrap_err();
        assert!(matches!(err, SyncError::CheckpointCorruption { .. }));
    }
}
