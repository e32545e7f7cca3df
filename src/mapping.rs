//! Durable source URL -> asset URL ledger.
//!
//! The whole file is loaded at start and rewritten atomically at batch
//! boundaries. An entry, once present, is never replaced: `put` on a mapped
//! URL is a no-op that reports the existing asset URL.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::util::fs::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub source_url: String,
    pub asset_url: String,
    pub derived_key: String,
}

/// On-disk value. Older ledgers stored the bare asset URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Full {
        asset_url: String,
        derived_key: String,
    },
    Legacy(String),
}

impl StoredValue {
    fn into_entry(self, source_url: String) -> MappingEntry {
        match self {
            StoredValue::Full {
                asset_url,
                derived_key,
            } => MappingEntry {
                source_url,
                asset_url,
                derived_key,
            },
            StoredValue::Legacy(asset_url) => {
                let derived_key = url::Url::parse(&asset_url)
                    .map(|u| u.path().trim_start_matches('/').to_string())
                    .unwrap_or_default();
                MappingEntry {
                    source_url,
                    asset_url,
                    derived_key,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyMapped { existing: String },
}

#[derive(Debug, Default)]
pub struct MappingCache {
    path: Option<PathBuf>,
    entries: RwLock<IndexMap<String, MappingEntry>>,
    dirty: AtomicBool,
}

impl MappingCache {
    /// Cache with no backing file; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the ledger at `path`. A missing file is an empty ledger; a file that
    /// exists but does not parse refuses to open.
    pub fn open(path: &Path) -> Result<Self> {
        let mut entries = IndexMap::new();
        if path.exists() {
            let corrupt = |reason: String| SyncError::CacheCorruption {
                path: path.to_path_buf(),
                reason,
            };
            let text = std::fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
            if !text.trim().is_empty() {
                let raw: IndexMap<String, StoredValue> =
                    serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
                for (source_url, value) in raw {
                    let entry = value.into_entry(source_url.clone());
                    entries.insert(source_url, entry);
                }
            }
            info!(path = %path.display(), entries = entries.len(), "mapping cache loaded");
        } else {
            debug!(path = %path.display(), "no mapping cache yet; starting empty");
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, MappingEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, MappingEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lookup(&self, source_url: &str) -> Option<String> {
        self.read().get(source_url).map(|e| e.asset_url.clone())
    }

    pub fn contains(&self, source_url: &str) -> bool {
        self.read().contains_key(source_url)
    }

    /// Record a mapping unless the URL is already mapped. Check and insert
    /// happen under one write lock.
    pub fn put(&self, entry: MappingEntry) -> PutOutcome {
        let mut entries = self.write();
        if let Some(existing) = entries.get(&entry.source_url) {
            return PutOutcome::AlreadyMapped {
                existing: existing.asset_url.clone(),
            };
        }
        entries.insert(entry.source_url.clone(), entry);
        self.dirty.store(true, Ordering::Release);
        PutOutcome::Inserted
    }

    pub fn snapshot(&self) -> Vec<MappingEntry> {
        self.read().values().cloned().collect()
    }

    /// Every asset key currently referenced by the ledger.
    pub fn derived_keys(&self) -> Vec<String> {
        self.read().values().map(|e| e.derived_key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist pending changes. Returns whether anything was written.
    pub fn flush(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let body = {
            let entries = self.read();
            let on_disk: IndexMap<&str, StoredValue> = entries
                .values()
                .map(|e| {
                    (
                        e.source_url.as_str(),
                        StoredValue::Full {
                            asset_url: e.asset_url.clone(),
                            derived_key: e.derived_key.clone(),
                        },
                    )
                })
                .collect();
            serde_json::to_vec_pretty(&on_disk)?
        };
        if let Err(e) = write_atomic(path, &body) {
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        debug!(path = %path.display(), entries = self.len(), "mapping cache flushed");
        Ok(true)
    }
}
