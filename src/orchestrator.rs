//! Batch orchestration: plan a window of catalog rows into sync tasks, fan
//! them out over a bounded worker pool and collect the outcomes.
//!
//! Occurrence indices (and with them storage keys) are fixed while planning,
//! in source order, so completion order never influences naming.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogItem, ItemKind};
use crate::error::{Result, SyncError};
use crate::failures::{FailureLog, FailureRecord};
use crate::fetch::AssetSource;
use crate::keys::{self, OccurrenceTracker};
use crate::mapping::{MappingCache, MappingEntry, PutOutcome};
use crate::store::UploadSink;

/// Offset/window over the scan of catalog rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchWindow {
    pub start_index: usize,
    /// Rows to scan from `start_index`; `None` scans to the end.
    pub batch_size: Option<usize>,
    /// Cap on dispatched tasks.
    pub limit: Option<usize>,
}

impl BatchWindow {
    pub fn full() -> Self {
        Self::default()
    }

    fn end(&self, rows: usize) -> usize {
        match self.batch_size {
            Some(size) => self.start_index.saturating_add(size).min(rows),
            None => rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub item_id: String,
    pub item_kind: ItemKind,
    pub display_name: String,
    pub theme: Option<String>,
    pub source_url: String,
    pub occurrence: usize,
}

impl SyncTask {
    pub fn derived_key(&self) -> String {
        keys::derive(
            &self.source_url,
            self.item_kind,
            &self.item_id,
            &self.display_name,
            self.theme.as_deref(),
            self.occurrence,
        )
    }

    fn failure(&self, err: &SyncError) -> FailureRecord {
        self.failure_with(err.kind(), err.to_string())
    }

    fn failure_with(&self, kind: &str, reason: String) -> FailureRecord {
        FailureRecord {
            source_url: self.source_url.clone(),
            item_id: self.item_id.clone(),
            item_kind: self.item_kind,
            kind: kind.to_string(),
            reason,
            attempted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub tasks: Vec<SyncTask>,
    pub rows_scanned: usize,
    pub skipped_mapped: usize,
    pub skipped_duplicate: usize,
}

/// Scan `items` in source order and turn the rows inside `window` into tasks.
///
/// The occurrence tracker sees every image from row 0 onwards, mapped or not,
/// so the index of an image is the same no matter which window it falls in.
/// URLs under `hosted_base` already point at the store (a propagated catalog)
/// and count as mapped.
pub fn plan_tasks(
    items: &[CatalogItem],
    cache: &MappingCache,
    window: &BatchWindow,
    hosted_base: Option<&str>,
) -> BatchPlan {
    let end = window.end(items.len());
    let mut tracker = OccurrenceTracker::new();
    let mut seen_urls: HashSet<&str> = HashSet::new();
    let mut plan = BatchPlan::default();

    for (row, item) in items.iter().enumerate().take(end) {
        let in_window = row >= window.start_index;
        if in_window {
            plan.rows_scanned += 1;
        }
        for url in &item.source_image_urls {
            let occurrence = tracker.next(item.kind, &item.id);
            let first_sighting = seen_urls.insert(url.as_str());
            if !in_window {
                continue;
            }
            let hosted = hosted_base.is_some_and(|base| url.starts_with(base));
            if hosted || cache.contains(url) {
                plan.skipped_mapped += 1;
                continue;
            }
            if !first_sighting {
                plan.skipped_duplicate += 1;
                continue;
            }
            if window.limit.is_some_and(|limit| plan.tasks.len() >= limit) {
                continue;
            }
            plan.tasks.push(SyncTask {
                item_id: item.id.clone(),
                item_kind: item.kind,
                display_name: item.display_name.clone(),
                theme: item.theme.clone(),
                source_url: url.clone(),
                occurrence,
            });
        }
    }
    plan
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub rows_scanned: usize,
    pub planned: usize,
    pub synced: usize,
    pub failed: usize,
    pub skipped_mapped: usize,
    pub skipped_duplicate: usize,
    pub dry_run: bool,
    pub elapsed_ms: u128,
    /// URLs that made it into the mapping during this batch.
    #[serde(skip)]
    pub synced_urls: Vec<String>,
}

enum TaskOutcome {
    Synced(MappingEntry),
    Raced,
    Failed(FailureRecord),
}

pub struct Orchestrator {
    source: Arc<dyn AssetSource>,
    sink: UploadSink,
    cache: Arc<MappingCache>,
    failures: Arc<FailureLog>,
    workers: usize,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn AssetSource>,
        sink: UploadSink,
        cache: Arc<MappingCache>,
        failures: Arc<FailureLog>,
        workers: usize,
    ) -> Self {
        Self {
            source,
            sink,
            cache,
            failures,
            workers: workers.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<MappingCache> {
        &self.cache
    }

    pub fn failures(&self) -> &Arc<FailureLog> {
        &self.failures
    }

    pub fn sink(&self) -> &UploadSink {
        &self.sink
    }

    /// Plan and execute one window. Per-item failures end up in the failure
    /// log; only persistence errors abort.
    pub async fn run_batch(&self, items: &[CatalogItem], window: &BatchWindow) -> Result<BatchSummary> {
        let plan = plan_tasks(items, &self.cache, window, Some(self.sink.public_base_url()));
        info!(
            start = window.start_index,
            rows = plan.rows_scanned,
            tasks = plan.tasks.len(),
            skipped_mapped = plan.skipped_mapped,
            workers = self.workers,
            "batch planned"
        );
        self.execute(plan).await
    }

    /// Run already planned tasks, then persist the mapping and failure log.
    pub async fn execute(&self, plan: BatchPlan) -> Result<BatchSummary> {
        let started = Instant::now();
        let mut summary = BatchSummary {
            rows_scanned: plan.rows_scanned,
            planned: plan.tasks.len(),
            skipped_mapped: plan.skipped_mapped,
            skipped_duplicate: plan.skipped_duplicate,
            ..BatchSummary::default()
        };

        let sem = Arc::new(Semaphore::new(self.workers));
        let mut futs = FuturesUnordered::new();
        for task in plan.tasks {
            let permit = match sem.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let source = self.source.clone();
            let sink = self.sink.clone();
            let cache = self.cache.clone();
            let fallback = task.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                sync_one(task, source.as_ref(), &sink, &cache).await
            });
            futs.push(async move { (fallback, handle.await) });
        }

        while let Some((task, joined)) = futs.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                TaskOutcome::Failed(task.failure_with("internal", format!("worker aborted: {e}")))
            });
            match outcome {
                TaskOutcome::Synced(entry) => {
                    summary.synced += 1;
                    summary.synced_urls.push(entry.source_url);
                }
                TaskOutcome::Raced => summary.skipped_mapped += 1,
                TaskOutcome::Failed(record) => {
                    summary.failed += 1;
                    self.failures.record(record);
                }
            }
        }

        self.cache.flush()?;
        self.failures.flush()?;
        summary.elapsed_ms = started.elapsed().as_millis();
        info!(
            synced = summary.synced,
            failed = summary.failed,
            skipped_mapped = summary.skipped_mapped,
            elapsed_ms = summary.elapsed_ms as u64,
            "batch complete"
        );
        Ok(summary)
    }

    /// Derive keys and record the mappings that a real run would produce into
    /// `ledger`, without touching the network or the real cache.
    pub fn dry_run(
        &self,
        items: &[CatalogItem],
        window: &BatchWindow,
        ledger: &MappingCache,
    ) -> Result<BatchSummary> {
        let plan = plan_tasks(items, &self.cache, window, Some(self.sink.public_base_url()));
        self.record_dry_run(plan, ledger)
    }

    /// Dry-run counterpart of [`Orchestrator::execute`] for an already built
    /// plan.
    pub fn record_dry_run(&self, plan: BatchPlan, ledger: &MappingCache) -> Result<BatchSummary> {
        let started = Instant::now();
        let mut summary = BatchSummary {
            rows_scanned: plan.rows_scanned,
            planned: plan.tasks.len(),
            skipped_mapped: plan.skipped_mapped,
            skipped_duplicate: plan.skipped_duplicate,
            dry_run: true,
            ..BatchSummary::default()
        };
        for task in plan.tasks {
            let key = task.derived_key();
            debug!(url = %task.source_url, key = %key, "dry run mapping");
            let entry = MappingEntry {
                source_url: task.source_url,
                asset_url: self.sink.asset_url(&key),
                derived_key: key,
            };
            summary.synced_urls.push(entry.source_url.clone());
            ledger.put(entry);
            summary.synced += 1;
        }
        ledger.flush()?;
        summary.elapsed_ms = started.elapsed().as_millis();
        info!(planned = summary.planned, "dry run complete");
        Ok(summary)
    }
}

/// One task: derive, fetch, upload, record.
async fn sync_one(
    task: SyncTask,
    source: &dyn AssetSource,
    sink: &UploadSink,
    cache: &MappingCache,
) -> TaskOutcome {
    let key = task.derived_key();
    let bytes = match source.fetch(&task.source_url).await {
        Ok(b) => b,
        Err(e) => {
            let err = SyncError::from(e);
            warn!(url = %task.source_url, item = %task.item_id, error = %err, "fetch failed");
            return TaskOutcome::Failed(task.failure(&err));
        }
    };
    let asset_url = match sink.upload(bytes, &key).await {
        Ok(url) => url,
        Err(e) => {
            let err = SyncError::from(e);
            warn!(url = %task.source_url, key = %key, error = %err, "upload failed");
            return TaskOutcome::Failed(task.failure(&err));
        }
    };
    let entry = MappingEntry {
        source_url: task.source_url,
        asset_url,
        derived_key: key,
    };
    match cache.put(entry.clone()) {
        PutOutcome::Inserted => TaskOutcome::Synced(entry),
        PutOutcome::AlreadyMapped { existing } => {
            debug!(url = %entry.source_url, existing = %existing, "mapped concurrently; keeping existing entry");
            TaskOutcome::Raced
        }
    }
}
