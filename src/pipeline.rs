//! Run-level driver: checkpoint -> batch -> propagate -> advance.

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{self, CatalogItem, ItemKind};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::failures::FailureLog;
use crate::fetch::{AssetFetcher, AssetSource, ReqwestTransport};
use crate::mapping::MappingCache;
use crate::orchestrator::{plan_tasks, BatchPlan, BatchSummary, BatchWindow, Orchestrator};
use crate::propagate::{self, PropagationReport};
use crate::proxy::{load_endpoints, ProxyPool};
use crate::store::{LocalDirStore, ObjectStore, UploadSink};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub kind: ItemKind,
    pub start_index: usize,
    pub batch: BatchSummary,
    /// Checkpoint after the run; `None` when the run does not move it.
    pub checkpoint: Option<Checkpoint>,
    pub propagation: Option<PropagationReport>,
    pub mapping_total: usize,
    pub failure_log: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrySummary {
    pub replayed: usize,
    pub already_mapped: usize,
    pub not_in_catalog: usize,
    pub synced: usize,
    pub failed: usize,
    pub recovered_urls: Vec<String>,
    pub dry_run: bool,
    /// Catalog rewrites, or previews of them on a dry run.
    pub propagation: Vec<PropagationReport>,
    pub failure_log: PathBuf,
}

/// Everything one invocation needs, wired once.
pub struct SyncContext {
    pub cfg: SyncConfig,
    pub pool: Arc<ProxyPool>,
    pub checkpoints: CheckpointStore,
    orchestrator: Orchestrator,
}

impl SyncContext {
    /// Wire real components from configuration. Fails fast on an unreadable
    /// mapping or checkpoint file and on missing store credentials.
    pub async fn from_config(cfg: SyncConfig) -> Result<Self> {
        let endpoints = if cfg.use_proxies {
            load_endpoints(&cfg.proxies_file)?
        } else {
            Vec::new()
        };
        let pool = Arc::new(ProxyPool::new(endpoints, cfg.pool_config()));
        if cfg.use_proxies && pool.is_empty().await && !cfg.allow_direct {
            warn!("proxy pool is empty and direct connections are not allowed; every fetch will fail");
        }

        let store: Arc<dyn ObjectStore> = match cfg.store.build_store() {
            Ok(store) => store,
            // a dry run never uploads, so it may run without credentials
            Err(e) if cfg.dry_run => {
                warn!(error = %e, "store unavailable; continuing because this is a dry run");
                Arc::new(LocalDirStore::new(cfg.state_dir.join("dry-run-store")))
            }
            Err(e) => return Err(e),
        };
        let fetcher = AssetFetcher::new(
            Arc::new(ReqwestTransport::new()),
            pool.clone(),
            cfg.fetch_config(),
            cfg.normalizer(),
        );
        Self::with_parts(cfg, pool, Arc::new(fetcher), store)
    }

    pub fn with_parts(
        cfg: SyncConfig,
        pool: Arc<ProxyPool>,
        source: Arc<dyn AssetSource>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let cache = Arc::new(MappingCache::open(&cfg.mapping_path())?);
        let checkpoints = CheckpointStore::new(cfg.checkpoint_path());
        checkpoints.all()?;
        let failures = Arc::new(FailureLog::new(cfg.failures_path()));
        let sink = UploadSink::new(store, &cfg.store.public_base_url());
        let orchestrator = Orchestrator::new(source, sink, cache, failures, cfg.workers);
        Ok(Self {
            cfg,
            pool,
            checkpoints,
            orchestrator,
        })
    }

    pub fn cache(&self) -> &Arc<MappingCache> {
        self.orchestrator.cache()
    }

    pub fn failures(&self) -> &Arc<FailureLog> {
        self.orchestrator.failures()
    }

    pub fn sink(&self) -> &UploadSink {
        self.orchestrator.sink()
    }

    pub fn load_items(&self, kind: ItemKind) -> Result<Vec<CatalogItem>> {
        catalog::load_items(&self.cfg.catalog_dir, kind)
    }

    /// Next checkpointed window of `kind`. The checkpoint moves by the
    /// requested batch size even when some rows failed or were skipped.
    pub async fn continue_class(
        &self,
        kind: ItemKind,
        batch_size: Option<usize>,
        limit: Option<usize>,
        propagate: bool,
    ) -> Result<RunSummary> {
        let batch_size = batch_size.unwrap_or(self.cfg.batch_size).max(1);
        let start_index = self.checkpoints.next_start(kind)?;
        let items = self.load_items(kind)?;
        if start_index >= items.len() {
            info!(kind = %kind, start_index, rows = items.len(), "checkpoint is past the end of the catalog");
        }
        let window = BatchWindow {
            start_index,
            batch_size: Some(batch_size),
            limit,
        };
        let mut summary = self.run_window_inner(kind, &items, &window, propagate).await?;
        if !self.cfg.dry_run {
            summary.checkpoint =
                Some(self.checkpoints.advance(kind, batch_size, summary.batch.rows_scanned)?);
        }
        Ok(summary)
    }

    /// Explicit window; the checkpoint is left alone.
    pub async fn run_window(
        &self,
        kind: ItemKind,
        window: &BatchWindow,
        propagate: bool,
    ) -> Result<RunSummary> {
        let items = self.load_items(kind)?;
        self.run_window_inner(kind, &items, window, propagate).await
    }

    async fn run_window_inner(
        &self,
        kind: ItemKind,
        items: &[CatalogItem],
        window: &BatchWindow,
        propagate: bool,
    ) -> Result<RunSummary> {
        let (batch, propagation) = if self.cfg.dry_run {
            let ledger = MappingCache::open(&self.cfg.dry_run_mapping_path())?;
            let batch = self.orchestrator.dry_run(items, window, &ledger)?;
            let preview = propagate.then(|| self.preview_propagation(kind, &ledger)).transpose()?;
            (batch, preview)
        } else {
            let batch = self.orchestrator.run_batch(items, window).await?;
            let propagation = if propagate {
                self.propagate_kind(kind)?
            } else {
                None
            };
            (batch, propagation)
        };
        Ok(RunSummary {
            kind,
            start_index: window.start_index,
            batch,
            checkpoint: None,
            propagation,
            mapping_total: self.cache().len(),
            failure_log: self.failures().path().to_path_buf(),
        })
    }

    /// Rewrite the catalog file of `kind` with every current mapping.
    pub fn propagate_kind(&self, kind: ItemKind) -> Result<Option<PropagationReport>> {
        let path = self.cfg.catalog_dir.join(kind.csv_file_name());
        if !path.exists() {
            return Ok(None);
        }
        let entries = self.cache().snapshot();
        let report = propagate::propagate_file(&path, &propagate::url_index(&entries))?;
        Ok(Some(report))
    }

    /// Rows a real run would rewrite, computed in memory only.
    fn preview_propagation(&self, kind: ItemKind, ledger: &MappingCache) -> Result<PropagationReport> {
        let path = self.cfg.catalog_dir.join(kind.csv_file_name());
        if !path.exists() {
            return Ok(PropagationReport::default());
        }
        let mut entries = self.cache().snapshot();
        entries.extend(ledger.snapshot());
        let original = std::fs::read(&path)?;
        let (_, report) = propagate::rewrite_csv(&original, &propagate::url_index(&entries))?;
        Ok(report)
    }

    /// Replay logged failures whose source URL is still unmapped. The
    /// checkpoint is not touched. On a dry run the replay only derives keys
    /// into the dry-run ledger and propagation is previewed.
    pub async fn retry_failures(
        &self,
        kind: Option<ItemKind>,
        propagate: bool,
    ) -> Result<RetrySummary> {
        let records = self.failures().read_all()?;
        let mut pending: HashSet<String> = HashSet::new();
        let mut already_mapped = 0;
        for r in records.iter().filter(|r| kind.map_or(true, |k| r.item_kind == k)) {
            if self.cache().contains(&r.source_url) {
                already_mapped += 1;
            } else {
                pending.insert(r.source_url.clone());
            }
        }
        let replayed = pending.len();

        let mut plan = BatchPlan::default();
        let mut found: HashSet<String> = HashSet::new();
        let kinds: Vec<ItemKind> = match kind {
            Some(k) => vec![k],
            None => ItemKind::ALL.to_vec(),
        };
        for &k in &kinds {
            let items = self.load_items(k)?;
            let full = plan_tasks(
                &items,
                self.cache(),
                &BatchWindow::full(),
                Some(self.sink().public_base_url()),
            );
            for task in full.tasks {
                if pending.contains(&task.source_url) && found.insert(task.source_url.clone()) {
                    plan.tasks.push(task);
                }
            }
        }
        let not_in_catalog = replayed - found.len();
        if not_in_catalog > 0 {
            warn!(count = not_in_catalog, "failed urls no longer present in the catalog");
        }
        info!(replayed = plan.tasks.len(), "retrying logged failures");

        let mut propagation = Vec::new();
        let batch = if self.cfg.dry_run {
            let ledger = MappingCache::open(&self.cfg.dry_run_mapping_path())?;
            let batch = self.orchestrator.record_dry_run(plan, &ledger)?;
            if propagate {
                for &k in &kinds {
                    propagation.push(self.preview_propagation(k, &ledger)?);
                }
            }
            batch
        } else {
            let batch = self.orchestrator.execute(plan).await?;
            if propagate && batch.synced > 0 {
                for &k in &kinds {
                    propagation.extend(self.propagate_kind(k)?);
                }
            }
            batch
        };
        Ok(RetrySummary {
            replayed,
            already_mapped,
            not_in_catalog,
            synced: batch.synced,
            failed: batch.failed,
            recovered_urls: batch.synced_urls,
            dry_run: batch.dry_run,
            propagation,
            failure_log: self.failures().path().to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::proxy::PoolConfig;
    use crate::test_support::{FailingSource, FakeSource, MemoryStore};

    const SETS: &str = "set_num,name,year,theme_id,num_parts,img_url\n\
                        10353-1,Bird,2024,721,800,https://cdn.test/sets/10353-1.jpg\n\
                        10354-1,Tree,2024,721,500,https://cdn.test/sets/10354-1.jpg\n\
                        10355-1,Fox,2024,721,300,\n\
                        10356-1,Owl,2024,721,300,https://cdn.test/sets/10356-1.jpg\n";
    const THEMES: &str = "id,name,parent_id\n721,Icons,\n";

    fn workspace() -> (tempfile::TempDir, SyncConfig) {
        let dir = tempfile::TempDir::new().unwrap();
        let catalog_dir = dir.path().join("catalog");
        std::fs::create_dir_all(&catalog_dir).unwrap();
        std::fs::write(catalog_dir.join("sets.csv"), SETS).unwrap();
        std::fs::write(catalog_dir.join("themes.csv"), THEMES).unwrap();
        let cfg = SyncConfig {
            catalog_dir,
            state_dir: dir.path().join("state"),
            workers: 3,
            ..SyncConfig::default()
        };
        (dir, cfg)
    }

    fn context(cfg: SyncConfig, source: Arc<dyn AssetSource>) -> (SyncContext, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let pool = Arc::new(ProxyPool::empty(PoolConfig::default()));
        let ctx = SyncContext::with_parts(cfg, pool, source, store.clone()).unwrap();
        (ctx, store)
    }

    #[tokio::test]
    async fn continue_advances_and_propagates() {
        let (_dir, cfg) = workspace();
        let (ctx, store) = context(cfg.clone(), Arc::new(FakeSource::ok()));

        let first = ctx.continue_class(ItemKind::Set, Some(2), None, true).await.unwrap();
        assert_eq!(first.batch.synced, 2);
        assert_eq!(first.checkpoint.as_ref().unwrap().next_index, 2);
        assert_eq!(first.propagation.unwrap().rows_updated, 2);
        assert!(store
            .keys()
            .contains(&"catalog/set/lego-icons-bird-10353-1.jpg".to_string()));

        let second = ctx.continue_class(ItemKind::Set, Some(2), None, true).await.unwrap();
        assert_eq!(second.start_index, 2);
        assert_eq!(second.batch.synced, 1);
        assert_eq!(second.checkpoint.unwrap().next_index, 4);

        let csv = std::fs::read_to_string(cfg.catalog_dir.join("sets.csv")).unwrap();
        assert!(csv.contains(
            "10354-1,Tree,2024,721,500,https://images.bricksdeal.com/catalog/set/lego-icons-tree-10354-1.jpg"
        ));
        assert!(csv.contains("10355-1,Fox,2024,721,300,\n"));
    }

    #[tokio::test]
    async fn empty_pool_failures_still_advance_the_checkpoint() {
        let (_dir, cfg) = workspace();
        let source = Arc::new(FailingSource::new(FetchError::ProxyExhausted));
        let (ctx, store) = context(cfg, source);

        let summary = ctx.continue_class(ItemKind::Set, Some(4), None, false).await.unwrap();
        assert_eq!((summary.batch.synced, summary.batch.failed), (0, 3));
        assert!(ctx.cache().is_empty());
        assert!(store.keys().is_empty());
        assert_eq!(summary.checkpoint.unwrap().next_index, 4);

        let logged = ctx.failures().read_all().unwrap();
        assert_eq!(logged.len(), 3);
        assert!(logged.iter().all(|r| r.kind == "proxy_exhausted"));
    }

    #[tokio::test]
    async fn retry_failures_replays_without_moving_the_checkpoint() {
        let (_dir, cfg) = workspace();
        let flaky = Arc::new(FakeSource::ok());
        flaky.fail("https://cdn.test/sets/10354-1.jpg", FetchError::Transient("timeout".into()));
        {
            let (ctx, _) = context(cfg.clone(), flaky);
            let s = ctx.continue_class(ItemKind::Set, Some(4), None, false).await.unwrap();
            assert_eq!(s.batch.failed, 1);
        }

        let (ctx, _) = context(cfg, Arc::new(FakeSource::ok()));
        let retry = ctx.retry_failures(None, false).await.unwrap();
        assert_eq!((retry.replayed, retry.synced, retry.failed), (1, 1, 0));
        assert_eq!(retry.recovered_urls, ["https://cdn.test/sets/10354-1.jpg"]);
        assert_eq!(ctx.checkpoints.next_start(ItemKind::Set).unwrap(), 4);
        assert_eq!(ctx.cache().len(), 3);

        // a second replay finds nothing left to do
        let again = ctx.retry_failures(Some(ItemKind::Set), false).await.unwrap();
        assert_eq!((again.replayed, again.already_mapped), (0, 1));
    }

    #[tokio::test]
    async fn dry_run_retry_only_records_into_the_dry_run_ledger() {
        let (_dir, cfg) = workspace();
        let flaky = Arc::new(FakeSource::ok());
        flaky.fail("https://cdn.test/sets/10354-1.jpg", FetchError::Transient("timeout".into()));
        {
            let (ctx, _) = context(cfg.clone(), flaky);
            let s = ctx.continue_class(ItemKind::Set, Some(4), None, false).await.unwrap();
            assert_eq!(s.batch.failed, 1);
        }
        let csv_before = std::fs::read(cfg.catalog_dir.join("sets.csv")).unwrap();
        let mapping_before = std::fs::read(cfg.mapping_path()).unwrap();

        let cfg = SyncConfig {
            dry_run: true,
            ..cfg
        };
        let source = Arc::new(FakeSource::ok());
        let (ctx, store) = context(cfg.clone(), source.clone());
        let retry = ctx.retry_failures(None, true).await.unwrap();

        assert!(retry.dry_run);
        assert_eq!((retry.replayed, retry.synced), (1, 1));
        assert_eq!(source.calls(), 0);
        assert_eq!(store.put_count(), 0);
        assert_eq!(ctx.cache().len(), 2);
        assert!(!ctx.cache().contains("https://cdn.test/sets/10354-1.jpg"));
        assert_eq!(std::fs::read(cfg.mapping_path()).unwrap(), mapping_before);
        assert_eq!(std::fs::read(cfg.catalog_dir.join("sets.csv")).unwrap(), csv_before);
        // preview covers the two rows already mapped plus the replayed one
        assert_eq!(retry.propagation.iter().map(|r| r.rows_updated).sum::<usize>(), 3);

        let ledger = MappingCache::open(&cfg.dry_run_mapping_path()).unwrap();
        assert!(ledger.contains("https://cdn.test/sets/10354-1.jpg"));
    }

    #[tokio::test]
    async fn dry_run_touches_neither_cache_nor_checkpoint_nor_catalog() {
        let (_dir, cfg) = workspace();
        let cfg = SyncConfig {
            dry_run: true,
            ..cfg
        };
        let source = Arc::new(FakeSource::ok());
        let (ctx, store) = context(cfg.clone(), source.clone());

        let summary = ctx.continue_class(ItemKind::Set, None, None, true).await.unwrap();
        assert!(summary.batch.dry_run);
        assert_eq!(summary.batch.synced, 3);
        assert_eq!(summary.propagation.unwrap().rows_updated, 3);
        assert!(summary.checkpoint.is_none());
        assert_eq!(source.calls(), 0);
        assert!(store.keys().is_empty());
        assert!(ctx.cache().is_empty());
        assert_eq!(std::fs::read_to_string(cfg.catalog_dir.join("sets.csv")).unwrap(), SETS);
        assert!(cfg.dry_run_mapping_path().exists());
    }

    #[tokio::test]
    async fn corrupt_mapping_refuses_to_start() {
        let (_dir, cfg) = workspace();
        std::fs::create_dir_all(&cfg.state_dir).unwrap();
        std::fs::write(cfg.mapping_path(), "{oops").unwrap();
        let store = Arc::new(MemoryStore::default());
        let pool = Arc::new(ProxyPool::empty(PoolConfig::default()));
        let err = SyncContext::with_parts(cfg, pool, Arc::new(FakeSource::ok()), store)
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
