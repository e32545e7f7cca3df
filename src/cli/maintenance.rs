use anyhow::{Context, Result};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use super::{classes, SyncOverrides};
use crate::catalog::{self, ItemKind};
use crate::failures::FailureLog;
use crate::fetch::ReqwestTransport;
use crate::keys::KEY_PREFIX;
use crate::mapping::MappingCache;
use crate::propagate;
use crate::repair::KeyResolver;
use crate::store::UploadSink;
use crate::util::fs::write_atomic;
use crate::verify;

#[derive(Debug, Clone, Default)]
pub struct PropagateConfig {
    pub kind: Option<ItemKind>,
    pub overrides: SyncOverrides,
}

/// Rewrite catalog files with every mapping currently in the cache.
pub async fn run_propagate(cfg: PropagateConfig) -> Result<()> {
    let sync_cfg = cfg.overrides.resolve();
    let cache = MappingCache::open(&sync_cfg.mapping_path())?;
    let entries = cache.snapshot();
    let index = propagate::url_index(&entries);

    let mut out = String::new();
    for kind in classes(cfg.kind) {
        let path = sync_cfg.catalog_dir.join(kind.csv_file_name());
        if !path.exists() {
            let _ = writeln!(out, "{}: not found, skipped", path.display());
            continue;
        }
        let report = if sync_cfg.dry_run {
            let original = std::fs::read(&path)?;
            propagate::rewrite_csv(&original, &index)?.1
        } else {
            propagate::propagate_file(&path, &index)
                .with_context(|| format!("propagating into {}", path.display()))?
        };
        let _ = writeln!(
            out,
            "{}: {} of {} rows {}",
            kind.csv_file_name(),
            report.rows_updated,
            report.rows,
            if sync_cfg.dry_run { "would change" } else { "updated" }
        );
    }
    println!("{out}");
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct RebuildMappingConfig {
    pub overrides: SyncOverrides,
}

/// Recover mapping entries from the keys present in the store. Ambiguous and
/// unmatched keys are written to a review file instead of the mapping.
pub async fn run_rebuild_mapping(cfg: RebuildMappingConfig) -> Result<()> {
    let sync_cfg = cfg.overrides.resolve();
    let store = sync_cfg.store.build_store()?;
    let sink = UploadSink::new(store.clone(), &sync_cfg.store.public_base_url());

    let mut items = Vec::new();
    for kind in ItemKind::ALL {
        items.extend(catalog::load_items(&sync_cfg.catalog_dir, kind)?);
    }
    let resolver = KeyResolver::new(&items)?;
    let keys = store
        .list_keys(&format!("{KEY_PREFIX}/"))
        .await
        .context("listing stored objects")?;

    let cache = MappingCache::open(&sync_cfg.mapping_path())?;
    let report = cache.rebuild_from_store(&keys, &resolver, |k| sink.asset_url(k));
    if !sync_cfg.dry_run {
        cache.flush()?;
    }
    let review = json!({
        "ambiguous": report.ambiguous,
        "unmatched": report.unmatched,
    });
    let review_path = sync_cfg.rebuild_review_path();
    write_atomic(&review_path, &serde_json::to_vec_pretty(&review)?)?;

    println!(
        "stored keys: {}\n  already mapped: {}\n  recovered:      {}\n  ambiguous:      {}\n  unmatched:      {}\nreview file: {}",
        report.scanned,
        report.already_mapped,
        report.recovered.len(),
        report.ambiguous.len(),
        report.unmatched.len(),
        review_path.display()
    );
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ValidateUrlsConfig {
    /// Check source URLs as well as asset URLs.
    pub all: bool,
    pub overrides: SyncOverrides,
}

pub async fn run_validate_urls(cfg: ValidateUrlsConfig) -> Result<()> {
    let sync_cfg = cfg.overrides.resolve();
    let cache = MappingCache::open(&sync_cfg.mapping_path())?;
    let checks = verify::validate_urls(
        &cache.snapshot(),
        Arc::new(ReqwestTransport::new()),
        cfg.all,
        sync_cfg.workers,
        Duration::from_secs(sync_cfg.timeout_secs),
    )
    .await;

    let mut out = String::new();
    let broken: Vec<_> = checks.iter().filter(|c| !c.ok).collect();
    for c in &broken {
        let detail = c
            .status
            .map(|s| s.to_string())
            .or_else(|| c.error.clone())
            .unwrap_or_default();
        let _ = writeln!(out, "BROKEN {detail}  {}", c.url);
    }
    let _ = writeln!(out, "checked {} urls, {} broken", checks.len(), broken.len());
    println!("{out}");
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct VerifyStoreConfig {
    pub overrides: SyncOverrides,
}

pub async fn run_verify_store(cfg: VerifyStoreConfig) -> Result<()> {
    let sync_cfg = cfg.overrides.resolve();
    let store = sync_cfg.store.build_store()?;
    let cache = MappingCache::open(&sync_cfg.mapping_path())?;
    let report = verify::verify_store(&cache.snapshot(), store.as_ref()).await?;

    let mut out = String::new();
    let _ = writeln!(out, "stored objects:  {}", report.stored);
    let _ = writeln!(out, "mapped keys:     {}", report.mapped);
    let _ = writeln!(out, "unreferenced:    {}", report.unreferenced_objects.len());
    for key in report.unreferenced_objects.iter().take(20) {
        let _ = writeln!(out, "  {key}");
    }
    let _ = writeln!(out, "missing:         {}", report.missing_objects.len());
    for key in report.missing_objects.iter().take(20) {
        let _ = writeln!(out, "  {key}");
    }
    println!("{out}");
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ClearFailuresConfig {
    pub overrides: SyncOverrides,
}

pub async fn run_clear_failures(cfg: ClearFailuresConfig) -> Result<()> {
    let sync_cfg = cfg.overrides.resolve();
    let log = FailureLog::new(sync_cfg.failures_path());
    let removed = log.clear()?;
    println!("cleared {removed} failure records from {}", log.path().display());
    Ok(())
}
