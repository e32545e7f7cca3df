use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::{classes, SyncOverrides};
use crate::catalog::{self, ItemKind};
use crate::checkpoint::CheckpointStore;
use crate::failures::FailureLog;
use crate::mapping::MappingCache;

#[derive(Debug, Clone, Default)]
pub struct ProgressConfig {
    /// Reset instead of showing. `Some(None)` resets every class.
    pub reset: Option<Option<ItemKind>>,
    pub overrides: SyncOverrides,
}

pub async fn run(cfg: ProgressConfig) -> Result<()> {
    let sync_cfg = cfg.overrides.resolve();
    let checkpoints = CheckpointStore::new(sync_cfg.checkpoint_path());

    if let Some(target) = cfg.reset {
        checkpoints.reset(target)?;
        let label = target.map(|k| k.class_label()).unwrap_or("all classes");
        println!("progress reset: {label}");
        return Ok(());
    }

    let cache = MappingCache::open(&sync_cfg.mapping_path())?;
    let failures = FailureLog::new(sync_cfg.failures_path()).read_all()?;
    let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
    for f in &failures {
        *by_kind.entry(f.kind.as_str()).or_insert(0) += 1;
    }

    let mut out = String::new();
    let _ = writeln!(out, "progress ({})", checkpoints.path().display());
    for kind in classes(None) {
        let cp = checkpoints.get(kind)?;
        let rows = catalog::load_items(&sync_cfg.catalog_dir, kind)?.len();
        let pct = if rows == 0 {
            0.0
        } else {
            (cp.next_index.min(rows) as f64 / rows as f64) * 100.0
        };
        let _ = writeln!(
            out,
            "  {:<9} next={:<7} rows={:<7} processed={:<7} ({pct:.1}%)",
            kind.class_label(),
            cp.next_index,
            rows,
            cp.total_processed,
        );
    }
    let _ = writeln!(out, "mapping entries: {}", cache.len());
    let _ = writeln!(out, "logged failures: {}", failures.len());
    for (label, count) in by_kind {
        let _ = writeln!(out, "  {label:<22} {count}");
    }
    println!("{out}");
    Ok(())
}
