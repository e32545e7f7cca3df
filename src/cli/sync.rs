use anyhow::{Context, Result};
use std::fmt::Write as _;
use tracing::info;

use super::{classes, preflight, SyncOverrides};
use crate::catalog::ItemKind;
use crate::orchestrator::BatchWindow;
use crate::pipeline::{RetrySummary, RunSummary, SyncContext};

#[derive(Debug, Clone)]
pub enum SyncMode {
    /// Resume from the stored checkpoint and advance it afterwards.
    Continue,
    /// Explicit offset/window; the checkpoint is not touched.
    Window {
        start_index: usize,
        batch_size: Option<usize>,
    },
}

#[derive(Debug, Clone)]
pub struct SyncCommandConfig {
    pub kind: Option<ItemKind>,
    pub mode: SyncMode,
    pub limit: Option<usize>,
    pub propagate: bool,
    pub overrides: SyncOverrides,
}

pub async fn run(cfg: SyncCommandConfig) -> Result<()> {
    let sync_cfg = cfg.overrides.resolve();
    preflight("asset-sync", &sync_cfg)?;
    let ctx = SyncContext::from_config(sync_cfg)
        .await
        .context("failed to initialize sync pipeline")?;

    let mut out = String::new();
    for kind in classes(cfg.kind) {
        let summary = match &cfg.mode {
            SyncMode::Continue => {
                ctx.continue_class(kind, cfg.overrides.batch_size, cfg.limit, cfg.propagate)
                    .await?
            }
            SyncMode::Window {
                start_index,
                batch_size,
            } => {
                let window = BatchWindow {
                    start_index: *start_index,
                    batch_size: *batch_size,
                    limit: cfg.limit,
                };
                ctx.run_window(kind, &window, cfg.propagate).await?
            }
        };
        render_run(&mut out, &summary);
    }
    let stats = ctx.pool.stats().await;
    info!(
        proxies = stats.total,
        working = stats.working,
        failed = stats.failed,
        "proxy pool at end of run"
    );
    println!("{out}");
    Ok(())
}

fn render_run(out: &mut String, s: &RunSummary) {
    let _ = writeln!(out, "== {} ==", s.kind.class_label());
    if s.batch.dry_run {
        let _ = writeln!(out, "  mode:            dry run (no downloads, no uploads)");
    }
    let _ = writeln!(out, "  window start:    {}", s.start_index);
    let _ = writeln!(out, "  rows scanned:    {}", s.batch.rows_scanned);
    let _ = writeln!(out, "  already mapped:  {}", s.batch.skipped_mapped);
    let _ = writeln!(out, "  synced:          {}", s.batch.synced);
    let _ = writeln!(out, "  failed:          {}", s.batch.failed);
    if let Some(p) = &s.propagation {
        let _ = writeln!(out, "  rows rewritten:  {}", p.rows_updated);
    }
    if let Some(cp) = &s.checkpoint {
        let _ = writeln!(out, "  next start:      {}", cp.next_index);
    }
    let _ = writeln!(out, "  mapping entries: {}", s.mapping_total);
    if s.batch.failed > 0 {
        let _ = writeln!(out, "  failure log:     {}", s.failure_log.display());
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryFailuresConfig {
    pub kind: Option<ItemKind>,
    pub propagate: bool,
    pub overrides: SyncOverrides,
}

pub async fn run_retry(cfg: RetryFailuresConfig) -> Result<()> {
    let sync_cfg = cfg.overrides.resolve();
    preflight("asset-sync retry-failures", &sync_cfg)?;
    let ctx = SyncContext::from_config(sync_cfg)
        .await
        .context("failed to initialize sync pipeline")?;
    let summary = ctx.retry_failures(cfg.kind, cfg.propagate).await?;
    println!("{}", render_retry(&summary));
    Ok(())
}

fn render_retry(s: &RetrySummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "failed urls replayed:   {}", s.replayed);
    let _ = writeln!(out, "  now synced:           {}", s.synced);
    let _ = writeln!(out, "  still failing:        {}", s.failed);
    let _ = writeln!(out, "  mapped since failure: {}", s.already_mapped);
    let _ = writeln!(out, "  gone from catalog:    {}", s.not_in_catalog);
    if !s.propagation.is_empty() {
        let rows: usize = s.propagation.iter().map(|r| r.rows_updated).sum();
        let verb = if s.dry_run { "would be rewritten" } else { "rewritten" };
        let _ = writeln!(out, "catalog rows {verb}: {rows}");
    }
    if s.dry_run {
        let _ = writeln!(out, "dry run: nothing fetched or uploaded");
    }
    let _ = writeln!(out, "failure log: {}", s.failure_log.display());
    out
}
