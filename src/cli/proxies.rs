use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use super::SyncOverrides;
use crate::fetch::ReqwestTransport;
use crate::proxy::probe::{probe_all, DEFAULT_PROBE_URL};
use crate::proxy::{load_endpoints, ProxyPool};

#[derive(Debug, Clone, Default)]
pub struct TestProxiesConfig {
    pub probe_url: Option<String>,
    pub concurrency: Option<usize>,
    pub overrides: SyncOverrides,
}

pub async fn run(cfg: TestProxiesConfig) -> Result<()> {
    let sync_cfg = cfg.overrides.resolve();
    let endpoints = load_endpoints(&sync_cfg.proxies_file)
        .with_context(|| format!("reading {}", sync_cfg.proxies_file.display()))?;
    if endpoints.is_empty() {
        println!("no proxies configured in {}", sync_cfg.proxies_file.display());
        return Ok(());
    }
    let pool = ProxyPool::new(endpoints, sync_cfg.pool_config());
    let url = cfg.probe_url.as_deref().unwrap_or(DEFAULT_PROBE_URL);
    let outcomes = probe_all(
        &pool,
        Arc::new(ReqwestTransport::new()),
        url,
        Duration::from_secs(sync_cfg.proxy_timeout_secs),
        cfg.concurrency.unwrap_or(sync_cfg.workers),
    )
    .await;

    let mut out = String::new();
    for o in &outcomes {
        let verdict = if o.ok { "ok  " } else { "FAIL" };
        let detail = match (&o.status, &o.error) {
            (Some(status), _) => format!("status {status}"),
            (None, Some(err)) => err.clone(),
            (None, None) => String::new(),
        };
        let _ = writeln!(out, "{verdict} {:>6}ms  {}  {detail}", o.elapsed_ms, o.endpoint);
    }
    let stats = pool.stats().await;
    let _ = writeln!(out, "working {}/{}", stats.working, stats.total);
    println!("{out}");
    Ok(())
}
