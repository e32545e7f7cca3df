use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::ProxyPool;
use crate::fetch::HttpTransport;

/// Public image used to check that an endpoint can actually reach the CDN.
pub const DEFAULT_PROBE_URL: &str = "https://cdn.rebrickable.com/media/sets/10353-1/139023.jpg";

#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub endpoint: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub elapsed_ms: u128,
    pub error: Option<String>,
}

/// Probe every endpoint of the pool with a HEAD request and feed each outcome
/// back into the pool's health tracking. Results come back in pool order.
pub async fn probe_all(
    pool: &ProxyPool,
    transport: Arc<dyn HttpTransport>,
    probe_url: &str,
    timeout: Duration,
    concurrency: usize,
) -> Vec<ProbeOutcome> {
    let endpoints = pool.endpoints().await;
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut futs = FuturesUnordered::new();

    for (idx, endpoint) in endpoints.into_iter().enumerate() {
        let sem = sem.clone();
        let transport = transport.clone();
        let probe_url = probe_url.to_string();
        futs.push(async move {
            let _permit = sem.acquire_owned().await.ok();
            let started = Instant::now();
            let res = transport.head(&probe_url, Some(&endpoint), timeout).await;
            let elapsed_ms = started.elapsed().as_millis();
            let outcome = match res {
                Ok(status) => ProbeOutcome {
                    ok: (200..400).contains(&status),
                    status: Some(status),
                    error: None,
                    endpoint,
                    elapsed_ms,
                },
                Err(e) => ProbeOutcome {
                    ok: false,
                    status: None,
                    error: Some(e.to_string()),
                    endpoint,
                    elapsed_ms,
                },
            };
            (idx, outcome)
        });
    }

    let mut results: Vec<(usize, ProbeOutcome)> = Vec::new();
    while let Some((idx, outcome)) = futs.next().await {
        if outcome.ok {
            pool.report_success(&outcome.endpoint).await;
        } else {
            warn!(
                proxy = %outcome.endpoint,
                status = ?outcome.status,
                error = ?outcome.error,
                "proxy probe failed"
            );
            pool.report_failure(&outcome.endpoint).await;
        }
        results.push((idx, outcome));
    }
    results.sort_by_key(|(idx, _)| *idx);

    let working = results.iter().filter(|(_, o)| o.ok).count();
    info!(total = results.len(), working, "proxy probe finished");
    results.into_iter().map(|(_, o)| o).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::proxy::{PoolConfig, ProxyState};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct HeadOnly;

    #[async_trait]
    impl HttpTransport for HeadOnly {
        async fn get(
            &self,
            _url: &str,
            _proxy: Option<&str>,
            _timeout: Duration,
        ) -> Result<Bytes, FetchError> {
            Err(FetchError::Permanent("unused".into()))
        }

        async fn head(
            &self,
            _url: &str,
            proxy: Option<&str>,
            _timeout: Duration,
        ) -> Result<u16, FetchError> {
            match proxy {
                Some(p) if p.contains("good") => Ok(200),
                Some(p) if p.contains("blocked") => Ok(403),
                _ => Err(FetchError::Transient("connection refused".into())),
            }
        }
    }

    #[tokio::test]
    async fn probe_updates_pool_health() {
        let pool = ProxyPool::new(
            ["http://good:1", "http://blocked:2", "http://dead:3"],
            PoolConfig::default(),
        );
        let out = probe_all(&pool, Arc::new(HeadOnly), DEFAULT_PROBE_URL, Duration::from_secs(1), 2).await;

        let oks: Vec<bool> = out.iter().map(|o| o.ok).collect();
        assert_eq!(oks, [true, false, false]);
        assert_eq!(out[1].status, Some(403));
        assert!(out[2].error.is_some());

        let stats = pool.stats().await;
        assert_eq!((stats.working, stats.failed), (1, 2));
        let selected = pool.select().await.unwrap();
        assert_eq!(selected.endpoint, "http://good:1");
        assert_eq!(selected.state, ProxyState::Working);
    }
}
