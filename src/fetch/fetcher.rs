use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AssetSource, HttpTransport, ImageNormalizer};
use crate::error::FetchError;
use crate::proxy::ProxyPool;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub use_proxies: bool,
    /// Fall back to a proxy-less request when the pool has nothing eligible.
    pub allow_direct: bool,
    /// Total attempts per URL.
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub direct_timeout: Duration,
    pub proxy_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            use_proxies: true,
            allow_direct: false,
            max_retries: 3,
            backoff_ms: 1000,
            direct_timeout: Duration::from_secs(15),
            proxy_timeout: Duration::from_secs(30),
        }
    }
}

/// Downloads one source image through the proxy pool and turns it into the
/// stored JPEG form.
pub struct AssetFetcher {
    transport: Arc<dyn HttpTransport>,
    pool: Arc<ProxyPool>,
    cfg: FetchConfig,
    normalizer: ImageNormalizer,
}

impl AssetFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        pool: Arc<ProxyPool>,
        cfg: FetchConfig,
        normalizer: ImageNormalizer,
    ) -> Self {
        Self {
            transport,
            pool,
            cfg,
            normalizer,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.cfg
    }

    /// Raw bytes of `url`, retried on transient failures. Every attempt asks the
    /// pool for a fresh endpoint and reports the outcome back.
    ///
    /// `timeout` overrides the per-attempt timeout; `None` picks the direct or
    /// proxied default depending on the route.
    pub async fn fetch_raw(&self, url: &str, timeout: Option<Duration>) -> Result<Bytes, FetchError> {
        let attempts = self.cfg.max_retries.max(1);
        let mut last_err = FetchError::Transient("no attempt made".to_string());

        for attempt in 1..=attempts {
            let proxy = if self.cfg.use_proxies {
                match self.pool.select().await {
                    Some(record) => Some(record.endpoint),
                    None if self.cfg.allow_direct => None,
                    None => return Err(FetchError::ProxyExhausted),
                }
            } else {
                None
            };
            let attempt_timeout = timeout.unwrap_or(if proxy.is_some() {
                self.cfg.proxy_timeout
            } else {
                self.cfg.direct_timeout
            });

            let res = self
                .transport
                .get(url, proxy.as_deref(), attempt_timeout)
                .await;
            match res {
                Ok(bytes) => {
                    if let Some(p) = &proxy {
                        self.pool.report_success(p).await;
                    }
                    return Ok(bytes);
                }
                Err(FetchError::Transient(reason)) => {
                    if let Some(p) = &proxy {
                        self.pool.report_failure(p).await;
                    }
                    warn!(
                        url,
                        attempt,
                        max_attempts = attempts,
                        proxy = proxy.as_deref().unwrap_or("direct"),
                        %reason,
                        "fetch attempt failed"
                    );
                    last_err = FetchError::Transient(reason);
                    if attempt < attempts {
                        let delay = self.cfg.backoff_ms.saturating_mul(attempt as u64);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
                Err(other) => {
                    // The endpoint delivered an answer, so the proxy itself is fine.
                    if let Some(p) = &proxy {
                        self.pool.report_success(p).await;
                    }
                    debug!(url, error = %other, "fetch failed permanently");
                    return Err(other);
                }
            }
        }

        Err(match last_err {
            FetchError::Transient(reason) => {
                FetchError::Permanent(format!("retries exhausted after {attempts} attempts: {reason}"))
            }
            other => other,
        })
    }

    /// Fetch and normalize. Decoding runs on the blocking pool.
    pub async fn fetch(&self, url: &str, timeout: Option<Duration>) -> Result<Bytes, FetchError> {
        let raw = self.fetch_raw(url, timeout).await?;
        let normalizer = self.normalizer;
        tokio::task::spawn_blocking(move || normalizer.normalize(&raw))
            .await
            .map_err(|e| FetchError::Permanent(format!("normalization task failed: {e}")))?
    }
}

#[async_trait]
impl AssetSource for AssetFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        AssetFetcher::fetch(self, url, None).await
    }
}
