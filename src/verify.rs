//! Read-only health checks over the mapping: are the asset URLs reachable, and
//! does the store hold exactly what the mapping references.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::UploadError;
use crate::fetch::HttpTransport;
use crate::keys::KEY_PREFIX;
use crate::mapping::MappingEntry;
use crate::store::ObjectStore;

#[derive(Debug, Clone, Serialize)]
pub struct UrlCheck {
    pub url: String,
    pub status: Option<u16>,
    pub ok: bool,
    pub error: Option<String>,
}

/// HEAD every asset URL of the mapping (and the source URLs too when
/// `include_sources`). Results come back sorted by URL.
pub async fn validate_urls(
    entries: &[MappingEntry],
    transport: Arc<dyn HttpTransport>,
    include_sources: bool,
    concurrency: usize,
    timeout: Duration,
) -> Vec<UrlCheck> {
    let mut urls: BTreeSet<String> = entries.iter().map(|e| e.asset_url.clone()).collect();
    if include_sources {
        urls.extend(entries.iter().map(|e| e.source_url.clone()));
    }

    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut futs = FuturesUnordered::new();
    for url in urls {
        let sem = sem.clone();
        let transport = transport.clone();
        futs.push(async move {
            let _permit = sem.acquire_owned().await.ok();
            match transport.head(&url, None, timeout).await {
                Ok(status) => UrlCheck {
                    ok: (200..300).contains(&status),
                    status: Some(status),
                    error: None,
                    url,
                },
                Err(e) => UrlCheck {
                    ok: false,
                    status: None,
                    error: Some(e.to_string()),
                    url,
                },
            }
        });
    }

    let mut out = Vec::new();
    while let Some(check) = futs.next().await {
        if !check.ok {
            warn!(url = %check.url, status = ?check.status, error = ?check.error, "url check failed");
        }
        out.push(check);
    }
    out.sort_by(|a, b| a.url.cmp(&b.url));
    let broken = out.iter().filter(|c| !c.ok).count();
    info!(checked = out.len(), broken, "url validation finished");
    out
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreReport {
    pub stored: usize,
    pub mapped: usize,
    /// Objects no mapping entry points at.
    pub unreferenced_objects: Vec<String>,
    /// Mapping entries whose key is absent from the store.
    pub missing_objects: Vec<String>,
}

impl StoreReport {
    pub fn is_consistent(&self) -> bool {
        self.unreferenced_objects.is_empty() && self.missing_objects.is_empty()
    }
}

/// Compare the store listing under the catalog prefix with the mapping.
pub async fn verify_store(
    entries: &[MappingEntry],
    store: &dyn ObjectStore,
) -> Result<StoreReport, UploadError> {
    let stored: BTreeSet<String> = store
        .list_keys(&format!("{KEY_PREFIX}/"))
        .await?
        .into_iter()
        .collect();
    let mapped: BTreeSet<String> = entries
        .iter()
        .map(|e| e.derived_key.clone())
        .filter(|k| !k.is_empty())
        .collect();

    let report = StoreReport {
        stored: stored.len(),
        mapped: mapped.len(),
        unreferenced_objects: stored.difference(&mapped).cloned().collect(),
        missing_objects: mapped.difference(&stored).cloned().collect(),
    };
    info!(
        stored = report.stored,
        mapped = report.mapped,
        unreferenced = report.unreferenced_objects.len(),
        missing = report.missing_objects.len(),
        "store verification finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::test_support::MemoryStore;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct StatusByUrl;

    #[async_trait]
    impl HttpTransport for StatusByUrl {
        async fn get(&self, _: &str, _: Option<&str>, _: Duration) -> Result<Bytes, FetchError> {
            Ok(Bytes::new())
        }

        async fn head(&self, url: &str, proxy: Option<&str>, _: Duration) -> Result<u16, FetchError> {
            assert!(proxy.is_none());
            if url.contains("missing") {
                Ok(404)
            } else if url.contains("down") {
                Err(FetchError::Transient("connection refused".into()))
            } else {
                Ok(200)
            }
        }
    }

    fn entry(src: &str, key: &str) -> MappingEntry {
        MappingEntry {
            source_url: src.into(),
            asset_url: format!("https://img.test/{key}"),
            derived_key: key.into(),
        }
    }

    #[tokio::test]
    async fn validation_reports_non_2xx_and_errors() {
        let entries = vec![
            entry("https://down.test/a.jpg", "catalog/set/a.jpg"),
            entry("https://cdn.test/b.jpg", "catalog/set/missing-b.jpg"),
        ];
        let assets_only =
            validate_urls(&entries, Arc::new(StatusByUrl), false, 2, Duration::from_secs(1)).await;
        assert_eq!(assets_only.len(), 2);
        assert_eq!(assets_only.iter().filter(|c| !c.ok).count(), 1);

        let all = validate_urls(&entries, Arc::new(StatusByUrl), true, 2, Duration::from_secs(1)).await;
        assert_eq!(all.len(), 4);
        let down = all.iter().find(|c| c.url == "https://down.test/a.jpg").unwrap();
        assert!(down.error.is_some());
    }

    #[tokio::test]
    async fn store_and_mapping_differences_are_listed() {
        let store = MemoryStore::with_keys(&["catalog/set/a.jpg", "catalog/set/orphan.jpg", "tmp/x"]);
        let entries = vec![
            entry("https://cdn.test/a.jpg", "catalog/set/a.jpg"),
            entry("https://cdn.test/b.jpg", "catalog/set/b.jpg"),
        ];
        let report = verify_store(&entries, &store).await.unwrap();
        assert_eq!(report.stored, 2);
        assert_eq!(report.unreferenced_objects, ["catalog/set/orphan.jpg"]);
        assert_eq!(report.missing_objects, ["catalog/set/b.jpg"]);
        assert!(!report.is_consistent());
    }
}
