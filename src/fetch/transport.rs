use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Proxy, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::FetchError;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// One HTTP attempt, optionally routed through a proxy. Implementations
/// classify failures: connection/proxy/timeout/5xx/429 are transient,
/// everything else is permanent.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<Bytes, FetchError>;

    /// Status code of a HEAD request. Transport failures map like `get`.
    async fn head(
        &self,
        url: &str,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<u16, FetchError>;
}

/// Map a non-success status to the error class the retry loop understands.
pub fn classify_status(status: StatusCode) -> FetchError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::Transient(format!("status {status}"))
    } else {
        FetchError::Permanent(format!("status {status}"))
    }
}

fn classify_reqwest(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Transient(format!("timeout: {err}"))
    } else if err.is_connect() || err.is_request() || err.is_body() {
        FetchError::Transient(format!("connection error: {err}"))
    } else if let Some(status) = err.status() {
        classify_status(status)
    } else {
        FetchError::Transient(err.to_string())
    }
}

/// reqwest-backed transport. Proxy routing is a client-level setting in
/// reqwest, so one client is built and cached per endpoint.
#[derive(Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client_for(&self, proxy: Option<&str>) -> Result<Client, FetchError> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10));
        builder = match proxy {
            Some(endpoint) => {
                // An endpoint reqwest cannot use counts against the proxy, not the asset.
                let p = Proxy::all(endpoint)
                    .map_err(|e| FetchError::Transient(format!("invalid proxy {endpoint}: {e}")))?;
                builder.proxy(p)
            }
            None => builder.no_proxy(),
        };
        let client = builder
            .build()
            .map_err(|e| FetchError::Transient(format!("client build failed: {e}")))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<Bytes, FetchError> {
        let client = self.client_for(proxy).await?;
        let resp = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest(&e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        resp.bytes().await.map_err(|e| classify_reqwest(&e))
    }

    async fn head(
        &self,
        url: &str,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<u16, FetchError> {
        let client = self.client_for(proxy).await?;
        let resp = client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest(&e))?;
        Ok(resp.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(classify_status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND).is_transient());
        assert!(!classify_status(StatusCode::FORBIDDEN).is_transient());
    }

    #[tokio::test]
    async fn clients_are_cached_per_endpoint() {
        let t = ReqwestTransport::new();
        t.client_for(None).await.unwrap();
        t.client_for(Some("http://127.0.0.1:9")).await.unwrap();
        t.client_for(Some("http://127.0.0.1:9")).await.unwrap();
        assert_eq!(t.clients.lock().await.len(), 2);
    }
}
