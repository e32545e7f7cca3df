//! S3-compatible object store (Cloudflare R2) on an opendal operator.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{services, ErrorKind, Operator};
use tracing::{debug, warn};

use super::ObjectStore;
use crate::error::UploadError;

#[derive(Debug, Clone)]
pub struct S3Config {
    /// e.g. `https://{account}.r2.cloudflarestorage.com`
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl S3Config {
    pub fn r2_endpoint(account_id: &str) -> String {
        format!("https://{account_id}.r2.cloudflarestorage.com")
    }
}

pub struct S3Store {
    op: Operator,
}

impl S3Store {
    pub fn new(cfg: S3Config) -> Result<Self, UploadError> {
        if cfg.access_key_id.is_empty() || cfg.secret_access_key.is_empty() {
            return Err(UploadError::MissingCredentials);
        }
        let builder = services::S3::default()
            .root("/")
            .endpoint(cfg.endpoint.trim_end_matches('/'))
            .bucket(&cfg.bucket)
            .region(&cfg.region)
            .access_key_id(&cfg.access_key_id)
            .secret_access_key(&cfg.secret_access_key);
        let op = Operator::new(builder)
            .map_err(|e| UploadError::Transport(format!("invalid store configuration: {e}")))?
            .finish();
        debug!(endpoint = %cfg.endpoint, bucket = %cfg.bucket, "object store ready");
        Ok(Self { op })
    }

    /// Wrap an already built operator.
    pub fn from_operator(op: Operator) -> Self {
        Self { op }
    }
}

fn map_err(key: &str, err: opendal::Error) -> UploadError {
    let status = match err.kind() {
        ErrorKind::PermissionDenied => 403,
        ErrorKind::NotFound => 404,
        ErrorKind::RateLimited => 429,
        ErrorKind::ConfigInvalid | ErrorKind::Unsupported => 400,
        _ => return UploadError::Transport(err.to_string()),
    };
    UploadError::Rejected {
        key: key.to_string(),
        status,
        body: err.to_string().chars().take(300).collect(),
    }
}

/// Directory to list for a key prefix: everything up to and including the
/// last `/`.
fn list_root(prefix: &str) -> &str {
    match prefix.rfind('/') {
        Some(i) => &prefix[..=i],
        None => "",
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), UploadError> {
        self.op
            .write_with(key, body)
            .content_type(content_type)
            .cache_control(cache_control)
            .await
            .map_err(|e| {
                warn!(key, error = %e, "object store rejected upload");
                map_err(key, e)
            })?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, UploadError> {
        let mut lister = self
            .op
            .lister_with(list_root(prefix))
            .recursive(true)
            .await
            .map_err(|e| map_err(prefix, e))?;
        let mut keys = Vec::new();
        while let Some(entry) = lister.try_next().await.map_err(|e| map_err(prefix, e))? {
            if !entry.metadata().mode().is_file() {
                continue;
            }
            let path = entry.path().trim_start_matches('/');
            if path.starts_with(prefix) {
                keys.push(path.to_string());
            }
        }
        debug!(prefix, keys = keys.len(), "listed store");
        keys.sort();
        Ok(keys)
    }
}
