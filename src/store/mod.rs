//! Object storage behind the upload sink.

pub mod local;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::error::UploadError;
pub use local::LocalDirStore;
pub use s3::{S3Config, S3Store};

pub const CONTENT_TYPE_JPEG: &str = "image/jpeg";
pub const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing whatever was there.
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), UploadError>;

    /// Every key under `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, UploadError>;
}

/// Pushes normalized assets into the store and hands back their public URL.
#[derive(Clone)]
pub struct UploadSink {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl UploadSink {
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: &str) -> Self {
        Self {
            store,
            public_base_url: normalize_base_url(public_base_url),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    pub fn asset_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }

    /// Same key, same location: a repeated upload overwrites in place.
    pub async fn upload(&self, bytes: Bytes, key: &str) -> Result<String, UploadError> {
        let size = bytes.len();
        self.store
            .put_object(key, bytes, CONTENT_TYPE_JPEG, CACHE_CONTROL_IMMUTABLE)
            .await?;
        debug!(key, size, "asset uploaded");
        Ok(self.asset_url(key))
    }
}

/// `images.example.com` and `https://images.example.com/` both become
/// `https://images.example.com`.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;

    #[tokio::test]
    async fn upload_returns_public_url_and_sets_headers() {
        let store = Arc::new(MemoryStore::default());
        let sink = UploadSink::new(store.clone(), "images.bricksdeal.com/");
        let url = sink
            .upload(Bytes::from_static(b"jpeg"), "catalog/set/lego-bird-10353-1.jpg")
            .await
            .unwrap();
        assert_eq!(url, "https://images.bricksdeal.com/catalog/set/lego-bird-10353-1.jpg");

        let put = store.object("catalog/set/lego-bird-10353-1.jpg").unwrap();
        assert_eq!(put.content_type, CONTENT_TYPE_JPEG);
        assert_eq!(put.cache_control, CACHE_CONTROL_IMMUTABLE);
    }

    #[tokio::test]
    async fn same_key_twice_overwrites() {
        let store = Arc::new(MemoryStore::default());
        let sink = UploadSink::new(store.clone(), "https://cdn.test");
        sink.upload(Bytes::from_static(b"a"), "k.jpg").await.unwrap();
        sink.upload(Bytes::from_static(b"b"), "k.jpg").await.unwrap();
        assert_eq!(store.keys(), ["k.jpg"]);
        assert_eq!(store.object("k.jpg").unwrap().body, Bytes::from_static(b"b"));
    }
}
