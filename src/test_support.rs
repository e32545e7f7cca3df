//! In-process fakes for the network seams.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::catalog::{CatalogItem, ItemKind};
use crate::error::{FetchError, UploadError};
use crate::fetch::AssetSource;
use crate::store::ObjectStore;

pub fn set(id: &str, name: &str, urls: &[&str]) -> CatalogItem {
    CatalogItem {
        id: id.to_string(),
        kind: ItemKind::Set,
        display_name: name.to_string(),
        theme: None,
        source_image_urls: urls.iter().map(|u| u.to_string()).collect(),
    }
}

pub fn minifig(id: &str, name: &str, urls: &[&str]) -> CatalogItem {
    CatalogItem {
        kind: ItemKind::Minifig,
        ..set(id, name, urls)
    }
}

/// Serves a fixed payload for every URL except the ones told to fail.
#[derive(Default)]
pub struct FakeSource {
    failures: Mutex<HashMap<String, FetchError>>,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(&self, url: &str, err: FetchError) {
        self.failures.lock().unwrap().insert(url.to_string(), err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetSource for FakeSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        match self.failures.lock().unwrap().get(url) {
            Some(err) => Err(err.clone()),
            None => Ok(Bytes::from(format!("jpeg:{url}"))),
        }
    }
}

/// Fails every fetch with the same error.
pub struct FailingSource {
    err: FetchError,
    calls: AtomicUsize,
}

impl FailingSource {
    pub fn new(err: FetchError) -> Self {
        Self {
            err,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetSource for FailingSource {
    async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.err.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
    pub cache_control: String,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    rejected_prefixes: Mutex<Vec<String>>,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn with_keys(keys: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut objects = store.objects.lock().unwrap();
            for key in keys {
                objects.insert(
                    key.to_string(),
                    StoredObject {
                        body: Bytes::new(),
                        content_type: "image/jpeg".into(),
                        cache_control: String::new(),
                    },
                );
            }
        }
        store
    }

    pub fn reject_prefix(&self, prefix: &str) {
        self.rejected_prefixes.lock().unwrap().push(prefix.to_string());
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), UploadError> {
        let rejected = self
            .rejected_prefixes
            .lock()
            .unwrap()
            .iter()
            .any(|p| key.starts_with(p.as_str()));
        if rejected {
            return Err(UploadError::Rejected {
                key: key.to_string(),
                status: 403,
                body: "AccessDenied".into(),
            });
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                cache_control: cache_control.to_string(),
            },
        );
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, UploadError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
