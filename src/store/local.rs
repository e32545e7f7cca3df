use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use super::ObjectStore;
use crate::error::UploadError;
use crate::util::fs::write_atomic;

/// Objects as plain files under a root directory, keys as relative paths.
/// Useful for staging runs and tests without store credentials.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, UploadError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() || key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(UploadError::Rejected {
                key: key.to_string(),
                status: 400,
                body: "invalid object key".to_string(),
            });
        }
        Ok(self.root.join(key))
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push(key);
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        _content_type: &str,
        _cache_control: &str,
    ) -> Result<(), UploadError> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?
            .map_err(|e| UploadError::Transport(e.to_string()))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, UploadError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            if root.exists() {
                walk(&root, &root, &mut keys)?;
            }
            keys.retain(|k| k.starts_with(&prefix));
            keys.sort();
            Ok::<_, std::io::Error>(keys)
        })
        .await
        .map_err(|e| UploadError::Transport(e.to_string()))?
        .map_err(|e| UploadError::Transport(e.to_string()))
    }
}
