use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Outcome of a failed fetch. Transient errors are retried inside the fetcher;
/// whatever escapes the retry loop is treated as final for this run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient network error: {0}")]
    Transient(String),
    #[error("permanent fetch error: {0}")]
    Permanent(String),
    #[error("no eligible proxy and direct connection not permitted")]
    ProxyExhausted,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("object store credentials are not configured")]
    MissingCredentials,
    #[error("object store rejected `{key}` (status={status}): {body}")]
    Rejected {
        key: String,
        status: u16,
        body: String,
    },
    #[error("object store request failed: {0}")]
    Transport(String),
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("mapping cache at {path} is unreadable: {reason}")]
    CacheCorruption { path: PathBuf, reason: String },
    #[error("checkpoint file at {path} is unreadable: {reason}")]
    CheckpointCorruption { path: PathBuf, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("there was an i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl SyncError {
    /// Stable label written into `FailureRecord::kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Fetch(FetchError::Transient(_)) => "transient_network",
            SyncError::Fetch(FetchError::Permanent(_)) => "permanent_fetch",
            SyncError::Fetch(FetchError::ProxyExhausted) => "proxy_exhausted",
            SyncError::Upload(_) => "upload",
            SyncError::CacheCorruption { .. } => "cache_corruption",
            SyncError::CheckpointCorruption { .. } => "checkpoint_corruption",
            SyncError::Config(_) => "config",
            SyncError::Io(_) => "io",
            SyncError::Json(_) => "json",
            SyncError::Csv(_) => "csv",
        }
    }

    /// Errors that abort the whole run instead of being recorded per item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::CacheCorruption { .. }
                | SyncError::CheckpointCorruption { .. }
                | SyncError::Config(_)
                | SyncError::Upload(UploadError::MissingCredentials)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_labels() {
        assert_eq!(SyncError::from(FetchError::ProxyExhausted).kind(), "proxy_exhausted");
        assert_eq!(
            SyncError::from(FetchError::Permanent("404".into())).kind(),
            "permanent_fetch"
        );
        assert_eq!(SyncError::from(UploadError::MissingCredentials).kind(), "upload");
    }

    #[test]
    fn only_configuration_level_errors_are_fatal() {
        assert!(SyncError::from(UploadError::MissingCredentials).is_fatal());
        assert!(!SyncError::from(FetchError::Transient("timeout".into())).is_fatal());
        assert!(SyncError::CacheCorruption {
            path: PathBuf::from("image_mapping.json"),
            reason: "eof".into()
        }
        .is_fatal());
    }
}
