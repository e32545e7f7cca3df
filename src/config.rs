use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SyncError, UploadError};
use crate::fetch::{FetchConfig, ImageNormalizer};
use crate::proxy::PoolConfig;
use crate::store::{normalize_base_url, LocalDirStore, ObjectStore, S3Config, S3Store};
use crate::util::env::{env_flag, env_opt, env_parse};

pub const MAPPING_FILE: &str = "image_mapping.json";
pub const DRY_RUN_MAPPING_FILE: &str = "image_mapping.dry-run.json";
pub const FAILURES_FILE: &str = "failed_images.jsonl";
pub const CHECKPOINT_FILE: &str = "extract_progress.json";
pub const REBUILD_REVIEW_FILE: &str = "rebuild_review.json";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub account_id: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: String,
    pub public_domain: String,
    /// Overrides the R2 endpoint derived from the account id.
    pub endpoint: Option<String>,
    /// When set, objects go to this directory instead of a remote store.
    pub local_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            account_id: None,
            access_key_id: None,
            secret_access_key: None,
            bucket: "lego-images".to_string(),
            public_domain: "images.bricksdeal.com".to_string(),
            endpoint: None,
            local_dir: None,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self {
            account_id: env_opt("CLOUDFLARE_ACCOUNT_ID"),
            access_key_id: env_opt("CLOUDFLARE_ACCESS_KEY_ID"),
            secret_access_key: env_opt("CLOUDFLARE_SECRET_ACCESS_KEY"),
            endpoint: env_opt("ASSET_SYNC_STORE_ENDPOINT"),
            local_dir: env_opt("ASSET_SYNC_LOCAL_STORE_DIR").map(PathBuf::from),
            ..Self::default()
        };
        if let Some(bucket) = env_opt("CLOUDFLARE_R2_BUCKET") {
            cfg.bucket = bucket;
        }
        if let Some(domain) = env_opt("CLOUDFLARE_DOMAIN") {
            cfg.public_domain = domain;
        }
        cfg
    }

    pub fn public_base_url(&self) -> String {
        normalize_base_url(&self.public_domain)
    }

    /// Build the configured store. Missing remote credentials are a
    /// configuration error, reported before any item is touched.
    pub fn build_store(&self) -> Result<Arc<dyn ObjectStore>> {
        if let Some(dir) = &self.local_dir {
            return Ok(Arc::new(LocalDirStore::new(dir.clone())));
        }
        let (Some(access_key_id), Some(secret_access_key)) =
            (self.access_key_id.clone(), self.secret_access_key.clone())
        else {
            return Err(UploadError::MissingCredentials.into());
        };
        let endpoint = match (&self.endpoint, &self.account_id) {
            (Some(e), _) => e.clone(),
            (None, Some(account)) => S3Config::r2_endpoint(account),
            (None, None) => {
                return Err(SyncError::Config(
                    "CLOUDFLARE_ACCOUNT_ID or ASSET_SYNC_STORE_ENDPOINT is required".to_string(),
                ))
            }
        };
        let store = S3Store::new(S3Config {
            endpoint,
            bucket: self.bucket.clone(),
            access_key_id,
            secret_access_key,
            region: "auto".to_string(),
        })?;
        Ok(Arc::new(store))
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub use_proxies: bool,
    pub proxies_file: PathBuf,
    pub proxy_cooldown_secs: u64,
    pub proxy_failure_threshold: u32,
    pub allow_direct: bool,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    pub proxy_timeout_secs: u64,
    pub workers: usize,
    pub batch_size: usize,
    pub dry_run: bool,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub catalog_dir: PathBuf,
    pub state_dir: PathBuf,
    pub store: StoreConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            use_proxies: true,
            proxies_file: PathBuf::from("input/proxies.csv"),
            proxy_cooldown_secs: 3600,
            proxy_failure_threshold: 2,
            allow_direct: false,
            max_retries: 3,
            backoff_ms: 1000,
            timeout_secs: 15,
            proxy_timeout_secs: 30,
            workers: 10,
            batch_size: 100,
            dry_run: false,
            max_dimension: 1200,
            jpeg_quality: 85,
            catalog_dir: PathBuf::from("input/lego-catalog-extracted"),
            state_dir: PathBuf::from("output/catalog-images"),
            store: StoreConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            use_proxies: env_flag("ASSET_SYNC_USE_PROXIES", d.use_proxies),
            proxies_file: env_opt("ASSET_SYNC_PROXIES_FILE")
                .map(PathBuf::from)
                .unwrap_or(d.proxies_file),
            proxy_cooldown_secs: env_parse("ASSET_SYNC_PROXY_COOLDOWN_SECS", d.proxy_cooldown_secs),
            proxy_failure_threshold: env_parse(
                "ASSET_SYNC_PROXY_FAILURE_THRESHOLD",
                d.proxy_failure_threshold,
            ),
            allow_direct: env_flag("ASSET_SYNC_ALLOW_DIRECT", d.allow_direct),
            max_retries: env_parse("ASSET_SYNC_MAX_RETRIES", d.max_retries).max(1),
            backoff_ms: env_parse("ASSET_SYNC_BACKOFF_MS", d.backoff_ms),
            timeout_secs: env_parse("ASSET_SYNC_TIMEOUT_SECS", d.timeout_secs).max(1),
            proxy_timeout_secs: env_parse("ASSET_SYNC_PROXY_TIMEOUT_SECS", d.proxy_timeout_secs).max(1),
            workers: env_parse("ASSET_SYNC_WORKERS", d.workers).max(1),
            batch_size: env_parse("ASSET_SYNC_BATCH_SIZE", d.batch_size).max(1),
            dry_run: env_flag("ASSET_SYNC_DRY_RUN", d.dry_run),
            max_dimension: env_parse("ASSET_SYNC_MAX_DIMENSION", d.max_dimension),
            jpeg_quality: env_parse("ASSET_SYNC_JPEG_QUALITY", d.jpeg_quality).clamp(1, 100),
            catalog_dir: env_opt("ASSET_SYNC_CATALOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.catalog_dir),
            state_dir: env_opt("ASSET_SYNC_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.state_dir),
            store: StoreConfig::from_env(),
        }
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.state_dir.join(MAPPING_FILE)
    }

    pub fn dry_run_mapping_path(&self) -> PathBuf {
        self.state_dir.join(DRY_RUN_MAPPING_FILE)
    }

    pub fn failures_path(&self) -> PathBuf {
        self.state_dir.join(FAILURES_FILE)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir.join(CHECKPOINT_FILE)
    }

    pub fn rebuild_review_path(&self) -> PathBuf {
        self.state_dir.join(REBUILD_REVIEW_FILE)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            cooldown: Duration::from_secs(self.proxy_cooldown_secs),
            failure_threshold: self.proxy_failure_threshold,
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            use_proxies: self.use_proxies,
            allow_direct: self.allow_direct,
            max_retries: self.max_retries,
            backoff_ms: self.backoff_ms,
            direct_timeout: Duration::from_secs(self.timeout_secs),
            proxy_timeout: Duration::from_secs(self.proxy_timeout_secs),
        }
    }

    pub fn normalizer(&self) -> ImageNormalizer {
        ImageNormalizer {
            max_dimension: self.max_dimension,
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Env keys worth showing in the startup snapshot.
    pub fn logged_env_keys() -> &'static [&'static str] {
        &[
            "ASSET_SYNC_USE_PROXIES",
            "ASSET_SYNC_PROXIES_FILE",
            "ASSET_SYNC_ALLOW_DIRECT",
            "ASSET_SYNC_WORKERS",
            "ASSET_SYNC_BATCH_SIZE",
            "ASSET_SYNC_DRY_RUN",
            "ASSET_SYNC_CATALOG_DIR",
            "ASSET_SYNC_STATE_DIR",
            "ASSET_SYNC_LOCAL_STORE_DIR",
            "CLOUDFLARE_ACCOUNT_ID",
            "CLOUDFLARE_ACCESS_KEY_ID",
            "CLOUDFLARE_SECRET_ACCESS_KEY",
            "CLOUDFLARE_R2_BUCKET",
            "CLOUDFLARE_DOMAIN",
        ]
    }
}
