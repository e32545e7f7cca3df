//! Operator commands. Each module exposes a `*Config` plus `async fn run`.

pub mod maintenance;
pub mod progress;
pub mod proxies;
pub mod sync;

use std::path::PathBuf;

use crate::catalog::ItemKind;
use crate::config::SyncConfig;
use crate::util::env::preflight_check;

/// Per-invocation overrides on top of the environment.
#[derive(Debug, Clone, Default)]
pub struct SyncOverrides {
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub dry_run: bool,
    pub allow_direct: bool,
    pub no_proxies: bool,
    pub catalog_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

impl SyncOverrides {
    pub fn resolve(&self) -> SyncConfig {
        let mut cfg = SyncConfig::from_env();
        if let Some(w) = self.workers {
            cfg.workers = w.max(1);
        }
        if let Some(b) = self.batch_size {
            cfg.batch_size = b.max(1);
        }
        cfg.dry_run |= self.dry_run;
        cfg.allow_direct |= self.allow_direct;
        if self.no_proxies {
            cfg.use_proxies = false;
        }
        if let Some(dir) = &self.catalog_dir {
            cfg.catalog_dir = dir.clone();
        }
        if let Some(dir) = &self.state_dir {
            cfg.state_dir = dir.clone();
        }
        cfg
    }
}

/// Item classes selected on the command line; `None` means all of them.
pub fn classes(kind: Option<ItemKind>) -> Vec<ItemKind> {
    match kind {
        Some(k) => vec![k],
        None => ItemKind::ALL.to_vec(),
    }
}

/// Log the effective configuration and fail early when the store is remote
/// and its credentials are absent.
pub(crate) fn preflight(title: &str, cfg: &SyncConfig) -> anyhow::Result<()> {
    let required: &[&str] = if cfg.dry_run || cfg.store.local_dir.is_some() {
        &[]
    } else {
        &["CLOUDFLARE_ACCESS_KEY_ID", "CLOUDFLARE_SECRET_ACCESS_KEY"]
    };
    preflight_check(title, required, SyncConfig::logged_env_keys())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_only_tighten_what_they_name() {
        let o = SyncOverrides {
            workers: Some(0),
            no_proxies: true,
            state_dir: Some(PathBuf::from("/tmp/s")),
            ..SyncOverrides::default()
        };
        let cfg = o.resolve();
        assert_eq!(cfg.workers, 1);
        assert!(!cfg.use_proxies);
        assert_eq!(cfg.state_dir, PathBuf::from("/tmp/s"));
    }

    #[test]
    fn no_class_means_every_class() {
        assert_eq!(classes(None), ItemKind::ALL.to_vec());
        assert_eq!(classes(Some(ItemKind::Minifig)), [ItemKind::Minifig]);
    }
}
