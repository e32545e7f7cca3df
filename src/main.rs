use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use brick_asset_sync::catalog::ItemKind;
use brick_asset_sync::cli::{self, SyncOverrides};
use brick_asset_sync::telemetry::init_tracing;
use brick_asset_sync::util::env;

#[derive(Parser, Debug)]
#[command(name = "asset-sync", version, about = "Catalog image sync to object storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum ClassArg {
    #[value(alias = "set")]
    Sets,
    #[value(alias = "minifig")]
    Minifigs,
    All,
}

impl ClassArg {
    fn kind(self) -> Option<ItemKind> {
        match self {
            ClassArg::Sets => Some(ItemKind::Set),
            ClassArg::Minifigs => Some(ItemKind::Minifig),
            ClassArg::All => None,
        }
    }
}

#[derive(Debug, Default, Args)]
struct CommonArgs {
    /// Worker pool width (defaults to env ASSET_SYNC_WORKERS or 10)
    #[arg(long)]
    workers: Option<usize>,
    /// Derive keys and record hypothetical mappings without fetching or uploading
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Permit proxy-less requests when no proxy is eligible
    #[arg(long, default_value_t = false)]
    allow_direct: bool,
    /// Fetch every image directly, ignoring the proxy list
    #[arg(long, default_value_t = false)]
    no_proxies: bool,
    /// Directory holding sets.csv / minifigs.csv / themes.csv
    #[arg(long)]
    catalog_dir: Option<PathBuf>,
    /// Directory holding the mapping, failure log and progress files
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

impl CommonArgs {
    fn overrides(self, batch_size: Option<usize>) -> SyncOverrides {
        SyncOverrides {
            workers: self.workers,
            batch_size,
            dry_run: self.dry_run,
            allow_direct: self.allow_direct,
            no_proxies: self.no_proxies,
            catalog_dir: self.catalog_dir,
            state_dir: self.state_dir,
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Sync the next checkpointed batch of each selected class
    Continue {
        #[arg(long, value_enum, default_value = "all")]
        class: ClassArg,
        /// Rows per batch (defaults to env ASSET_SYNC_BATCH_SIZE or 100)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Maximum number of images to dispatch
        #[arg(long)]
        limit: Option<usize>,
        /// Leave catalog files untouched after the batch
        #[arg(long, default_value_t = false)]
        no_propagate: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Sync an explicit window of rows without moving the checkpoint
    Sync {
        #[arg(long, value_enum, default_value = "all")]
        class: ClassArg,
        /// First row of the window
        #[arg(long, default_value_t = 0)]
        start: usize,
        /// Rows in the window (default: to the end of the catalog)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Maximum number of images to dispatch
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = false)]
        no_propagate: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Replay logged failures that are still unmapped
    RetryFailures {
        #[arg(long, value_enum, default_value = "all")]
        class: ClassArg,
        #[arg(long, default_value_t = false)]
        no_propagate: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Show checkpoint progress, or reset it
    Progress {
        /// Reset the given class (or all) instead of showing progress
        #[arg(long, value_enum)]
        reset: Option<ClassArg>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Rewrite catalog files with every mapping in the cache
    Propagate {
        #[arg(long, value_enum, default_value = "all")]
        class: ClassArg,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Rebuild mapping entries from objects already in the store
    RebuildMapping {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// HEAD-check mapped asset URLs
    ValidateUrls {
        /// Check source URLs too
        #[arg(long, default_value_t = false)]
        all: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Compare store contents with the mapping
    VerifyStore {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Empty the failure log
    ClearFailures {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Probe every configured proxy
    TestProxies {
        /// URL to fetch through each proxy
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("info")?;
    let args = Cli::parse();

    match args.command {
        Commands::Continue {
            class,
            batch_size,
            limit,
            no_propagate,
            common,
        } => {
            use cli::sync::{run, SyncCommandConfig, SyncMode};
            run(SyncCommandConfig {
                kind: class.kind(),
                mode: SyncMode::Continue,
                limit,
                propagate: !no_propagate,
                overrides: common.overrides(batch_size),
            })
            .await?;
        }
        Commands::Sync {
            class,
            start,
            batch_size,
            limit,
            no_propagate,
            common,
        } => {
            use cli::sync::{run, SyncCommandConfig, SyncMode};
            run(SyncCommandConfig {
                kind: class.kind(),
                mode: SyncMode::Window {
                    start_index: start,
                    batch_size,
                },
                limit,
                propagate: !no_propagate,
                overrides: common.overrides(None),
            })
            .await?;
        }
        Commands::RetryFailures {
            class,
            no_propagate,
            common,
        } => {
            use cli::sync::{run_retry, RetryFailuresConfig};
            run_retry(RetryFailuresConfig {
                kind: class.kind(),
                propagate: !no_propagate,
                overrides: common.overrides(None),
            })
            .await?;
        }
        Commands::Progress { reset, common } => {
            use cli::progress::{run, ProgressConfig};
            run(ProgressConfig {
                reset: reset.map(ClassArg::kind),
                overrides: common.overrides(None),
            })
            .await?;
        }
        Commands::Propagate { class, common } => {
            use cli::maintenance::{run_propagate, PropagateConfig};
            run_propagate(PropagateConfig {
                kind: class.kind(),
                overrides: common.overrides(None),
            })
            .await?;
        }
        Commands::RebuildMapping { common } => {
            use cli::maintenance::{run_rebuild_mapping, RebuildMappingConfig};
            run_rebuild_mapping(RebuildMappingConfig {
                overrides: common.overrides(None),
            })
            .await?;
        }
        Commands::ValidateUrls { all, common } => {
            use cli::maintenance::{run_validate_urls, ValidateUrlsConfig};
            run_validate_urls(ValidateUrlsConfig {
                all,
                overrides: common.overrides(None),
            })
            .await?;
        }
        Commands::VerifyStore { common } => {
            use cli::maintenance::{run_verify_store, VerifyStoreConfig};
            run_verify_store(VerifyStoreConfig {
                overrides: common.overrides(None),
            })
            .await?;
        }
        Commands::ClearFailures { common } => {
            use cli::maintenance::{run_clear_failures, ClearFailuresConfig};
            run_clear_failures(ClearFailuresConfig {
                overrides: common.overrides(None),
            })
            .await?;
        }
        Commands::TestProxies {
            url,
            concurrency,
            common,
        } => {
            use cli::proxies::{run, TestProxiesConfig};
            run(TestProxiesConfig {
                probe_url: url,
                concurrency,
                overrides: common.overrides(None),
            })
            .await?;
        }
    }
    Ok(())
}
