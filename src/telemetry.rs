use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Transport crates that log every request at `info`/`debug`; a batch of a few
/// hundred images would drown the per-item sync lines.
const QUIET_TARGETS: [&str; 4] = ["opendal", "hyper", "hyper_util", "reqwest"];

/// Directives used when `RUST_LOG` is unset: the caller's level for
/// `asset-sync` itself, `warn` for the HTTP and object-store stack.
pub fn default_directives(default_filter: &str) -> String {
    let mut directives = default_filter.to_string();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}=warn"));
    }
    directives
}

/// Install the global fmt subscriber for `asset-sync`. Called once from
/// `main` before the subcommand runs; `RUST_LOG` replaces the defaults
/// entirely.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(default_filter)))
        .map_err(|e| anyhow::anyhow!("invalid log filter `{default_filter}`: {e}"))?;

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_quiet_the_transport_stack() {
        let directives = default_directives("info");
        assert_eq!(
            directives,
            "info,opendal=warn,hyper=warn,hyper_util=warn,reqwest=warn"
        );
        assert!(EnvFilter::try_new(&directives).is_ok());
        assert!(EnvFilter::try_new(default_directives("brick_asset_sync=debug")).is_ok());
    }
}
