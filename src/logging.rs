//! Operator-facing diagnostics go to stderr through `tracing`.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "connect_tor=info,tor=warn";

/// Install the global subscriber; `RUST_LOG` overrides the default filter.
/// `verbose` raises both the crate and tor's own output to debug.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("connect_tor=debug,tor=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
