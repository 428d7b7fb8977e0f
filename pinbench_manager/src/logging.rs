//! Log output for the `pinbench` binary
//!
//! The libraries log through the `log` facade; records are forwarded into a
//! `tracing` fmt subscriber. `RUST_LOG` overrides the default level.

use tracing_subscriber::EnvFilter;

/// Default filter: `info`, or `debug` when verbose
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Install the global subscriber; later calls are no-ops
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
