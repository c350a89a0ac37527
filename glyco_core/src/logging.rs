//! Logging setup for the glyco binaries.
//!
//! Everything goes to stderr so forecast tables and `--json` output on
//! stdout stay machine-readable. `RUST_LOG` always wins over the verbosity
//! chosen on the command line.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter directive for a `-v` count
///
/// One `-v` shows run-level decisions (basal state, autosens, momentum); two
/// or more add the per-step trace of every impact term.
pub fn filter_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "glyco_core=debug,info",
        _ => "glyco_core=trace,debug",
    }
}

/// Initialize logging for a `-v` count
pub fn init(verbosity: u8) {
    init_with_level(filter_for(verbosity))
}

/// Initialize logging with a specific default directive
pub fn init_with_level(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new(filter_for(2)))
        .try_init();
}
