//! Diagnostic tracing for the runner.
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr.
//! - **Cycle logs (`io/cycle_log`)**: product artifacts under `.tdd/`, always
//!   written and unaffected by `RUST_LOG`.
//! - **Progress lines**: printed by the CLI for `--verbose`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `warn`, or `info` when
/// `verbose` is on.
///
/// ```bash
/// RUST_LOG=tdd_runner=debug agentic-tdd kata.md
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
