//! Tracing setup for the medtrack binaries.
//!
//! The core modules emit structured events on the paths that matter when a
//! dose record looks wrong: WAL appends and skipped lines, merge conflicts,
//! sweep transitions, DST shifts. This module wires them to stderr behind an
//! env-configurable filter so diagnostic output never mixes with the CLI's
//! stdout reporting.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging at `info`, overridable via `RUST_LOG`.
///
/// `RUST_LOG=medtrack_core=debug` is the usual switch when diagnosing
/// schedule resolution or sync merges.
pub fn init() {
    init_with_filter("info")
}

/// Initialize logging with explicit filter directives (same syntax as
/// `RUST_LOG`). The environment still takes precedence when set.
pub fn init_with_filter(directives: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}
