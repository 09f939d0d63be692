//! Tracing setup for jig processes.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber for a jig process.
///
/// Console output with target and level, filtered by `RUST_LOG`
/// (`info` when unset). Calling it twice is a no-op; the second install
/// attempt is ignored rather than panicking, so embedding hosts and tests
/// can both call it freely.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
