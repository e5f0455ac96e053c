//! Structured logging setup (`§1` ambient stack), via `tracing` +
//! `tracing-subscriber`'s `EnvFilter`, following `sombra`'s declared
//! `logging` module.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber reading its filter from the
/// `PLASMA_LOG` environment variable (falling back to `info`).
///
/// Safe to call more than once per process; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env("PLASMA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
