//! Logging bootstrap for binaries and tests embedding the engine.

use tracing_subscriber::EnvFilter;

/// Initializes an env-filtered fmt subscriber (`RUST_LOG` controls the
/// level, `info` by default). Safe to call more than once; later calls
/// are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
