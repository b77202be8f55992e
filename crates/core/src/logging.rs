//! Tracing subscriber setup for binaries and tests embedding the library.

use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

/// Install a formatted subscriber filtered by `level`.
///
/// An unparsable directive falls back to `info`. Returns `false` when a
/// global subscriber was already installed, in which case nothing changes.
pub fn init_tracing(level: &str) -> bool {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .try_init()
        .is_ok()
}

/// [`init_tracing`] with the configured level.
pub fn init_from_config(config: &AppConfig) -> bool {
    init_tracing(&config.logging.level)
}
