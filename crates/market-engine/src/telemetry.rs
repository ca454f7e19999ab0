//! Tracing setup for processes embedding the engine.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,market_engine=debug,market_db=debug,sqlx=warn";

/// Installs a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
