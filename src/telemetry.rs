//! Process-wide tracing setup: a one-shot `tracing-subscriber`
//! initialization at process start.

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. Call once, from `main`.
/// `default_level` is used when `RUST_LOG` is unset.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
