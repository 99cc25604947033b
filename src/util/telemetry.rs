//! Structured logging setup.
//!
//! The proposer logs via `tracing`, filtered by the `RUST_LOG` environment
//! variable (defaulting to `info` for this crate and `warn` for dependencies).
//! Bundle-tick failures and post-anchor database failures are escalated to
//! `error!` per spec.md §7; everything else at `info!`/`warn!`/`debug!`.

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. Call once at process start.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vault_proposer=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .ok();
}
