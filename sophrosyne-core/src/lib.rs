//! Domain types, configuration, error kinds, and health aggregation shared
//! across the Sophrosyne gateway crates.

pub mod config;
pub mod cursor;
pub mod domain;
pub mod error;
pub mod health;
pub mod token;

pub use config::AppConfig;
pub use cursor::Cursor;
pub use error::RpcError;

/// Install a global `tracing` subscriber honoring `AppConfig::tracing.level`,
/// overridable via `RUST_LOG`. Grounded on the teacher's `init_tracing` layer
/// setup; this repo always uses the compact formatter (no JSON/compact
/// toggle was worth the extra dependency for a single formatter choice).
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
