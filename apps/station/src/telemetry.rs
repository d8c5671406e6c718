//! # Logging Setup
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=printhub=trace` - Trace the station crates only
//! - Otherwise `[logging] level` from `station.toml`
//!   (default `info,printhub=debug,sqlx=warn`)
//!
//! `[logging] json = true` switches to one JSON object per line.

use tracing_subscriber::EnvFilter;

use printhub_engine::config::LoggingSettings;

/// Installs the global subscriber. Safe to call once per process.
pub fn init_tracing(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = installed {
        eprintln!("Logging already initialized: {e}");
    }
}
