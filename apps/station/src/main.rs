//! # PrintHub Station
//!
//! Print-job routing and dispatch for one on-premise base station.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Station Startup                                 │
//! │                                                                         │
//! │  1. Load station.toml (+ PRINTHUB_* env overrides)                     │
//! │  2. Install tracing subscriber                                         │
//! │  3. Open SQLite job store, apply migrations                            │
//! │  4. Build engine; recover interrupted jobs; start dispatcher           │
//! │  5. Start realtime channel (when websocket.url is set)                 │
//! │  6. Serve HTTP API                                                     │
//! │                                                                         │
//! │  SIGHUP ──► reload config    Ctrl+C / SIGTERM ──► graceful shutdown    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use printhub_db::{Database, DbConfig};
use printhub_engine::{ConfigStore, ControlPlane, EngineBuilder, MemoryDriver, StationConfig};
use printhub_station::telemetry::init_tracing;
use printhub_station::{build_router, AppState};
use printhub_sync::ChannelAgentBuilder;

#[derive(Debug, Parser)]
#[command(name = "printhub-station", version, about = "PrintHub base station")]
struct Cli {
    /// Path to station.toml (default: platform config dir)
    #[arg(short, long, env = "PRINTHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the SQLite job store (overrides server.database_path)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Route and "print" into memory instead of real printers
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store = Arc::new(ConfigStore::load(cli.config.clone()).context("Failed to load configuration")?);
    let config = store.get().await;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?store.path(),
        dry_run = cli.dry_run,
        "Starting PrintHub station"
    );

    let db_path = cli
        .database
        .or_else(|| config.server.database_path.clone())
        .or_else(StationConfig::default_database_path)
        .context("Could not determine a database path")?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = Arc::new(
        Database::new(DbConfig::new(&db_path))
            .await
            .context("Failed to open the job store")?,
    );
    info!(path = %db_path.display(), "Job store ready");

    let mut builder = EngineBuilder::new(store.clone()).with_database(db);
    if cli.dry_run {
        warn!("Dry run: jobs are printed into memory");
        builder = builder.with_driver(Arc::new(MemoryDriver::new()));
    }
    let mut engine = builder.build().await?;
    engine.start().await?;

    let mut channel = ChannelAgentBuilder::new()
        .with_config(store.clone())
        .with_control(engine.control())
        .with_events(engine.events())
        .build()?;
    if let Err(e) = channel.start().await {
        error!(error = %e, "Realtime channel not started");
    }

    let control = engine.control();
    let reloader = tokio::spawn(reload_on_hangup(control.clone()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "HTTP API listening");

    axum::serve(listener, build_router(AppState::new(control)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    reloader.abort();
    if let Err(e) = channel.shutdown().await {
        warn!(error = %e, "Realtime channel did not shut down cleanly");
    }
    engine.shutdown().await;

    info!("Station shutdown complete");
    Ok(())
}

/// Reloads `station.toml` on every SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(control: Arc<ControlPlane>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "SIGHUP handler not installed, config reload by signal disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("SIGHUP received, reloading configuration");
        if let Err(e) = control.reload().await {
            error!(error = %e, "Configuration reload failed, keeping the running config");
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_control: Arc<ControlPlane>) {}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
