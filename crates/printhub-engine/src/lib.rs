//! # printhub-engine: Dispatch Engine for the PrintHub Base Station
//!
//! Turns accepted print jobs into paper and keeps the station's operators
//! informed about it.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine Architecture                            │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 ControlPlane (HTTP + realtime channel)           │  │
//! │  │   SecurityGate first • validation • CRUD • config • analytics   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ enqueue + wake                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                          Dispatcher                              │  │
//! │  │   claim ──► RoutingTable ──► Balancer ──► PrinterWorkers         │  │
//! │  │                 ▲                             │                  │  │
//! │  │                 └──── RetryPolicy ◄───────────┘ failure          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ JobEvent                               │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ AnalyticsRec.  │  │ Notification   │  │ Realtime channel       │    │
//! │  │ one record per │  │ Sink (sounds)  │  │ (printhub-sync)        │    │
//! │  │ outcome        │  │                │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  PrinterRegistry ◄── status poller, GPIO reset on ERROR                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`analytics`] - Outcome records, CSV/JSON export, summaries
//! - [`config`] - Station configuration (TOML + env) and the live store
//! - [`control`] - Authenticated operator entry point
//! - [`dispatcher`] - Job lifecycle, retry and failover
//! - [`driver`] - Rendering and printer I/O
//! - [`error`] - Engine error type
//! - [`events`] - Job event fan-out
//! - [`gpio`] - Printer reset line
//! - [`notify`] - Audible notifications
//! - [`registry`] - Printer definitions and live status
//! - [`routing`] - Routing table snapshot
//! - [`security`] - API key gate
//! - [`worker`] - One worker task per printer

// =============================================================================
// Module Declarations
// =============================================================================

pub mod analytics;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod events;
pub mod gpio;
pub mod notify;
pub mod registry;
pub mod routing;
pub mod security;
pub mod worker;

// =============================================================================
// Re-exports
// =============================================================================

pub use analytics::{AnalyticsRecorder, ExportFormat};
pub use config::{ConfigError, ConfigStore, StationConfig};
pub use control::{AnalyticsExport, ControlPlane, HealthReport, SubmitReceipt};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use driver::{ConnectionDriver, EscPosRenderer, MemoryDriver, PrinterDriver, Renderer};
pub use error::{EngineError, EngineResult};
pub use events::{EventBus, JobEventSink, NoOpSink};
pub use notify::{CommandPlayer, NotificationSink, SoundPlayer};
pub use security::{AuthError, SecurityGate};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use printhub_db::{Database, DbError, NewPrinter};

use dispatcher::DispatcherParts;
use gpio::GpioReset;
use registry::PrinterRegistry;
use worker::PrinterWorkers;

/// Name under which `printing.bluetooth_printer` is registered.
pub const BLUETOOTH_PRINTER_NAME: &str = "bluetooth";

// =============================================================================
// Engine
// =============================================================================

/// The assembled engine. Build with [`EngineBuilder`].
pub struct Engine {
    db: Arc<Database>,
    config: Arc<ConfigStore>,
    registry: Arc<PrinterRegistry>,
    dispatcher: Dispatcher,
    control: Arc<ControlPlane>,
    events: Arc<EventBus>,
    dispatcher_handle: Option<DispatcherHandle>,
    poller: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
}

impl Engine {
    pub fn control(&self) -> Arc<ControlPlane> {
        self.control.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn config(&self) -> Arc<ConfigStore> {
        self.config.clone()
    }

    pub fn database(&self) -> Arc<Database> {
        self.db.clone()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Recovers interrupted jobs, loads printers and routing, then starts
    /// the dispatcher and the status poller.
    pub async fn start(&mut self) -> EngineResult<()> {
        let recovered = self.db.jobs().recover_interrupted().await?;
        if recovered > 0 {
            warn!(count = recovered, "Recovered jobs interrupted by a restart");
        }

        let config = self.config.get().await;
        if let Some(ref connection) = config.printing.bluetooth_printer {
            self.register_bluetooth(connection).await?;
        }

        self.registry.load().await?;
        self.dispatcher.reload_routing().await?;

        let (poller_tx, poller_rx) = mpsc::channel(1);
        let interval = Duration::from_millis(config.printing.status_poll_interval_ms);
        let poller = tokio::spawn(self.registry.clone().run_poller(interval, poller_rx));
        self.poller = Some((poller_tx, poller));

        self.dispatcher_handle = Some(self.dispatcher.spawn());
        self.dispatcher.wake();

        info!("Print engine started");
        Ok(())
    }

    async fn register_bluetooth(&self, connection: &str) -> EngineResult<()> {
        match self.db.printers().get(BLUETOOTH_PRINTER_NAME).await {
            Ok(_) => Ok(()),
            Err(DbError::NotFound { .. }) => {
                printhub_core::validation::validate_connection(connection)?;
                self.db
                    .printers()
                    .save(&NewPrinter {
                        name: BLUETOOTH_PRINTER_NAME.to_string(),
                        description: Some("Bluetooth receipt printer".to_string()),
                        connection: connection.to_string(),
                        is_default: false,
                        enabled: true,
                    })
                    .await?;
                info!(connection = %connection, "Bluetooth printer registered");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stops claiming jobs, waits for running attempts, stops the poller.
    pub async fn shutdown(&mut self) {
        info!("Shutting down print engine");

        if let Some(handle) = self.dispatcher_handle.take() {
            handle.shutdown().await;
        }

        if let Some((tx, task)) = self.poller.take() {
            let _ = tx.send(()).await;
            if let Err(e) = task.await {
                error!(error = %e, "Status poller ended abnormally");
            }
        }

        info!("Print engine stopped");
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating an [`Engine`].
pub struct EngineBuilder {
    config: Arc<ConfigStore>,
    db: Option<Arc<Database>>,
    driver: Option<Arc<dyn PrinterDriver>>,
    renderer: Option<Arc<dyn Renderer>>,
    player: Option<Arc<dyn SoundPlayer>>,
}

impl EngineBuilder {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        EngineBuilder {
            config,
            db: None,
            driver: None,
            renderer: None,
            player: None,
        }
    }

    /// Sets the job store.
    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the printer driver (default: [`ConnectionDriver`]).
    pub fn with_driver(mut self, driver: Arc<dyn PrinterDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Sets the renderer (default: [`EscPosRenderer`]).
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Sets the sound player (default: [`CommandPlayer`]).
    pub fn with_sound_player(mut self, player: Arc<dyn SoundPlayer>) -> Self {
        self.player = Some(player);
        self
    }

    /// Wires everything together. Nothing runs until [`Engine::start`].
    pub async fn build(self) -> EngineResult<Engine> {
        let db = self
            .db
            .ok_or_else(|| ConfigError::Invalid("database required".into()))?;
        let config = self.config;
        let settings = config.get().await;

        let driver = self
            .driver
            .unwrap_or_else(|| Arc::new(ConnectionDriver::default()));
        let renderer = self.renderer.unwrap_or_else(|| Arc::new(EscPosRenderer));
        let player = self.player.unwrap_or_else(|| Arc::new(CommandPlayer));

        let registry = Arc::new(PrinterRegistry::new(
            db.clone(),
            driver.clone(),
            GpioReset::from_settings(&settings.gpio),
        ));

        let events = Arc::new(EventBus::new());
        events.subscribe(Arc::new(NotificationSink::new(config.clone(), player)));

        let dispatcher = Dispatcher::new(DispatcherParts {
            db: db.clone(),
            config: config.clone(),
            registry: registry.clone(),
            workers: PrinterWorkers::new(driver, registry.clone()),
            renderer,
            events: events.clone(),
            analytics: AnalyticsRecorder::new(db.clone()),
            max_in_flight: settings.printing.max_in_flight,
            poll_interval: Duration::from_millis(settings.printing.dispatch_poll_interval_ms),
        });

        let control = Arc::new(ControlPlane::new(
            db.clone(),
            config.clone(),
            registry.clone(),
            dispatcher.clone(),
            events.clone(),
        ));

        Ok(Engine {
            db,
            config,
            registry,
            dispatcher,
            control,
            events,
            dispatcher_handle: None,
            poller: None,
        })
    }
}
