//! # Printer Registry
//!
//! Known printers and their live status.
//!
//! ## Status Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  printers table ──load()──► printers map                               │
//! │                                                                         │
//! │  poller (every status_poll_interval) ──refresh()──► probe each printer │
//! │  worker (around each attempt)   ──mark_busy / mark_idle──►             │
//! │                                                                         │
//! │                    statuses map ──states()──► Balancer eligibility     │
//! │                         │                                               │
//! │                         └── entering ERROR ──► GPIO reset pulse        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed attempt leaves the printer in the state it had before the
//! attempt; the next probe decides whether it is really gone. Only a probe
//! or a successful print lifts OFFLINE or ERROR.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use printhub_core::{Printer, PrinterState, PrinterStatus};
use printhub_db::Database;

use crate::driver::PrinterDriver;
use crate::error::EngineResult;
use crate::gpio::GpioReset;

pub struct PrinterRegistry {
    db: Arc<Database>,
    driver: Arc<dyn PrinterDriver>,
    gpio: Option<GpioReset>,
    printers: RwLock<HashMap<String, Printer>>,
    statuses: RwLock<HashMap<String, PrinterStatus>>,
}

impl PrinterRegistry {
    pub fn new(db: Arc<Database>, driver: Arc<dyn PrinterDriver>, gpio: Option<GpioReset>) -> Self {
        PrinterRegistry {
            db,
            driver,
            gpio,
            printers: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Reloads printer definitions from the store, then probes them.
    pub async fn load(&self) -> EngineResult<()> {
        let printers = self.db.printers().list().await?;
        {
            let mut map = self.printers.write().await;
            *map = printers
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect();

            let mut statuses = self.statuses.write().await;
            statuses.retain(|name, _| map.contains_key(name));
            for printer in map.values() {
                let status = statuses
                    .entry(printer.name.clone())
                    .or_insert_with(|| PrinterStatus {
                        name: printer.name.clone(),
                        is_default: printer.is_default,
                        state: PrinterState::Offline,
                        last_seen: None,
                        in_flight: 0,
                        detail: None,
                    });
                status.is_default = printer.is_default;
            }
            debug!(count = map.len(), "Printer definitions loaded");
        }

        self.refresh().await;
        Ok(())
    }

    /// Probes every enabled printer and updates its state.
    ///
    /// A printer mid-attempt stays BUSY while its probe says IDLE.
    pub async fn refresh(&self) {
        let printers: Vec<Printer> = self
            .printers
            .read()
            .await
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect();

        for printer in printers {
            let probed = self.driver.probe(&printer).await;
            let entered_error = {
                let mut statuses = self.statuses.write().await;
                let Some(status) = statuses.get_mut(&printer.name) else {
                    continue;
                };
                let previous = status.state;
                status.state = match (previous, probed) {
                    (PrinterState::Busy, PrinterState::Idle) => PrinterState::Busy,
                    (_, next) => next,
                };
                if status.state.is_eligible() {
                    status.last_seen = Some(Utc::now());
                    status.detail = None;
                }
                if previous != status.state {
                    info!(
                        printer = %printer.name,
                        from = %previous,
                        to = %status.state,
                        "Printer state changed"
                    );
                }
                previous != PrinterState::Error && status.state == PrinterState::Error
            };

            if entered_error {
                self.reset_printer(&printer.name).await;
            }
        }
    }

    async fn reset_printer(&self, name: &str) {
        if let Some(ref gpio) = self.gpio {
            match gpio.pulse().await {
                Ok(true) => info!(printer = %name, "Printer reset via GPIO"),
                Ok(false) => {}
                Err(e) => warn!(printer = %name, error = %e, "GPIO reset failed"),
            }
        }
    }

    /// States of enabled printers, for the balancer.
    pub async fn states(&self) -> HashMap<String, PrinterState> {
        let printers = self.printers.read().await;
        self.statuses
            .read()
            .await
            .values()
            .filter(|s| printers.get(&s.name).map(|p| p.enabled).unwrap_or(false))
            .map(|s| (s.name.clone(), s.state))
            .collect()
    }

    pub async fn printer(&self, name: &str) -> Option<Printer> {
        self.printers.read().await.get(name).cloned()
    }

    /// Status list with the dispatcher's in-flight counts filled in.
    pub async fn statuses(&self, in_flight: impl Fn(&str) -> u32) -> Vec<PrinterStatus> {
        let mut list: Vec<PrinterStatus> = self
            .statuses
            .read()
            .await
            .values()
            .cloned()
            .map(|mut s| {
                s.in_flight = in_flight(&s.name);
                s
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Marks the printer BUSY for an attempt and returns the state it had
    /// before. OFFLINE and ERROR are left alone; only a probe lifts them.
    pub async fn mark_busy(&self, name: &str) -> Option<PrinterState> {
        let mut statuses = self.statuses.write().await;
        let status = statuses.get_mut(name)?;
        let before = status.state;
        if before.is_eligible() {
            status.state = PrinterState::Busy;
        }
        Some(before)
    }

    pub async fn mark_idle(&self, name: &str) {
        self.set_state(name, PrinterState::Idle, None).await;
    }

    /// Records the attempt error and puts back the state the printer had
    /// before the attempt.
    pub async fn note_failure(&self, name: &str, before: Option<PrinterState>, detail: &str) {
        if let Some(status) = self.statuses.write().await.get_mut(name) {
            if status.state == PrinterState::Busy {
                status.state = match before {
                    Some(PrinterState::Busy) | None => PrinterState::Idle,
                    Some(state) => state,
                };
            }
            status.detail = Some(detail.to_string());
        }
    }

    async fn set_state(&self, name: &str, state: PrinterState, detail: Option<String>) {
        if let Some(status) = self.statuses.write().await.get_mut(name) {
            status.state = state;
            status.detail = detail;
            status.last_seen = Some(Utc::now());
        }
    }

    /// Probes on an interval until `shutdown_rx` fires.
    pub async fn run_poller(self: Arc<Self>, interval: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(interval_ms = interval.as_millis() as u64, "Printer status poller starting");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh().await,
                _ = shutdown_rx.recv() => {
                    info!("Printer status poller shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use printhub_db::{DbConfig, NewPrinter};

    async fn setup() -> (Arc<Database>, Arc<MemoryDriver>, PrinterRegistry) {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        for (name, enabled) in [("P1", true), ("P2", true), ("P3", false)] {
            db.printers()
                .save(&NewPrinter {
                    name: name.into(),
                    description: None,
                    connection: "memory://".into(),
                    is_default: name == "P1",
                    enabled,
                })
                .await
                .unwrap();
        }
        let driver = Arc::new(MemoryDriver::new());
        let registry = PrinterRegistry::new(db.clone(), driver.clone(), None);
        (db, driver, registry)
    }

    #[tokio::test]
    async fn test_load_probes_enabled_printers() {
        let (_db, driver, registry) = setup().await;
        driver.set_state("P2", PrinterState::Offline).await;
        registry.load().await.unwrap();

        let states = registry.states().await;
        assert_eq!(states.get("P1"), Some(&PrinterState::Idle));
        assert_eq!(states.get("P2"), Some(&PrinterState::Offline));
        assert!(!states.contains_key("P3"));
    }

    #[tokio::test]
    async fn test_busy_survives_idle_probe() {
        let (_db, _driver, registry) = setup().await;
        registry.load().await.unwrap();
        registry.mark_busy("P1").await;
        registry.refresh().await;
        assert_eq!(registry.states().await.get("P1"), Some(&PrinterState::Busy));

        registry.mark_idle("P1").await;
        assert_eq!(registry.states().await.get("P1"), Some(&PrinterState::Idle));
    }

    #[tokio::test]
    async fn test_failure_keeps_printer_eligible() {
        let (_db, _driver, registry) = setup().await;
        registry.load().await.unwrap();
        let before = registry.mark_busy("P1").await;
        assert_eq!(before, Some(PrinterState::Idle));
        registry.note_failure("P1", before, "paper jam").await;

        let statuses = registry.statuses(|_| 0).await;
        let p1 = statuses.iter().find(|s| s.name == "P1").unwrap();
        assert_eq!(p1.state, PrinterState::Idle);
        assert_eq!(p1.detail.as_deref(), Some("paper jam"));
        assert!(p1.is_default);
    }

    #[tokio::test]
    async fn test_failed_attempt_does_not_revive_offline_printer() {
        let (_db, driver, registry) = setup().await;
        driver.set_state("P2", PrinterState::Offline).await;
        registry.load().await.unwrap();

        let before = registry.mark_busy("P2").await;
        assert_eq!(before, Some(PrinterState::Offline));
        assert_eq!(registry.states().await.get("P2"), Some(&PrinterState::Offline));

        registry.note_failure("P2", before, "printer offline").await;
        assert_eq!(registry.states().await.get("P2"), Some(&PrinterState::Offline));

        driver.set_state("P2", PrinterState::Idle).await;
        registry.refresh().await;
        assert_eq!(registry.states().await.get("P2"), Some(&PrinterState::Idle));
    }

    #[tokio::test]
    async fn test_deleted_printer_disappears() {
        let (db, _driver, registry) = setup().await;
        registry.load().await.unwrap();
        db.printers().delete("P2").await.unwrap();
        registry.load().await.unwrap();
        assert!(registry.printer("P2").await.is_none());
        assert_eq!(registry.statuses(|_| 0).await.len(), 2);
    }
}
