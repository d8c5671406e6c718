//! # Printer Workers
//!
//! One task per printer, fed through an mpsc queue, so a printer only ever
//! handles one document at a time. Every attempt is bounded by the attempt
//! timeout; running out of time is a transient failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use printhub_core::{PrintError, Printer};

use crate::driver::{PrintReceipt, PrinterDriver, RenderedDocument};
use crate::registry::PrinterRegistry;

/// Queue depth per printer before submitters wait.
const WORKER_QUEUE_DEPTH: usize = 32;

struct WorkItem {
    printer: Printer,
    document: Arc<RenderedDocument>,
    timeout: Duration,
    reply: oneshot::Sender<Result<PrintReceipt, PrintError>>,
}

/// Lazily spawned per-printer workers.
pub struct PrinterWorkers {
    driver: Arc<dyn PrinterDriver>,
    registry: Arc<PrinterRegistry>,
    queues: Mutex<HashMap<String, mpsc::Sender<WorkItem>>>,
}

impl PrinterWorkers {
    pub fn new(driver: Arc<dyn PrinterDriver>, registry: Arc<PrinterRegistry>) -> Self {
        PrinterWorkers {
            driver,
            registry,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one attempt on `printer` and waits for its outcome.
    pub async fn submit(
        &self,
        printer: &Printer,
        document: Arc<RenderedDocument>,
        timeout: Duration,
    ) -> Result<PrintReceipt, PrintError> {
        let (reply, outcome) = oneshot::channel();
        let item = WorkItem {
            printer: printer.clone(),
            document,
            timeout,
            reply,
        };

        let queue = self.queue_for(&printer.name).await;
        queue
            .send(item)
            .await
            .map_err(|_| PrintError::transient(format!("worker for {} stopped", printer.name)))?;

        outcome
            .await
            .map_err(|_| PrintError::transient(format!("worker for {} dropped the job", printer.name)))?
    }

    async fn queue_for(&self, name: &str) -> mpsc::Sender<WorkItem> {
        let mut queues = self.queues.lock().await;
        if let Some(tx) = queues.get(name).filter(|tx| !tx.is_closed()) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
        tokio::spawn(run_worker(
            name.to_string(),
            self.driver.clone(),
            self.registry.clone(),
            rx,
        ));
        queues.insert(name.to_string(), tx.clone());
        tx
    }

    /// Stops all workers once their queues drain.
    pub async fn shutdown(&self) {
        self.queues.lock().await.clear();
    }
}

async fn run_worker(
    name: String,
    driver: Arc<dyn PrinterDriver>,
    registry: Arc<PrinterRegistry>,
    mut rx: mpsc::Receiver<WorkItem>,
) {
    debug!(printer = %name, "Printer worker started");

    while let Some(item) = rx.recv().await {
        let before = registry.mark_busy(&name).await;

        let result = match tokio::time::timeout(item.timeout, driver.print(&item.printer, &item.document)).await {
            Ok(result) => result,
            Err(_) => Err(PrintError::transient(format!(
                "attempt timed out after {} ms",
                item.timeout.as_millis()
            ))),
        };

        match &result {
            Ok(_) => registry.mark_idle(&name).await,
            Err(e) => {
                warn!(printer = %name, error = %e, "Print attempt failed");
                registry.note_failure(&name, before, &e.message).await;
            }
        }

        if item.reply.send(result).is_err() {
            debug!(printer = %name, "Submitter went away before the outcome");
        }
    }

    debug!(printer = %name, "Printer worker stopped");
}
