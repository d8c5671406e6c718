//! # Dispatcher
//!
//! Moves PENDING jobs to an outcome.
//!
//! ## Job Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Dispatch of one job                              │
//! │                                                                         │
//! │  PENDING ──claim──► ROUTING ──classify──► category ──► group            │
//! │                        │                                  │             │
//! │                        │ no route / no printer            ▼ select      │
//! │                        ▼                              PRINTING          │
//! │                      FAILED ◄──── content error ──────┤   │             │
//! │                        ▲                              │   │ attempt     │
//! │                        │                              │   ▼             │
//! │                        └── retries exhausted ◄── transient failure      │
//! │                                                       │   │             │
//! │                   ABANDONED ◄── cancel requested ─────┘   │ wait delay, │
//! │                                                           │ reselect    │
//! │                   SUCCEEDED ◄──────── success ────────────┘             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every transition is a conditional update in the job store, so a stale
//! writer (a cancel racing a dispatch) loses cleanly with a conflict. Each
//! outcome produces one analytics record and one [`JobEvent`]. When the
//! store keeps refusing a write, dispatch aborts and the job goes back to
//! PENDING.
//!
//! ## Concurrency
//! - The run loop claims up to `max_in_flight` jobs, one task per job.
//! - Balancer state sits behind one mutex; selection and reservation
//!   happen under the same lock.
//! - Retry waits are `tokio::time::sleep`, so they follow a paused clock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use printhub_core::balancer::Balancer;
use printhub_core::retry::{AttemptTracker, FailureDecision};
use printhub_core::{
    JobEvent, JobStatus, PrintError, PrintJob, PrinterGroup, PrinterState, RoutingError, CANCELLED,
    NO_ELIGIBLE_PRINTER,
};
use printhub_db::{Database, DbError, JobUpdate};

use crate::analytics::AnalyticsRecorder;
use crate::config::ConfigStore;
use crate::driver::{RenderedDocument, Renderer};
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::registry::PrinterRegistry;
use crate::routing::RoutingTable;
use crate::worker::PrinterWorkers;

/// Writes of a job outcome before dispatch gives up on it.
const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_BACKOFF: Duration = Duration::from_millis(50);

/// Everything the dispatcher works with.
pub struct DispatcherParts {
    pub db: Arc<Database>,
    pub config: Arc<ConfigStore>,
    pub registry: Arc<PrinterRegistry>,
    pub workers: PrinterWorkers,
    pub renderer: Arc<dyn Renderer>,
    pub events: Arc<EventBus>,
    pub analytics: AnalyticsRecorder,
    pub max_in_flight: usize,
    pub poll_interval: Duration,
}

struct Inner {
    db: Arc<Database>,
    config: Arc<ConfigStore>,
    registry: Arc<PrinterRegistry>,
    workers: PrinterWorkers,
    renderer: Arc<dyn Renderer>,
    events: Arc<EventBus>,
    analytics: AnalyticsRecorder,
    balancer: Mutex<Balancer>,
    routing: RwLock<Arc<RoutingTable>>,
    wake: Notify,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    poll_interval: Duration,
    stopping: watch::Sender<bool>,
}

/// Shared handle to the dispatch engine.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// Controls a running dispatch loop.
pub struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stops claiming, lets in-flight attempts finish, then returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "Dispatcher task ended abnormally");
        }
    }
}

/// How a dispatch run ended.
enum Step {
    Done(Option<PrintJob>),
    /// Another writer owns the job now.
    Lost,
}

impl Dispatcher {
    pub fn new(parts: DispatcherParts) -> Self {
        let max_in_flight = parts.max_in_flight.max(1);
        let (stopping, _) = watch::channel(false);
        Dispatcher {
            inner: Arc::new(Inner {
                db: parts.db,
                config: parts.config,
                registry: parts.registry,
                workers: parts.workers,
                renderer: parts.renderer,
                events: parts.events,
                analytics: parts.analytics,
                balancer: Mutex::new(Balancer::new()),
                routing: RwLock::new(Arc::new(RoutingTable::default())),
                wake: Notify::new(),
                permits: Arc::new(Semaphore::new(max_in_flight)),
                max_in_flight,
                poll_interval: parts.poll_interval,
                stopping,
            }),
        }
    }

    /// Spawns the run loop.
    pub fn spawn(&self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.clone().run(shutdown_rx));
        DispatcherHandle { shutdown_tx, task }
    }

    /// Signals that new work may be available.
    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }

    /// Rebuilds the routing table from the store and current config.
    pub async fn reload_routing(&self) -> EngineResult<()> {
        let config = self.inner.config.get().await;
        let table =
            RoutingTable::load(&self.inner.db, config.routing.default_category.as_deref()).await?;
        *self.inner.routing.write().await = Arc::new(table);
        info!("Routing table reloaded");
        Ok(())
    }

    /// Current routing snapshot.
    pub async fn routing(&self) -> Arc<RoutingTable> {
        self.inner.routing.read().await.clone()
    }

    /// Dispatches currently reserved on `printer`.
    pub fn in_flight(&self, printer: &str) -> u32 {
        self.balancer().in_flight(printer)
    }

    /// Drops the round-robin position of an edited or deleted group.
    pub fn forget_group(&self, group_id: &str) {
        self.balancer().reset_group(group_id);
    }

    fn balancer(&self) -> MutexGuard<'_, Balancer> {
        self.inner
            .balancer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn select(
        &self,
        group: &PrinterGroup,
        states: &HashMap<String, PrinterState>,
        excluded: &HashSet<String>,
    ) -> Result<String, RoutingError> {
        self.balancer().select(group, states, excluded)
    }

    fn release(&self, printer: &str) {
        self.balancer().release(printer);
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(max_in_flight = self.inner.max_in_flight, "Dispatcher starting");

        let mut ticker = tokio::time::interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.dispatch_pending().await;

            tokio::select! {
                _ = self.inner.wake.notified() => {}
                _ = ticker.tick() => {}
                _ = shutdown_rx.recv() => {
                    info!("Dispatcher shutting down");
                    break;
                }
            }
        }

        self.inner.stopping.send_replace(true);
        // Wait for running jobs; their current attempt is allowed to finish
        match self
            .inner
            .permits
            .acquire_many(self.inner.max_in_flight as u32)
            .await
        {
            Ok(_all) => debug!("All dispatches finished"),
            Err(e) => warn!(error = %e, "Could not wait for running dispatches"),
        }
        self.inner.workers.shutdown().await;

        info!("Dispatcher stopped");
    }

    /// Claims and starts as many pending jobs as there are free slots.
    async fn dispatch_pending(&self) {
        loop {
            let available = self.inner.permits.available_permits();
            if available == 0 {
                return;
            }

            let jobs = match self.inner.db.jobs().list_pending(available as u32).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "Failed to list pending jobs");
                    return;
                }
            };
            let listed = jobs.len();

            for job in jobs {
                let Ok(permit) = self.inner.permits.clone().try_acquire_owned() else {
                    return;
                };
                match self.claim(job).await {
                    Ok(Some(claimed)) => {
                        tokio::spawn(self.clone().process(claimed, permit));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "Failed to claim job");
                        return;
                    }
                }
            }

            if listed < available {
                return;
            }
        }
    }

    /// PENDING → ROUTING. `None` when the job was taken or cancelled.
    async fn claim(&self, job: PrintJob) -> EngineResult<Option<PrintJob>> {
        if job.cancel_requested {
            self.finish(&job, JobStatus::Abandoned, JobUpdate::new().error(CANCELLED), None, 0)
                .await?;
            return Ok(None);
        }

        match self
            .inner
            .db
            .jobs()
            .update_status(&job.id, &[JobStatus::Pending], JobStatus::Routing, JobUpdate::new())
            .await
        {
            Ok(claimed) => {
                debug!(job_id = %claimed.id, priority = claimed.priority, "Job claimed");
                self.inner.events.publish(&JobEvent::from_job(&claimed));
                Ok(Some(claimed))
            }
            Err(DbError::Conflict { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn process(self, job: PrintJob, permit: OwnedSemaphorePermit) {
        let job_id = job.id.clone();
        match self.dispatch(job).await {
            Ok(Step::Done(Some(done))) => {
                info!(
                    job_id = %done.id,
                    status = %done.status,
                    printer = ?done.assigned_printer,
                    attempts = done.attempts(),
                    "Dispatch finished"
                );
            }
            Ok(Step::Done(None)) => {}
            Ok(Step::Lost) => debug!(job_id = %job_id, "Job changed hands during dispatch"),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Dispatch aborted");
                self.recover(&job_id).await;
            }
        }
        drop(permit);
        self.wake();
    }

    // =========================================================================
    // Dispatch of one job
    // =========================================================================

    async fn dispatch(&self, job: PrintJob) -> EngineResult<Step> {
        let table = self.routing().await;

        let category = match table.classify(&job) {
            Ok(category) => category.clone(),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Job has no route");
                let done = self
                    .finish(&job, JobStatus::Failed, JobUpdate::new().error(e.to_string()), None, 0)
                    .await?;
                return Ok(Step::Done(done));
            }
        };
        let category_name = Some(category.name.clone());

        let group = match table.resolve_group(&category) {
            Ok(group) => group,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Category has no printers");
                let done = self
                    .finish(
                        &job,
                        JobStatus::Failed,
                        JobUpdate::new().error(NO_ELIGIBLE_PRINTER),
                        category_name,
                        0,
                    )
                    .await?;
                return Ok(Step::Done(done));
            }
        };

        let config = self.inner.config.get().await;
        let policy = config.printing.retry_policy();
        let attempt_timeout = config.printing.attempt_timeout();
        let mut tracker = AttemptTracker::resume(job.retries);

        let states = self.inner.registry.states().await;
        let mut printer_name = match self.select(&group, &states, tracker.excluded()) {
            Ok(name) => name,
            Err(e) => {
                warn!(job_id = %job.id, group = %group.name, error = %e, "No printer available");
                let done = self
                    .finish(
                        &job,
                        JobStatus::Failed,
                        JobUpdate::new().error(NO_ELIGIBLE_PRINTER),
                        category_name,
                        0,
                    )
                    .await?;
                return Ok(Step::Done(done));
            }
        };

        let mut current = match self
            .transition(
                &job.id,
                JobStatus::Routing,
                JobStatus::Printing,
                JobUpdate::new().printer(&printer_name).category(&category.id),
            )
            .await
        {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.release(&printer_name);
                return Ok(Step::Lost);
            }
            Err(e) => {
                self.release(&printer_name);
                return Err(e);
            }
        };
        self.inner.events.publish(&JobEvent::from_job(&current));

        let document = match self.inner.renderer.render(&current, config.printing.receipt_width) {
            Ok(document) => Arc::new(document),
            Err(e) => {
                self.release(&printer_name);
                warn!(job_id = %current.id, error = %e, "Job content cannot be rendered");
                let done = self
                    .finish(&current, JobStatus::Failed, JobUpdate::new().error(e.to_string()), category_name, 0)
                    .await?;
                return Ok(Step::Done(done));
            }
        };

        loop {
            debug!(
                job_id = %current.id,
                printer = %printer_name,
                attempt = current.attempts(),
                "Starting print attempt"
            );
            let result = self.attempt(&printer_name, document.clone(), attempt_timeout).await;
            self.release(&printer_name);

            let error = match result {
                Ok(()) => {
                    let done = self
                        .finish(
                            &current,
                            JobStatus::Succeeded,
                            JobUpdate::new(),
                            category_name,
                            document.page_count,
                        )
                        .await?;
                    return Ok(Step::Done(done));
                }
                Err(error) => error,
            };

            let cancel_requested = self.cancel_requested(&current.id).await;
            match policy.on_failure(&mut tracker, &printer_name, &error, cancel_requested) {
                FailureDecision::Fail { reason } => {
                    warn!(job_id = %current.id, printer = %printer_name, reason = %reason, "Job failed");
                    let done = self
                        .finish(&current, JobStatus::Failed, JobUpdate::new().error(reason), category_name, 0)
                        .await?;
                    return Ok(Step::Done(done));
                }
                FailureDecision::Abandon => {
                    info!(job_id = %current.id, "Job abandoned after cancel request");
                    let done = self
                        .finish(&current, JobStatus::Abandoned, JobUpdate::new().error(CANCELLED), category_name, 0)
                        .await?;
                    return Ok(Step::Done(done));
                }
                FailureDecision::Retry { delay } => {
                    // Persist the retry count before waiting so it survives a crash
                    current = match self
                        .transition(
                            &current.id,
                            JobStatus::Printing,
                            JobStatus::Printing,
                            JobUpdate::new()
                                .retries(tracker.retries)
                                .error(error.to_string()),
                        )
                        .await?
                    {
                        Some(job) => job,
                        None => return Ok(Step::Lost),
                    };
                    info!(
                        job_id = %current.id,
                        printer = %printer_name,
                        retry = tracker.retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retry scheduled"
                    );

                    if !self.wait_or_stop(delay).await {
                        return self.requeue_interrupted(&current).await;
                    }

                    if self.cancel_requested(&current.id).await {
                        let done = self
                            .finish(&current, JobStatus::Abandoned, JobUpdate::new().error(CANCELLED), category_name, 0)
                            .await?;
                        return Ok(Step::Done(done));
                    }

                    let states = self.inner.registry.states().await;
                    printer_name = match self.select(&group, &states, tracker.excluded()) {
                        Ok(name) => name,
                        Err(_) => {
                            let reason = format!("{}: {}", NO_ELIGIBLE_PRINTER, error);
                            warn!(job_id = %current.id, reason = %reason, "No printer left for retry");
                            let done = self
                                .finish(&current, JobStatus::Failed, JobUpdate::new().error(reason), category_name, 0)
                                .await?;
                            return Ok(Step::Done(done));
                        }
                    };

                    current = match self
                        .transition(
                            &current.id,
                            JobStatus::Printing,
                            JobStatus::Printing,
                            JobUpdate::new().printer(&printer_name),
                        )
                        .await
                    {
                        Ok(Some(job)) => job,
                        Ok(None) => {
                            self.release(&printer_name);
                            return Ok(Step::Lost);
                        }
                        Err(e) => {
                            self.release(&printer_name);
                            return Err(e);
                        }
                    };
                    self.inner.events.publish(&JobEvent::from_job(&current));
                }
            }
        }
    }

    async fn attempt(
        &self,
        printer_name: &str,
        document: Arc<RenderedDocument>,
        timeout: Duration,
    ) -> Result<(), PrintError> {
        let printer = self
            .inner
            .registry
            .printer(printer_name)
            .await
            .ok_or_else(|| PrintError::transient(format!("printer {} was removed", printer_name)))?;
        self.inner
            .workers
            .submit(&printer, document, timeout)
            .await
            .map(|_| ())
    }

    /// Conditional status change; `None` when the job is no longer in
    /// `from` (cancelled or finished elsewhere).
    async fn transition(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> EngineResult<Option<PrintJob>> {
        match self.inner.db.jobs().update_status(id, &[from], to, update).await {
            Ok(job) => Ok(Some(job)),
            Err(DbError::Conflict { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel_requested(&self, id: &str) -> bool {
        match self.inner.db.jobs().get(id).await {
            Ok(job) => job.cancel_requested,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Could not read cancel flag");
                false
            }
        }
    }

    /// Sleeps for `delay`. Returns false if shutdown began first.
    async fn wait_or_stop(&self, delay: Duration) -> bool {
        let mut stopping = self.inner.stopping.subscribe();
        if *stopping.borrow_and_update() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            changed = stopping.changed() => changed.is_err(),
        }
    }

    /// Puts a job waiting for its retry back in the queue at shutdown.
    async fn requeue_interrupted(&self, job: &PrintJob) -> EngineResult<Step> {
        info!(job_id = %job.id, "Returning job to the queue for shutdown");
        match self
            .transition(&job.id, JobStatus::Printing, JobStatus::Pending, JobUpdate::new().clear_printer())
            .await?
        {
            Some(job) => Ok(Step::Done(Some(job))),
            None => Ok(Step::Lost),
        }
    }

    /// Moves a job to an outcome, then records and announces it.
    ///
    /// `None` when the job moved on elsewhere. Any other store error is
    /// retried a few times before it is returned.
    async fn finish(
        &self,
        job: &PrintJob,
        next: JobStatus,
        update: JobUpdate,
        category: Option<String>,
        page_count: u32,
    ) -> EngineResult<Option<PrintJob>> {
        let mut attempt = 1;
        loop {
            match self
                .inner
                .db
                .jobs()
                .update_status(&job.id, &[job.status], next, update.clone())
                .await
            {
                Ok(done) => {
                    self.announce(&done, category, page_count).await;
                    return Ok(Some(done));
                }
                Err(DbError::Conflict { .. }) => {
                    debug!(job_id = %job.id, status = %next, "Job moved on before it was finalized");
                    return Ok(None);
                }
                Err(e) if attempt < FINALIZE_ATTEMPTS => {
                    warn!(job_id = %job.id, status = %next, attempt, error = %e, "Could not finalize job, retrying");
                    tokio::time::sleep(FINALIZE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(job_id = %job.id, status = %next, attempts = attempt, error = %e, "Could not finalize job");
                    return Err(e.into());
                }
            }
        }
    }

    /// Puts a job whose dispatch aborted back in the queue. A job the store
    /// cannot move stays where it is until startup recovery.
    async fn recover(&self, id: &str) {
        match self
            .inner
            .db
            .jobs()
            .update_status(
                id,
                &[JobStatus::Routing, JobStatus::Printing],
                JobStatus::Pending,
                JobUpdate::new().clear_printer(),
            )
            .await
        {
            Ok(job) => {
                warn!(job_id = %id, "Job returned to the queue after an aborted dispatch");
                self.inner.events.publish(&JobEvent::from_job(&job));
            }
            Err(DbError::Conflict { .. }) | Err(DbError::NotFound { .. }) => {}
            Err(e) => error!(job_id = %id, error = %e, "Job left in flight until the next startup"),
        }
    }

    async fn announce(&self, job: &PrintJob, category: Option<String>, page_count: u32) {
        self.inner.analytics.record(job, category, page_count).await;
        self.inner.events.publish(&JobEvent::from_job(job));
    }

    // =========================================================================
    // Operator Actions
    // =========================================================================

    /// Cancels a job.
    ///
    /// PENDING and ROUTING jobs are abandoned at once. A PRINTING job gets
    /// its cancel flag set; the running attempt completes and the flag is
    /// honoured before any retry. A FAILED job is acknowledged.
    pub async fn cancel(&self, id: &str) -> EngineResult<PrintJob> {
        let jobs = self.inner.db.jobs();
        match jobs
            .update_status(
                id,
                &[JobStatus::Pending, JobStatus::Routing],
                JobStatus::Abandoned,
                JobUpdate::new().error(CANCELLED),
            )
            .await
        {
            Ok(job) => {
                info!(job_id = %id, "Job cancelled");
                let category = self.category_name(&job).await;
                self.announce(&job, category, 0).await;
                return Ok(job);
            }
            Err(DbError::Conflict { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let current = jobs.get(id).await?;
        match current.status {
            JobStatus::Printing => {
                info!(job_id = %id, "Cancel requested for printing job");
                Ok(jobs.request_cancel(id).await?)
            }
            JobStatus::Failed => self.acknowledge(id).await,
            status => Err(EngineError::Conflict(format!(
                "job {} is already {}",
                id, status
            ))),
        }
    }

    /// FAILED → ABANDONED. The outcome was already recorded when the job
    /// failed, so no analytics record is added.
    pub async fn acknowledge(&self, id: &str) -> EngineResult<PrintJob> {
        let job = self
            .inner
            .db
            .jobs()
            .update_status(id, &[JobStatus::Failed], JobStatus::Abandoned, JobUpdate::new())
            .await?;
        info!(job_id = %id, "Failed job acknowledged");
        self.inner.events.publish(&JobEvent::from_job(&job));
        Ok(job)
    }

    /// FAILED → PENDING with a fresh retry budget.
    pub async fn requeue(&self, id: &str) -> EngineResult<PrintJob> {
        let job = self
            .inner
            .db
            .jobs()
            .update_status(
                id,
                &[JobStatus::Failed],
                JobStatus::Pending,
                JobUpdate::new()
                    .retries(0)
                    .clear_printer()
                    .clear_error()
                    .clear_cancel(),
            )
            .await?;
        info!(job_id = %id, "Failed job requeued");
        self.inner.events.publish(&JobEvent::from_job(&job));
        self.wake();
        Ok(job)
    }

    async fn category_name(&self, job: &PrintJob) -> Option<String> {
        let id = job.category_id.as_deref()?;
        self.routing().await.category(id).map(|c| c.name.clone())
    }
}
