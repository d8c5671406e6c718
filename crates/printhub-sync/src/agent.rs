//! # Channel Agent
//!
//! Keeps the station connected to the backend and answers its requests.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ChannelAgent Architecture                         │
//! │                                                                         │
//! │   EventBus ──► StatusForwarder ──┐                                      │
//! │                                  ▼                                      │
//! │  ┌────────────────┐        ┌────────────────┐        ┌──────────────┐  │
//! │  │ Message router │ ─────► │   Transport    │ ◄────► │   Backend    │  │
//! │  │                │ ◄───── │  (WebSocket +  │        │              │  │
//! │  │ • SubmitJob    │        │   buffer)      │        └──────────────┘  │
//! │  │ • CancelJob    │        └────────────────┘                          │
//! │  │ • Control      │                                                     │
//! │  │ • Ping         │ ──► ControlPlane (same API key check as HTTP)      │
//! │  └────────────────┘                                                     │
//! │                                                                         │
//! │  PERIODIC                                                              │
//! │  ────────                                                              │
//! │  Heartbeat          every websocket.heartbeat_interval_ms              │
//! │  PrinterSnapshot +  every websocket.snapshot_interval_ms               │
//! │  AnalyticsSummary                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

use printhub_core::JobEvent;
use printhub_db::{AnalyticsFilter, JobFilter};
use printhub_engine::{ConfigStore, ControlPlane, EngineError, EventBus, ExportFormat, JobEventSink};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    ChannelMessage, ControlCommand, ControlRequest, ControlResult, ErrorPayload, SubmitJobPayload,
};
use crate::transport::{ConnectionState, Transport, TransportConfig, TransportHandle};

// =============================================================================
// Status Forwarder
// =============================================================================

/// Pushes every job event to the backend.
struct StatusForwarder {
    transport: TransportHandle,
}

impl JobEventSink for StatusForwarder {
    fn on_event(&self, event: &JobEvent) {
        if self.transport.send(ChannelMessage::JobStatus(event.clone())).is_err() {
            debug!(job_id = %event.job_id, "Channel stopped, job event not forwarded");
        }
    }
}

// =============================================================================
// Channel Agent
// =============================================================================

/// The station side of the realtime channel.
pub struct ChannelAgent {
    config: Arc<ConfigStore>,
    control: Arc<ControlPlane>,
    events: Arc<EventBus>,

    shutdown_tx: Option<mpsc::Sender<()>>,
    transport: Option<TransportHandle>,
    router: Option<JoinHandle<()>>,
}

impl ChannelAgent {
    /// Current connection state; `Disconnected` when the channel is off.
    pub async fn state(&self) -> ConnectionState {
        match self.transport {
            Some(ref transport) => transport.state().await,
            None => ConnectionState::Disconnected,
        }
    }

    /// Returns true once the agent has been started with a backend URL.
    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Starts the transport and the message router.
    ///
    /// Does nothing while `websocket.url` is unset.
    pub async fn start(&mut self) -> SyncResult<()> {
        let settings = self.config.get().await.websocket;

        let Some(url) = settings.url.clone() else {
            info!("Realtime channel disabled (no websocket.url)");
            return Ok(());
        };
        validate_url(&url)?;

        info!(url = %url, station_id = %settings.station_id, "Starting realtime channel");

        let transport_config = TransportConfig {
            url,
            hello: ChannelMessage::hello(&settings.station_id),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            reconnect_interval: Duration::from_millis(settings.reconnect_interval_ms),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            offline_retry_interval: Duration::from_millis(settings.offline_retry_interval_ms),
            ping_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            max_buffered: settings.max_buffered_messages,
        };

        let (transport, incoming_rx) = Transport::spawn(transport_config);
        self.events.subscribe(Arc::new(StatusForwarder {
            transport: transport.clone(),
        }));

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let router = Router {
            control: self.control.clone(),
            transport: transport.clone(),
            station_id: settings.station_id,
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            snapshot_interval: Duration::from_millis(settings.snapshot_interval_ms),
        };

        self.router = Some(tokio::spawn(router.run(incoming_rx, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
        self.transport = Some(transport);

        info!("Realtime channel started");
        Ok(())
    }

    /// Stops the router and closes the connection.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down realtime channel");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(task) = self.router.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Message router ended abnormally");
            }
        }

        if let Some(transport) = self.transport.take() {
            let _ = transport.shutdown().await;
        }

        info!("Realtime channel stopped");
        Ok(())
    }
}

fn validate_url(url: &str) -> SyncResult<()> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(SyncError::InvalidUrl(format!(
            "expected ws:// or wss://, got {other}://"
        ))),
    }
}

// =============================================================================
// Message Router
// =============================================================================

struct Router {
    control: Arc<ControlPlane>,
    transport: TransportHandle,
    station_id: String,
    heartbeat_interval: Duration,
    snapshot_interval: Duration,
}

impl Router {
    async fn run(
        self,
        mut incoming_rx: mpsc::Receiver<ChannelMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut snapshot = interval_at(Instant::now() + self.snapshot_interval, self.snapshot_interval);
        snapshot.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = incoming_rx.recv() => self.route(msg),

                _ = heartbeat.tick() => {
                    self.send(ChannelMessage::heartbeat(&self.station_id));
                }

                _ = snapshot.tick() => self.report().await,

                _ = shutdown_rx.recv() => {
                    info!("Message router stopping");
                    break;
                }
            }
        }
    }

    fn route(&self, msg: ChannelMessage) {
        match msg {
            ChannelMessage::SubmitJob(payload) => {
                tokio::spawn(handle_submit(self.control.clone(), self.transport.clone(), payload));
            }

            ChannelMessage::CancelJob {
                request_id,
                api_key,
                job_id,
            } => {
                let control = self.control.clone();
                let transport = self.transport.clone();
                tokio::spawn(async move {
                    let result = control.cancel_job(api_key.as_deref(), &job_id).await;
                    reply(&transport, request_id, result.map_err(ErrorPayload::from).and_then(json));
                });
            }

            ChannelMessage::Control(request) => {
                tokio::spawn(handle_control(self.control.clone(), self.transport.clone(), request));
            }

            ChannelMessage::Ping { timestamp } => {
                self.send(ChannelMessage::pong(&timestamp));
            }

            ChannelMessage::Welcome(welcome) => {
                info!(message = ?welcome.message, "Backend acknowledged the station");
            }

            ChannelMessage::Error {
                code,
                message,
                request_id,
            } => {
                warn!(code = %code, message = %message, request_id = ?request_id, "Received error from backend");
            }

            other => {
                debug!(msg_type = other.type_name(), "Ignoring station-bound message type");
                self.send(ChannelMessage::error(
                    "UNSUPPORTED_MESSAGE",
                    &format!("{} is not accepted by the station", other.type_name()),
                    None,
                ));
            }
        }
    }

    /// Sends the printer snapshot and the last-24h analytics summary.
    async fn report(&self) {
        self.send(ChannelMessage::PrinterSnapshot {
            printers: self.control.snapshot().await,
            timestamp: Utc::now(),
        });

        match self
            .control
            .report_summary(Some(Utc::now() - ChronoDuration::hours(24)))
            .await
        {
            Ok(summary) => self.send(ChannelMessage::AnalyticsSummary(summary)),
            Err(e) => warn!(error = %e, "Could not build analytics summary"),
        }
    }

    fn send(&self, msg: ChannelMessage) {
        if let Err(e) = self.transport.send(msg) {
            debug!(error = %e, "Channel message dropped");
        }
    }
}

// =============================================================================
// Request Handlers
// =============================================================================

impl From<EngineError> for ErrorPayload {
    fn from(err: EngineError) -> Self {
        ErrorPayload {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<SyncError> for ErrorPayload {
    fn from(err: SyncError) -> Self {
        ErrorPayload {
            code: "INVALID_MESSAGE".to_string(),
            message: err.to_string(),
        }
    }
}

fn json<T: Serialize>(value: T) -> Result<serde_json::Value, ErrorPayload> {
    serde_json::to_value(value).map_err(|e| ErrorPayload {
        code: "SERIALIZATION_ERROR".to_string(),
        message: e.to_string(),
    })
}

fn reply(
    transport: &TransportHandle,
    request_id: Option<String>,
    result: Result<serde_json::Value, ErrorPayload>,
) {
    let message = match result {
        Ok(data) => ChannelMessage::ControlResult(ControlResult {
            request_id,
            ok: true,
            data: Some(data),
            error: None,
        }),
        Err(error) => ChannelMessage::ControlResult(ControlResult {
            request_id,
            ok: false,
            data: None,
            error: Some(error),
        }),
    };
    if transport.send(message).is_err() {
        debug!("Channel stopped, reply dropped");
    }
}

async fn handle_submit(control: Arc<ControlPlane>, transport: TransportHandle, payload: SubmitJobPayload) {
    let SubmitJobPayload {
        request_id,
        api_key,
        job,
    } = payload;

    let accepted = match control.authorize(api_key.as_deref()).await {
        Err(e) => Err(ErrorPayload::from(e)),
        Ok(()) => match job.into_new_job() {
            Ok(job) => control
                .submit_job(api_key.as_deref(), job)
                .await
                .map_err(ErrorPayload::from),
            Err(e) => Err(ErrorPayload::from(e)),
        },
    };

    let message = match accepted {
        Ok(receipt) => ChannelMessage::JobAccepted {
            request_id,
            job_id: receipt.job_id,
            status: receipt.status,
        },
        Err(error) => ChannelMessage::error(&error.code, &error.message, request_id),
    };
    if transport.send(message).is_err() {
        debug!("Channel stopped, submission reply dropped");
    }
}

async fn handle_control(control: Arc<ControlPlane>, transport: TransportHandle, request: ControlRequest) {
    let ControlRequest {
        request_id,
        api_key,
        command,
    } = request;

    let result = execute(&control, api_key.as_deref(), command).await;
    reply(&transport, request_id, result);
}

/// Runs one operator command against the control plane.
async fn execute(
    control: &ControlPlane,
    key: Option<&str>,
    command: ControlCommand,
) -> Result<serde_json::Value, ErrorPayload> {
    use ControlCommand::*;

    match command {
        ListJobs {
            status,
            limit,
            offset,
        } => {
            let defaults = JobFilter::default();
            let filter = JobFilter {
                status,
                limit: limit.unwrap_or(defaults.limit),
                offset: offset.unwrap_or(defaults.offset),
            };
            json(control.list_jobs(key, &filter).await?)
        }
        GetJob { job_id } => json(control.get_job(key, &job_id).await?),
        AcknowledgeJob { job_id } => json(control.acknowledge_job(key, &job_id).await?),
        RequeueJob { job_id } => json(control.requeue_job(key, &job_id).await?),

        ListPrinters => json(control.list_printers(key).await?),
        SavePrinter(printer) => json(control.save_printer(key, printer).await?),
        DeletePrinter { name } => json(control.delete_printer(key, &name).await?),
        PrinterStatuses => json(control.printer_statuses(key).await?),

        ListCategories => json(control.list_categories(key).await?),
        CreateCategory(category) => json(control.create_category(key, category).await?),
        UpdateCategory { id, update } => json(control.update_category(key, &id, update).await?),
        SetCategoryPrinters { id, members } => {
            json(control.set_category_printers(key, &id, members).await?)
        }
        DeleteCategory { id } => json(control.delete_category(key, &id).await?),

        ListRules => json(control.list_rules(key).await?),
        CreateRule(rule) => json(control.create_rule(key, rule).await?),
        UpdateRule { id, update } => json(control.update_rule(key, &id, update).await?),
        DeleteRule { id } => json(control.delete_rule(key, &id).await?),

        ListGroups => json(control.list_groups(key).await?),
        CreateGroup(group) => json(control.create_group(key, group).await?),
        UpdateGroup { id, update } => json(control.update_group(key, &id, update).await?),
        SetGroupPrinters { id, members } => json(control.set_group_printers(key, &id, members).await?),
        DeleteGroup { id } => json(control.delete_group(key, &id).await?),

        GetConfig => json(control.get_config(key).await?),
        UpdateConfig { patch } => json(control.update_config(key, patch).await?),
        ReloadConfig => json(control.reload_config(key).await?),

        GetApiKey => json(control.get_api_key(key).await?),
        UpdateApiKey { api_key } => json(control.update_api_key(key, &api_key).await?),
        ResetApiKey => json(control.reset_api_key(key).await?),

        AnalyticsSummary { since } => json(control.analytics_summary(key, since).await?),
        ExportAnalytics {
            format,
            since,
            until,
        } => {
            let format = match format {
                Some(format) => ExportFormat::from_str(&format).map_err(EngineError::from)?,
                None => ExportFormat::default(),
            };
            let filter = AnalyticsFilter {
                since,
                until,
                limit: None,
            };
            let export = control.export_analytics(key, format, &filter).await?;
            Ok(serde_json::json!({
                "format": export.format,
                "contentType": export.format.content_type(),
                "body": export.body,
            }))
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a [`ChannelAgent`].
#[derive(Default)]
pub struct ChannelAgentBuilder {
    config: Option<Arc<ConfigStore>>,
    control: Option<Arc<ControlPlane>>,
    events: Option<Arc<EventBus>>,
}

impl ChannelAgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Arc<ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_control(mut self, control: Arc<ControlPlane>) -> Self {
        self.control = Some(control);
        self
    }

    /// Job events from this bus are forwarded to the backend.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> SyncResult<ChannelAgent> {
        let config = self
            .config
            .ok_or_else(|| SyncError::InvalidConfig("Configuration required".into()))?;
        let control = self
            .control
            .ok_or_else(|| SyncError::InvalidConfig("Control plane required".into()))?;
        let events = self
            .events
            .ok_or_else(|| SyncError::InvalidConfig("Event bus required".into()))?;

        Ok(ChannelAgent {
            config,
            control,
            events,
            shutdown_tx: None,
            transport: None,
            router: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_websocket_urls_are_accepted() {
        assert!(validate_url("ws://localhost:9000/station").is_ok());
        assert!(validate_url("wss://cloud.example.com/station").is_ok());

        let err = validate_url("https://cloud.example.com").unwrap_err();
        assert!(err.is_config_error());
        assert!(validate_url("not a url").unwrap_err().is_config_error());
    }

    #[test]
    fn test_builder_requires_all_parts() {
        let err = ChannelAgentBuilder::new().build().err().unwrap();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_engine_errors_keep_their_code() {
        let payload = ErrorPayload::from(EngineError::not_found("PrintJob", "j1"));
        assert_eq!(payload.code, "NOT_FOUND");
        assert!(payload.message.contains("j1"));
    }
}
