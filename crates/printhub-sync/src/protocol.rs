//! # Channel Protocol Messages
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Realtime Channel Messages                          │
//! │                                                                         │
//! │  HANDSHAKE                                                             │
//! │  ─────────                                                             │
//! │  STATION ───► Hello { stationId, version, protocolVersion }            │
//! │  BACKEND ───► Welcome { message, serverTime }                          │
//! │                                                                         │
//! │  JOBS                                                                  │
//! │  ────                                                                  │
//! │  BACKEND ───► SubmitJob { requestId, apiKey, fileName, content, ... }  │
//! │  STATION ───► JobAccepted { requestId, jobId, status }                 │
//! │  BACKEND ───► CancelJob { requestId, apiKey, jobId }                   │
//! │  STATION ───► JobStatus { jobId, status, printer, error, ... }         │
//! │                                                                         │
//! │  OPERATIONS                                                            │
//! │  ──────────                                                            │
//! │  BACKEND ───► Control { requestId, apiKey, command }                   │
//! │  STATION ───► ControlResult { requestId, ok, data | error }            │
//! │  STATION ───► PrinterSnapshot / AnalyticsSummary      (periodic)       │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  STATION ───► Heartbeat { stationId, timestamp }      (periodic)       │
//! │  BACKEND ───► Ping { timestamp }  ◄──► Pong { timestamp }              │
//! │                                                                         │
//! │  Both    ◄──► Error { code, message, requestId? }                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Adjacently tagged JSON:
//! ```json
//! { "type": "JobStatus", "payload": { "jobId": "...", "status": "printing" } }
//! ```

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use printhub_core::{
    AnalyticsSummary, ContentType, GroupMember, JobEvent, JobMetadata, JobOptions, JobStatus,
    NewPrintJob, PrinterStatus,
};
use printhub_db::{CategoryUpdate, GroupUpdate, NewCategory, NewGroup, NewPrinter, NewRule, RuleUpdate};

use crate::error::SyncResult;

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Main Message Enum
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ChannelMessage {
    // =========================================================================
    // Inbound (backend → station)
    // =========================================================================
    SubmitJob(SubmitJobPayload),

    #[serde(rename_all = "camelCase")]
    CancelJob {
        #[serde(default)]
        request_id: Option<String>,
        #[serde(default)]
        api_key: Option<String>,
        job_id: String,
    },

    Control(ControlRequest),

    Ping { timestamp: String },

    Welcome(WelcomePayload),

    // =========================================================================
    // Outbound (station → backend)
    // =========================================================================
    Hello(HelloPayload),

    #[serde(rename_all = "camelCase")]
    JobAccepted {
        #[serde(default)]
        request_id: Option<String>,
        job_id: String,
        status: String,
    },

    ControlResult(ControlResult),

    JobStatus(JobEvent),

    #[serde(rename_all = "camelCase")]
    PrinterSnapshot {
        printers: Vec<PrinterStatus>,
        timestamp: DateTime<Utc>,
    },

    AnalyticsSummary(AnalyticsSummary),

    #[serde(rename_all = "camelCase")]
    Heartbeat {
        station_id: String,
        timestamp: DateTime<Utc>,
    },

    Pong { timestamp: String },

    // =========================================================================
    // Both directions
    // =========================================================================
    #[serde(rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub station_id: String,
    pub version: String,
    pub protocol_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub server_time: Option<String>,
}

/// A job as submitted over the wire: content is base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub file_name: String,
    pub content: String,
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default)]
    pub metadata: JobMetadata,
    #[serde(default)]
    pub priority: i64,
}

impl JobSubmission {
    /// Decodes the content. The content type defaults from the file name.
    pub fn into_new_job(self) -> SyncResult<NewPrintJob> {
        let content = base64::engine::general_purpose::STANDARD.decode(self.content.trim())?;
        let content_type = self
            .content_type
            .unwrap_or_else(|| ContentType::from_file_name(&self.file_name));
        Ok(NewPrintJob {
            file_name: self.file_name,
            content,
            content_type,
            options: self.options,
            metadata: self.metadata,
            priority: self.priority,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobPayload {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(flatten)]
    pub job: JobSubmission,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub command: ControlCommand,
}

/// Operator commands accepted over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum ControlCommand {
    #[serde(rename_all = "camelCase")]
    ListJobs {
        #[serde(default)]
        status: Option<JobStatus>,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        offset: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    GetJob { job_id: String },
    #[serde(rename_all = "camelCase")]
    AcknowledgeJob { job_id: String },
    #[serde(rename_all = "camelCase")]
    RequeueJob { job_id: String },

    ListPrinters,
    SavePrinter(NewPrinter),
    DeletePrinter { name: String },
    PrinterStatuses,

    ListCategories,
    CreateCategory(NewCategory),
    UpdateCategory { id: String, update: CategoryUpdate },
    SetCategoryPrinters { id: String, members: Vec<GroupMember> },
    DeleteCategory { id: String },

    ListRules,
    CreateRule(NewRule),
    UpdateRule { id: String, update: RuleUpdate },
    DeleteRule { id: String },

    ListGroups,
    CreateGroup(NewGroup),
    UpdateGroup { id: String, update: GroupUpdate },
    SetGroupPrinters { id: String, members: Vec<GroupMember> },
    DeleteGroup { id: String },

    GetConfig,
    UpdateConfig { patch: serde_json::Value },
    ReloadConfig,

    GetApiKey,
    #[serde(rename_all = "camelCase")]
    UpdateApiKey { api_key: String },
    ResetApiKey,

    AnalyticsSummary {
        #[serde(default)]
        since: Option<DateTime<Utc>>,
    },
    ExportAnalytics {
        #[serde(default)]
        format: Option<String>,
        #[serde(default)]
        since: Option<DateTime<Utc>>,
        #[serde(default)]
        until: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResult {
    #[serde(default)]
    pub request_id: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

// =============================================================================
// Helper Functions
// =============================================================================

impl ChannelMessage {
    /// Message type name (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelMessage::SubmitJob(_) => "SubmitJob",
            ChannelMessage::CancelJob { .. } => "CancelJob",
            ChannelMessage::Control(_) => "Control",
            ChannelMessage::Ping { .. } => "Ping",
            ChannelMessage::Welcome(_) => "Welcome",
            ChannelMessage::Hello(_) => "Hello",
            ChannelMessage::JobAccepted { .. } => "JobAccepted",
            ChannelMessage::ControlResult(_) => "ControlResult",
            ChannelMessage::JobStatus(_) => "JobStatus",
            ChannelMessage::PrinterSnapshot { .. } => "PrinterSnapshot",
            ChannelMessage::AnalyticsSummary(_) => "AnalyticsSummary",
            ChannelMessage::Heartbeat { .. } => "Heartbeat",
            ChannelMessage::Pong { .. } => "Pong",
            ChannelMessage::Error { .. } => "Error",
        }
    }

    /// Messages that are worthless once the connection they were meant for
    /// is gone; they are never kept in the outbound buffer.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, ChannelMessage::Heartbeat { .. } | ChannelMessage::Pong { .. })
    }

    pub fn hello(station_id: &str) -> Self {
        ChannelMessage::Hello(HelloPayload {
            station_id: station_id.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    pub fn heartbeat(station_id: &str) -> Self {
        ChannelMessage::Heartbeat {
            station_id: station_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn pong(timestamp: &str) -> Self {
        ChannelMessage::Pong {
            timestamp: timestamp.to_string(),
        }
    }

    pub fn error(code: &str, message: &str, request_id: Option<String>) -> Self {
        ChannelMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
            request_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_wire_format() {
        let message = ChannelMessage::JobStatus(JobEvent {
            job_id: "job-1".into(),
            status: JobStatus::Printing,
            printer: Some("P1".into()),
            error: None,
            attempt: 2,
            accepted: false,
            timestamp: Utc::now(),
        });
        let json: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "JobStatus");
        assert_eq!(json["payload"]["jobId"], "job-1");
        assert_eq!(json["payload"]["status"], "printing");
        assert_eq!(json["payload"]["printer"], "P1");
    }

    #[test]
    fn test_submit_job_from_backend() {
        let json = r#"{
            "type": "SubmitJob",
            "payload": {
                "requestId": "r-9",
                "apiKey": "printhub-default-key",
                "fileName": "order.txt",
                "content": "aGVsbG8=",
                "metadata": { "station": "kitchen", "course": "mains" },
                "priority": 5
            }
        }"#;
        let ChannelMessage::SubmitJob(payload) = ChannelMessage::from_json(json).unwrap() else {
            panic!("expected SubmitJob");
        };
        assert_eq!(payload.request_id.as_deref(), Some("r-9"));

        let job = payload.job.into_new_job().unwrap();
        assert_eq!(job.content, b"hello".to_vec());
        assert_eq!(job.content_type, ContentType::Text);
        assert_eq!(job.metadata.station.as_deref(), Some("kitchen"));
        assert_eq!(job.metadata.extra.get("course").map(String::as_str), Some("mains"));
        assert_eq!(job.priority, 5);
    }

    #[test]
    fn test_bad_base64_is_rejected() {
        let submission = JobSubmission {
            file_name: "a.txt".into(),
            content: "not base64!".into(),
            content_type: None,
            options: JobOptions::default(),
            metadata: JobMetadata::default(),
            priority: 0,
        };
        assert!(submission.into_new_job().unwrap_err().is_protocol_error());
    }

    #[test]
    fn test_control_command_format() {
        let json = r#"{
            "type": "Control",
            "payload": {
                "requestId": "r-1",
                "command": { "action": "delete_printer", "params": { "name": "P1" } }
            }
        }"#;
        let ChannelMessage::Control(request) = ChannelMessage::from_json(json).unwrap() else {
            panic!("expected Control");
        };
        assert_eq!(request.command, ControlCommand::DeletePrinter { name: "P1".into() });

        let json = r#"{"type":"Control","payload":{"command":{"action":"list_printers"}}}"#;
        let ChannelMessage::Control(request) = ChannelMessage::from_json(json).unwrap() else {
            panic!("expected Control");
        };
        assert_eq!(request.command, ControlCommand::ListPrinters);
    }

    #[test]
    fn test_ephemeral_messages() {
        assert!(ChannelMessage::heartbeat("s1").is_ephemeral());
        assert!(ChannelMessage::pong("t").is_ephemeral());
        assert!(!ChannelMessage::hello("s1").is_ephemeral());
    }
}
