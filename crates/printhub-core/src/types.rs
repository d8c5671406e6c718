//! # Domain Types
//!
//! Core domain types used throughout the PrintHub base station.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    PrintJob     │   │ PrinterCategory │   │  PrinterGroup   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id / name      │   │  id / name      │       │
//! │  │  status         │──►│  group_id?      │──►│  strategy       │       │
//! │  │  metadata       │   │  members        │   │  members        │       │
//! │  │  retries        │   └────────▲────────┘   └────────┬────────┘       │
//! │  └─────────────────┘            │                     │                 │
//! │                        ┌────────┴────────┐   ┌────────▼────────┐       │
//! │                        │  RoutingRule    │   │ PrinterStatus   │       │
//! │                        │  field/pattern  │   │ idle/busy/...   │       │
//! │                        │  match_type     │   │ (runtime only)  │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  PrintAnalyticsRecord: one immutable row per terminal job outcome      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::metadata::JobMetadata;

// =============================================================================
// Job Status
// =============================================================================

/// Lifecycle state of a print job.
///
/// ## State Machine
/// ```text
///   PENDING ──► ROUTING ──► PRINTING ──► SUCCEEDED
///      │           │          │  ▲
///      │           │          └──┘ retry
///      │           ├──► FAILED ◄──┘
///      │           │      │
///      └───────────┴──────┴──► ABANDONED   (cancel / operator acknowledge)
///
///   ROUTING/PRINTING ──► PENDING           (crash recovery)
///   FAILED ──► PENDING                     (operator requeue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Routing,
    Printing,
    Succeeded,
    Failed,
    Abandoned,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Routing,
        JobStatus::Printing,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Abandoned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Routing => "routing",
            JobStatus::Printing => "printing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Abandoned => "abandoned",
        }
    }

    /// Rows in these states are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Abandoned)
    }

    /// States that end a dispatch run and produce an analytics record.
    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Abandoned
        )
    }

    /// States a crashed process may have left a job in.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Routing | JobStatus::Printing)
    }

    /// Returns true if `self → next` is an allowed lifecycle transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Routing)
                | (Pending, Abandoned)
                | (Routing, Printing)
                | (Routing, Failed)
                | (Routing, Pending)
                | (Routing, Abandoned)
                | (Printing, Printing)
                | (Printing, Succeeded)
                | (Printing, Failed)
                | (Printing, Pending)
                | (Printing, Abandoned)
                | (Failed, Abandoned)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: JobStatus::ALL.iter().map(|s| s.to_string()).collect(),
            })
    }
}

// =============================================================================
// Job Content & Options
// =============================================================================

/// How the payload bytes should be interpreted by the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Pre-rendered ESC/POS command stream.
    Escpos,
    /// Plain text, wrapped to the receipt width.
    Text,
    /// PDF document handed to a spooler.
    Pdf,
    /// Opaque bytes sent as-is.
    #[default]
    Raw,
}

impl ContentType {
    /// Guesses the content type from a file extension; unknown is `Raw`.
    pub fn from_file_name(file_name: &str) -> Self {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "txt" | "text" => ContentType::Text,
            "pdf" => ContentType::Pdf,
            "bin" | "escpos" | "prn" => ContentType::Escpos,
            _ => ContentType::Raw,
        }
    }
}

/// Paper cut performed after each copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutMode {
    #[default]
    Full,
    Partial,
    None,
}

/// Per-job print options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default = "default_copies")]
    pub copies: u32,

    /// Paper width in millimetres; falls back to the station receipt width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_width: Option<u32>,

    #[serde(default)]
    pub cut_mode: CutMode,

    /// Kick the cash drawer after printing.
    #[serde(default)]
    pub open_drawer: bool,

    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub extra: std::collections::BTreeMap<String, String>,
}

fn default_copies() -> u32 {
    1
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            copies: default_copies(),
            paper_width: None,
            cut_mode: CutMode::default(),
            open_drawer: false,
            extra: Default::default(),
        }
    }
}

// =============================================================================
// Print Job
// =============================================================================

/// A job submission before it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPrintJob {
    pub file_name: String,
    pub content: Vec<u8>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default)]
    pub metadata: JobMetadata,
    #[serde(default)]
    pub priority: i64,
}

/// A unit of print work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    /// Unique identifier (UUID v4).
    pub id: String,

    pub status: JobStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Set when the job reaches an outcome state.
    pub completed_at: Option<DateTime<Utc>>,

    pub file_name: String,

    /// Binary payload. Not serialized in status listings.
    #[serde(skip)]
    pub content: Vec<u8>,

    pub content_type: ContentType,

    pub metadata: JobMetadata,

    pub options: JobOptions,

    /// Higher runs sooner.
    pub priority: i64,

    /// Re-attempts performed so far (the first attempt is not a retry).
    pub retries: u32,

    pub assigned_printer: Option<String>,

    pub category_id: Option<String>,

    pub last_error: Option<String>,

    /// Cooperative cancel flag, checked between attempts.
    pub cancel_requested: bool,
}

impl PrintJob {
    /// Builds a PENDING job from a submission.
    pub fn new(submission: NewPrintJob) -> Self {
        let now = Utc::now();
        PrintJob {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            file_name: submission.file_name,
            content: submission.content,
            content_type: submission.content_type,
            metadata: submission.metadata,
            options: submission.options,
            priority: submission.priority,
            retries: 0,
            assigned_printer: None,
            category_id: None,
            last_error: None,
            cancel_requested: false,
        }
    }

    /// Printing attempts made so far, including the one in progress.
    ///
    /// A job without an assigned printer has not started its current
    /// attempt (pending, or failed during routing).
    pub fn attempts(&self) -> u32 {
        if self.assigned_printer.is_some() {
            self.retries + 1
        } else {
            self.retries
        }
    }
}

// =============================================================================
// Printers
// =============================================================================

/// A known physical printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Printer {
    /// Unique printer name, used by groups, categories and the driver.
    pub name: String,

    pub description: Option<String>,

    /// Connection descriptor: `tcp://host:port`, `file:///dir`,
    /// `serial:///dev/rfcomm0`, `memory://`.
    pub connection: String,

    pub is_default: bool,

    pub enabled: bool,

    pub created_at: DateTime<Utc>,
}

/// Live state of a printer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterState {
    Idle,
    Busy,
    #[default]
    Offline,
    Error,
}

impl PrinterState {
    /// Printers the balancer may hand work to.
    pub fn is_eligible(&self) -> bool {
        matches!(self, PrinterState::Idle | PrinterState::Busy)
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterState::Idle => write!(f, "idle"),
            PrinterState::Busy => write!(f, "busy"),
            PrinterState::Offline => write!(f, "offline"),
            PrinterState::Error => write!(f, "error"),
        }
    }
}

/// Runtime status of a printer (not persisted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterStatus {
    pub name: String,
    pub is_default: bool,
    pub state: PrinterState,
    pub last_seen: Option<DateTime<Utc>>,
    /// Dispatches currently assigned to this printer.
    pub in_flight: u32,
    pub detail: Option<String>,
}

// =============================================================================
// Routing Rules & Categories
// =============================================================================

/// How a rule pattern is compared against the metadata value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Prefix,
    Contains,
    Regex,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Exact => write!(f, "exact"),
            MatchType::Prefix => write!(f, "prefix"),
            MatchType::Contains => write!(f, "contains"),
            MatchType::Regex => write!(f, "regex"),
        }
    }
}

/// Ordered predicate mapping job metadata to a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    pub id: String,
    pub category_id: String,
    /// Metadata field name, see [`crate::metadata::MetadataField`].
    pub field: String,
    pub pattern: String,
    pub match_type: MatchType,
    /// Higher priorities are evaluated first.
    pub priority: i64,
    /// Creation sequence; breaks priority ties.
    pub position: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl RoutingRule {
    /// Builds an enabled rule with a fresh id.
    pub fn new(
        category_id: impl Into<String>,
        field: impl Into<String>,
        pattern: impl Into<String>,
        match_type: MatchType,
        priority: i64,
        position: i64,
    ) -> Self {
        RoutingRule {
            id: Uuid::new_v4().to_string(),
            category_id: category_id.into(),
            field: field.into(),
            pattern: pattern.into(),
            match_type,
            priority,
            position,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// Selection algorithm used within a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    #[default]
    RoundRobin,
    Priority,
    LeastBusy,
}

impl fmt::Display for BalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalancingStrategy::RoundRobin => write!(f, "round_robin"),
            BalancingStrategy::Priority => write!(f, "priority"),
            BalancingStrategy::LeastBusy => write!(f, "least_busy"),
        }
    }
}

/// Printer membership in a group or category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub printer: String,
    /// Higher is preferred.
    #[serde(default)]
    pub priority: i64,
}

impl GroupMember {
    pub fn new(printer: impl Into<String>, priority: i64) -> Self {
        GroupMember {
            printer: printer.into(),
            priority,
        }
    }
}

/// A named routing bucket ("kitchen", "receipts").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterCategory {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Explicit target group. When unset the category's own members act as
    /// an implicit group.
    pub group_id: Option<String>,
    /// Strategy for the implicit group.
    pub balancing_strategy: BalancingStrategy,
    pub members: Vec<GroupMember>,
    pub created_at: DateTime<Utc>,
}

/// Id prefix of the group synthesized from a category's own members.
pub const IMPLICIT_GROUP_PREFIX: &str = "category:";

impl PrinterCategory {
    /// The group formed by this category's member printers.
    pub fn implicit_group(&self) -> PrinterGroup {
        PrinterGroup {
            id: format!("{}{}", IMPLICIT_GROUP_PREFIX, self.id),
            name: self.name.clone(),
            balancing_strategy: self.balancing_strategy,
            active: true,
            members: self.members.clone(),
            created_at: self.created_at,
        }
    }
}

/// A set of printers sharing a balancing strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterGroup {
    pub id: String,
    pub name: String,
    pub balancing_strategy: BalancingStrategy,
    pub active: bool,
    pub members: Vec<GroupMember>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Analytics & Events
// =============================================================================

/// One immutable row per job outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintAnalyticsRecord {
    pub id: String,
    pub job_id: String,
    pub printer: Option<String>,
    pub category: Option<String>,
    pub status: JobStatus,
    pub attempts: u32,
    /// Job creation time.
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub page_count: u32,
    pub error: Option<String>,
}

impl PrintAnalyticsRecord {
    /// Builds the record for a job that just reached an outcome.
    pub fn for_job(job: &PrintJob, category: Option<String>, page_count: u32) -> Self {
        let completed_at = job.completed_at.unwrap_or_else(Utc::now);
        PrintAnalyticsRecord {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            printer: job.assigned_printer.clone(),
            category,
            status: job.status,
            attempts: job.attempts(),
            created_at: job.created_at,
            completed_at,
            duration_ms: (completed_at - job.created_at).num_milliseconds().max(0),
            page_count,
            error: job.last_error.clone(),
        }
    }
}

/// Per-printer totals within an analytics summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterTotals {
    pub printer: String,
    pub succeeded: i64,
    pub failed: i64,
    pub abandoned: i64,
    pub average_duration_ms: Option<f64>,
}

/// Aggregate view over analytics records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    /// Lower bound on `completedAt`, if any.
    pub since: Option<DateTime<Utc>>,
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub abandoned: i64,
    pub average_duration_ms: Option<f64>,
    pub printers: Vec<PrinterTotals>,
}

/// A job status transition, as reported to the cloud and to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempt number for PRINTING events.
    #[serde(default)]
    pub attempt: u32,
    /// Set only on the PENDING event of a job that was just submitted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub accepted: bool,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn from_job(job: &PrintJob) -> Self {
        JobEvent {
            job_id: job.id.clone(),
            status: job.status,
            printer: job.assigned_printer.clone(),
            error: job.last_error.clone(),
            attempt: job.attempts(),
            accepted: false,
            timestamp: job.updated_at,
        }
    }

    /// The event for a newly accepted job.
    pub fn accepted(job: &PrintJob) -> Self {
        JobEvent {
            accepted: true,
            ..JobEvent::from_job(job)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(ContentType::from_file_name("ticket.TXT"), ContentType::Text);
        assert_eq!(ContentType::from_file_name("invoice.pdf"), ContentType::Pdf);
        assert_eq!(ContentType::from_file_name("order-42.bin"), ContentType::Escpos);
        assert_eq!(ContentType::from_file_name("blob"), ContentType::Raw);
    }

    fn submission() -> NewPrintJob {
        NewPrintJob {
            file_name: "order-42.bin".to_string(),
            content: b"hello".to_vec(),
            content_type: ContentType::Raw,
            options: JobOptions::default(),
            metadata: JobMetadata::default(),
            priority: 5,
        }
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = PrintJob::new(submission());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retries, 0);
        assert_eq!(job.attempts(), 0);
        assert!(Uuid::parse_str(&job.id).is_ok());
    }

    #[test]
    fn test_only_submission_events_are_marked_accepted() {
        let job = PrintJob::new(submission());
        assert!(JobEvent::accepted(&job).accepted);
        assert!(!JobEvent::from_job(&job).accepted);

        let json = serde_json::to_value(JobEvent::from_job(&job)).unwrap();
        assert!(json.get("accepted").is_none());
        let json = serde_json::to_value(JobEvent::accepted(&job)).unwrap();
        assert_eq!(json["accepted"], true);
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        for status in JobStatus::ALL {
            if status.is_terminal() {
                assert!(JobStatus::ALL.iter().all(|next| !status.can_transition_to(*next)));
            }
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Routing));
        assert!(JobStatus::Printing.can_transition_to(JobStatus::Printing));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Abandoned));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Succeeded));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Succeeded));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("PRINTING".parse::<JobStatus>().unwrap(), JobStatus::Printing);
        assert!("lost".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_options_defaults_from_empty_json() {
        let options: JobOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.copies, 1);
        assert_eq!(options.cut_mode, CutMode::Full);
        assert!(!options.open_drawer);
    }

    #[test]
    fn test_implicit_group_uses_category_members() {
        let category = PrinterCategory {
            id: "c1".to_string(),
            name: "bar".to_string(),
            description: None,
            group_id: None,
            balancing_strategy: BalancingStrategy::LeastBusy,
            members: vec![GroupMember::new("P1", 1)],
            created_at: Utc::now(),
        };
        let group = category.implicit_group();
        assert_eq!(group.id, "category:c1");
        assert_eq!(group.balancing_strategy, BalancingStrategy::LeastBusy);
        assert!(group.active);
        assert_eq!(group.members.len(), 1);
    }

    #[test]
    fn test_analytics_record_counts_attempts() {
        let mut job = PrintJob::new(submission());
        job.status = JobStatus::Succeeded;
        job.retries = 2;
        job.assigned_printer = Some("P1".to_string());
        job.completed_at = Some(job.created_at + chrono::Duration::milliseconds(1500));

        let record = PrintAnalyticsRecord::for_job(&job, Some("kitchen".into()), 1);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.duration_ms, 1500);
        assert_eq!(record.printer.as_deref(), Some("P1"));
    }
}
