//! # Analytics Recorder
//!
//! Appends one record per job outcome and exports them.
//!
//! Recording never fails a dispatch: a store error is logged and the job
//! outcome stands.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use printhub_core::{AnalyticsSummary, PrintAnalyticsRecord, PrintJob, ValidationError};
use printhub_db::{AnalyticsFilter, Database};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(ValidationError::NotAllowed {
                field: "format".to_string(),
                allowed: vec!["csv".to_string(), "json".to_string()],
            }),
        }
    }
}

/// CSV row layout; one column per record field.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CsvRow<'a> {
    id: &'a str,
    job_id: &'a str,
    printer: Option<&'a str>,
    category: Option<&'a str>,
    status: &'a str,
    attempts: u32,
    created_at: String,
    completed_at: String,
    duration_ms: i64,
    page_count: u32,
    error: Option<&'a str>,
}

impl<'a> From<&'a PrintAnalyticsRecord> for CsvRow<'a> {
    fn from(r: &'a PrintAnalyticsRecord) -> Self {
        CsvRow {
            id: &r.id,
            job_id: &r.job_id,
            printer: r.printer.as_deref(),
            category: r.category.as_deref(),
            status: r.status.as_str(),
            attempts: r.attempts,
            created_at: r.created_at.to_rfc3339(),
            completed_at: r.completed_at.to_rfc3339(),
            duration_ms: r.duration_ms,
            page_count: r.page_count,
            error: r.error.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyticsRecorder {
    db: Arc<Database>,
}

impl AnalyticsRecorder {
    pub fn new(db: Arc<Database>) -> Self {
        AnalyticsRecorder { db }
    }

    /// Records the outcome of `job`, which must already be in an outcome
    /// state.
    pub async fn record(&self, job: &PrintJob, category: Option<String>, page_count: u32) {
        let record = PrintAnalyticsRecord::for_job(job, category, page_count);
        match self.db.analytics().insert(&record).await {
            Ok(()) => debug!(job_id = %job.id, status = %job.status, "Outcome recorded"),
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to record analytics"),
        }
    }

    pub async fn list(&self, filter: &AnalyticsFilter) -> EngineResult<Vec<PrintAnalyticsRecord>> {
        Ok(self.db.analytics().list(filter).await?)
    }

    /// Renders the filtered records as a CSV document or a JSON array.
    pub async fn export(&self, format: ExportFormat, filter: &AnalyticsFilter) -> EngineResult<String> {
        let records = self.list(filter).await?;
        match format {
            ExportFormat::Json => serde_json::to_string(&records)
                .map_err(|e| EngineError::Persistence(e.to_string())),
            ExportFormat::Csv => to_csv(&records),
        }
    }

    pub async fn summary(&self, since: Option<DateTime<Utc>>) -> EngineResult<AnalyticsSummary> {
        Ok(self.db.analytics().summary(since).await?)
    }
}

fn to_csv(records: &[PrintAnalyticsRecord]) -> EngineResult<String> {
    let export_error = |e: String| EngineError::Persistence(format!("CSV export failed: {}", e));

    let mut writer = csv::Writer::from_writer(Vec::new());
    if records.is_empty() {
        writer
            .write_record(CSV_HEADER)
            .map_err(|e| export_error(e.to_string()))?;
    }
    for record in records {
        writer
            .serialize(CsvRow::from(record))
            .map_err(|e| export_error(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| export_error(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| export_error(e.to_string()))
}

const CSV_HEADER: [&str; 11] = [
    "id",
    "jobId",
    "printer",
    "category",
    "status",
    "attempts",
    "createdAt",
    "completedAt",
    "durationMs",
    "pageCount",
    "error",
];
