//! # Job Repository
//!
//! The durable job store.
//!
//! ## Serialization of Writers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every status change is ONE conditional statement:                      │
//! │                                                                         │
//! │    UPDATE print_jobs SET status = :next, ...                            │
//! │    WHERE id = :id                                                       │
//! │      AND status IN (:expected...)                                       │
//! │      AND status NOT IN ('succeeded', 'abandoned')                       │
//! │    RETURNING *                                                          │
//! │                                                                         │
//! │  no row returned ──► NotFound (no such id)                              │
//! │                 └──► Conflict (someone else moved the job first)        │
//! │                                                                         │
//! │  Two dispatcher tasks racing to claim the same PENDING job: exactly     │
//! │  one gets the row back, the other gets Conflict and walks away.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are never deleted (a trigger aborts any DELETE).

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use printhub_core::{ContentType, JobStatus, NewPrintJob, PrintJob};

const JOB_COLUMNS: &str = "id, status, created_at, updated_at, completed_at, file_name, content, \
     content_type, metadata, options, priority, retries, assigned_printer, category_id, \
     last_error, cancel_requested";

/// Same columns with the payload replaced by an empty blob, for listings.
const JOB_SUMMARY_COLUMNS: &str = "id, status, created_at, updated_at, completed_at, file_name, \
     x'' AS content, content_type, metadata, options, priority, retries, assigned_printer, \
     category_id, last_error, cancel_requested";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    status: JobStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    file_name: String,
    content: Vec<u8>,
    content_type: ContentType,
    metadata: String,
    options: String,
    priority: i64,
    retries: i64,
    assigned_printer: Option<String>,
    category_id: Option<String>,
    last_error: Option<String>,
    cancel_requested: bool,
}

impl TryFrom<JobRow> for PrintJob {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        Ok(PrintJob {
            id: row.id,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            file_name: row.file_name,
            content: row.content,
            content_type: row.content_type,
            metadata: serde_json::from_str(&row.metadata)?,
            options: serde_json::from_str(&row.options)?,
            priority: row.priority,
            retries: u32::try_from(row.retries).unwrap_or(0),
            assigned_printer: row.assigned_printer,
            category_id: row.category_id,
            last_error: row.last_error,
            cancel_requested: row.cancel_requested,
        })
    }
}

// =============================================================================
// Update & Filter Types
// =============================================================================

/// Columns changed together with a status transition.
///
/// Fields left `None` keep their stored value. `completed_at` is managed by
/// the store: set when the job reaches an outcome, cleared otherwise.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    assigned_printer: Option<Option<String>>,
    category_id: Option<Option<String>>,
    last_error: Option<Option<String>>,
    retries: Option<u32>,
    clear_cancel: bool,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn printer(mut self, printer: impl Into<String>) -> Self {
        self.assigned_printer = Some(Some(printer.into()));
        self
    }

    pub fn clear_printer(mut self) -> Self {
        self.assigned_printer = Some(None);
        self
    }

    pub fn category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(Some(category_id.into()));
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Resets the cooperative cancel flag (operator requeue).
    pub fn clear_cancel(mut self) -> Self {
        self.clear_cancel = true;
        self
    }
}

/// Listing filter; newest jobs first.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        JobFilter {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for print job operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    /// Creates a new JobRepository.
    pub fn new(pool: SqlitePool) -> Self {
        JobRepository { pool }
    }

    /// Persists a new PENDING job and returns it.
    ///
    /// The insert is committed (fsync'd) before this returns, so an
    /// acknowledged job survives a crash.
    pub async fn enqueue(&self, submission: NewPrintJob) -> DbResult<PrintJob> {
        let job = PrintJob::new(submission);
        let metadata = serde_json::to_string(&job.metadata)?;
        let options = serde_json::to_string(&job.options)?;

        debug!(job_id = %job.id, file_name = %job.file_name, priority = job.priority, "Enqueuing job");

        sqlx::query(
            r#"
            INSERT INTO print_jobs (
                id, status, created_at, updated_at, completed_at, file_name, content,
                content_type, metadata, options, priority, retries, assigned_printer,
                category_id, last_error, cancel_requested
            ) VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7, ?8, ?9, ?10, 0, NULL, NULL, NULL, 0)
            "#,
        )
        .bind(&job.id)
        .bind(job.status)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(&job.file_name)
        .bind(&job.content)
        .bind(job.content_type)
        .bind(metadata)
        .bind(options)
        .bind(job.priority)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    /// Gets a job (with its payload) by id.
    pub async fn get(&self, id: &str) -> DbResult<PrintJob> {
        let sql = format!("SELECT {} FROM print_jobs WHERE id = ?1", JOB_COLUMNS);
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| DbError::not_found("PrintJob", id))?
            .try_into()
    }

    /// Moves a job to `next` if its current status is one of `expected`.
    ///
    /// Expected states from which the lifecycle does not allow `next` are
    /// ignored. Terminal jobs are never touched.
    ///
    /// ## Errors
    /// - `NotFound` if the job does not exist
    /// - `Conflict` if the job is in any other state
    pub async fn update_status(
        &self,
        id: &str,
        expected: &[JobStatus],
        next: JobStatus,
        update: JobUpdate,
    ) -> DbResult<PrintJob> {
        let allowed: Vec<JobStatus> = expected
            .iter()
            .copied()
            .filter(|status| status.can_transition_to(next))
            .collect();

        if allowed.is_empty() {
            return Err(DbError::conflict(
                "PrintJob",
                id,
                format!("no allowed transition to {}", next),
            ));
        }

        let now = Utc::now();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE print_jobs SET status = ");
        qb.push_bind(next);
        qb.push(", updated_at = ").push_bind(now);

        if next.is_outcome() {
            qb.push(", completed_at = ").push_bind(now);
        } else {
            qb.push(", completed_at = NULL");
        }
        if let Some(printer) = update.assigned_printer {
            qb.push(", assigned_printer = ").push_bind(printer);
        }
        if let Some(category) = update.category_id {
            qb.push(", category_id = ").push_bind(category);
        }
        if let Some(error) = update.last_error {
            qb.push(", last_error = ").push_bind(error);
        }
        if let Some(retries) = update.retries {
            qb.push(", retries = ").push_bind(i64::from(retries));
        }
        if update.clear_cancel {
            qb.push(", cancel_requested = 0");
        }

        qb.push(" WHERE id = ").push_bind(id.to_string());
        qb.push(" AND status IN (");
        let mut statuses = qb.separated(", ");
        for status in &allowed {
            statuses.push_bind(*status);
        }
        statuses.push_unseparated(")");
        qb.push(" AND status NOT IN ('succeeded', 'abandoned') RETURNING ");
        qb.push(JOB_COLUMNS);

        let row = qb
            .build_query_as::<JobRow>()
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                debug!(job_id = %id, status = %next, "Job status updated");
                row.try_into()
            }
            None => Err(self.explain_miss(id, next).await),
        }
    }

    /// Distinguishes a missing job from one in the wrong state.
    async fn explain_miss(&self, id: &str, next: JobStatus) -> DbError {
        match self.status_of(id).await {
            Ok(Some(current)) => DbError::conflict(
                "PrintJob",
                id,
                format!("cannot move from {} to {}", current, next),
            ),
            Ok(None) => DbError::not_found("PrintJob", id),
            Err(err) => err,
        }
    }

    async fn status_of(&self, id: &str) -> DbResult<Option<JobStatus>> {
        let status = sqlx::query_scalar::<_, JobStatus>("SELECT status FROM print_jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }

    /// PENDING jobs in dispatch order: priority (desc), then FIFO.
    pub async fn list_pending(&self, limit: u32) -> DbResult<Vec<PrintJob>> {
        let sql = format!(
            "SELECT {} FROM print_jobs WHERE status = 'pending' \
             ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT ?1",
            JOB_COLUMNS
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PrintJob::try_from).collect()
    }

    /// Jobs matching `filter`, newest first, without payloads.
    pub async fn list(&self, filter: &JobFilter) -> DbResult<Vec<PrintJob>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        qb.push(JOB_SUMMARY_COLUMNS);
        qb.push(" FROM print_jobs");
        if let Some(status) = filter.status {
            qb.push(" WHERE status = ").push_bind(status);
        }
        qb.push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(filter.limit));
        qb.push(" OFFSET ").push_bind(i64::from(filter.offset));

        let rows = qb
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PrintJob::try_from).collect()
    }

    /// Returns every ROUTING/PRINTING job to PENDING.
    ///
    /// Called once at startup, before the dispatcher runs. The printer
    /// assignment is cleared; the retry count is kept so the retry bound
    /// still holds across restarts.
    pub async fn recover_interrupted(&self) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE print_jobs SET
                status = 'pending',
                assigned_printer = NULL,
                updated_at = ?1
            WHERE status IN ('routing', 'printing')
            "#,
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(recovered, "Recovered interrupted jobs");
        }
        Ok(recovered)
    }

    /// Sets the cooperative cancel flag on a non-terminal job.
    pub async fn request_cancel(&self, id: &str) -> DbResult<PrintJob> {
        let sql = format!(
            "UPDATE print_jobs SET cancel_requested = 1, updated_at = ?1 \
             WHERE id = ?2 AND status NOT IN ('succeeded', 'abandoned') RETURNING {}",
            JOB_COLUMNS
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.explain_miss(id, JobStatus::Abandoned).await),
        }
    }

    /// Number of jobs in each status (zero counts included).
    pub async fn count_by_status(&self) -> DbResult<Vec<(JobStatus, i64)>> {
        let rows = sqlx::query_as::<_, (JobStatus, i64)>(
            "SELECT status, COUNT(*) FROM print_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(JobStatus::ALL
            .into_iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .find(|(s, _)| *s == status)
                    .map(|(_, c)| *c)
                    .unwrap_or(0);
                (status, count)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use printhub_core::{JobMetadata, JobOptions};

    async fn repo() -> JobRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().jobs()
    }

    fn submission(name: &str, priority: i64) -> NewPrintJob {
        NewPrintJob {
            file_name: name.to_string(),
            content: b"\x1b@hello".to_vec(),
            content_type: ContentType::Escpos,
            options: JobOptions::default(),
            metadata: JobMetadata {
                station: Some("kitchen".into()),
                ..Default::default()
            },
            priority,
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_get() {
        let jobs = repo().await;
        let job = jobs.enqueue(submission("a.bin", 0)).await.unwrap();

        let loaded = jobs.get(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.content, b"\x1b@hello".to_vec());
        assert_eq!(loaded.metadata.station.as_deref(), Some("kitchen"));
        assert_eq!(loaded.content_type, ContentType::Escpos);
    }

    #[tokio::test]
    async fn test_get_missing_job() {
        let jobs = repo().await;
        assert!(jobs.get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_pending_order_is_priority_then_fifo() {
        let jobs = repo().await;
        let low = jobs.enqueue(submission("low", 0)).await.unwrap();
        let high = jobs.enqueue(submission("high", 5)).await.unwrap();
        let low2 = jobs.enqueue(submission("low2", 0)).await.unwrap();

        let pending: Vec<String> = jobs
            .list_pending(10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(pending, vec![high.id, low.id, low2.id]);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let jobs = repo().await;
        let job = jobs.enqueue(submission("a", 0)).await.unwrap();

        let claimed = jobs
            .update_status(&job.id, &[JobStatus::Pending], JobStatus::Routing, JobUpdate::new())
            .await
            .unwrap();
        assert_eq!(claimed.status, JobStatus::Routing);

        let second = jobs
            .update_status(&job.id, &[JobStatus::Pending], JobStatus::Routing, JobUpdate::new())
            .await;
        assert!(second.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_immutable() {
        let jobs = repo().await;
        let job = jobs.enqueue(submission("a", 0)).await.unwrap();
        jobs.update_status(&job.id, &[JobStatus::Pending], JobStatus::Routing, JobUpdate::new())
            .await
            .unwrap();
        jobs.update_status(
            &job.id,
            &[JobStatus::Routing],
            JobStatus::Printing,
            JobUpdate::new().printer("P1").category("kitchen"),
        )
        .await
        .unwrap();
        let done = jobs
            .update_status(&job.id, &[JobStatus::Printing], JobStatus::Succeeded, JobUpdate::new())
            .await
            .unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(done.assigned_printer.as_deref(), Some("P1"));

        let again = jobs
            .update_status(&job.id, &[JobStatus::Succeeded], JobStatus::Pending, JobUpdate::new())
            .await;
        assert!(again.unwrap_err().is_conflict());
        assert!(jobs.request_cancel(&job.id).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_recover_interrupted_keeps_retries() {
        let jobs = repo().await;
        let job = jobs.enqueue(submission("a", 0)).await.unwrap();
        jobs.update_status(&job.id, &[JobStatus::Pending], JobStatus::Routing, JobUpdate::new())
            .await
            .unwrap();
        jobs.update_status(
            &job.id,
            &[JobStatus::Routing],
            JobStatus::Printing,
            JobUpdate::new().printer("P1").retries(1),
        )
        .await
        .unwrap();

        assert_eq!(jobs.recover_interrupted().await.unwrap(), 1);

        let recovered = jobs.get(&job.id).await.unwrap();
        assert_eq!(recovered.status, JobStatus::Pending);
        assert_eq!(recovered.retries, 1);
        assert!(recovered.assigned_printer.is_none());
    }

    #[tokio::test]
    async fn test_list_and_counts() {
        let jobs = repo().await;
        let a = jobs.enqueue(submission("a", 0)).await.unwrap();
        jobs.enqueue(submission("b", 0)).await.unwrap();
        jobs.update_status(&a.id, &[JobStatus::Pending], JobStatus::Abandoned, JobUpdate::new().error("cancelled"))
            .await
            .unwrap();

        let abandoned = jobs
            .list(&JobFilter {
                status: Some(JobStatus::Abandoned),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(abandoned.len(), 1);
        assert!(abandoned[0].content.is_empty());

        let counts = jobs.count_by_status().await.unwrap();
        assert_eq!(counts.len(), JobStatus::ALL.len());
        assert!(counts.contains(&(JobStatus::Pending, 1)));
        assert!(counts.contains(&(JobStatus::Abandoned, 1)));
        assert!(counts.contains(&(JobStatus::Printing, 0)));
    }

    #[tokio::test]
    async fn test_request_cancel_sets_flag() {
        let jobs = repo().await;
        let job = jobs.enqueue(submission("a", 0)).await.unwrap();
        let flagged = jobs.request_cancel(&job.id).await.unwrap();
        assert!(flagged.cancel_requested);
        assert!(jobs.request_cancel("missing").await.unwrap_err().is_not_found());
    }
}
