//! # Analytics Repository
//!
//! Write-once outcome records. The table has no UPDATE path here, and a
//! trigger rejects any UPDATE issued elsewhere.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use printhub_core::{AnalyticsSummary, JobStatus, PrintAnalyticsRecord, PrinterTotals};

/// Time window for listings and exports (bounds on `completed_at`).
#[derive(Debug, Clone, Default)]
pub struct AnalyticsFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: String,
    job_id: String,
    printer: Option<String>,
    category: Option<String>,
    status: JobStatus,
    attempts: i64,
    created_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    duration_ms: i64,
    page_count: i64,
    error: Option<String>,
}

impl From<RecordRow> for PrintAnalyticsRecord {
    fn from(row: RecordRow) -> Self {
        PrintAnalyticsRecord {
            id: row.id,
            job_id: row.job_id,
            printer: row.printer,
            category: row.category,
            status: row.status,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            created_at: row.created_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
            page_count: u32::try_from(row.page_count).unwrap_or(0),
            error: row.error,
        }
    }
}

/// Repository for analytics records.
#[derive(Debug, Clone)]
pub struct AnalyticsRepository {
    pool: SqlitePool,
}

impl AnalyticsRepository {
    /// Creates a new AnalyticsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AnalyticsRepository { pool }
    }

    /// Appends one record.
    pub async fn insert(&self, record: &PrintAnalyticsRecord) -> DbResult<()> {
        debug!(
            job_id = %record.job_id,
            status = %record.status,
            attempts = record.attempts,
            "Recording analytics"
        );

        sqlx::query(
            r#"
            INSERT INTO print_analytics (
                id, job_id, printer, category, status, attempts,
                created_at, completed_at, duration_ms, page_count, error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&record.id)
        .bind(&record.job_id)
        .bind(&record.printer)
        .bind(&record.category)
        .bind(record.status)
        .bind(i64::from(record.attempts))
        .bind(record.created_at)
        .bind(record.completed_at)
        .bind(record.duration_ms)
        .bind(i64::from(record.page_count))
        .bind(&record.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records in completion order.
    pub async fn list(&self, filter: &AnalyticsFilter) -> DbResult<Vec<PrintAnalyticsRecord>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, job_id, printer, category, status, attempts, created_at, completed_at, \
             duration_ms, page_count, error FROM print_analytics WHERE 1 = 1",
        );
        if let Some(since) = filter.since {
            qb.push(" AND completed_at >= ").push_bind(since);
        }
        if let Some(until) = filter.until {
            qb.push(" AND completed_at < ").push_bind(until);
        }
        qb.push(" ORDER BY completed_at ASC, rowid ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PrintAnalyticsRecord::from).collect())
    }

    /// Outcome counts, average duration and per-printer totals.
    pub async fn summary(&self, since: Option<DateTime<Utc>>) -> DbResult<AnalyticsSummary> {
        let (total, succeeded, failed, abandoned, average): (
            i64,
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<f64>,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                SUM(status = 'succeeded'),
                SUM(status = 'failed'),
                SUM(status = 'abandoned'),
                AVG(duration_ms)
            FROM print_analytics
            WHERE ?1 IS NULL OR completed_at >= ?1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let per_printer: Vec<(String, Option<i64>, Option<i64>, Option<i64>, Option<f64>)> =
            sqlx::query_as(
                r#"
                SELECT
                    printer,
                    SUM(status = 'succeeded'),
                    SUM(status = 'failed'),
                    SUM(status = 'abandoned'),
                    AVG(duration_ms)
                FROM print_analytics
                WHERE printer IS NOT NULL AND (?1 IS NULL OR completed_at >= ?1)
                GROUP BY printer
                ORDER BY printer
                "#,
            )
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(AnalyticsSummary {
            since,
            total,
            succeeded: succeeded.unwrap_or(0),
            failed: failed.unwrap_or(0),
            abandoned: abandoned.unwrap_or(0),
            average_duration_ms: average,
            printers: per_printer
                .into_iter()
                .map(|(printer, s, f, a, avg)| PrinterTotals {
                    printer,
                    succeeded: s.unwrap_or(0),
                    failed: f.unwrap_or(0),
                    abandoned: a.unwrap_or(0),
                    average_duration_ms: avg,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use printhub_core::{ContentType, JobOptions, NewPrintJob};

    async fn outcome(db: &Database, status: JobStatus, printer: Option<&str>, duration_ms: i64) {
        let job = db
            .jobs()
            .enqueue(NewPrintJob {
                file_name: "t.txt".into(),
                content: b"x".to_vec(),
                content_type: ContentType::Text,
                options: JobOptions::default(),
                metadata: Default::default(),
                priority: 0,
            })
            .await
            .unwrap();

        let now = Utc::now();
        let record = PrintAnalyticsRecord {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id,
            printer: printer.map(str::to_string),
            category: Some("kitchen".into()),
            status,
            attempts: 1,
            created_at: now - chrono::Duration::milliseconds(duration_ms),
            completed_at: now,
            duration_ms,
            page_count: 1,
            error: None,
        };
        db.analytics().insert(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        outcome(&db, JobStatus::Succeeded, Some("P1"), 100).await;
        outcome(&db, JobStatus::Succeeded, Some("P1"), 300).await;
        outcome(&db, JobStatus::Failed, Some("P2"), 200).await;
        outcome(&db, JobStatus::Failed, None, 0).await;

        let summary = db.analytics().summary(None).await.unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.abandoned, 0);
        assert_eq!(summary.printers.len(), 2);
        assert_eq!(summary.printers[0].printer, "P1");
        assert_eq!(summary.printers[0].average_duration_ms, Some(200.0));
    }

    #[tokio::test]
    async fn test_empty_summary() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let summary = db.analytics().summary(None).await.unwrap();
        assert_eq!(summary.total, 0);
        assert!(summary.average_duration_ms.is_none());
        assert!(summary.printers.is_empty());
    }

    #[tokio::test]
    async fn test_records_are_write_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        outcome(&db, JobStatus::Succeeded, Some("P1"), 10).await;

        let result = sqlx::query("UPDATE print_analytics SET printer = 'P9'")
            .execute(db.pool())
            .await;
        assert!(result.is_err());

        let records = db.analytics().list(&AnalyticsFilter::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].printer.as_deref(), Some("P1"));
    }
}
