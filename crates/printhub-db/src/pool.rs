//! # Job Store Handle
//!
//! Opens the station's SQLite file and hands out repositories.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Opening the Job Store                           │
//! │                                                                         │
//! │  DbConfig::new("/var/lib/printhub/printhub.db")                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config)                                                 │
//! │       ├── WAL journal, synchronous = FULL, foreign keys on             │
//! │       ├── pool of `max_connections` (1 for :memory:)                   │
//! │       └── embedded migrations                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  db.jobs() / db.printers() / db.categories() / db.rules()              │
//! │  db.groups() / db.analytics()                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `synchronous = FULL` is what makes "accepted" mean "on disk": an enqueue
//! that returned `Ok` survives a power cut.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::analytics::AnalyticsRepository;
use crate::repository::category::CategoryRepository;
use crate::repository::group::GroupRepository;
use crate::repository::job::JobRepository;
use crate::repository::printer::PrinterRepository;
use crate::repository::rule::RuleRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Where the job store lives and how the pool behaves.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database file, `None` for a private in-memory store.
    pub path: Option<PathBuf>,

    /// Pool size. Forced to 1 for in-memory stores.
    pub max_connections: u32,

    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,

    /// How long a caller waits for a free pooled connection.
    pub acquire_timeout: Duration,

    pub run_migrations: bool,
}

impl DbConfig {
    /// File-backed store at `path`, created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: Some(path.into()),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
            run_migrations: true,
        }
    }

    /// Private store that vanishes with the handle.
    pub fn in_memory() -> Self {
        DbConfig {
            path: None,
            max_connections: 1,
            busy_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            None => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?,
        };

        Ok(options
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout))
    }

    fn describe(&self) -> String {
        self.path
            .as_deref()
            .map(Path::display)
            .map(|p| p.to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the job store. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the store and applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(store = %config.describe(), "Opening job store");

        let options = config.connect_options()?;
        let in_memory = config.path.is_none();

        // An in-memory database dies with its last connection, so the single
        // connection is pinned for the life of the pool.
        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(config.acquire_timeout)
            .min_connections(1);
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        debug!(in_memory, "Job store pool ready");

        let db = Database { pool };
        if config.run_migrations {
            migrations::run_migrations(&db.pool).await?;
        }

        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The durable job queue.
    pub fn jobs(&self) -> JobRepository {
        JobRepository::new(self.pool.clone())
    }

    pub fn printers(&self) -> PrinterRepository {
        PrinterRepository::new(self.pool.clone())
    }

    pub fn categories(&self) -> CategoryRepository {
        CategoryRepository::new(self.pool.clone())
    }

    pub fn rules(&self) -> RuleRepository {
        RuleRepository::new(self.pool.clone())
    }

    pub fn groups(&self) -> GroupRepository {
        GroupRepository::new(self.pool.clone())
    }

    pub fn analytics(&self) -> AnalyticsRepository {
        AnalyticsRepository::new(self.pool.clone())
    }

    /// Waits for in-flight statements and closes every connection.
    pub async fn close(&self) {
        info!("Closing job store");
        self.pool.close().await;
    }

    /// True when the store answers a trivial query.
    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}
