//! # Job Store Errors
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error ──► DbError ──► EngineError ──► HTTP status / channel     │
//! │                                                                         │
//! │  RowNotFound               NotFound            404                      │
//! │  UNIQUE constraint         UniqueViolation     409                      │
//! │  FOREIGN KEY constraint    ForeignKeyViolation 422                      │
//! │  guarded UPDATE, 0 rows    Conflict            409                      │
//! │  SQLITE_BUSY / pool wait   Busy                500, caller may retry    │
//! │  everything else           QueryFailed         500                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::error::ErrorKind;
use thiserror::Error;

/// Result type for job store operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// Job, printer, category, rule or group id does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Printer, category or group name already taken.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// A member or rule points at a printer or category that is gone.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A guarded status update matched no row: the job moved on, or is
    /// already terminal.
    #[error("{entity} {id} conflict: {reason}")]
    Conflict {
        entity: String,
        id: String,
        reason: String,
    },

    /// The database file is locked, or no pooled connection came free.
    #[error("Job store busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// A stored JSON column could not be decoded.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn conflict(entity: impl Into<String>, id: impl Into<String>, reason: impl Into<String>) -> Self {
        DbError::Conflict {
            entity: entity.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::Conflict { .. })
    }

    /// Worth retrying the same statement after a pause.
    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy(_))
    }
}

// SQLite primary result codes for a locked database.
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    ErrorKind::UniqueViolation => {
                        // "UNIQUE constraint failed: printers.name"
                        let field = message
                            .rsplit(": ")
                            .next()
                            .unwrap_or("unknown")
                            .to_string();
                        DbError::duplicate(field, "unknown")
                    }
                    ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { message },
                    _ => {
                        let primary = db_err.code().map(|c| {
                            let code = c.parse::<u32>().unwrap_or(0) & 0xff;
                            code.to_string()
                        });
                        match primary.as_deref() {
                            Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => DbError::Busy(message),
                            _ => DbError::QueryFailed(message),
                        }
                    }
                }
            }

            sqlx::Error::PoolTimedOut => DbError::Busy("timed out waiting for a connection".to_string()),

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("job store is closed".to_string()),

            other => DbError::QueryFailed(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::InvalidData(err.to_string())
    }
}
