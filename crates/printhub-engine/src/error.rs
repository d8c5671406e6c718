//! # Engine Error Types
//!
//! The error every control-plane caller sees.
//!
//! ## Error Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     EngineError Categories                              │
//! │                                                                         │
//! │  ValidationError ──► Validation      (422, never persisted)            │
//! │  AuthError       ──► Authorization   (401, no side effects)            │
//! │  RoutingError    ──► Routing         (job FAILED, not retried)         │
//! │  PrintError      ──► TransientPrint / ContentPrint                     │
//! │  DbError         ──► NotFound / Conflict / Persistence                 │
//! │  ConfigError     ──► Config                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use printhub_core::{PrintError, PrintErrorKind, RoutingError, ValidationError};
use printhub_db::DbError;

use crate::config::ConfigError;
use crate::security::AuthError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input. Nothing was stored.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Missing or wrong API key. Nothing was done.
    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthError),

    /// No category or no printer for a job.
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Printer offline, jammed or timed out.
    #[error("Transient print error: {0}")]
    TransientPrint(String),

    /// The job content cannot be printed.
    #[error("Content print error: {0}")]
    ContentPrint(String),

    /// Job store I/O failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The entity is not in a state that allows the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Stable error code used by the HTTP API and the realtime channel.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Authorization(_) => "UNAUTHORIZED",
            EngineError::Routing(_) => "ROUTING_ERROR",
            EngineError::TransientPrint(_) => "PRINTER_UNAVAILABLE",
            EngineError::ContentPrint(_) => "CONTENT_ERROR",
            EngineError::Persistence(_) => "PERSISTENCE_ERROR",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::Config(_) => "CONFIG_ERROR",
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            DbError::Conflict { .. } | DbError::UniqueViolation { .. } => {
                EngineError::Conflict(err.to_string())
            }
            DbError::ForeignKeyViolation { message } => {
                EngineError::Validation(ValidationError::invalid("reference", message))
            }
            other => EngineError::Persistence(other.to_string()),
        }
    }
}

impl From<PrintError> for EngineError {
    fn from(err: PrintError) -> Self {
        match err.kind {
            PrintErrorKind::Transient => EngineError::TransientPrint(err.message),
            PrintErrorKind::Content => EngineError::ContentPrint(err.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_errors_map_by_kind() {
        let err: EngineError = DbError::not_found("PrintJob", "j1").into();
        assert!(matches!(err, EngineError::NotFound { .. }));
        assert_eq!(err.code(), "NOT_FOUND");

        let err: EngineError = DbError::conflict("PrintJob", "j1", "terminal").into();
        assert_eq!(err.code(), "CONFLICT");

        let err: EngineError = DbError::duplicate("name", "kitchen").into();
        assert_eq!(err.code(), "CONFLICT");

        let err: EngineError = DbError::QueryFailed("disk I/O error".into()).into();
        assert!(matches!(err, EngineError::Persistence(_)));
    }

    #[test]
    fn test_print_errors_keep_kind() {
        let err: EngineError = PrintError::transient("cover open").into();
        assert_eq!(err.code(), "PRINTER_UNAVAILABLE");
        let err: EngineError = PrintError::content("bad bytes").into();
        assert_eq!(err.code(), "CONTENT_ERROR");
    }

    #[test]
    fn test_auth_error_code() {
        let err: EngineError = AuthError::Invalid.into();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }
}
