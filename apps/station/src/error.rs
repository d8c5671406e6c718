//! # API Error Type
//!
//! Unified error type for HTTP handlers.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in the Station API                        │
//! │                                                                         │
//! │  Handler ──► ControlPlane ──► EngineError ──► ApiError ──► response    │
//! │                                                                         │
//! │  Validation / bad content ........ 422                                 │
//! │  Missing or wrong x-api-key ...... 401                                 │
//! │  Unknown id ...................... 404                                 │
//! │  Wrong state / duplicate ......... 409                                 │
//! │  Printer unavailable ............. 503                                 │
//! │  Store or config I/O ............. 500                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Response Body
//! ```json
//! { "code": "NOT_FOUND", "message": "PrintJob not found: 9f1c..." }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use printhub_engine::{ConfigError, EngineError};
use printhub_sync::SyncError;

/// Error body returned by every failing handler.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,

    /// Machine-readable error code for programmatic handling
    pub code: String,

    /// Human-readable error message for display
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match err {
            EngineError::Validation(_)
            | EngineError::Routing(_)
            | EngineError::ContentPrint(_)
            | EngineError::Config(ConfigError::Invalid(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Authorization(_) => StatusCode::UNAUTHORIZED,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::TransientPrint(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Persistence(ref message) => {
                tracing::error!(error = %message, "Job store operation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            EngineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.code(), err.to_string())
    }
}

/// Only submission decoding reaches the HTTP layer.
impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError::validation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}
