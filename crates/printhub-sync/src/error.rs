//! # Channel Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Channel Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidMessage         │ │
//! │  │  InvalidUrl     │  │  Disconnected   │  │  SerializationFailed    │ │
//! │  │                 │  │  Timeout, TLS   │  │  InvalidContent         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for channel operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid channel configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid channel URL: {0}")]
    InvalidUrl(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected from the backend")]
    Disconnected,

    #[error("Connection timeout after {0} ms")]
    Timeout(u64),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Job content that is not valid base64.
    #[error("Invalid job content: {0}")]
    InvalidContent(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Realtime channel is shutting down")]
    ShuttingDown,

    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<base64::DecodeError> for SyncError {
    fn from(err: base64::DecodeError) -> Self {
        SyncError::InvalidContent(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// True when reconnecting may help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::WebSocketError(_)
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, SyncError::InvalidConfig(_) | SyncError::InvalidUrl(_))
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidMessage(_)
                | SyncError::SerializationFailed(_)
                | SyncError::InvalidContent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(SyncError::Timeout(10_000).is_retryable());

        assert!(!SyncError::InvalidUrl("ftp://x".into()).is_retryable());
        assert!(!SyncError::InvalidMessage("{".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert!(SyncError::InvalidConfig("no url".into()).is_config_error());
        assert!(SyncError::InvalidContent("bad".into()).is_protocol_error());
        assert!(!SyncError::ShuttingDown.is_protocol_error());
    }
}
