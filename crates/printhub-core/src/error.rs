//! # Error Types
//!
//! Domain-specific error types for printhub-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  printhub-core errors (this file)                                      │
//! │  ├── ValidationError  - Malformed job / rule / config input            │
//! │  ├── RoutingError     - No category or no eligible printer             │
//! │  ├── PrintError       - Driver outcome (transient vs content)          │
//! │  └── CoreError        - Umbrella for the above + bad transitions       │
//! │                                                                         │
//! │  printhub-db errors (separate crate)                                   │
//! │  └── DbError          - Job store failures                             │
//! │                                                                         │
//! │  printhub-engine errors                                                │
//! │  └── EngineError      - What callers of the control plane see          │
//! │                                                                         │
//! │  Flow: ValidationError → EngineError → ApiError / channel Error        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::JobStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A job status change that the lifecycle does not allow.
    ///
    /// ## When This Occurs
    /// - Cancelling a job that already SUCCEEDED
    /// - Acknowledging a job that is not FAILED
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Routing error (wraps RoutingError).
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything is persisted; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (bad regex, bad connection descriptor, ...).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Duplicate value (e.g., duplicate category name).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::InvalidFormat`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }
}

// =============================================================================
// Routing Error
// =============================================================================

/// Routing failures. A job that hits one of these is marked FAILED and is
/// not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No rule matched and no default category is configured.
    #[error("no matching route")]
    NoMatchingRoute,

    /// The resolved group has no printer that is online and not excluded.
    #[error("no eligible printer in group {group}")]
    NoEligiblePrinter { group: String },

    /// The resolved group is switched off.
    #[error("group {group} is inactive")]
    GroupInactive { group: String },

    /// A rule or config references a category that does not exist.
    #[error("unknown category {category}")]
    UnknownCategory { category: String },
}

impl RoutingError {
    /// True when the balancer ran out of candidates.
    ///
    /// The dispatcher records these under the common "no eligible printer"
    /// message so operators see one reason for an empty group.
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            RoutingError::NoEligiblePrinter { .. } | RoutingError::GroupInactive { .. }
        )
    }
}

// =============================================================================
// Print Error (driver boundary)
// =============================================================================

/// Classification of a failed print attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintErrorKind {
    /// Offline, paper jam, cover open, I/O error, timeout. Retried.
    Transient,
    /// The job itself is malformed. Never retried.
    Content,
}

impl fmt::Display for PrintErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintErrorKind::Transient => write!(f, "transient"),
            PrintErrorKind::Content => write!(f, "content"),
        }
    }
}

/// Error returned by a printer driver or renderer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} print error: {message}")]
pub struct PrintError {
    pub kind: PrintErrorKind,
    pub message: String,
}

impl PrintError {
    pub fn transient(message: impl Into<String>) -> Self {
        PrintError {
            kind: PrintErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn content(message: impl Into<String>) -> Self {
        PrintError {
            kind: PrintErrorKind::Content,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == PrintErrorKind::Transient
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
