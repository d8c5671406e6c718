//! # Validation Module
//!
//! Input validation for job submissions and configuration objects.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Control plane (printhub-engine)                              │
//! │  ├── Security Gate first (no side effects on bad key)                  │
//! │  └── THIS MODULE: shape/range checks                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Rule engine build                                            │
//! │  └── field names, regex compilation                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── UNIQUE constraints                                                │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::metadata::MetadataField;
use crate::types::{MatchType, NewPrintJob};
use crate::{
    MAX_CONTENT_BYTES, MAX_COPIES, MAX_JOB_PRIORITY, MIN_API_KEY_LENGTH, MIN_JOB_PRIORITY,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Connection schemes understood by the printer drivers.
pub const CONNECTION_SCHEMES: [&str; 4] = ["tcp", "file", "serial", "memory"];

// =============================================================================
// Job Validators
// =============================================================================

/// Validates a job file name.
///
/// ## Rules
/// - Must not be empty
/// - At most 255 characters
/// - No path separators (it is used to name spool files)
pub fn validate_file_name(file_name: &str) -> ValidationResult<()> {
    let file_name = file_name.trim();

    if file_name.is_empty() {
        return Err(ValidationError::required("fileName"));
    }

    if file_name.len() > 255 {
        return Err(ValidationError::TooLong {
            field: "fileName".to_string(),
            max: 255,
        });
    }

    if file_name.contains('/') || file_name.contains('\\') || file_name == ".." {
        return Err(ValidationError::invalid(
            "fileName",
            "must not contain path separators",
        ));
    }

    Ok(())
}

/// Validates a complete job submission.
///
/// ## Example
/// ```rust
/// use printhub_core::types::{NewPrintJob, JobOptions, ContentType};
/// use printhub_core::validation::validate_new_job;
///
/// let job = NewPrintJob {
///     file_name: "order-1.bin".into(),
///     content: vec![0x1b, 0x40],
///     content_type: ContentType::Escpos,
///     options: JobOptions::default(),
///     metadata: Default::default(),
///     priority: 0,
/// };
/// assert!(validate_new_job(&job).is_ok());
/// ```
pub fn validate_new_job(job: &NewPrintJob) -> ValidationResult<()> {
    validate_file_name(&job.file_name)?;

    if job.content.is_empty() {
        return Err(ValidationError::required("content"));
    }

    if job.content.len() > MAX_CONTENT_BYTES {
        return Err(ValidationError::OutOfRange {
            field: "content".to_string(),
            min: 1,
            max: MAX_CONTENT_BYTES as i64,
        });
    }

    if job.options.copies == 0 || job.options.copies > MAX_COPIES {
        return Err(ValidationError::OutOfRange {
            field: "copies".to_string(),
            min: 1,
            max: MAX_COPIES as i64,
        });
    }

    if let Some(width) = job.options.paper_width {
        validate_paper_width(width)?;
    }

    if !(MIN_JOB_PRIORITY..=MAX_JOB_PRIORITY).contains(&job.priority) {
        return Err(ValidationError::OutOfRange {
            field: "priority".to_string(),
            min: MIN_JOB_PRIORITY,
            max: MAX_JOB_PRIORITY,
        });
    }

    Ok(())
}

/// Paper width in millimetres (58mm and 80mm rolls are the common ones).
pub fn validate_paper_width(width: u32) -> ValidationResult<()> {
    if !(40..=120).contains(&width) {
        return Err(ValidationError::OutOfRange {
            field: "paperWidth".to_string(),
            min: 40,
            max: 120,
        });
    }
    Ok(())
}

// =============================================================================
// Configuration Object Validators
// =============================================================================

/// Validates a display name for printers, categories and groups.
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::required(field));
    }

    if name.len() > 64 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 64,
        });
    }

    Ok(())
}

/// Validates a printer connection descriptor such as `tcp://10.0.0.5:9100`.
pub fn validate_connection(connection: &str) -> ValidationResult<()> {
    let (scheme, rest) = connection
        .split_once("://")
        .ok_or_else(|| ValidationError::invalid("connection", "expected <scheme>://<target>"))?;

    if !CONNECTION_SCHEMES.contains(&scheme) {
        return Err(ValidationError::NotAllowed {
            field: "connection".to_string(),
            allowed: CONNECTION_SCHEMES.iter().map(|s| format!("{}://", s)).collect(),
        });
    }

    if scheme != "memory" && rest.is_empty() {
        return Err(ValidationError::invalid("connection", "target is empty"));
    }

    if scheme == "tcp" {
        let (_, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| ValidationError::invalid("connection", "tcp target needs host:port"))?;
        port.parse::<u16>()
            .map_err(|_| ValidationError::invalid("connection", "invalid tcp port"))?;
    }

    Ok(())
}

/// Validates a routing rule definition and returns the parsed field.
///
/// The regex itself is compiled by the rule engine; this only rejects empty
/// patterns and unknown fields so that bad rules never reach the store.
pub fn validate_rule(field: &str, pattern: &str, match_type: MatchType) -> ValidationResult<MetadataField> {
    let parsed: MetadataField = field.parse()?;

    if pattern.is_empty() {
        return Err(ValidationError::required("pattern"));
    }

    if match_type == MatchType::Regex {
        regex::Regex::new(pattern)
            .map_err(|e| ValidationError::invalid("pattern", e.to_string()))?;
    }

    Ok(parsed)
}

/// Validates an operator-chosen API key.
///
/// ## Rules
/// - At least [`MIN_API_KEY_LENGTH`] characters, at most 256
/// - Printable ASCII without whitespace (it travels in an HTTP header)
pub fn validate_api_key(key: &str) -> ValidationResult<()> {
    if key.len() < MIN_API_KEY_LENGTH {
        return Err(ValidationError::TooShort {
            field: "apiKey".to_string(),
            min: MIN_API_KEY_LENGTH,
        });
    }

    if key.len() > 256 {
        return Err(ValidationError::TooLong {
            field: "apiKey".to_string(),
            max: 256,
        });
    }

    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ValidationError::invalid(
            "apiKey",
            "must be printable ASCII without spaces",
        ));
    }

    Ok(())
}
