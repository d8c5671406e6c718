//! # printhub-core: Pure Domain Logic for the PrintHub Base Station
//!
//! This crate holds every decision the print engine makes that does not need
//! I/O: what a job looks like, which category a job belongs to, which printer
//! of a group gets it, and whether a failed attempt is retried.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PrintHub Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Realtime Channel (printhub-sync) / HTTP (station)      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ SubmitJob, CRUD, config              │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          Control plane + Dispatcher (printhub-engine)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ printhub-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  routing  │  │ balancer  │  │   retry   │  │   │
//! │  │   │ PrintJob  │  │RuleEngine │  │ Balancer  │  │RetryPolicy│  │   │
//! │  │   │ Printer   │  │ classify  │  │  select   │  │on_failure │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 printhub-db (Job Store, schema)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (PrintJob, Printer, RoutingRule, PrinterGroup, ...)
//! - [`metadata`] - Typed job metadata and rule field names
//! - [`routing`] - Ordered first-match rule engine
//! - [`balancer`] - Printer selection within a group
//! - [`retry`] - Retry / failover decisions for failed attempts
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use printhub_core::metadata::JobMetadata;
//! use printhub_core::routing::RuleEngine;
//! use printhub_core::types::{MatchType, RoutingRule};
//!
//! let rule = RoutingRule::new("kitchen", "station", "kitchen", MatchType::Exact, 0, 1);
//! let engine = RuleEngine::new(&[rule], None).unwrap();
//!
//! let metadata = JobMetadata {
//!     station: Some("kitchen".into()),
//!     ..Default::default()
//! };
//! assert_eq!(engine.classify(&metadata, "order.bin").unwrap(), "kitchen");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod balancer;
pub mod error;
pub mod metadata;
pub mod retry;
pub mod routing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, PrintError, PrintErrorKind, RoutingError, ValidationError};
pub use metadata::{JobMetadata, MetadataField};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest accepted job payload (10 MiB).
///
/// Receipt and kitchen tickets are a few KiB; anything close to this limit is
/// almost certainly a misrouted document.
pub const MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum copies per job.
pub const MAX_COPIES: u32 = 20;

/// Job priority range accepted from submitters.
pub const MIN_JOB_PRIORITY: i64 = -1000;
pub const MAX_JOB_PRIORITY: i64 = 1000;

/// Minimum length of an operator-provided API key.
pub const MIN_API_KEY_LENGTH: usize = 16;

/// Error text recorded when no routing rule and no default category apply.
pub const NO_MATCHING_ROUTE: &str = "no matching route";

/// Error text recorded when a group has no printer that can take the job.
pub const NO_ELIGIBLE_PRINTER: &str = "no eligible printer";

/// Error text recorded when a job is abandoned by an explicit cancel.
pub const CANCELLED: &str = "cancelled";
