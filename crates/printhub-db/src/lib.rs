//! # printhub-db: Job Store for the PrintHub Base Station
//!
//! SQLite storage for print jobs, printers, routing configuration and
//! analytics, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PrintHub Data Flow                               │
//! │                                                                         │
//! │  Control plane (submit_job) / Dispatcher (claim, finish)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   printhub-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ JobRepository │    │ 001_init.sql │  │   │
//! │  │   │ SqlitePool    │◄───│ PrinterRepo   │    │              │  │   │
//! │  │   │ WAL + FULL    │    │ Category/Rule │    │              │  │   │
//! │  │   │ sync          │    │ Group/Analytics│   │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/printhub/printhub.db                               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (jobs, printers, rules, ...)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use printhub_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("printhub.db")).await?;
//! let recovered = db.jobs().recover_interrupted().await?;
//! let pending = db.jobs().list_pending(10).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::analytics::{AnalyticsFilter, AnalyticsRepository};
pub use repository::category::{CategoryRepository, CategoryUpdate, NewCategory};
pub use repository::group::{GroupRepository, GroupUpdate, NewGroup};
pub use repository::job::{JobFilter, JobRepository, JobUpdate};
pub use repository::printer::{NewPrinter, PrinterRepository};
pub use repository::rule::{NewRule, RuleRepository, RuleUpdate};
