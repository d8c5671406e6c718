//! # Repository Module
//!
//! Database repository implementations for the base station.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Dispatcher / control plane                                            │
//! │       │                                                                 │
//! │       │  db.jobs().update_status(id, &[Pending], Routing, ..)          │
//! │       ▼                                                                 │
//! │  JobRepository                                                         │
//! │  ├── enqueue / get / list / list_pending                               │
//! │  ├── update_status (conditional)                                       │
//! │  └── recover_interrupted / request_cancel / count_by_status            │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`job::JobRepository`] - Durable job store
//! - [`printer::PrinterRepository`] - Printer definitions
//! - [`category::CategoryRepository`] - Categories and members
//! - [`rule::RuleRepository`] - Routing rules
//! - [`group::GroupRepository`] - Printer groups and members
//! - [`analytics::AnalyticsRepository`] - Write-once outcome records

pub mod analytics;
pub mod category;
pub mod group;
pub mod job;
pub mod printer;
pub mod rule;
