//! # PrintHub Station Library
//!
//! HTTP API and process wiring for the base station binary.
//!
//! ## Module Organization
//! ```text
//! printhub_station/
//! ├── lib.rs          ◄─── You are here (router, shared state)
//! ├── handlers/
//! │   ├── mod.rs      ◄─── API key extractor
//! │   ├── jobs.rs     ◄─── Submit, list, cancel, acknowledge, requeue
//! │   ├── printers.rs ◄─── Printer CRUD and live status
//! │   ├── routing.rs  ◄─── Categories, rules, groups
//! │   ├── config.rs   ◄─── Configuration and API key
//! │   └── analytics.rs◄─── Export and summary
//! ├── error.rs        ◄─── API error type for handlers
//! └── telemetry.rs    ◄─── tracing-subscriber setup
//! ```
//!
//! ## Routes
//! ```text
//! GET    /health                          (no key)
//! POST   /api/jobs                  GET   /api/jobs
//! GET    /api/jobs/{id}
//! POST   /api/jobs/{id}/cancel | acknowledge | requeue
//! GET    /api/printers              POST  /api/printers
//! GET    /api/printers/status       DELETE /api/printers/{name}
//! GET    /api/categories            POST  /api/categories
//! PUT    /api/categories/{id}       DELETE /api/categories/{id}
//! PUT    /api/categories/{id}/printers
//! GET    /api/rules                 POST  /api/rules
//! PUT    /api/rules/{id}            DELETE /api/rules/{id}
//! GET    /api/groups                POST  /api/groups
//! PUT    /api/groups/{id}           DELETE /api/groups/{id}
//! PUT    /api/groups/{id}/printers
//! GET    /api/config                PUT   /api/config
//! POST   /api/config/reload
//! GET    /api/security/api-key      PUT / DELETE (reset)
//! GET    /api/analytics?format=csv|json
//! GET    /api/analytics/summary
//! ```

pub mod error;
pub mod handlers;
pub mod telemetry;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;

use printhub_engine::ControlPlane;

/// Header carrying the station API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlPlane>,
}

impl AppState {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        AppState { control }
    }
}

/// Builds the HTTP API.
pub fn build_router(state: AppState) -> Router {
    use handlers::{analytics, config, jobs, printers, routing};

    Router::new()
        .route("/health", get(handlers::health))
        // Jobs
        .route("/api/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/api/jobs/{id}", get(jobs::get_job))
        .route("/api/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/api/jobs/{id}/acknowledge", post(jobs::acknowledge_job))
        .route("/api/jobs/{id}/requeue", post(jobs::requeue_job))
        // Printers
        .route("/api/printers", get(printers::list_printers).post(printers::save_printer))
        .route("/api/printers/status", get(printers::printer_statuses))
        .route("/api/printers/{name}", delete(printers::delete_printer))
        // Categories
        .route(
            "/api/categories",
            get(routing::list_categories).post(routing::create_category),
        )
        .route(
            "/api/categories/{id}",
            put(routing::update_category).delete(routing::delete_category),
        )
        .route("/api/categories/{id}/printers", put(routing::set_category_printers))
        // Rules
        .route("/api/rules", get(routing::list_rules).post(routing::create_rule))
        .route("/api/rules/{id}", put(routing::update_rule).delete(routing::delete_rule))
        // Groups
        .route("/api/groups", get(routing::list_groups).post(routing::create_group))
        .route(
            "/api/groups/{id}",
            put(routing::update_group).delete(routing::delete_group),
        )
        .route("/api/groups/{id}/printers", put(routing::set_group_printers))
        // Configuration
        .route("/api/config", get(config::get_config).put(config::update_config))
        .route("/api/config/reload", post(config::reload_config))
        .route(
            "/api/security/api-key",
            get(config::get_api_key)
                .put(config::update_api_key)
                .delete(config::reset_api_key),
        )
        // Analytics
        .route("/api/analytics", get(analytics::export_analytics))
        .route("/api/analytics/summary", get(analytics::analytics_summary))
        .with_state(state)
}
