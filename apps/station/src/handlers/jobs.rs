//! # Job Handlers
//!
//! Submission takes the job content as base64 in JSON:
//! ```json
//! {
//!   "fileName": "order-42.txt",
//!   "content": "SGVsbG8=",
//!   "metadata": { "station": "kitchen", "orderType": "dine_in" },
//!   "priority": 5
//! }
//! ```

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use printhub_core::{JobStatus, PrintJob};
use printhub_db::JobFilter;
use printhub_engine::SubmitReceipt;
use printhub_sync::JobSubmission;

use super::ApiKey;
use crate::error::ApiError;
use crate::AppState;

/// `POST /api/jobs`
pub async fn submit_job(
    State(state): State<AppState>,
    key: ApiKey,
    Json(submission): Json<JobSubmission>,
) -> Result<(StatusCode, Json<SubmitReceipt>), ApiError> {
    debug!(file_name = %submission.file_name, "submit_job request");
    state.control.authorize(key.as_deref()).await?;
    let job = submission.into_new_job()?;
    let receipt = state.control.submit_job(key.as_deref(), job).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

#[derive(Debug, Default, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// `GET /api/jobs?status=failed&limit=20&offset=0`
pub async fn list_jobs(
    State(state): State<AppState>,
    key: ApiKey,
    Query(query): Query<JobQuery>,
) -> Result<Json<Vec<PrintJob>>, ApiError> {
    let defaults = JobFilter::default();
    let filter = JobFilter {
        status: query.status,
        limit: query.limit.unwrap_or(defaults.limit),
        offset: query.offset.unwrap_or(defaults.offset),
    };
    Ok(Json(state.control.list_jobs(key.as_deref(), &filter).await?))
}

/// `GET /api/jobs/{id}`
pub async fn get_job(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
) -> Result<Json<PrintJob>, ApiError> {
    Ok(Json(state.control.get_job(key.as_deref(), &id).await?))
}

/// `POST /api/jobs/{id}/cancel`
pub async fn cancel_job(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
) -> Result<Json<PrintJob>, ApiError> {
    Ok(Json(state.control.cancel_job(key.as_deref(), &id).await?))
}

/// `POST /api/jobs/{id}/acknowledge`: operator accepts a failure.
pub async fn acknowledge_job(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
) -> Result<Json<PrintJob>, ApiError> {
    Ok(Json(state.control.acknowledge_job(key.as_deref(), &id).await?))
}

/// `POST /api/jobs/{id}/requeue`
pub async fn requeue_job(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
) -> Result<Json<PrintJob>, ApiError> {
    Ok(Json(state.control.requeue_job(key.as_deref(), &id).await?))
}
