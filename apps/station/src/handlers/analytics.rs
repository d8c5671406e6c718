//! # Analytics Handlers

use std::str::FromStr;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use printhub_core::AnalyticsSummary;
use printhub_db::AnalyticsFilter;
use printhub_engine::{EngineError, ExportFormat};

use super::ApiKey;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// `GET /api/analytics?format=csv&since=2026-10-01T00:00:00Z`
pub async fn export_analytics(
    State(state): State<AppState>,
    key: ApiKey,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format {
        Some(ref format) => ExportFormat::from_str(format).map_err(EngineError::from)?,
        None => ExportFormat::default(),
    };
    let filter = AnalyticsFilter {
        since: query.since,
        until: query.until,
        limit: query.limit,
    };

    let export = state
        .control
        .export_analytics(key.as_deref(), format, &filter)
        .await?;
    Ok(([(header::CONTENT_TYPE, export.format.content_type())], export.body).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub since: Option<DateTime<Utc>>,
}

/// `GET /api/analytics/summary?since=...`
pub async fn analytics_summary(
    State(state): State<AppState>,
    key: ApiKey,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<AnalyticsSummary>, ApiError> {
    Ok(Json(
        state
            .control
            .analytics_summary(key.as_deref(), query.since)
            .await?,
    ))
}
