//! # Routing Handlers
//!
//! Categories, rules and groups. Every successful change rebuilds the
//! routing table before the response is sent.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use printhub_core::{GroupMember, PrinterCategory, PrinterGroup, RoutingRule};
use printhub_db::{CategoryUpdate, GroupUpdate, NewCategory, NewGroup, NewRule, RuleUpdate};

use super::ApiKey;
use crate::error::ApiError;
use crate::AppState;

// =============================================================================
// Categories
// =============================================================================

pub async fn list_categories(
    State(state): State<AppState>,
    key: ApiKey,
) -> Result<Json<Vec<PrinterCategory>>, ApiError> {
    Ok(Json(state.control.list_categories(key.as_deref()).await?))
}

pub async fn create_category(
    State(state): State<AppState>,
    key: ApiKey,
    Json(category): Json<NewCategory>,
) -> Result<(StatusCode, Json<PrinterCategory>), ApiError> {
    let created = state.control.create_category(key.as_deref(), category).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_category(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
    Json(update): Json<CategoryUpdate>,
) -> Result<Json<PrinterCategory>, ApiError> {
    Ok(Json(state.control.update_category(key.as_deref(), &id, update).await?))
}

/// `PUT /api/categories/{id}/printers` with `[{"printer": "P1", "priority": 1}]`
pub async fn set_category_printers(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
    Json(members): Json<Vec<GroupMember>>,
) -> Result<Json<PrinterCategory>, ApiError> {
    Ok(Json(
        state
            .control
            .set_category_printers(key.as_deref(), &id, members)
            .await?,
    ))
}

pub async fn delete_category(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.control.delete_category(key.as_deref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Rules
// =============================================================================

pub async fn list_rules(
    State(state): State<AppState>,
    key: ApiKey,
) -> Result<Json<Vec<RoutingRule>>, ApiError> {
    Ok(Json(state.control.list_rules(key.as_deref()).await?))
}

pub async fn create_rule(
    State(state): State<AppState>,
    key: ApiKey,
    Json(rule): Json<NewRule>,
) -> Result<(StatusCode, Json<RoutingRule>), ApiError> {
    let created = state.control.create_rule(key.as_deref(), rule).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_rule(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
    Json(update): Json<RuleUpdate>,
) -> Result<Json<RoutingRule>, ApiError> {
    Ok(Json(state.control.update_rule(key.as_deref(), &id, update).await?))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.control.delete_rule(key.as_deref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Groups
// =============================================================================

pub async fn list_groups(
    State(state): State<AppState>,
    key: ApiKey,
) -> Result<Json<Vec<PrinterGroup>>, ApiError> {
    Ok(Json(state.control.list_groups(key.as_deref()).await?))
}

pub async fn create_group(
    State(state): State<AppState>,
    key: ApiKey,
    Json(group): Json<NewGroup>,
) -> Result<(StatusCode, Json<PrinterGroup>), ApiError> {
    let created = state.control.create_group(key.as_deref(), group).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_group(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
    Json(update): Json<GroupUpdate>,
) -> Result<Json<PrinterGroup>, ApiError> {
    Ok(Json(state.control.update_group(key.as_deref(), &id, update).await?))
}

pub async fn set_group_printers(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
    Json(members): Json<Vec<GroupMember>>,
) -> Result<Json<PrinterGroup>, ApiError> {
    Ok(Json(
        state
            .control
            .set_group_printers(key.as_deref(), &id, members)
            .await?,
    ))
}

pub async fn delete_group(
    State(state): State<AppState>,
    key: ApiKey,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.control.delete_group(key.as_deref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
