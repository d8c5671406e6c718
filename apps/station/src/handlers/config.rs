//! # Configuration Handlers
//!
//! `PUT /api/config` takes a partial document that is deep-merged into the
//! running configuration. The `security` section is only changed through
//! `/api/security/api-key`.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use printhub_engine::security::ApiKeyInfo;
use printhub_engine::StationConfig;

use super::ApiKey;
use crate::error::ApiError;
use crate::AppState;

/// `GET /api/config` (secrets masked)
pub async fn get_config(
    State(state): State<AppState>,
    key: ApiKey,
) -> Result<Json<StationConfig>, ApiError> {
    Ok(Json(state.control.get_config(key.as_deref()).await?))
}

/// `PUT /api/config`
pub async fn update_config(
    State(state): State<AppState>,
    key: ApiKey,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<StationConfig>, ApiError> {
    if !patch.is_object() {
        return Err(ApiError::validation("configuration patch must be a JSON object"));
    }
    Ok(Json(state.control.update_config(key.as_deref(), patch).await?))
}

/// `POST /api/config/reload`
pub async fn reload_config(
    State(state): State<AppState>,
    key: ApiKey,
) -> Result<Json<StationConfig>, ApiError> {
    Ok(Json(state.control.reload_config(key.as_deref()).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApiKey {
    pub api_key: String,
}

/// `GET /api/security/api-key`
pub async fn get_api_key(
    State(state): State<AppState>,
    key: ApiKey,
) -> Result<Json<ApiKeyInfo>, ApiError> {
    Ok(Json(state.control.get_api_key(key.as_deref()).await?))
}

/// `PUT /api/security/api-key`
pub async fn update_api_key(
    State(state): State<AppState>,
    key: ApiKey,
    Json(body): Json<NewApiKey>,
) -> Result<Json<ApiKeyInfo>, ApiError> {
    Ok(Json(
        state
            .control
            .update_api_key(key.as_deref(), &body.api_key)
            .await?,
    ))
}

/// `DELETE /api/security/api-key`: back to the default key.
pub async fn reset_api_key(
    State(state): State<AppState>,
    key: ApiKey,
) -> Result<Json<ApiKeyInfo>, ApiError> {
    Ok(Json(state.control.reset_api_key(key.as_deref()).await?))
}
