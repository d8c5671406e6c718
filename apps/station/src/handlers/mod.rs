//! # HTTP Handlers
//!
//! Each handler pulls the `x-api-key` header through [`ApiKey`] and hands it
//! to the [`ControlPlane`](printhub_engine::ControlPlane), which decides.
//! Handlers never check the key themselves.
//!
//! ```text
//!   request ──► ApiKey(Option<String>) ──► ControlPlane::op(key, ...) ──► Json
//!                                                   │
//!                                                   └── EngineError ──► ApiError
//! ```

pub mod analytics;
pub mod config;
pub mod jobs;
pub mod printers;
pub mod routing;

use std::convert::Infallible;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::{AppState, API_KEY_HEADER};

/// The caller's API key, if the header was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey(pub Option<String>);

impl ApiKey {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(ApiKey(key))
    }
}

/// `GET /health`: liveness, no key required.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.control.health().await;
    let status = if report.database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
