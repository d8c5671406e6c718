//! # Printer Handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use printhub_core::{Printer, PrinterStatus};
use printhub_db::NewPrinter;

use super::ApiKey;
use crate::error::ApiError;
use crate::AppState;

/// `GET /api/printers`
pub async fn list_printers(
    State(state): State<AppState>,
    key: ApiKey,
) -> Result<Json<Vec<Printer>>, ApiError> {
    Ok(Json(state.control.list_printers(key.as_deref()).await?))
}

/// `POST /api/printers`: create or replace by name.
pub async fn save_printer(
    State(state): State<AppState>,
    key: ApiKey,
    Json(printer): Json<NewPrinter>,
) -> Result<Json<Printer>, ApiError> {
    Ok(Json(state.control.save_printer(key.as_deref(), printer).await?))
}

/// `DELETE /api/printers/{name}`
pub async fn delete_printer(
    State(state): State<AppState>,
    key: ApiKey,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.control.delete_printer(key.as_deref(), &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/printers/status`
pub async fn printer_statuses(
    State(state): State<AppState>,
    key: ApiKey,
) -> Result<Json<Vec<PrinterStatus>>, ApiError> {
    Ok(Json(state.control.printer_statuses(key.as_deref()).await?))
}
