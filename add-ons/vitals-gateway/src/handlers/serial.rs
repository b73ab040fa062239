//! Port discovery and control of the in-process serial reader.

use crate::serial_reader::StartError;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn api_error(status: StatusCode, message: impl ToString) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.to_string() })))
}

/// GET /api/ports
pub async fn ports() -> ApiResult {
    match tokio::task::spawn_blocking(vitals_core::available_ports).await {
        Ok(Ok(ports)) => Ok(Json(json!({ "ports": ports }))),
        Ok(Err(e)) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub port: Option<String>,
}

/// POST /api/start-serial-reader
pub async fn start_reader(State(state): State<AppState>, body: Option<Json<StartRequest>>) -> ApiResult {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let Some(port) = req.port.filter(|p| !p.trim().is_empty()) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "No port selected"));
    };
    let readers = Arc::clone(&state.serial);
    let requested = port.clone();
    match tokio::task::spawn_blocking(move || readers.start(&requested)).await {
        Ok(Ok(())) => Ok(Json(json!({ "status": "started", "port": port }))),
        Ok(Err(e @ StartError::AlreadyRunning(_))) => Err(api_error(StatusCode::CONFLICT, e)),
        Ok(Err(e)) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// POST /api/stop-serial-reader: cooperative stop, joined before answering.
pub async fn stop_reader(State(state): State<AppState>) -> ApiResult {
    let readers = Arc::clone(&state.serial);
    let summary = tokio::task::spawn_blocking(move || readers.stop())
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(json!({ "status": "stopped", "summary": summary })))
}

/// GET /api/serial-reader
pub async fn reader_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.serial.status()))
}
