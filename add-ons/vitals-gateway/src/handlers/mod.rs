//! Route handlers, one module per device or concern.

pub mod camera;
pub mod sensors;
pub mod serial;
pub mod voice;

use axum::Json;
use serde_json::{json, Value};

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
