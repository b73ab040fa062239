//! Live MJPEG stream and still capture.

use crate::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use vitals_core::camera::{mjpeg_stream, MJPEG_CONTENT_TYPE};

/// GET /video_feed: endless multipart stream; waits out camera gaps instead of ending.
pub async fn video_feed(State(state): State<AppState>) -> Response {
    let retry = Duration::from_millis(state.camera.settings().retry_delay_ms);
    let stream = mjpeg_stream(Arc::clone(&state.camera), retry);
    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// GET /take_picture
pub async fn take_picture(State(state): State<AppState>) -> Json<Value> {
    let camera = Arc::clone(&state.camera);
    match tokio::task::spawn_blocking(move || camera.capture_still()).await {
        Ok(Ok(filename)) => Json(json!({ "status": "success", "filename": filename })),
        Ok(Err(e)) => {
            tracing::warn!(target: "vitals::camera", error = %e, "still capture failed");
            capture_failed()
        }
        Err(e) => {
            tracing::error!(target: "vitals::camera", error = %e, "capture task failed");
            capture_failed()
        }
    }
}

fn capture_failed() -> Json<Value> {
    Json(json!({ "status": "error", "message": "Failed to capture photo" }))
}
