//! Latest-reading ingress, actuator commands and the snapshot read.

use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use vitals_core::{LatestReading, SensorUpdate, ServoCommand};

/// POST /sensor-data: merge any subset of sensor fields.
pub async fn receive_data(State(state): State<AppState>, Json(update): Json<SensorUpdate>) -> Json<Value> {
    state.store.merge(&update);
    Json(json!({ "status": "success" }))
}

/// POST /set-servos: missing angles default to 90.
pub async fn set_servos(State(state): State<AppState>, body: Option<Json<ServoCommand>>) -> Json<Value> {
    let cmd = body.map(|Json(b)| b).unwrap_or_default();
    state.store.set_servo_angles(cmd.servo1, cmd.servo2);
    tracing::debug!(servo1 = cmd.servo1, servo2 = cmd.servo2, "servo angles updated");
    Json(json!({ "status": "updated" }))
}

/// GET /latest
pub async fn latest(State(state): State<AppState>) -> Json<LatestReading> {
    Json(state.store.read())
}
