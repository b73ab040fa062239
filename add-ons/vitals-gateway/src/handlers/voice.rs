//! One listen call and one reply per request; speech plays in the background.

use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

/// GET /voice
pub async fn voice(State(state): State<AppState>) -> Json<Value> {
    let heard = state.voice.listen().await;
    Json(json!({ "recognized_text": heard.text() }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AiRequest {
    #[serde(default)]
    pub text: String,
}

/// POST /ai_response: returns the reply at once; speaking it is not awaited.
pub async fn ai_response(State(state): State<AppState>, body: Option<Json<AiRequest>>) -> Json<Value> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let reply = state.voice.respond(&req.text).await;
    state.voice.speak_in_background(reply.clone());
    Json(json!({ "response": reply }))
}
