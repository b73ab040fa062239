//! vitals-gateway: the HTTP face of the bridge.
//!
//! Hosts the latest-reading store (telemetry ingress, actuator commands, snapshot),
//! the camera session (MJPEG stream, stills), the voice pipeline, and an optional
//! in-process serial reader. Handlers get every shared resource through [`AppState`].

mod config;
mod handlers;
mod serial_reader;

use anyhow::Context;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use config::GatewayConfig;
use serial_reader::SerialSupervisor;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitals_core::camera::opener_for;
use vitals_core::{CameraSession, LatestReadingStore, StoreHandle};
use vitals_voice::VoicePipeline;

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub camera: Arc<CameraSession>,
    pub voice: VoicePipeline,
    pub serial: Arc<SerialSupervisor>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[vitals-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::load().context("loading gateway settings")?;

    let store = LatestReadingStore::shared();
    let camera = Arc::new(CameraSession::new(
        opener_for(&config.camera.backend),
        config.camera.clone(),
        &config.capture_dir,
    ));
    // STT/TTS clients are blocking reqwest clients; build them off the async workers.
    let voice_settings = config.voice.clone();
    let voice = tokio::task::spawn_blocking(move || VoicePipeline::from_settings(&voice_settings))
        .await?
        .context("building voice pipeline")?;
    let serial = Arc::new(SerialSupervisor::new(Arc::clone(&store), config.serial.clone()));

    let state = AppState {
        store,
        camera: Arc::clone(&camera),
        voice,
        serial: Arc::clone(&serial),
    };
    let app = build_app(state, &config.capture_dir);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(
        addr = %config.bind_addr,
        camera_backend = %config.camera.backend,
        capture_dir = %config.capture_dir.display(),
        "vitals gateway listening"
    );

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown initiated (Ctrl+C received)");
        }
    }

    if let Some(summary) = tokio::task::spawn_blocking(move || serial.stop()).await? {
        tracing::info!(frames = summary.frames, "in-process serial reader stopped");
    }
    camera.cleanup();
    tracing::info!("vitals gateway stopped");
    Ok(())
}

fn build_app(state: AppState, capture_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/sensor-data", post(handlers::sensors::receive_data))
        .route("/set-servos", post(handlers::sensors::set_servos))
        .route("/latest", get(handlers::sensors::latest))
        .route("/video_feed", get(handlers::camera::video_feed))
        .route("/take_picture", get(handlers::camera::take_picture))
        .route("/voice", get(handlers::voice::voice))
        .route("/ai_response", post(handlers::voice::ai_response))
        .route("/api/ports", get(handlers::serial::ports))
        .route("/api/start-serial-reader", post(handlers::serial::start_reader))
        .route("/api/stop-serial-reader", post(handlers::serial::stop_reader))
        .route("/api/serial-reader", get(handlers::serial::reader_status))
        .nest_service("/static/uploads", ServeDir::new(capture_dir))
        .layer(cors)
        .with_state(state)
}
