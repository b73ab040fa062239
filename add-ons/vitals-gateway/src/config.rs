//! Gateway settings (`config/vitals.toml` + `VITALS_*` environment).

use serde::Deserialize;
use std::path::PathBuf;
use vitals_core::{CameraSettings, ConfigError, SerialSettings};
use vitals_voice::VoiceSettings;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_addr: String,
    /// Still captures land here and are served under `/static/uploads`.
    pub capture_dir: PathBuf,
    pub camera: CameraSettings,
    pub voice: VoiceSettings,
    pub serial: SerialSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            capture_dir: PathBuf::from("static/uploads"),
            camera: CameraSettings::default(),
            voice: VoiceSettings::default(),
            serial: SerialSettings::default(),
        }
    }
}

impl GatewayConfig {
    pub fn load() -> Result<Self, ConfigError> {
        vitals_core::load_settings()
    }
}
