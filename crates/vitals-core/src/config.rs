//! Layered settings: built-in defaults, then an optional TOML file, then environment.
//!
//! Environment keys use the `VITALS` prefix and `__` for nesting, e.g.
//! `VITALS_CAMERA__PRIMARY_INDEX=1` or `VITALS_BIND_ADDR=127.0.0.1:8080`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ingest::DEFAULT_BAUD_RATE;

/// Environment prefix for every setting.
pub const ENV_PREFIX: &str = "VITALS";

/// Env var naming the settings file.
pub const CONFIG_PATH_VAR: &str = "VITALS_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config/vitals.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Bound on one serial read; a stop request is noticed within this.
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 500,
        }
    }
}

/// Path of the settings file: `VITALS_CONFIG` or `config/vitals.toml`.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load `T` from [`config_path`] and the `VITALS_*` environment.
pub fn load_settings<T: DeserializeOwned>() -> Result<T, ConfigError> {
    load_settings_from(&config_path(), ENV_PREFIX)
}

/// Load `T` from `path` (skipped when absent) and environment keys under `prefix`.
/// Missing keys fall back to `T`'s serde defaults.
pub fn load_settings_from<T: DeserializeOwned>(path: &Path, prefix: &str) -> Result<T, ConfigError> {
    let builder = config::Config::builder();
    let builder = if path.exists() {
        builder.add_source(config::File::from(path))
    } else {
        builder
    };
    let built = builder
        .add_source(
            config::Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(built.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraSettings;

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    struct Sample {
        bind_addr: Option<String>,
        camera: CameraSettings,
        serial: SerialSettings,
    }

    #[test]
    fn defaults_without_file() {
        let s: Sample =
            load_settings_from(Path::new("/nonexistent/vitals.toml"), "VITALS_TEST_UNUSED").unwrap();
        assert!(s.bind_addr.is_none());
        assert_eq!(s.camera.primary_index, 0);
        assert_eq!(s.camera.secondary_index, 2);
        assert_eq!(s.serial.baud_rate, 115_200);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vitals.toml");
        std::fs::write(
            &path,
            "bind_addr = \"127.0.0.1:9000\"\n[camera]\nbackend = \"test-pattern\"\nsecondary_index = 1\n",
        )
        .unwrap();
        let s: Sample = load_settings_from(&path, "VITALS_TEST_UNUSED").unwrap();
        assert_eq!(s.bind_addr.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(s.camera.backend, "test-pattern");
        assert_eq!(s.camera.secondary_index, 1);
        assert_eq!(s.camera.jpeg_quality, 80);
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vitals.toml");
        std::fs::write(&path, "[camera]\nprimary_index = 3\nsecondary_index = 4\n").unwrap();
        std::env::set_var("VITALSENVTEST_CAMERA__PRIMARY_INDEX", "7");
        std::env::set_var("VITALSENVTEST_SERIAL__BAUD_RATE", "9600");
        let s: Sample = load_settings_from(&path, "VITALSENVTEST").unwrap();
        std::env::remove_var("VITALSENVTEST_CAMERA__PRIMARY_INDEX");
        std::env::remove_var("VITALSENVTEST_SERIAL__BAUD_RATE");

        assert_eq!(s.camera.primary_index, 7);
        assert_eq!(s.camera.secondary_index, 4);
        assert_eq!(s.serial.baud_rate, 9600);
    }
}
