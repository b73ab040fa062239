//! **TelemetryFrame codec**: the line format spoken by the sensor controller.
//!
//! Wire format (one ASCII line, newline-terminated):
//!
//! ```text
//! SENSOR_DATA:<hr>,<spo2>,<bodyTemp>,<envTemp>,<humidity>,<distance>,<weight>,<timestampMs>
//! ```
//!
//! Any line without the marker is diagnostic text from the controller and is never
//! treated as telemetry. A marker line that fails to parse is discarded whole; a
//! frame is never partially constructed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix that identifies a telemetry line.
pub const FRAME_MARKER: &str = "SENSOR_DATA:";

/// Field separator after the marker.
pub const FIELD_DELIMITER: char = ',';

/// Number of fields a telemetry line must carry.
pub const FIELD_COUNT: usize = 8;

/// One decoded set of sensor values from a single serial line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Beats per minute; 0 when no finger is on the sensor.
    pub heart_rate: u32,
    /// Blood oxygen saturation, percent (0–100).
    pub spo2: u32,
    /// Body temperature, °C.
    pub body_temperature: f64,
    /// Ambient temperature, °C.
    pub environment_temperature: f64,
    /// Relative humidity, %.
    pub humidity: f64,
    /// Ultrasonic distance, cm.
    pub distance: f64,
    /// Load cell weight, g.
    pub weight: f64,
    /// Producer-supplied milliseconds since epoch.
    pub timestamp: u64,
}

/// Why a marker line was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("line does not start with the SENSOR_DATA: marker")]
    MissingMarker,

    #[error("expected 8 fields, got {0}")]
    FieldCount(usize),

    #[error("field {field} is not a valid number: {token:?}")]
    InvalidNumber { field: &'static str, token: String },

    #[error("field {field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Classification of one serial line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// A well-formed telemetry frame.
    Telemetry(TelemetryFrame),
    /// A marker line that could not be decoded.
    Malformed(DecodeError),
    /// Anything else: controller boot messages, debug prints.
    Diagnostic,
}

/// Classify a line without ever failing. Callers log `Malformed` and continue.
pub fn classify(line: &str) -> LineKind {
    let line = line.trim();
    if !line.starts_with(FRAME_MARKER) {
        return LineKind::Diagnostic;
    }
    match TelemetryFrame::decode(line) {
        Ok(frame) => LineKind::Telemetry(frame),
        Err(e) => LineKind::Malformed(e),
    }
}

impl TelemetryFrame {
    /// Decode one line. Surrounding whitespace (including a trailing `\r`) is ignored.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let body = line
            .trim()
            .strip_prefix(FRAME_MARKER)
            .ok_or(DecodeError::MissingMarker)?;

        let fields: Vec<&str> = body.trim().split(FIELD_DELIMITER).map(str::trim).collect();
        if fields.len() != FIELD_COUNT {
            return Err(DecodeError::FieldCount(fields.len()));
        }

        let heart_rate = truncated_count("heart_rate", fields[0], None)?;
        let spo2 = truncated_count("spo2", fields[1], Some(100.0))?;

        Ok(Self {
            heart_rate,
            spo2,
            body_temperature: real("body_temperature", fields[2])?,
            environment_temperature: real("environment_temperature", fields[3])?,
            humidity: real("humidity", fields[4])?,
            distance: real("distance", fields[5])?,
            weight: real("weight", fields[6])?,
            timestamp: fields[7]
                .parse::<u64>()
                .map_err(|_| invalid("timestamp", fields[7]))?,
        })
    }

    /// Encode back to the wire line (without the trailing newline).
    pub fn encode(&self) -> String {
        format!(
            "{FRAME_MARKER}{},{},{},{},{},{},{},{}",
            self.heart_rate,
            self.spo2,
            self.body_temperature,
            self.environment_temperature,
            self.humidity,
            self.distance,
            self.weight,
            self.timestamp
        )
    }
}

fn invalid(field: &'static str, token: &str) -> DecodeError {
    DecodeError::InvalidNumber {
        field,
        token: token.to_string(),
    }
}

/// Producers sometimes send counts as `72.0`; parse as float and truncate.
fn truncated_count(field: &'static str, token: &str, max: Option<f64>) -> Result<u32, DecodeError> {
    let value = real(field, token)?;
    if value < 0.0 || max.is_some_and(|m| value > m) || value > f64::from(u32::MAX) {
        return Err(DecodeError::OutOfRange { field, value });
    }
    Ok(value.trunc() as u32)
}

fn real(field: &'static str, token: &str) -> Result<f64, DecodeError> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(field, token))
}
