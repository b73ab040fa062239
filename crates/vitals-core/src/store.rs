//! Latest-Reading Store: the single in-memory snapshot of the most recent sensor
//! and actuator state.
//!
//! One instance is created at process start (all zeros, servos unset) and shared
//! by `Arc` with every request handler and in-process ingestion loop. Updates are
//! field-wise merges; nothing is ever reset or removed.

use crate::telemetry::TelemetryFrame;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

/// Servo position used when an actuator command omits an angle.
pub const DEFAULT_SERVO_ANGLE: i32 = 90;

/// Current snapshot served to polling clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestReading {
    pub heart_rate: u32,
    pub spo2: u32,
    pub body_temperature: f64,
    pub environment_temperature: f64,
    pub humidity: f64,
    pub distance: f64,
    pub weight: f64,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo1_angle: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo2_angle: Option<i32>,
}

/// Partial sensor update: every field is optional and only supplied fields are applied.
///
/// Count fields accept either `72` or `72.0` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorUpdate {
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub spo2: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u64", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl From<TelemetryFrame> for SensorUpdate {
    fn from(frame: TelemetryFrame) -> Self {
        Self {
            heart_rate: Some(frame.heart_rate),
            spo2: Some(frame.spo2),
            body_temperature: Some(frame.body_temperature),
            environment_temperature: Some(frame.environment_temperature),
            humidity: Some(frame.humidity),
            distance: Some(frame.distance),
            weight: Some(frame.weight),
            timestamp: Some(frame.timestamp),
        }
    }
}

/// Actuator command body. Missing angles default to 90°.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoCommand {
    #[serde(default = "default_servo", deserialize_with = "lenient_i32")]
    pub servo1: i32,
    #[serde(default = "default_servo", deserialize_with = "lenient_i32")]
    pub servo2: i32,
}

impl Default for ServoCommand {
    fn default() -> Self {
        Self {
            servo1: DEFAULT_SERVO_ANGLE,
            servo2: DEFAULT_SERVO_ANGLE,
        }
    }
}

fn default_servo() -> i32 {
    DEFAULT_SERVO_ANGLE
}

impl LatestReading {
    /// Overwrite only the fields present in `update`.
    pub fn apply(&mut self, update: &SensorUpdate) {
        fn set<T: Copy>(slot: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *slot = v;
            }
        }
        set(&mut self.heart_rate, update.heart_rate);
        set(&mut self.spo2, update.spo2);
        set(&mut self.body_temperature, update.body_temperature);
        set(&mut self.environment_temperature, update.environment_temperature);
        set(&mut self.humidity, update.humidity);
        set(&mut self.distance, update.distance);
        set(&mut self.weight, update.weight);
        set(&mut self.timestamp, update.timestamp);
    }
}

/// Process-wide holder of the one `LatestReading`.
///
/// Writers hold the lock only for a field copy; readers get a `Copy` snapshot.
#[derive(Debug, Default)]
pub struct LatestReadingStore {
    current: RwLock<LatestReading>,
}

/// Shared handle injected into request handlers.
pub type StoreHandle = Arc<LatestReadingStore>;

impl LatestReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> StoreHandle {
        Arc::new(Self::new())
    }

    /// Field-wise merge; visible to every subsequent `read`.
    pub fn merge(&self, update: &SensorUpdate) {
        self.current.write().apply(update);
    }

    /// Update only the servo fields; sensor fields are untouched.
    pub fn set_servo_angles(&self, servo1: i32, servo2: i32) {
        let mut current = self.current.write();
        current.servo1_angle = Some(servo1);
        current.servo2_angle = Some(servo2);
    }

    pub fn read(&self) -> LatestReading {
        *self.current.read()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn truncated(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f.trunc(),
        }
    }
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let Some(n) = Option::<Number>::deserialize(d)? else {
        return Ok(None);
    };
    let v = n.truncated();
    if !(0.0..=f64::from(u32::MAX)).contains(&v) {
        return Err(serde::de::Error::custom(format!("{v} is not a non-negative count")));
    }
    Ok(Some(v as u32))
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let Some(n) = Option::<Number>::deserialize(d)? else {
        return Ok(None);
    };
    match n {
        Number::Int(i) => u64::try_from(i)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("{i} is negative"))),
        Number::Float(f) if f.is_finite() && f >= 0.0 => Ok(Some(f.trunc() as u64)),
        Number::Float(f) => Err(serde::de::Error::custom(format!("{f} is not a timestamp"))),
    }
}

fn lenient_i32<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
    let v = Number::deserialize(d)?.truncated();
    if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&v) {
        return Err(serde::de::Error::custom(format!("{v} is not an angle")));
    }
    Ok(v as i32)
}
