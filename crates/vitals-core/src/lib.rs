//! vitals-core: the sensor side of the vitals bridge.
//!
//! Serial telemetry codec, ingestion loop, HTTP relay client, the latest-reading
//! store shared by request handlers, and the camera session.

pub mod camera;
pub mod config;
pub mod ingest;
pub mod relay;
pub mod store;
pub mod telemetry;

pub use camera::{CameraError, CameraSession, CameraSettings, RawFrame};
pub use config::{load_settings, ConfigError, SerialSettings};
pub use ingest::{
    available_ports, ByteSource, IngestConfig, IngestError, IngestLoop, IngestSummary, LineAssembler, PortInfo,
    SerialByteSource, StopSignal, TelemetrySink, DEFAULT_BAUD_RATE,
};
pub use relay::{RelayClient, RelayCounts, RelayError, RelayOutcome, DEFAULT_RELAY_TIMEOUT, DEFAULT_RELAY_URL};
pub use store::{LatestReading, LatestReadingStore, SensorUpdate, ServoCommand, StoreHandle};
pub use telemetry::{classify, DecodeError, LineKind, TelemetryFrame};
