//! Serial Ingestion Loop.
//!
//! ```text
//! Connecting ──open ok──▶ Reading ⇄ (line) ──stop flag──▶ Closed
//!     └──open error──▶ Failed (IngestError::Open, fatal to the process)
//! ```
//!
//! The loop owns the port. Each iteration reads whatever is pending (bounded by the
//! port read timeout), assembles complete lines, decodes them and hands frames to a
//! [`TelemetrySink`]. Read errors are logged and followed by a short backoff; they
//! never end the loop. The stop flag is checked between iterations, and the port is
//! dropped when [`IngestLoop::run`] returns, whichever iteration was in flight.

use crate::relay::RelayOutcome;
use crate::telemetry::{classify, LineKind, TelemetryFrame};
use serde::Serialize;
use serialport::{SerialPort, SerialPortType};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Baud rate of the sensor controller firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Longest line accepted; a longer one is discarded whole, up to its newline.
const MAX_LINE_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("could not open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial port enumeration failed: {0}")]
    Enumerate(#[source] serialport::Error),
}

/// Receives every successfully decoded frame.
pub trait TelemetrySink: Send + Sync {
    fn deliver(&self, frame: &TelemetryFrame) -> RelayOutcome;
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn deliver(&self, frame: &TelemetryFrame) -> RelayOutcome {
        (**self).deliver(frame)
    }
}

/// Source of raw bytes. `Ok(0)` means nothing arrived within the read timeout.
pub trait ByteSource: Send {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_chunk(buf)
    }
}

/// A serial port opened at a fixed baud rate.
pub struct SerialByteSource {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialByteSource {
    pub fn open(name: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, IngestError> {
        let port = serialport::new(name, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|source| IngestError::Open {
                port: name.to_string(),
                source,
            })?;
        info!(target: "vitals::serial", port = name, baud_rate, "serial port opened");
        Ok(Self {
            name: name.to_string(),
            port,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ByteSource for SerialByteSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl Drop for SerialByteSource {
    fn drop(&mut self) {
        info!(target: "vitals::serial", port = %self.name, "serial connection closed");
    }
}

/// Splits a byte stream into text lines across arbitrary read boundaries.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
    /// Current line passed `MAX_LINE_LEN`; skip to the next newline.
    overflowed: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line completed by them, trimmed, blanks skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if std::mem::take(&mut self.overflowed) {
                    continue;
                }
                let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                if !line.is_empty() {
                    lines.push(line);
                }
            } else if self.overflowed {
                continue;
            } else if self.pending.len() < MAX_LINE_LEN {
                self.pending.push(b);
            } else {
                debug!(target: "vitals::serial", limit = MAX_LINE_LEN, "overlong serial line discarded");
                self.pending.clear();
                self.overflowed = true;
            }
        }
        lines
    }

    /// Bytes received since the last newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Timing knobs for the loop.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Sleep when a read returned nothing.
    pub idle_sleep: Duration,
    /// Sleep after a read error before trying again.
    pub error_backoff: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Counters reported when the loop closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub lines: u64,
    pub frames: u64,
    pub diagnostics: u64,
    pub malformed: u64,
    pub relayed: u64,
    pub dropped: u64,
    pub read_errors: u64,
}

/// Cooperative stop signal shared with whoever may end the loop.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct IngestLoop<S: ByteSource, K: TelemetrySink> {
    source: S,
    sink: K,
    stop: StopSignal,
    config: IngestConfig,
    assembler: LineAssembler,
    summary: IngestSummary,
}

impl<S: ByteSource, K: TelemetrySink> IngestLoop<S, K> {
    pub fn new(source: S, sink: K, stop: StopSignal) -> Self {
        Self {
            source,
            sink,
            stop,
            config: IngestConfig::default(),
            assembler: LineAssembler::new(),
            summary: IngestSummary::default(),
        }
    }

    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    /// Run until the stop signal is raised; the source is released on return.
    pub fn run(mut self) -> IngestSummary {
        let mut buf = [0u8; 256];
        info!(target: "vitals::serial", "reading sensor data");

        while !self.stop.is_stopped() {
            match self.source.read_chunk(&mut buf) {
                Ok(0) => thread::sleep(self.config.idle_sleep),
                Ok(n) => {
                    for line in self.assembler.push(&buf[..n]) {
                        self.handle_line(&line);
                    }
                }
                Err(e) => {
                    self.summary.read_errors += 1;
                    error!(target: "vitals::serial", error = %e, "serial read failed");
                    thread::sleep(self.config.error_backoff);
                }
            }
        }

        let summary = self.summary;
        info!(
            target: "vitals::serial",
            lines = summary.lines,
            frames = summary.frames,
            relayed = summary.relayed,
            dropped = summary.dropped,
            malformed = summary.malformed,
            "ingestion stopped"
        );
        summary
    }

    fn handle_line(&mut self, line: &str) {
        self.summary.lines += 1;
        match classify(line) {
            LineKind::Telemetry(frame) => {
                self.summary.frames += 1;
                debug!(
                    target: "vitals::serial",
                    heart_rate = frame.heart_rate,
                    spo2 = frame.spo2,
                    body_temperature = frame.body_temperature,
                    "frame decoded"
                );
                if self.sink.deliver(&frame).is_ack() {
                    self.summary.relayed += 1;
                } else {
                    self.summary.dropped += 1;
                }
            }
            LineKind::Malformed(e) => {
                self.summary.malformed += 1;
                warn!(target: "vitals::serial", error = %e, raw = line, "discarding malformed frame");
            }
            LineKind::Diagnostic => {
                self.summary.diagnostics += 1;
                info!(target: "vitals::serial", "controller: {}", line);
            }
        }
    }
}

/// One OS-visible serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub device: String,
    pub description: String,
    pub hwid: String,
}

/// Enumerate serial ports the OS knows about.
pub fn available_ports() -> Result<Vec<PortInfo>, IngestError> {
    let ports = serialport::available_ports().map_err(IngestError::Enumerate)?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let (description, hwid) = match p.port_type {
                SerialPortType::UsbPort(usb) => (
                    usb.product.unwrap_or_else(|| "USB serial".to_string()),
                    format!(
                        "USB VID:PID={:04X}:{:04X} SER={}",
                        usb.vid,
                        usb.pid,
                        usb.serial_number.unwrap_or_default()
                    ),
                ),
                SerialPortType::BluetoothPort => ("Bluetooth".to_string(), "n/a".to_string()),
                SerialPortType::PciPort => ("PCI".to_string(), "n/a".to_string()),
                SerialPortType::Unknown => ("n/a".to_string(), "n/a".to_string()),
            };
            PortInfo {
                device: p.port_name,
                description,
                hwid,
            }
        })
        .collect())
}
