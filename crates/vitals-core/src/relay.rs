//! Telemetry Relay Client: forwards decoded frames to the store's HTTP ingress.
//!
//! Delivery is fire-and-forget and at-most-once: a refused connection, a timeout
//! or a non-2xx status is logged and the payload dropped. The next frame supersedes
//! it within a second, so there is no retry queue.

use crate::ingest::TelemetrySink;
use crate::store::{LatestReadingStore, SensorUpdate};
use crate::telemetry::TelemetryFrame;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default ingress endpoint of the gateway.
pub const DEFAULT_RELAY_URL: &str = "http://localhost:5000/sensor-data";

/// Default bound on one relay call.
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one relay attempt. Never an error: every outcome is non-fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Peer answered 2xx.
    Ack,
    /// Connection refused, DNS failure or timeout.
    Unreachable(String),
    /// Peer answered with a non-2xx status.
    Rejected(u16),
}

impl RelayOutcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, RelayOutcome::Ack)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("HTTP client could not be built: {0}")]
    Client(#[from] reqwest::Error),
}

/// Running totals for operators; logged when an ingestion loop closes.
#[derive(Debug, Default)]
pub struct RelayStats {
    acked: AtomicU64,
    unreachable: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayCounts {
    pub acked: u64,
    pub unreachable: u64,
    pub rejected: u64,
}

impl RelayStats {
    fn record(&self, outcome: &RelayOutcome) {
        let counter = match outcome {
            RelayOutcome::Ack => &self.acked,
            RelayOutcome::Unreachable(_) => &self.unreachable,
            RelayOutcome::Rejected(_) => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayCounts {
        RelayCounts {
            acked: self.acked.load(Ordering::Relaxed),
            unreachable: self.unreachable.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Blocking HTTP relay. Lives on the ingestion thread, outside any async runtime.
#[derive(Debug)]
pub struct RelayClient {
    url: String,
    client: reqwest::blocking::Client,
    stats: RelayStats,
}

impl RelayClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            stats: RelayStats::default(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `payload` as JSON to the ingress endpoint.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> RelayOutcome {
        let outcome = match self.client.post(&self.url).json(payload).send() {
            Ok(res) if res.status().is_success() => RelayOutcome::Ack,
            Ok(res) => RelayOutcome::Rejected(res.status().as_u16()),
            Err(e) => RelayOutcome::Unreachable(e.to_string()),
        };
        self.stats.record(&outcome);
        match &outcome {
            RelayOutcome::Ack => debug!(target: "vitals::relay", url = %self.url, "relayed"),
            RelayOutcome::Rejected(status) => {
                warn!(target: "vitals::relay", url = %self.url, status, "relay rejected")
            }
            RelayOutcome::Unreachable(reason) => {
                warn!(target: "vitals::relay", url = %self.url, %reason, "relay unreachable")
            }
        }
        outcome
    }

    /// Forward an actuator or partial sensor update.
    pub fn send_update(&self, update: &SensorUpdate) -> RelayOutcome {
        self.send(update)
    }

    pub fn counts(&self) -> RelayCounts {
        self.stats.snapshot()
    }
}

impl TelemetrySink for RelayClient {
    fn deliver(&self, frame: &TelemetryFrame) -> RelayOutcome {
        self.send(frame)
    }
}

/// In-process sink: the gateway's own serial reader merges straight into the store.
impl TelemetrySink for LatestReadingStore {
    fn deliver(&self, frame: &TelemetryFrame) -> RelayOutcome {
        self.merge(&SensorUpdate::from(*frame));
        RelayOutcome::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Answers exactly one request with `status_line` and returns the request text.
    fn one_shot_server(status_line: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/sensor-data", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = Vec::new();
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let len = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + len {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    fn frame() -> TelemetryFrame {
        TelemetryFrame::decode("SENSOR_DATA:72,98,36.6,24.1,55.0,40.0,0.0,1700000000000").unwrap()
    }

    #[test]
    fn ack_on_2xx_and_posts_json() {
        let (url, server) = one_shot_server("HTTP/1.1 200 OK");
        let relay = RelayClient::new(url, Duration::from_secs(2)).unwrap();
        assert_eq!(relay.deliver(&frame()), RelayOutcome::Ack);

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /sensor-data"));
        assert!(request.contains("\"heart_rate\":72"));
        assert_eq!(relay.counts().acked, 1);
    }

    #[test]
    fn partial_update_carries_only_supplied_fields() {
        let (url, server) = one_shot_server("HTTP/1.1 204 No Content");
        let relay = RelayClient::new(url, Duration::from_secs(2)).unwrap();
        let update = SensorUpdate {
            humidity: Some(41.5),
            ..Default::default()
        };
        assert_eq!(relay.send_update(&update), RelayOutcome::Ack);

        let request = server.join().unwrap();
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        assert_eq!(body, r#"{"humidity":41.5}"#);
    }

    #[test]
    fn rejected_on_non_2xx() {
        let (url, server) = one_shot_server("HTTP/1.1 500 Internal Server Error");
        let relay = RelayClient::new(url, Duration::from_secs(2)).unwrap();
        assert_eq!(relay.deliver(&frame()), RelayOutcome::Rejected(500));
        server.join().unwrap();
        assert_eq!(relay.counts().rejected, 1);
    }

    #[test]
    fn unreachable_when_nobody_listens() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let relay =
            RelayClient::new(format!("http://127.0.0.1:{port}/sensor-data"), Duration::from_millis(500)).unwrap();
        assert!(matches!(relay.deliver(&frame()), RelayOutcome::Unreachable(_)));
        assert_eq!(relay.counts().unreachable, 1);
    }

    #[test]
    fn store_sink_merges_directly() {
        let store = LatestReadingStore::new();
        assert!(store.deliver(&frame()).is_ack());
        assert_eq!(store.read().spo2, 98);
    }
}
