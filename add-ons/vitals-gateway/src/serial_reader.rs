//! In-process serial reader: at most one ingestion loop, merging straight into the store.

use parking_lot::Mutex;
use serde::Serialize;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use vitals_core::{
    ByteSource, IngestError, IngestLoop, IngestSummary, SerialByteSource, SerialSettings, StopSignal, StoreHandle,
};

/// Opens a byte source for a port name.
pub type PortOpener = dyn Fn(&str) -> Result<Box<dyn ByteSource>, IngestError> + Send + Sync;

struct Running {
    port: String,
    stop: StopSignal,
    handle: JoinHandle<IngestSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReaderStatus {
    pub running: bool,
    pub port: Option<String>,
}

pub struct SerialSupervisor {
    store: StoreHandle,
    opener: Box<PortOpener>,
    current: Mutex<Option<Running>>,
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("serial reader already running on {0}")]
    AlreadyRunning(String),

    #[error(transparent)]
    Open(#[from] IngestError),

    #[error("could not spawn reader thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SerialSupervisor {
    /// Supervisor that opens real serial ports.
    pub fn new(store: StoreHandle, settings: SerialSettings) -> Self {
        let timeout = Duration::from_millis(settings.read_timeout_ms);
        let baud = settings.baud_rate;
        Self::with_opener(
            store,
            Box::new(move |port: &str| {
                SerialByteSource::open(port, baud, timeout).map(|s| Box::new(s) as Box<dyn ByteSource>)
            }),
        )
    }

    pub fn with_opener(store: StoreHandle, opener: Box<PortOpener>) -> Self {
        Self {
            store,
            opener,
            current: Mutex::new(None),
        }
    }

    /// Open `port` and start reading on a dedicated thread.
    pub fn start(&self, port: &str) -> Result<(), StartError> {
        let mut current = self.current.lock();
        if let Some(running) = current.as_ref() {
            if !running.handle.is_finished() {
                return Err(StartError::AlreadyRunning(running.port.clone()));
            }
        }
        let source = (self.opener)(port)?;
        let stop = StopSignal::new();
        let ingest = IngestLoop::new(source, self.store.clone(), stop.clone());
        let handle = thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || ingest.run())?;
        tracing::info!(target: "vitals::serial", port, "in-process serial reader started");
        *current = Some(Running {
            port: port.to_string(),
            stop,
            handle,
        });
        Ok(())
    }

    /// Stop and join the reader. `None` when nothing was running.
    pub fn stop(&self) -> Option<IngestSummary> {
        let running = self.current.lock().take()?;
        running.stop.stop();
        match running.handle.join() {
            Ok(summary) => Some(summary),
            Err(_) => {
                tracing::error!(target: "vitals::serial", port = %running.port, "serial reader thread panicked");
                None
            }
        }
    }

    pub fn status(&self) -> ReaderStatus {
        match self.current.lock().as_ref() {
            Some(r) if !r.handle.is_finished() => ReaderStatus {
                running: true,
                port: Some(r.port.clone()),
            },
            _ => ReaderStatus {
                running: false,
                port: None,
            },
        }
    }
}

impl Drop for SerialSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Instant;
    use vitals_core::LatestReadingStore;

    /// One frame, then silence until stopped.
    struct OneFrame(bool);

    impl ByteSource for OneFrame {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if std::mem::replace(&mut self.0, true) {
                return Ok(0);
            }
            let line = b"SENSOR_DATA:72,98,36.6,24.1,55.0,40.0,0.0,1700000000000\n";
            buf[..line.len()].copy_from_slice(line);
            Ok(line.len())
        }
    }

    fn scripted(store: StoreHandle) -> SerialSupervisor {
        SerialSupervisor::with_opener(store, Box::new(|_port: &str| Ok(Box::new(OneFrame(false)) as Box<dyn ByteSource>)))
    }

    #[test]
    fn start_status_stop() {
        let store = LatestReadingStore::shared();
        let readers = scripted(store.clone());
        assert_eq!(readers.status(), ReaderStatus { running: false, port: None });

        readers.start("/dev/ttyUSB0").unwrap();
        assert!(matches!(readers.start("/dev/ttyUSB1"), Err(StartError::AlreadyRunning(p)) if p == "/dev/ttyUSB0"));
        assert_eq!(readers.status().port.as_deref(), Some("/dev/ttyUSB0"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while store.read().heart_rate != 72 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.read().spo2, 98);

        let summary = readers.stop().unwrap();
        assert_eq!(summary.frames, 1);
        assert!(!readers.status().running);
        assert!(readers.stop().is_none());
    }

    #[test]
    fn missing_port_fails_to_open() {
        let readers = SerialSupervisor::new(LatestReadingStore::shared(), SerialSettings::default());
        let err = readers.start("/dev/does-not-exist-vitals").unwrap_err();
        assert!(matches!(err, StartError::Open(IngestError::Open { .. })));
        assert!(!readers.status().running);
    }
}
