//! Camera Session: exclusive owner of one video-capture device.
//!
//! The handle is opened lazily on the first frame or still request, trying the
//! primary index and then the secondary one. When both fail the session stays
//! empty and the next call tries again from scratch. [`CameraSession::cleanup`]
//! releases the handle; it is safe to call any number of times.

mod mjpeg;
mod test_pattern;
#[cfg(feature = "webcam")]
mod webcam;

pub use mjpeg::{mjpeg_part, mjpeg_stream, MJPEG_BOUNDARY, MJPEG_CONTENT_TYPE};
pub use test_pattern::TestPatternOpener;
#[cfg(feature = "webcam")]
pub use webcam::WebcamOpener;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("no camera could be opened")]
    Unavailable,

    #[error("camera {index} failed to open: {reason}")]
    Open { index: u32, reason: String },

    #[error("frame read failed: {0}")]
    Read(String),

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("could not write capture: {0}")]
    Io(#[from] std::io::Error),

    #[error("camera backend {0:?} is not available in this build")]
    UnknownBackend(String),
}

/// One decoded frame, packed RGB8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// An open capture device.
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> Result<RawFrame, CameraError>;

    /// `false` once the device has gone away; the session then drops it.
    fn is_open(&self) -> bool {
        true
    }
}

/// Opens capture devices by index.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError>;

    fn backend(&self) -> &'static str;
}

/// Opener used when the configured backend is not compiled in: every open fails.
#[derive(Debug, Clone)]
pub struct MissingBackend(pub String);

impl DeviceOpener for MissingBackend {
    fn open(&self, _index: u32) -> Result<Box<dyn CaptureDevice>, CameraError> {
        Err(CameraError::UnknownBackend(self.0.clone()))
    }

    fn backend(&self) -> &'static str {
        "missing"
    }
}

/// Build the opener named by `camera.backend`.
pub fn opener_for(backend: &str) -> Box<dyn DeviceOpener> {
    match backend {
        "test-pattern" => Box::new(TestPatternOpener::default()),
        #[cfg(feature = "webcam")]
        "webcam" => Box::new(WebcamOpener),
        other => {
            warn!(target: "vitals::camera", backend = other, "camera backend not compiled in");
            Box::new(MissingBackend(other.to_string()))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub backend: String,
    pub primary_index: u32,
    pub secondary_index: u32,
    pub retry_delay_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            backend: "webcam".to_string(),
            primary_index: 0,
            secondary_index: 2,
            retry_delay_ms: 100,
            jpeg_quality: 80,
        }
    }
}

pub struct CameraSession {
    opener: Box<dyn DeviceOpener>,
    settings: CameraSettings,
    capture_dir: PathBuf,
    device: Mutex<Option<Box<dyn CaptureDevice>>>,
}

impl CameraSession {
    pub fn new(opener: Box<dyn DeviceOpener>, settings: CameraSettings, capture_dir: impl Into<PathBuf>) -> Self {
        Self {
            opener,
            settings,
            capture_dir: capture_dir.into(),
            device: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    pub fn is_open(&self) -> bool {
        self.device.lock().is_some()
    }

    /// Read and JPEG-encode one frame, acquiring the device first if needed.
    pub fn next_frame(&self) -> Result<Bytes, CameraError> {
        let frame = self.grab()?;
        encode_jpeg(&frame, self.settings.jpeg_quality).map(Bytes::from)
    }

    /// Save the current frame under the capture directory and return its file name.
    pub fn capture_still(&self) -> Result<String, CameraError> {
        let jpeg = self.next_frame()?;
        std::fs::create_dir_all(&self.capture_dir)?;
        let (name, path, mut file) = create_capture_file(&self.capture_dir, chrono::Utc::now().timestamp_millis())?;
        file.write_all(&jpeg)?;
        info!(target: "vitals::camera", file = %path.display(), bytes = jpeg.len(), "still captured");
        Ok(name)
    }

    /// Release the device. No-op when nothing is open.
    pub fn cleanup(&self) {
        if self.device.lock().take().is_some() {
            info!(target: "vitals::camera", "camera released");
        }
    }

    fn grab(&self) -> Result<RawFrame, CameraError> {
        let mut slot = self.device.lock();
        if slot.is_none() {
            *slot = Some(self.acquire()?);
        }
        let Some(device) = slot.as_mut() else {
            return Err(CameraError::Unavailable);
        };
        let result = device.read_frame();
        if !device.is_open() {
            warn!(target: "vitals::camera", "camera disconnected, will reopen on next request");
            *slot = None;
        }
        result
    }

    /// Runs under the session lock, so concurrent first access opens one device.
    fn acquire(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        for index in [self.settings.primary_index, self.settings.secondary_index] {
            match self.opener.open(index) {
                Ok(device) => {
                    info!(target: "vitals::camera", index, backend = self.opener.backend(), "camera opened");
                    return Ok(device);
                }
                Err(e) => debug!(target: "vitals::camera", index, error = %e, "camera open failed"),
            }
        }
        Err(CameraError::Unavailable)
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

pub fn encode_jpeg(frame: &RawFrame, quality: u8) -> Result<Vec<u8>, CameraError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.width == 0 || frame.height == 0 || frame.rgb.len() != expected {
        return Err(CameraError::Read(format!(
            "frame buffer is {} bytes, expected {expected} for {}x{}",
            frame.rgb.len(),
            frame.width,
            frame.height
        )));
    }
    let mut out = Vec::with_capacity(expected / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        &frame.rgb,
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

/// Create `captured_image_<millis>.jpg`, or the first free `_<n>` variant.
/// `create_new` makes the name claim atomic, so concurrent captures never share a file.
fn create_capture_file(dir: &Path, millis: i64) -> io::Result<(String, PathBuf, File)> {
    let mut name = format!("captured_image_{millis}.jpg");
    let mut n = 1;
    loop {
        let path = dir.join(&name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((name, path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                name = format!("captured_image_{millis}_{n}.jpg");
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails to open until `online` is set; counts open attempts.
    #[derive(Default)]
    struct Flaky {
        online: Arc<AtomicBool>,
        attempts: Arc<AtomicUsize>,
    }

    impl DeviceOpener for Flaky {
        fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.online.load(Ordering::SeqCst) {
                TestPatternOpener::new(4, 4).open(index)
            } else {
                Err(CameraError::Open {
                    index,
                    reason: "no such device".into(),
                })
            }
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    fn session(opener: impl DeviceOpener + 'static, dir: &Path) -> CameraSession {
        CameraSession::new(Box::new(opener), CameraSettings::default(), dir)
    }

    #[test]
    fn unavailable_until_device_appears() {
        let dir = tempfile::tempdir().unwrap();
        let opener = Flaky::default();
        let online = Arc::clone(&opener.online);
        let attempts = Arc::clone(&opener.attempts);
        let cam = session(opener, dir.path());

        for _ in 0..3 {
            assert!(matches!(cam.next_frame(), Err(CameraError::Unavailable)));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 6, "both indices tried every call");
        assert!(!cam.is_open());

        online.store(true, Ordering::SeqCst);
        let jpeg = cam.next_frame().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(cam.is_open());
    }

    #[test]
    fn cleanup_is_idempotent_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let cam = session(TestPatternOpener::new(8, 8), dir.path());
        cam.cleanup();
        cam.next_frame().unwrap();
        cam.cleanup();
        cam.cleanup();
        assert!(!cam.is_open());
        cam.next_frame().unwrap();
        assert!(cam.is_open());
    }

    #[test]
    fn capture_writes_unique_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("uploads");
        let cam = session(TestPatternOpener::new(8, 8), &out);

        let a = cam.capture_still().unwrap();
        let b = cam.capture_still().unwrap();
        assert!(a.starts_with("captured_image_") && a.ends_with(".jpg"));
        assert_ne!(a, b);
        assert!(out.join(&a).is_file());
        assert!(out.join(&b).is_file());
    }

    #[test]
    fn capture_fails_without_device() {
        let dir = tempfile::tempdir().unwrap();
        let cam = session(MissingBackend("webcam".into()), dir.path());
        assert!(matches!(cam.capture_still(), Err(CameraError::Unavailable)));
    }

    #[test]
    fn collision_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("captured_image_5.jpg"), b"x").unwrap();
        let (name, _, _) = create_capture_file(dir.path(), 5).unwrap();
        assert_eq!(name, "captured_image_5_1.jpg");
        assert_eq!(std::fs::read(dir.path().join("captured_image_5.jpg")).unwrap(), b"x");
    }

    #[test]
    fn same_millisecond_captures_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || create_capture_file(&path, 42).unwrap().0)
            })
            .collect();
        let mut names: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 8);
    }

    /// Slow opener that counts how often it is asked.
    struct Counting(Arc<AtomicUsize>);

    impl DeviceOpener for Counting {
        fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            TestPatternOpener::new(4, 4).open(index)
        }

        fn backend(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn concurrent_first_access_opens_once() {
        let dir = tempfile::tempdir().unwrap();
        let opens = Arc::new(AtomicUsize::new(0));
        let cam = Arc::new(session(Counting(Arc::clone(&opens)), dir.path()));
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cam = Arc::clone(&cam);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cam.next_frame().is_ok()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn short_buffer_is_read_error() {
        let frame = RawFrame {
            width: 2,
            height: 2,
            rgb: vec![0; 5],
        };
        assert!(matches!(encode_jpeg(&frame, 80), Err(CameraError::Read(_))));
    }
}
