//! Multipart MJPEG framing for the live stream.

use super::CameraSession;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const MJPEG_BOUNDARY: &str = "frame";

pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// One multipart part: boundary line, JPEG header, payload, trailing CRLF.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(jpeg.len() + 48);
    part.put_slice(b"--");
    part.put_slice(MJPEG_BOUNDARY.as_bytes());
    part.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Endless stream of multipart parts. A frame that cannot be produced is skipped
/// after `retry`; the stream itself never ends.
pub fn mjpeg_stream(
    session: Arc<CameraSession>,
    retry: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        loop {
            let cam = Arc::clone(&session);
            match tokio::task::spawn_blocking(move || cam.next_frame()).await {
                Ok(Ok(jpeg)) => yield Ok(mjpeg_part(&jpeg)),
                Ok(Err(e)) => {
                    debug!(target: "vitals::camera", error = %e, "frame unavailable");
                    tokio::time::sleep(retry).await;
                }
                Err(e) => {
                    warn!(target: "vitals::camera", error = %e, "frame task failed");
                    tokio::time::sleep(retry).await;
                }
            }
        }
    }
}
