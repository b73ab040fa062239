//! Physical webcam through `nokhwa`.
//!
//! A `nokhwa::Camera` is not `Send`, so each open device lives on its own worker
//! thread and frames are requested over a channel. Dropping the device closes the
//! channel, which stops the stream and joins the worker.

use super::{CameraError, CaptureDevice, DeviceOpener, RawFrame};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tracing::debug;

type FrameReply = mpsc::Sender<Result<RawFrame, CameraError>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebcamOpener;

impl DeviceOpener for WebcamOpener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (req_tx, req_rx) = mpsc::channel::<FrameReply>();

        let worker = thread::Builder::new()
            .name(format!("webcam-{index}"))
            .spawn(move || {
                let mut camera = match open_camera(index) {
                    Ok(c) => {
                        let _ = ready_tx.send(Ok(()));
                        c
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                for reply in req_rx {
                    let _ = reply.send(read(&mut camera));
                }
                let _ = camera.stop_stream();
                debug!(target: "vitals::camera", index, "webcam stream stopped");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(Webcam {
                requests: Some(req_tx),
                worker: Some(worker),
                open: true,
            })),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(CameraError::Open {
                index,
                reason: "camera worker exited".into(),
            }),
        }
    }

    fn backend(&self) -> &'static str {
        "webcam"
    }
}

fn open_camera(index: u32) -> Result<Camera, CameraError> {
    let open_err = |e: nokhwa::NokhwaError| CameraError::Open {
        index,
        reason: e.to_string(),
    };
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = Camera::new(CameraIndex::Index(index), format).map_err(open_err)?;
    camera.open_stream().map_err(open_err)?;
    Ok(camera)
}

fn read(camera: &mut Camera) -> Result<RawFrame, CameraError> {
    let buffer = camera.frame().map_err(|e| CameraError::Read(e.to_string()))?;
    let image = buffer
        .decode_image::<RgbFormat>()
        .map_err(|e| CameraError::Read(e.to_string()))?;
    Ok(RawFrame {
        width: image.width(),
        height: image.height(),
        rgb: image.into_raw(),
    })
}

struct Webcam {
    requests: Option<mpsc::Sender<FrameReply>>,
    worker: Option<JoinHandle<()>>,
    open: bool,
}

impl CaptureDevice for Webcam {
    fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        let Some(requests) = self.requests.as_ref() else {
            return Err(CameraError::Unavailable);
        };
        let (tx, rx) = mpsc::channel();
        if requests.send(tx).is_err() {
            self.open = false;
            return Err(CameraError::Read("camera worker stopped".into()));
        }
        rx.recv().unwrap_or_else(|_| {
            self.open = false;
            Err(CameraError::Read("camera worker stopped".into()))
        })
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for Webcam {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
