//! V4L2 camera capture via the `v4l` crate.
//!
//! [`Camera::open`] negotiates the device format; [`CameraStream::start`]
//! moves the camera onto a capture thread that keeps the most recent frame
//! available for polling.

use crate::frame::{self, Frame, FramePoll};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 1280;
const REQUESTED_HEIGHT: u32 = 720;
/// Longest wait for a warmup frame while the sensor starts up.
const WARMUP_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest wait for a frame once streaming. Bounds how long `release` can
/// block on a stalled device.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);
/// `POLLIN` from poll(2).
const POLL_READABLE: i16 = 0x0001;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for 720p YUYV; many webcams only offer MJPG at that size, which is also fine.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, MJPG, or GREY)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Convert a raw buffer to RGB8 based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height),
        };
        converted.map_err(|e| {
            CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
        })
    }
}

/// A camera streaming on its own thread.
///
/// The capture thread keeps overwriting a single latest-frame slot. Dropping
/// the stream stops and joins the thread, which releases the device.
pub struct CameraStream {
    latest: Arc<Mutex<Option<Frame>>>,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
}

impl CameraStream {
    /// Start streaming. Blocks until the mmap stream is set up so that
    /// failures surface here rather than on the first poll.
    pub fn start(camera: Camera, warmup_frames: usize) -> Result<Self, CameraError> {
        let latest = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CameraError>>();

        let width = camera.width;
        let height = camera.height;
        let device_path = camera.device_path.clone();

        let worker = {
            let latest = Arc::clone(&latest);
            let stop = Arc::clone(&stop);
            let alive = Arc::clone(&alive);
            std::thread::Builder::new()
                .name("facewatch-capture".into())
                .spawn(move || {
                    capture_loop(camera, warmup_frames, &latest, &stop, ready_tx);
                    alive.store(false, Ordering::SeqCst);
                    tracing::info!("capture thread exiting");
                })
                .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(CameraError::CaptureFailed("capture thread exited during setup".into()));
            }
        }

        Ok(Self {
            latest,
            stop,
            alive,
            worker: Some(worker),
            width,
            height,
            device_path,
        })
    }

    /// Most recent frame, if any has been captured yet.
    pub fn poll(&self) -> FramePoll {
        if !self.alive.load(Ordering::SeqCst) {
            return FramePoll::Closed;
        }
        let slot = match self.latest.lock() {
            Ok(slot) => slot,
            Err(_) => return FramePoll::Closed,
        };
        match slot.as_ref() {
            Some(frame) => FramePoll::Ready(frame.clone()),
            None => FramePoll::NotReady,
        }
    }

    /// Stop the capture thread and release the device. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(device = %self.device_path, "capture thread panicked");
            }
            tracing::info!(device = %self.device_path, "camera released");
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.release();
    }
}

fn capture_loop(
    camera: Camera,
    warmup_frames: usize,
    latest: &Mutex<Option<Frame>>,
    stop: &AtomicBool,
    ready_tx: mpsc::Sender<Result<(), CameraError>>,
) {
    let mut stream = match MmapStream::with_buffers(&camera.device, BufType::VideoCapture, 4) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(CameraError::CaptureFailed(format!(
                "failed to create mmap stream: {e}"
            ))));
            return;
        }
    };

    // Discard warmup frames for camera AGC/AE stabilization. At least one
    // frame is taken so the stream is running before the loop below.
    stream.set_timeout(WARMUP_TIMEOUT);
    for _ in 0..warmup_frames.max(1) {
        if let Err(e) = stream.next() {
            let _ = ready_tx.send(Err(CameraError::CaptureFailed(format!(
                "failed to dequeue warmup buffer: {e}"
            ))));
            return;
        }
    }
    let _ = ready_tx.send(Ok(()));

    // `next()` re-queues its previous buffer, so a timeout inside it cannot be
    // retried. Only call it once a frame is waiting.
    stream.clear_timeout();
    let handle = stream.handle();
    let wait_ms = DEQUEUE_TIMEOUT.as_millis() as i32;

    while !stop.load(Ordering::SeqCst) {
        match handle.poll(POLL_READABLE, wait_ms) {
            Ok(0) => {
                tracing::trace!(device = %camera.device_path, "no frame within timeout");
                continue;
            }
            Ok(_) => {}
            Err(e) if is_stall(&e) => continue,
            Err(e) => {
                tracing::warn!(device = %camera.device_path, error = %e, "failed to wait for frame");
                return;
            }
        }

        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(device = %camera.device_path, error = %e, "failed to dequeue buffer");
                return;
            }
        };

        let rgb = match camera.buf_to_rgb(buf) {
            Ok(rgb) => rgb,
            Err(e) => {
                tracing::debug!(seq = meta.sequence, error = %e, "dropping frame");
                continue;
            }
        };

        let frame = Frame {
            data: rgb,
            width: camera.width,
            height: camera.height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        };
        match latest.lock() {
            Ok(mut slot) => *slot = Some(frame),
            Err(_) => return,
        }
    }
}

/// A frame wait that timed out or was interrupted; the loop re-checks its
/// stop flag and tries again.
fn is_stall(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}
