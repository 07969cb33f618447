//! facewatch-hw: Camera capture and detection snapshot rendering.
//!
//! Provides V4L2-based camera streaming with conversion to RGB8, plus the
//! JPEG close-up and context images attached to each detection.

pub mod camera;
pub mod frame;
pub mod thumbnail;

pub use camera::{Camera, CameraError, CameraStream, PixelFormat};
pub use frame::{Frame, FramePoll};
pub use thumbnail::{capture_snapshot, Snapshot, SnapshotError};
