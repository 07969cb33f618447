//! Seams between the pipeline and the outside world: where frames come
//! from, what finds faces in them, and where labelled boxes are drawn.

use facewatch_core::{AnalyzerError, BoundingBox, FaceAnalysis, OnnxAnalyzer};
use facewatch_hw::{Camera, CameraError, CameraStream, Frame, FramePoll};

/// A started source of RGB frames.
pub trait FrameSource: Send {
    fn poll(&mut self) -> FramePoll;

    /// Stop producing frames and free the device. Must tolerate repeat calls.
    fn release(&mut self);
}

/// Acquires a fresh [`FrameSource`] each time the pipeline starts.
pub trait FrameSourceOpener: Send {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Face detection capability used by the pipeline.
pub trait FaceAnalyzer: Send {
    /// Cheap presence check.
    fn scan(&mut self, frame: &Frame, score_threshold: f32) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Full pass with descriptors and expression scores.
    fn analyze(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
        max_results: usize,
    ) -> Result<Vec<FaceAnalysis>, AnalyzerError>;
}

impl FrameSource for CameraStream {
    fn poll(&mut self) -> FramePoll {
        CameraStream::poll(self)
    }

    fn release(&mut self) {
        CameraStream::release(self)
    }
}

/// Opens the configured V4L2 device.
pub struct V4lOpener {
    pub device: String,
    pub warmup_frames: usize,
}

impl FrameSourceOpener for V4lOpener {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError> {
        let camera = Camera::open(&self.device)?;
        tracing::info!(
            device = %self.device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        let stream = CameraStream::start(camera, self.warmup_frames)?;
        Ok(Box::new(stream))
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn scan(&mut self, frame: &Frame, score_threshold: f32) -> Result<Vec<BoundingBox>, AnalyzerError> {
        OnnxAnalyzer::scan(self, &frame.data, frame.width, frame.height, score_threshold)
    }

    fn analyze(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
        max_results: usize,
    ) -> Result<Vec<FaceAnalysis>, AnalyzerError> {
        OnnxAnalyzer::analyze(self, &frame.data, frame.width, frame.height, min_confidence, max_results)
    }
}

const KNOWN_COLOR: [u8; 3] = [0x28, 0xa7, 0x45];
const UNKNOWN_COLOR: [u8; 3] = [0xdc, 0x35, 0x45];

/// One face as it should be drawn over the live view.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledBox {
    pub bbox: BoundingBox,
    pub landmarks: Vec<(f32, f32)>,
    pub label: String,
    pub color: [u8; 3],
}

impl LabeledBox {
    pub fn new(face: &FaceAnalysis, name: &str, is_known: bool, distance_m: f32) -> Self {
        Self {
            bbox: face.bbox,
            landmarks: face.landmarks.clone(),
            label: format!("{name} ({distance_m:.1}m)"),
            color: if is_known { KNOWN_COLOR } else { UNKNOWN_COLOR },
        }
    }
}

/// Receives the labelled boxes of each analysed frame.
pub trait Overlay: Send {
    fn draw(&self, frame_width: u32, frame_height: u32, boxes: &[LabeledBox]);
}

/// Headless overlay: boxes go to the trace log.
pub struct TraceOverlay;

impl Overlay for TraceOverlay {
    fn draw(&self, frame_width: u32, frame_height: u32, boxes: &[LabeledBox]) {
        for b in boxes {
            tracing::trace!(
                frame_width,
                frame_height,
                x = b.bbox.x,
                y = b.bbox.y,
                w = b.bbox.width,
                h = b.bbox.height,
                landmarks = b.landmarks.len(),
                label = %b.label,
                color = ?b.color,
                "face box"
            );
        }
    }
}
