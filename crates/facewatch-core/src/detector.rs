//! UltraFace face detector via ONNX Runtime.
//!
//! The model emits per-prior class scores `[1, N, 2]` (background, face) and
//! normalized corner boxes `[1, N, 4]`. Decoding keeps priors above the score
//! threshold, maps them to frame pixels and runs NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// UltraFace-based face detector with a fixed model input size.
pub struct FaceDetector {
    session: Session,
    input_width: u32,
    input_height: u32,
}

impl FaceDetector {
    /// Load an UltraFace ONNX model expecting `input_width` x `input_height` RGB input.
    pub fn load(model_path: &str, input_width: u32, input_height: u32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            input_width,
            input_height,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded UltraFace model"
        );

        Ok(Self {
            session,
            input_width,
            input_height,
        })
    }

    /// Detect faces in an RGB frame, returning boxes sorted by confidence.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        score_threshold: f32,
        max_results: usize,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = preprocess(frame, width, height, self.input_width, self.input_height)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(scores, boxes, width, height, score_threshold);
        let mut result = nms(candidates, ULTRAFACE_NMS_THRESHOLD);
        result.truncate(max_results);

        tracing::trace!(faces = result.len(), score_threshold, "detect");
        Ok(result)
    }
}

/// Stretch-resize an RGB frame to the model input and normalize into NCHW.
fn preprocess(
    frame: &[u8],
    width: u32,
    height: u32,
    input_width: u32,
    input_height: u32,
) -> Result<Array4<f32>, DetectorError> {
    let expected = (width * height * 3) as usize;
    let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(width, height, frame).ok_or(
        DetectorError::InvalidFrame {
            expected,
            actual: frame.len(),
        },
    )?;
    let resized = imageops::resize(&view, input_width, input_height, FilterType::Triangle);

    let (w, h) = (input_width as usize, input_height as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
        }
    }
    Ok(tensor)
}

/// Turn raw prior scores and normalized corners into frame-space boxes.
fn decode(scores: &[f32], boxes: &[f32], width: u32, height: u32, threshold: f32) -> Vec<BoundingBox> {
    let priors = (scores.len() / 2).min(boxes.len() / 4);
    let (fw, fh) = (width as f32, height as f32);

    let mut detections = Vec::new();
    for idx in 0..priors {
        let score = scores[idx * 2 + 1];
        if score < threshold {
            continue;
        }
        let b = &boxes[idx * 4..idx * 4 + 4];
        let x1 = b[0].clamp(0.0, 1.0) * fw;
        let y1 = b[1].clamp(0.0, 1.0) * fh;
        let x2 = b[2].clamp(0.0, 1.0) * fw;
        let y2 = b[3].clamp(0.0, 1.0) * fh;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
    detections
}

/// Non-Maximum Suppression: remove overlapping detections, highest score first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.iou(&det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}
