//! Two-stage face analysis: a cheap presence scan and a detailed pass that
//! adds descriptors and expression scores.

use crate::detector::{DetectorError, FaceDetector};
use crate::expression::{ExpressionClassifier, ExpressionError};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, FaceAnalysis};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),
}

/// Model files and input sizes for [`OnnxAnalyzer::load`].
#[derive(Debug, Clone)]
pub struct AnalyzerModels {
    pub scan_model: String,
    pub scan_input: (u32, u32),
    pub detail_model: String,
    pub detail_input: (u32, u32),
    pub descriptor_model: String,
    pub expression_model: String,
}

pub struct OnnxAnalyzer {
    scan_detector: FaceDetector,
    detail_detector: FaceDetector,
    recognizer: FaceRecognizer,
    expressions: ExpressionClassifier,
}

impl OnnxAnalyzer {
    /// Load every model up front; any missing file fails the whole load.
    pub fn load(models: &AnalyzerModels) -> Result<Self, AnalyzerError> {
        let (sw, sh) = models.scan_input;
        let (dw, dh) = models.detail_input;
        Ok(Self {
            scan_detector: FaceDetector::load(&models.scan_model, sw, sh)?,
            detail_detector: FaceDetector::load(&models.detail_model, dw, dh)?,
            recognizer: FaceRecognizer::load(&models.descriptor_model)?,
            expressions: ExpressionClassifier::load(&models.expression_model)?,
        })
    }

    /// Presence scan on the small-input detector.
    pub fn scan(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        score_threshold: f32,
    ) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self
            .scan_detector
            .detect(frame, width, height, score_threshold, usize::MAX)?)
    }

    /// Detailed pass: boxes from the large-input detector, then a descriptor
    /// and expression scores per face.
    pub fn analyze(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        min_confidence: f32,
        max_results: usize,
    ) -> Result<Vec<FaceAnalysis>, AnalyzerError> {
        let boxes = self
            .detail_detector
            .detect(frame, width, height, min_confidence, max_results)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let descriptor = self.recognizer.extract(frame, width, height, &bbox)?;
            let expressions = self.expressions.classify(frame, width, height, &bbox)?;
            faces.push(FaceAnalysis {
                bbox,
                landmarks: Vec::new(),
                descriptor,
                expressions,
            });
        }
        Ok(faces)
    }
}
