//! Facial expression classification (FER+ style, 64x64 grayscale input).

use crate::recognizer::crop_rgb;
use crate::types::{BoundingBox, Expression, ExpressionScores};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EXPRESSION_INPUT_SIZE: u32 = 64;

/// Model output order. Contempt has no label of its own and folds into disgusted.
const MODEL_CLASSES: [Expression; 8] = [
    Expression::Neutral,
    Expression::Happy,
    Expression::Surprised,
    Expression::Sad,
    Expression::Angry,
    Expression::Disgusted,
    Expression::Fearful,
    Expression::Disgusted,
];

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &str) -> Result<Self, ExpressionError> {
        if !Path::new(model_path).exists() {
            return Err(ExpressionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded expression model");
        Ok(Self { session })
    }

    pub fn classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<ExpressionScores, ExpressionError> {
        let crop = crop_rgb(frame, width, height, face, 0.0).ok_or(ExpressionError::EmptyCrop)?;
        let gray = imageops::grayscale(&crop);
        let input = Self::preprocess(&gray);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExpressionError::InferenceFailed(format!("expression logits: {e}")))?;

        if logits.len() != MODEL_CLASSES.len() {
            return Err(ExpressionError::InferenceFailed(format!(
                "expected {} logits, got {}",
                MODEL_CLASSES.len(),
                logits.len()
            )));
        }

        Ok(fold_scores(&softmax(logits)))
    }

    /// The model takes raw 0–255 luminance, no normalization.
    fn preprocess(gray: &GrayImage) -> Array4<f32> {
        let size = EXPRESSION_INPUT_SIZE;
        let resized = imageops::resize(gray, size, size, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 1, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            tensor[[0, 0, y as usize, x as usize]] = pixel[0] as f32;
        }
        tensor
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn fold_scores(probs: &[f32]) -> ExpressionScores {
    let mut scores = ExpressionScores::default();
    for expr in Expression::ALL {
        scores.0.insert(expr, 0.0);
    }
    for (class, p) in MODEL_CLASSES.iter().zip(probs) {
        *scores.0.entry(*class).or_insert(0.0) += p;
    }
    scores
}
