//! Face descriptor extraction via ONNX Runtime.
//!
//! Crops the detected face with a small margin, resizes it to 112x112 and
//! produces an L2-normalized 128-dimensional descriptor.

use crate::types::{BoundingBox, Descriptor, DESCRIPTOR_LEN};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const RECOGNIZER_INPUT_SIZE: u32 = 112;
const RECOGNIZER_MEAN: f32 = 127.5;
const RECOGNIZER_STD: f32 = 128.0;
/// Margin added around the detector box, as a fraction of the larger side.
const CROP_MARGIN_RATIO: f32 = 0.1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded descriptor model");
        Ok(Self { session })
    }

    /// Extract the descriptor for one detected face in an RGB frame.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Descriptor, RecognizerError> {
        let margin = face.face_size() * CROP_MARGIN_RATIO;
        let crop = crop_rgb(frame, width, height, face, margin).ok_or(RecognizerError::EmptyCrop)?;
        let input = Self::preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw_data.len() != DESCRIPTOR_LEN {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {DESCRIPTOR_LEN}-dim descriptor, got {}",
                raw_data.len()
            )));
        }

        Ok(Descriptor(l2_normalize(raw_data.to_vec())))
    }

    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = RECOGNIZER_INPUT_SIZE;
        let resized = imageops::resize(crop, size, size, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 - RECOGNIZER_MEAN) / RECOGNIZER_STD;
            }
        }
        tensor
    }
}

/// Copy the face region (grown by `margin` pixels) out of an RGB frame.
pub(crate) fn crop_rgb(
    frame: &[u8],
    width: u32,
    height: u32,
    face: &BoundingBox,
    margin: f32,
) -> Option<RgbImage> {
    let view = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(width, height, frame.to_vec())?;
    let (x, y, w, h) = face.padded_region(margin, width, height)?;
    Some(imageops::crop_imm(&view, x, y, w, h).to_image())
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let crop = RgbImage::from_pixel(40, 50, Rgb([128, 128, 128]));
        let tensor = FaceRecognizer::preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        let expected = (128.0 - RECOGNIZER_MEAN) / RECOGNIZER_STD;
        assert!((tensor[[0, 2, 10, 10]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_crop_rgb_region() {
        // 4x2 frame, left half red, right half blue.
        let mut frame = Vec::new();
        for _y in 0..2 {
            for x in 0..4 {
                frame.extend_from_slice(if x < 2 { &[255, 0, 0] } else { &[0, 0, 255] });
            }
        }
        let face = BoundingBox { x: 2.0, y: 0.0, width: 2.0, height: 2.0, confidence: 1.0 };
        let crop = crop_rgb(&frame, 4, 2, &face, 0.0).unwrap();
        assert_eq!(crop.dimensions(), (2, 2));
        assert!(crop.pixels().all(|p| p.0 == [0, 0, 255]));
    }

    #[test]
    fn test_crop_rgb_outside_frame() {
        let frame = vec![0u8; 4 * 4 * 3];
        let face = BoundingBox { x: 10.0, y: 10.0, width: 2.0, height: 2.0, confidence: 1.0 };
        assert!(crop_rgb(&frame, 4, 4, &face, 0.0).is_none());
    }
}
