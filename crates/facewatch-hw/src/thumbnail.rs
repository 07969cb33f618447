//! Detection snapshots: a face close-up and a downscaled context image with
//! the face outlined.

use crate::frame::Frame;
use facewatch_core::{BoundingBox, EncodedImage};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

/// Margin around the face, as a fraction of its larger side.
const FACE_MARGIN_RATIO: f32 = 0.2;
const FACE_SCALE: f32 = 0.5;
const FACE_JPEG_QUALITY: u8 = 60;
const CONTEXT_SCALE: f32 = 0.25;
const CONTEXT_JPEG_QUALITY: u8 = 40;
const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([0x28, 0xa7, 0x45]);
const HIGHLIGHT_THICKNESS: u32 = 3;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("frame buffer does not match {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },
    #[error("face box lies outside the frame")]
    EmptyRegion,
    #[error("jpeg encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Encoded images stored with a detection.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub face: EncodedImage,
    pub context: EncodedImage,
}

/// Render the face close-up and the highlighted context image for one detection.
pub fn capture_snapshot(frame: &Frame, face: &BoundingBox) -> Result<Snapshot, SnapshotError> {
    let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.data)
        .ok_or(SnapshotError::InvalidFrame {
            width: frame.width,
            height: frame.height,
        })?;

    let margin = face.face_size() * FACE_MARGIN_RATIO;
    let (x, y, w, h) = face
        .padded_region(margin, frame.width, frame.height)
        .ok_or(SnapshotError::EmptyRegion)?;
    let crop = imageops::crop_imm(&view, x, y, w, h).to_image();
    let close_up = imageops::resize(&crop, scaled(w, FACE_SCALE), scaled(h, FACE_SCALE), FilterType::Triangle);

    let mut context = imageops::resize(
        &view,
        scaled(frame.width, CONTEXT_SCALE),
        scaled(frame.height, CONTEXT_SCALE),
        FilterType::Triangle,
    );
    outline(&mut context, face, CONTEXT_SCALE);

    Ok(Snapshot {
        face: encode_jpeg(&close_up, FACE_JPEG_QUALITY)?,
        context: encode_jpeg(&context, CONTEXT_JPEG_QUALITY)?,
    })
}

fn scaled(v: u32, factor: f32) -> u32 {
    ((v as f32 * factor).round() as u32).max(1)
}

/// Draw the scaled face box outline onto `img`, clipped to its bounds.
fn outline(img: &mut RgbImage, face: &BoundingBox, scale: f32) {
    let (iw, ih) = img.dimensions();
    let x0 = (face.x * scale).round().max(0.0) as u32;
    let y0 = (face.y * scale).round().max(0.0) as u32;
    let x1 = (((face.x + face.width) * scale).round().max(0.0) as u32).min(iw.saturating_sub(1));
    let y1 = (((face.y + face.height) * scale).round().max(0.0) as u32).min(ih.saturating_sub(1));
    if x0 > x1 || y0 > y1 {
        return;
    }

    for py in y0..=y1 {
        for px in x0..=x1 {
            let on_edge = px < x0 + HIGHLIGHT_THICKNESS
                || px + HIGHLIGHT_THICKNESS > x1
                || py < y0 + HIGHLIGHT_THICKNESS
                || py + HIGHLIGHT_THICKNESS > y1;
            if on_edge {
                img.put_pixel(px, py, HIGHLIGHT_COLOR);
            }
        }
    }
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<EncodedImage, SnapshotError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(EncodedImage(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame {
            data: vec![128; (width * height * 3) as usize],
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    fn decode(img: &EncodedImage) -> RgbImage {
        image::load_from_memory(&img.0).unwrap().to_rgb8()
    }

    #[test]
    fn test_snapshot_dimensions() {
        let frame = gray_frame(640, 480);
        let face = BoundingBox { x: 200.0, y: 100.0, width: 100.0, height: 100.0, confidence: 0.9 };
        let snap = capture_snapshot(&frame, &face).unwrap();

        // 100px face + 20px margin each side = 140px, halved.
        assert_eq!(decode(&snap.face).dimensions(), (70, 70));
        assert_eq!(decode(&snap.context).dimensions(), (160, 120));
    }

    #[test]
    fn test_context_is_highlighted() {
        let frame = gray_frame(640, 480);
        let face = BoundingBox { x: 200.0, y: 100.0, width: 100.0, height: 100.0, confidence: 0.9 };
        let snap = capture_snapshot(&frame, &face).unwrap();
        let ctx = decode(&snap.context);
        // Top-left corner of the outline at (50, 25); JPEG is lossy so check dominance.
        let p = ctx.get_pixel(51, 26);
        assert!(p[1] > p[0] && p[1] > p[2], "expected green-ish, got {p:?}");
    }

    #[test]
    fn test_snapshot_rejects_box_outside_frame() {
        let frame = gray_frame(64, 48);
        let face = BoundingBox { x: 500.0, y: 500.0, width: 10.0, height: 10.0, confidence: 0.9 };
        assert!(matches!(capture_snapshot(&frame, &face), Err(SnapshotError::EmptyRegion)));
    }

    #[test]
    fn test_snapshot_rejects_short_buffer() {
        let mut frame = gray_frame(64, 48);
        frame.data.truncate(10);
        let face = BoundingBox { x: 1.0, y: 1.0, width: 10.0, height: 10.0, confidence: 0.9 };
        assert!(matches!(
            capture_snapshot(&frame, &face),
            Err(SnapshotError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn test_outline_clips_to_image() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let face = BoundingBox { x: 20.0, y: 20.0, width: 200.0, height: 200.0, confidence: 1.0 };
        outline(&mut img, &face, 0.25);
        assert_eq!(*img.get_pixel(5, 5), HIGHLIGHT_COLOR);
        assert_eq!(*img.get_pixel(4, 4), Rgb([0, 0, 0]));
    }
}
