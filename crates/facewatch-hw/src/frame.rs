//! Frame type and pixel-format conversion to packed RGB8.

/// A captured camera frame in packed RGB8.
#[derive(Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Result of asking a frame source for the current frame.
#[derive(Debug)]
pub enum FramePoll {
    Ready(Frame),
    /// The source is running but has not produced a frame yet.
    NotReady,
    /// The source has stopped and will not produce more frames.
    Closed,
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let d = chunk[1] as i32 - 128;
        let e = chunk[3] as i32 - 128;
        for &y in [chunk[0], chunk[2]].iter() {
            let c = 298 * (y as i32 - 16);
            rgb.push(clamp_u8((c + 409 * e + 128) >> 8));
            rgb.push(clamp_u8((c - 100 * d - 208 * e + 128) >> 8));
            rgb.push(clamp_u8((c + 516 * d + 128) >> 8));
        }
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to RGB8 by replicating the channel.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    Ok(gray[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Decode an MJPEG buffer to RGB8, checking it matches the negotiated size.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?.to_rgb8();
    if decoded.dimensions() != (width, height) {
        return Err(FrameError::SizeMismatch {
            expected: (width, height),
            actual: decoded.dimensions(),
        });
    }
    Ok(decoded.into_raw())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("decoded frame is {actual:?}, expected {expected:?}")]
    SizeMismatch { expected: (u32, u32), actual: (u32, u32) },
    #[error("jpeg decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_black_and_white() {
        // 2x1: Y0=16 (black), Y1=235 (white), neutral chroma
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // High V pushes red up and green down.
        let yuyv = vec![128, 128, 128, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 200, "red {}", rgb[0]);
        assert!(rgb[1] < 100, "green {}", rgb[1]);
        assert_eq!(&rgb[0..3], &rgb[3..6]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[10, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![10, 10, 10, 200, 200, 200]);
        assert!(grey_to_rgb(&[1], 2, 1).is_err());
    }

    #[test]
    fn test_mjpeg_roundtrip_size_check() {
        let img = image::RgbImage::from_pixel(8, 4, image::Rgb([90, 120, 150]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&img)
            .unwrap();
        let rgb = mjpeg_to_rgb(&jpeg, 8, 4).unwrap();
        assert_eq!(rgb.len(), 8 * 4 * 3);
        assert!(matches!(
            mjpeg_to_rgb(&jpeg, 16, 4),
            Err(FrameError::SizeMismatch { .. })
        ));
    }
}
