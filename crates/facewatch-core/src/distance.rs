//! Subject distance estimation from apparent face size.

/// Fraction of the frame width a face occupies at the reference distance.
const REF_SIZE_RATIO: f32 = 0.15;
/// Reference distance in meters.
const REF_DISTANCE_M: f32 = 1.0;
/// Faces closer than this are clamped; very large boxes are camera-proximity artifacts.
pub const MIN_DISTANCE_M: f32 = 0.5;

/// Estimate how far a face is from the camera, in meters.
///
/// Uses an inverse relationship between face size and distance, calibrated so
/// a face spanning 15% of the frame width is 1m away. Non-positive or
/// non-finite sizes yield `f32::INFINITY` so they never pass a range filter.
pub fn estimate_distance(face_pixel_size: f32, frame_width: u32) -> f32 {
    if !(face_pixel_size > 0.0) || !face_pixel_size.is_finite() {
        return f32::INFINITY;
    }
    let expected_size_at_ref = frame_width as f32 * REF_SIZE_RATIO;
    let size_ratio = expected_size_at_ref / face_pixel_size;
    (REF_DISTANCE_M * size_ratio).max(MIN_DISTANCE_M)
}
