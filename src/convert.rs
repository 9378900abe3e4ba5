// convert.rs — 8-bit RGBA ↔ normalised f32 RGBA.
//
// Decoded images almost always arrive as RGBA8. Kernels work on floats in
// [0, 1], so the bridge is:
//   u8  → f32 : v / 255
//   f32 → u8  : clamp(v * 255, 0, 255), rounded
//
// Rounding (not truncation) on the way back means a u8 → f32 → u8 trip is
// lossless for every byte value.

use crate::error::DispatchError;
use crate::image::ImageBuffer;

/// Convert interleaved RGBA8 pixels to a normalised float image.
pub fn rgba8_to_image(width: usize, height: usize, rgba: &[u8]) -> Result<ImageBuffer, DispatchError> {
    let data = rgba.iter().map(|&v| v as f32 / 255.0).collect();
    ImageBuffer::from_vec(width, height, data)
}

/// Convert a float image back to interleaved RGBA8.
/// Values are clamped to [0, 255] and rounded.
pub fn image_to_rgba8(img: &ImageBuffer) -> Vec<u8> {
    img.as_slice().iter().map(|&v| f32_to_u8(v)).collect()
}

#[inline]
fn f32_to_u8(v: f32) -> u8 {
    // NaN clamps to NaN and `as u8` maps it to 0.
    (v * 255.0).clamp(0.0, 255.0).round() as u8
}
