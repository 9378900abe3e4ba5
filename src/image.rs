// image.rs — Host-side RGBA float image container.
//
// Every filter in this crate operates on the same shape of data:
//
//   data: [r0 g0 b0 a0  r1 g1 b1 a1  ...]   (f32, row-major, 4 channels)
//   len  = width * height * CHANNELS
//
// There is no stride and no padding. The device buffer is a byte-for-byte
// mirror of `data`, so the kernel addresses pixel (x, y) channel c at
// `(y * width + x) * 4 + c` exactly like the CPU reference filters do.
//
// Two types expose that shape:
//
//   ImageBuffer      — owns its Vec<f32>. The usual way to hold an image.
//   ImageViewMut<'a> — borrows caller-owned storage. This is the
//                      `(data, width, height)` shape the engine actually
//                      needs, so callers with their own container (a
//                      decoded frame, an FFI slice) never have to copy.
//
// Both enforce `len == width * height * 4` and `width, height > 0` at
// construction. A malformed image is rejected before any device work.

use std::fmt;

use crate::error::DispatchError;

/// Interleaved channels per pixel (R, G, B, A).
pub const CHANNELS: usize = 4;

/// Check the RGBA layout invariant for a buffer of `len` floats.
pub(crate) fn check_layout(width: usize, height: usize, len: usize) -> Result<(), DispatchError> {
    if width == 0 || height == 0 {
        return Err(DispatchError::InvalidImage(format!(
            "dimensions must be non-zero (got {width}x{height})"
        )));
    }
    let expected = width
        .checked_mul(height)
        .and_then(|px| px.checked_mul(CHANNELS))
        .ok_or_else(|| {
            DispatchError::InvalidImage(format!("{width}x{height} overflows the address space"))
        })?;
    if len != expected {
        return Err(DispatchError::InvalidImage(format!(
            "data length ({len}) must equal width * height * {CHANNELS} ({expected})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ImageBuffer
// ---------------------------------------------------------------------------

/// An owned RGBA `f32` image, channel values nominally in `[0, 1]`.
#[derive(Clone, PartialEq)]
pub struct ImageBuffer {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

impl ImageBuffer {
    /// Create a zero-initialised (transparent black) image.
    pub fn new(width: usize, height: usize) -> Result<Self, DispatchError> {
        let len = width
            .checked_mul(height)
            .and_then(|px| px.checked_mul(CHANNELS))
            .unwrap_or(0);
        check_layout(width, height, len)?;
        Ok(ImageBuffer { data: vec![0.0; len], width, height })
    }

    /// Wrap an existing interleaved RGBA vector.
    ///
    /// Fails with `InvalidImage` unless `data.len() == width * height * 4`.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self, DispatchError> {
        check_layout(width, height, data.len())?;
        Ok(ImageBuffer { data, width, height })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> [f32; 4],
    ) -> Result<Self, DispatchError> {
        let mut img = Self::new(width, height)?;
        for y in 0..height {
            for x in 0..width {
                img.set_pixel(x, y, f(x, y));
            }
        }
        Ok(img)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of pixels (`width * height`).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Size of the pixel data in bytes, i.e. the size of its device mirror.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable access to the raw channels. The length cannot change through
    /// a slice, so the layout invariant survives.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Read pixel (x, y) as `[r, g, b, a]`.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [f32; 4] {
        let i = self.index(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Overwrite pixel (x, y).
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, rgba: [f32; 4]) {
        let i = self.index(x, y);
        self.data[i..i + CHANNELS].copy_from_slice(&rgba);
    }

    /// Borrow as the `(data, width, height)` view the engine dispatches on.
    pub fn view_mut(&mut self) -> ImageViewMut<'_> {
        ImageViewMut { data: &mut self.data, width: self.width, height: self.height }
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) out of bounds for {}x{}",
            self.width,
            self.height
        );
        (y * self.width + x) * CHANNELS
    }
}

impl fmt::Debug for ImageBuffer {
    // Printing megapixels of floats is never what anyone wants.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ImageViewMut
// ---------------------------------------------------------------------------

/// A validated mutable borrow of RGBA `f32` storage owned by someone else.
///
/// The view cannot outlive the storage it borrows (`'a`), and nothing else
/// can touch the storage while the view exists, so the engine has exclusive
/// access for the duration of a dispatch.
pub struct ImageViewMut<'a> {
    data: &'a mut [f32],
    width: usize,
    height: usize,
}

impl<'a> ImageViewMut<'a> {
    /// Wrap a raw interleaved slice.
    pub fn new(data: &'a mut [f32], width: usize, height: usize) -> Result<Self, DispatchError> {
        check_layout(width, height, data.len())?;
        Ok(ImageViewMut { data, width, height })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        self.data
    }

    /// Re-check the layout invariant. Cheap; run at the top of every dispatch.
    pub(crate) fn validate(&self) -> Result<(), DispatchError> {
        check_layout(self.width, self.height, self.data.len())
    }
}

impl fmt::Debug for ImageViewMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageViewMut")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}
