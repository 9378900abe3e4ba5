// gpu/buffer.rs — Host ↔ device transfer of image data.
//
// The device buffer is a flat mirror of the image's f32 channels:
//   byte size = width * height * 4 * size_of::<f32>()
//
// Both directions are blocking. `upload` returns once the data is resident;
// `download` returns once every byte is back on the host. Readback goes
// through a scratch vector and is copied into the caller's storage only
// after the device read has fully succeeded, so a failed download leaves the
// image exactly as it was.

use tracing::debug;

use crate::error::DispatchError;
use crate::gpu::api::ComputeApi;
use crate::gpu::context::ExecutionContext;
use crate::image::{ImageViewMut, CHANNELS};

/// Device-resident copy of an image, valid for the life of its context.
pub struct DeviceBuffer<'ctx, 'api, A: ComputeApi> {
    buffer: A::Buffer,
    width: usize,
    height: usize,
    ctx: &'ctx ExecutionContext<'api, A>,
}

impl<'ctx, 'api, A: ComputeApi> DeviceBuffer<'ctx, 'api, A> {
    /// Allocate a device buffer and copy `image` into it.
    ///
    /// # Errors
    /// `BufferAllocationFailed` if the device cannot hold the image or the
    /// transfer fails.
    pub fn upload(
        ctx: &'ctx ExecutionContext<'api, A>,
        image: &ImageViewMut<'_>,
    ) -> Result<Self, DispatchError> {
        let buffer = ctx
            .api()
            .create_buffer(ctx.context(), ctx.queue(), image.as_slice())
            .map_err(|e| DispatchError::BufferAllocationFailed(e.message))?;
        debug!(bytes = image.byte_len(), "image uploaded");

        Ok(DeviceBuffer { buffer, width: image.width(), height: image.height(), ctx })
    }

    /// Read the buffer back over `image`, in place.
    ///
    /// # Errors
    /// `ReadbackFailed` if the read fails or `image` is not the shape that
    /// was uploaded. `image` is untouched in either case.
    pub fn download(&self, image: &mut ImageViewMut<'_>) -> Result<(), DispatchError> {
        if image.width() != self.width || image.height() != self.height {
            return Err(DispatchError::ReadbackFailed(format!(
                "destination is {}x{}, device buffer holds {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            )));
        }

        let mut scratch = vec![0.0f32; self.len()];
        self.ctx
            .api()
            .read_buffer(self.ctx.context(), self.ctx.queue(), &self.buffer, &mut scratch)
            .map_err(|e| DispatchError::ReadbackFailed(e.message))?;

        image.as_mut_slice().copy_from_slice(&scratch);
        debug!(bytes = image.byte_len(), "image read back");
        Ok(())
    }

    #[inline]
    pub fn raw(&self) -> &A::Buffer {
        &self.buffer
    }

    /// Number of f32 elements in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height * CHANNELS
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }
}
