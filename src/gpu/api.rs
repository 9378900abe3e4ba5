// gpu/api.rs — The compute-API seam.
//
// The dispatch lifecycle is written against this trait, not against wgpu
// directly. `WgpuApi` (gpu/backend.rs) is the production implementation;
// tests plug in a double that counts every acquire and release.
//
// OWNERSHIP MODEL
// ───────────────
// Each associated type is an owned handle. Releasing a resource means
// dropping its handle, so the trait has no `release_*` methods at all:
//
//   acquire                 handle type     released by
//   ───────────────────     ─────────────   ──────────────────────────
//   create_context          Context         Drop
//   create_queue            Queue           Drop
//   create_buffer           Buffer          Drop
//   build_program           Program         Drop
//   create_kernel           Kernel          Drop
//
// The engine holds these in scoped wrappers whose drop order is the reverse
// of acquisition (see gpu::context, gpu::buffer, gpu::program). A handle
// can only be dropped once, so nothing is ever released twice.
//
// Every operation is blocking. Implementations on async APIs block
// internally (pollster / device polling) before returning.

use std::fmt;

/// Broad category of compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Discrete, integrated or virtualised GPU.
    Gpu,
    /// Software rasteriser / CPU implementation of the API.
    Cpu,
    /// Anything the driver does not classify.
    Other,
    /// Matches every device.
    Any,
}

impl DeviceClass {
    /// Whether a device reporting `actual` satisfies a request for `self`.
    pub fn accepts(self, actual: DeviceClass) -> bool {
        self == DeviceClass::Any || self == actual
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceClass::Gpu => "GPU",
            DeviceClass::Cpu => "CPU",
            DeviceClass::Other => "other",
            DeviceClass::Any => "any",
        };
        f.write_str(s)
    }
}

/// Descriptive information about a device, for logs and reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub class: DeviceClass,
    /// Name of the platform the device was enumerated from.
    pub platform: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.platform, self.class)
    }
}

/// Failure reported by a compute API call. The engine decides which
/// lifecycle step it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        ApiError { message: message.into() }
    }
}

impl From<String> for ApiError {
    fn from(message: String) -> Self {
        ApiError { message }
    }
}

impl From<&str> for ApiError {
    fn from(message: &str) -> Self {
        ApiError::new(message)
    }
}

/// A compute API: platforms, devices, and the five resource kinds a
/// dispatch acquires.
pub trait ComputeApi {
    type Platform;
    type Device;
    type Context;
    type Queue;
    type Buffer;
    type Program;
    type Kernel;

    /// Platforms visible to this process, in driver order.
    fn platforms(&self) -> Vec<Self::Platform>;

    fn platform_name(&self, platform: &Self::Platform) -> String;

    /// Devices on `platform` whose class satisfies `class`.
    fn devices(&self, platform: &Self::Platform, class: DeviceClass) -> Vec<Self::Device>;

    fn device_info(&self, device: &Self::Device) -> DeviceInfo;

    fn create_context(&self, device: &Self::Device) -> Result<Self::Context, ApiError>;

    /// Create the command queue. May take state out of `context`, which is
    /// why it is borrowed mutably.
    fn create_queue(
        &self,
        context: &mut Self::Context,
        device: &Self::Device,
    ) -> Result<Self::Queue, ApiError>;

    /// Allocate a device buffer initialised with `contents`; blocks until the
    /// transfer has landed.
    fn create_buffer(
        &self,
        context: &Self::Context,
        queue: &Self::Queue,
        contents: &[f32],
    ) -> Result<Self::Buffer, ApiError>;

    /// Blocking read of the whole buffer into `out`.
    ///
    /// Implementations must leave `out` unmodified on failure.
    fn read_buffer(
        &self,
        context: &Self::Context,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        out: &mut [f32],
    ) -> Result<(), ApiError>;

    /// Compile kernel source for the device. On failure the error message
    /// is the compiler's build log.
    fn build_program(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        source: &str,
    ) -> Result<Self::Program, ApiError>;

    /// Resolve a named entry point of a built program.
    fn create_kernel(
        &self,
        context: &Self::Context,
        program: &Self::Program,
        entry: &str,
    ) -> Result<Self::Kernel, ApiError>;

    /// Bind the fixed argument list `(buffer, width, height)`.
    fn set_kernel_args(
        &self,
        context: &Self::Context,
        kernel: &mut Self::Kernel,
        buffer: &Self::Buffer,
        width: u32,
        height: u32,
    ) -> Result<(), ApiError>;

    /// Run `kernel` over a 2-D range of `global` work-items and wait for it
    /// to finish.
    fn enqueue_2d(
        &self,
        context: &Self::Context,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        global: [u32; 2],
    ) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_class_accepts() {
        assert!(DeviceClass::Gpu.accepts(DeviceClass::Gpu));
        assert!(!DeviceClass::Gpu.accepts(DeviceClass::Cpu));
        assert!(DeviceClass::Any.accepts(DeviceClass::Cpu));
        assert!(DeviceClass::Any.accepts(DeviceClass::Other));
    }

    #[test]
    fn test_device_info_display() {
        let info = DeviceInfo {
            name: "Radeon".into(),
            class: DeviceClass::Gpu,
            platform: "Vulkan".into(),
        };
        assert_eq!(info.to_string(), "Radeon (Vulkan, GPU)");
    }
}
