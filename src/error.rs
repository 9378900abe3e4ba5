// error.rs — Failure taxonomy for a filter dispatch.
//
// Each lifecycle step has exactly one variant, so the caller can tell where
// a dispatch died without parsing messages. Two extra variants cover input
// that is rejected before any device work starts (bad image, unknown
// filter id).
//
// Whatever the variant, the caller's image is untouched: readback is the
// last step and only overwrites host memory once it has fully succeeded.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Why a dispatch failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// The image violates `len == width * height * 4` or has a zero dimension.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// No filter with this id is registered.
    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    /// No platform, or no device of the requested class on any searched platform.
    #[error("no compute device found: {0}")]
    NoDeviceFound(String),

    #[error("context creation failed: {0}")]
    ContextCreationFailed(String),

    #[error("command queue creation failed: {0}")]
    QueueCreationFailed(String),

    #[error("device buffer allocation failed: {0}")]
    BufferAllocationFailed(String),

    /// Kernel source did not compile, or the entry point does not exist.
    /// `diagnostic` is the (truncated) compiler log, suitable for display.
    #[error("kernel compilation failed:\n{diagnostic}")]
    CompileFailed { diagnostic: String },

    #[error("kernel argument binding failed: {0}")]
    ArgumentBindingFailed(String),

    #[error("kernel enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("device readback failed: {0}")]
    ReadbackFailed(String),
}

/// Fieldless discriminant of [`DispatchError`], for matching in callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidImage,
    UnknownFilter,
    NoDeviceFound,
    ContextCreationFailed,
    QueueCreationFailed,
    BufferAllocationFailed,
    CompileFailed,
    ArgumentBindingFailed,
    EnqueueFailed,
    ReadbackFailed,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidImage(_) => ErrorKind::InvalidImage,
            DispatchError::UnknownFilter(_) => ErrorKind::UnknownFilter,
            DispatchError::NoDeviceFound(_) => ErrorKind::NoDeviceFound,
            DispatchError::ContextCreationFailed(_) => ErrorKind::ContextCreationFailed,
            DispatchError::QueueCreationFailed(_) => ErrorKind::QueueCreationFailed,
            DispatchError::BufferAllocationFailed(_) => ErrorKind::BufferAllocationFailed,
            DispatchError::CompileFailed { .. } => ErrorKind::CompileFailed,
            DispatchError::ArgumentBindingFailed(_) => ErrorKind::ArgumentBindingFailed,
            DispatchError::EnqueueFailed(_) => ErrorKind::EnqueueFailed,
            DispatchError::ReadbackFailed(_) => ErrorKind::ReadbackFailed,
        }
    }

    /// The compiler log, for `CompileFailed`.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            DispatchError::CompileFailed { diagnostic } => Some(diagnostic),
            _ => None,
        }
    }

    /// True for failures raised by the device lifecycle, as opposed to
    /// rejected input.
    pub fn is_device_error(&self) -> bool {
        !matches!(self, DispatchError::InvalidImage(_) | DispatchError::UnknownFilter(_))
    }
}

/// Coarse status of a dispatch, for callers that only need a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Input rejected before any device work.
    InvalidInput,
    /// Any failure along the device lifecycle.
    DeviceComputeError,
}

impl Status {
    pub fn of<T>(result: &Result<T>) -> Status {
        match result {
            Ok(_) => Status::Ok,
            Err(e) if e.is_device_error() => Status::DeviceComputeError,
            Err(_) => Status::InvalidInput,
        }
    }
}

/// Cut `log` to at most `max_bytes`, on a char boundary, marking the cut.
///
/// The marker counts against `max_bytes`. A cap too small to hold it gets
/// a bare prefix instead.
pub(crate) fn truncate_diagnostic(log: &str, max_bytes: usize) -> String {
    const MARKER: &str = "\n... (build log truncated)";
    if log.len() <= max_bytes {
        return log.to_string();
    }
    let marker = if max_bytes >= MARKER.len() { MARKER } else { "" };
    let mut end = max_bytes - marker.len();
    while !log.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + marker.len());
    out.push_str(&log[..end]);
    out.push_str(marker);
    out
}
