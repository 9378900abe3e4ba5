// kiln: GPU image filters over RGBA float buffers.
//
// A filter is a WGSL compute kernel applied once per pixel. Each call to
// `FilterEngine::apply` runs one self-contained dispatch: pick a device,
// open a context and queue, upload, compile, bind, run, read back, and
// release everything in reverse. The image is modified in place on
// success and left untouched on any failure.

pub mod config;
pub mod convert;
pub mod error;
pub mod filter;
pub mod gpu;
pub mod image;

pub use config::{ConfigError, EngineConfig};
pub use error::{DispatchError, ErrorKind, Result, Status};
pub use filter::{FilterDef, FilterRegistry, OutputClamp};
pub use gpu::api::{ComputeApi, DeviceClass, DeviceInfo};
pub use gpu::backend::{check_wgsl, validate_wgsl, WgpuApi};
pub use gpu::device::{PlatformSearch, SelectionPolicy};
pub use gpu::dispatch::{dispatch, DispatchReport, ExecutionTarget, FilterEngine};
pub use image::{ImageBuffer, ImageViewMut};
