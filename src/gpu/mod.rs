// gpu/mod.rs — Device-side half of the crate.
//
// Layered bottom-up, one file per lifecycle stage:
//
//   api       ComputeApi trait: the seam between the lifecycle and a driver
//   backend   WgpuApi: the wgpu implementation (+ naga source validation)
//   device    device selection policy
//   context   context + command queue
//   buffer    upload / download of image data
//   program   program + kernel compilation, build-log capture
//   dispatch  bind + enqueue, the full lifecycle, FilterEngine
//
// Nothing above `api` touches wgpu types, so every lifecycle stage is
// exercised in tests against a counting double with no GPU present.

pub mod api;
pub mod backend;
pub mod buffer;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod program;
