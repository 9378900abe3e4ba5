// gpu/dispatch.rs — The dispatch lifecycle and the engine that drives it.
//
// LIFECYCLE
// ─────────
//   0. validate     image layout; rejected here, nothing is acquired
//   1. select       first device matching the selection policy
//   2. open         context, then command queue
//   3. upload       device buffer holding a copy of the image
//   4. compile      program, then kernel entry point
//   5. bind         buffer, width, height (arity must be exactly 3)
//   6. enqueue      global (width, height), blocks until complete
//   7. download     results over the caller's image
//   8. teardown     kernel, program, buffer, queue, context
//
// Each acquisition is a local whose type owns one resource. An error at
// step k returns early, and Rust drops the locals bound so far in reverse
// declaration order. Steps 1..k-1 are released in reverse and nothing from
// step k onward ever existed. On success, falling off the end of `dispatch`
// performs step 8 the same way.
//
// The caller's image is written exactly once, in step 7, and only after the
// device read has fully succeeded. Every error therefore leaves it as it
// was.
//
// FilterEngine wraps the lifecycle with a filter registry, a config, and
// the optional CPU fallback when no device is found.

use std::fmt;

use tracing::{debug, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::error::{DispatchError, Result};
use crate::filter::{FilterDef, FilterRegistry, KERNEL_ARITY};
use crate::gpu::api::{ComputeApi, DeviceInfo};
use crate::gpu::backend::WgpuApi;
use crate::gpu::buffer::DeviceBuffer;
use crate::gpu::context::ExecutionContext;
use crate::gpu::device::{select_device, SelectionPolicy};
use crate::gpu::program::KernelProgram;
use crate::image::{ImageBuffer, ImageViewMut};

// ---------------------------------------------------------------------------
// run: bind + enqueue
// ---------------------------------------------------------------------------

/// Bind `(buffer, width, height)` to the program's kernel and run it over a
/// `width × height` global range, blocking until it completes.
///
/// # Errors
/// `ArgumentBindingFailed` if an argument is rejected or the buffer does not
/// hold a `width × height` image; `EnqueueFailed` if the launch or its
/// completion fails.
pub fn run<A: ComputeApi>(
    program: &mut KernelProgram<'_, '_, A>,
    buffer: &DeviceBuffer<'_, '_, A>,
    width: u32,
    height: u32,
) -> Result<()> {
    if buffer.width() != width as usize || buffer.height() != height as usize {
        return Err(DispatchError::ArgumentBindingFailed(format!(
            "buffer holds {}x{}, arguments say {width}x{height}",
            buffer.width(),
            buffer.height()
        )));
    }

    let ctx = program.context();
    let api = ctx.api();

    api.set_kernel_args(ctx.context(), program.kernel_mut(), buffer.raw(), width, height)
        .map_err(|e| DispatchError::ArgumentBindingFailed(e.message))?;
    debug!(width, height, "kernel arguments bound");

    let global = [width, height];
    api.enqueue_2d(ctx.context(), ctx.queue(), program.kernel(), global)
        .map_err(|e| DispatchError::EnqueueFailed(e.message))?;
    debug!(?global, "kernel completed");
    Ok(())
}

// ---------------------------------------------------------------------------
// dispatch: the full lifecycle
// ---------------------------------------------------------------------------

/// Run `def` over `image` in place on a freshly selected device.
///
/// Returns the device that ran the kernel.
///
/// # Errors
/// Any `DispatchError`. `image` is unmodified on every error.
#[tracing::instrument(
    skip_all,
    fields(filter = %def.name, width = image.width(), height = image.height())
)]
pub fn dispatch<A: ComputeApi>(
    api: &A,
    policy: &SelectionPolicy,
    image: &mut ImageViewMut<'_>,
    def: &FilterDef,
    max_log_bytes: usize,
) -> Result<DeviceInfo> {
    image.validate()?;
    let (width, height) = global_size(image)?;

    let device = select_device(api, policy)?;
    let ctx = ExecutionContext::open(api, device)?;
    let buffer = DeviceBuffer::upload(&ctx, image)?;
    let mut program = KernelProgram::compile(&ctx, &def.source, &def.entry, max_log_bytes)?;

    if def.arity != KERNEL_ARITY {
        return Err(DispatchError::ArgumentBindingFailed(format!(
            "filter `{}` declares {} arguments, the engine binds {KERNEL_ARITY} (buffer, width, height)",
            def.name, def.arity
        )));
    }
    run(&mut program, &buffer, width, height)?;
    buffer.download(image)?;

    if !def.clamp.holds_for(image.as_slice()) {
        warn!(clamp = ?def.clamp, "kernel output outside its declared range");
    }
    Ok(ctx.device_info().clone())
}

/// The `(width, height)` global range for `image`.
fn global_size(image: &ImageViewMut<'_>) -> Result<(u32, u32)> {
    match (u32::try_from(image.width()), u32::try_from(image.height())) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(DispatchError::InvalidImage(format!(
            "{}x{} exceeds the u32 work-item range",
            image.width(),
            image.height()
        ))),
    }
}

// ---------------------------------------------------------------------------
// FilterEngine
// ---------------------------------------------------------------------------

/// Where a filter actually ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionTarget {
    Device(DeviceInfo),
    /// The filter's CPU reference, after no device was found.
    Cpu,
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionTarget::Device(info) => write!(f, "{info}"),
            ExecutionTarget::Cpu => f.write_str("CPU reference"),
        }
    }
}

/// Outcome of a successful `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub filter: String,
    pub target: ExecutionTarget,
    /// Work-items launched per dimension, `[width, height]`. `None` when
    /// the CPU reference ran and nothing was launched.
    pub global_size: Option<[u32; 2]>,
}

impl DispatchReport {
    pub fn ran_on_device(&self) -> bool {
        matches!(self.target, ExecutionTarget::Device(_))
    }
}

/// Applies named filters to images, one independent dispatch per call.
///
/// `apply` takes `&self`: the engine holds no per-dispatch state, so one
/// engine can serve several threads, each call opening its own context.
pub struct FilterEngine<A: ComputeApi = WgpuApi> {
    api: A,
    config: EngineConfig,
    registry: FilterRegistry,
}

impl FilterEngine<WgpuApi> {
    /// Engine on the wgpu backend with the built-in filters.
    pub fn new(config: EngineConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let api = WgpuApi::new(&config);
        Ok(FilterEngine { api, config, registry: FilterRegistry::builtin() })
    }

    /// `new(EngineConfig::from_env()?)`.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::new(EngineConfig::from_env()?)
    }
}

impl<A: ComputeApi> FilterEngine<A> {
    /// Engine on an arbitrary compute API with the built-in filters.
    ///
    /// # Errors
    /// Whatever `config.validate()` rejects.
    pub fn with_api(api: A, config: EngineConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(FilterEngine { api, config, registry: FilterRegistry::builtin() })
    }

    pub fn with_registry(mut self, registry: FilterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FilterRegistry {
        &mut self.registry
    }

    /// Apply the registered filter `filter` to `image` in place.
    pub fn apply(&self, image: &mut ImageBuffer, filter: &str) -> Result<DispatchReport> {
        let def = self.registry.get(filter)?;
        self.apply_def(image.view_mut(), def)
    }

    /// Apply `filter` to caller-owned interleaved RGBA storage.
    pub fn apply_raw(
        &self,
        data: &mut [f32],
        width: usize,
        height: usize,
        filter: &str,
    ) -> Result<DispatchReport> {
        let def = self.registry.get(filter)?;
        self.apply_def(ImageViewMut::new(data, width, height)?, def)
    }

    /// Apply an unregistered filter definition.
    pub fn apply_def(&self, mut image: ImageViewMut<'_>, def: &FilterDef) -> Result<DispatchReport> {
        let result = dispatch(
            &self.api,
            &self.config.selection,
            &mut image,
            def,
            self.config.max_build_log_bytes,
        );

        let (target, global_size) = match result {
            // The image passed validation in `dispatch`, so both fit in u32.
            Ok(info) => (ExecutionTarget::Device(info), Some([image.width() as u32, image.height() as u32])),
            Err(DispatchError::NoDeviceFound(reason)) if self.config.cpu_fallback && def.cpu.is_some() => {
                warn!(filter = %def.name, %reason, "no compute device, running CPU reference");
                def.apply_cpu(&mut image);
                (ExecutionTarget::Cpu, None)
            }
            Err(e) => return Err(e),
        };

        Ok(DispatchReport {
            filter: def.name.to_string(),
            target,
            global_size,
        })
    }
}

impl<A: ComputeApi> fmt::Debug for FilterEngine<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterEngine")
            .field("config", &self.config)
            .field("filters", &self.registry.names().collect::<Vec<_>>())
            .finish()
    }
}
