// gpu/backend.rs — wgpu implementation of the compute-API seam.
//
// MAPPING
// ───────
//   platform  → wgpu::Backend (Vulkan, Metal, DX12, GL) with ≥1 adapter
//   device    → wgpu::Adapter
//   context   → wgpu::Device (+ the queue it was created with, parked)
//   queue     → wgpu::Queue
//   buffer    → STORAGE | COPY_SRC | COPY_DST wgpu::Buffer
//   program   → wgpu::ShaderModule + its naga IR (for reflection)
//   kernel    → wgpu::ComputePipeline + bind group once arguments are set
//
// wgpu hands out the device and queue together from one `request_device`
// call. The context step makes that call and parks the queue; the queue
// step claims it. That keeps the two acquisitions distinct, as the engine
// expects, without creating anything twice.
//
// ERROR SCOPES
// ────────────
// wgpu reports most failures asynchronously through error scopes rather
// than return values, and an error nobody captured goes to a handler that
// panics by default. Every fallible wgpu call here runs inside
// `scoped(...)`, which pushes OutOfMemory + Validation scopes, runs the
// call, and pops both (blocking), turning a deferred error into an `Err`
// at the step that caused it. The device also gets an uncaptured-error
// handler that logs instead of panicking.
//
// KERNEL SOURCE
// ─────────────
// WGSL goes through naga first (parse + validate). naga's diagnostics are
// formatted against the source with line/column markers, which is a far
// better build log than a driver's. The validated IR is also where the
// entry point and its `@workgroup_size` are looked up.
//
// WORKGROUPS
// ──────────
// The engine asks for a global range of (width, height) work-items. WGSL
// fixes the workgroup size inside the kernel, so dispatch launches
// ceil(global / workgroup_size) groups per dimension and kernels must guard
// ids past the image edge.

use std::borrow::Cow;
use std::fmt;

use wgpu::util::DeviceExt;

use crate::config::EngineConfig;
use crate::error::{truncate_diagnostic, DispatchError};
use crate::gpu::api::{ApiError, ComputeApi, DeviceClass, DeviceInfo};
use crate::gpu::program::MAX_BUILD_LOG_BYTES;

/// Platforms in the order they are searched.
const PLATFORM_ORDER: [wgpu::Backend; 4] = [
    wgpu::Backend::Vulkan,
    wgpu::Backend::Metal,
    wgpu::Backend::Dx12,
    wgpu::Backend::Gl,
];

// ---------------------------------------------------------------------------
// Handle types
// ---------------------------------------------------------------------------

/// An enumerated adapter.
pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    info: wgpu::AdapterInfo,
}

impl fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuDevice").field("info", &self.info).finish()
    }
}

/// A logical device. Holds the queue until `create_queue` claims it.
pub struct WgpuContext {
    queue: Option<wgpu::Queue>,
    device: wgpu::Device,
}

pub struct WgpuProgram {
    module: wgpu::ShaderModule,
    ir: naga::Module,
}

pub struct WgpuKernel {
    // Drop order: bindings, then the pipeline they were made for.
    bind_group: Option<wgpu::BindGroup>,
    scalar_args: Vec<wgpu::Buffer>,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    workgroup_size: [u32; 3],
}

impl WgpuKernel {
    /// `@workgroup_size` declared by the entry point.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }
}

/// A `u32` kernel argument, padded to 16 bytes for uniform binding.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ScalarArg {
    value: u32,
    _pad: [u32; 3],
}

// ---------------------------------------------------------------------------
// WgpuApi
// ---------------------------------------------------------------------------

/// The wgpu instance and the backends it may use.
///
/// Create once and share; every dispatch still opens its own device.
pub struct WgpuApi {
    instance: wgpu::Instance,
    backends: wgpu::Backends,
}

impl WgpuApi {
    pub fn new(config: &EngineConfig) -> Self {
        // Non-conformant adapters (dzn on WSL2, some mobile drivers) are
        // still real GPUs for compute purposes.
        let mut flags = wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER;
        if config.driver_validation {
            flags |= wgpu::InstanceFlags::VALIDATION;
        }
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            flags,
            ..Default::default()
        });
        WgpuApi { instance, backends: config.backends }
    }

    fn adapters(&self, backend: wgpu::Backend) -> Vec<wgpu::Adapter> {
        self.instance.enumerate_adapters(backend.into())
    }
}

impl fmt::Debug for WgpuApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuApi").field("backends", &self.backends).finish()
    }
}

impl ComputeApi for WgpuApi {
    type Platform = wgpu::Backend;
    type Device = WgpuDevice;
    type Context = WgpuContext;
    type Queue = wgpu::Queue;
    type Buffer = wgpu::Buffer;
    type Program = WgpuProgram;
    type Kernel = WgpuKernel;

    fn platforms(&self) -> Vec<wgpu::Backend> {
        PLATFORM_ORDER
            .into_iter()
            .filter(|&b| self.backends.contains(b.into()))
            .filter(|&b| !self.adapters(b).is_empty())
            .collect()
    }

    fn platform_name(&self, platform: &wgpu::Backend) -> String {
        format!("{platform:?}")
    }

    fn devices(&self, platform: &wgpu::Backend, class: DeviceClass) -> Vec<WgpuDevice> {
        self.adapters(*platform)
            .into_iter()
            .filter_map(|adapter| {
                let info = adapter.get_info();
                class.accepts(classify(info.device_type)).then_some(WgpuDevice { adapter, info })
            })
            .collect()
    }

    fn device_info(&self, device: &WgpuDevice) -> DeviceInfo {
        DeviceInfo {
            name: device.info.name.clone(),
            class: classify(device.info.device_type),
            platform: format!("{:?}", device.info.backend),
        }
    }

    fn create_context(&self, device: &WgpuDevice) -> Result<WgpuContext, ApiError> {
        // Ask for everything the adapter supports so large images fit in
        // one storage binding.
        let (dev, queue): (wgpu::Device, wgpu::Queue) = pollster::block_on(device.adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("kiln"),
                required_features: wgpu::Features::empty(),
                required_limits: device.adapter.limits(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| ApiError::new(format!("device request failed: {e}")))?;

        dev.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            tracing::error!(%err, "uncaptured wgpu error");
        }));

        Ok(WgpuContext { queue: Some(queue), device: dev })
    }

    fn create_queue(&self, context: &mut WgpuContext, _device: &WgpuDevice) -> Result<wgpu::Queue, ApiError> {
        context
            .queue
            .take()
            .ok_or_else(|| ApiError::new("the context's queue has already been claimed"))
    }

    fn create_buffer(
        &self,
        context: &WgpuContext,
        _queue: &wgpu::Queue,
        contents: &[f32],
    ) -> Result<wgpu::Buffer, ApiError> {
        let device = &context.device;
        let bytes: &[u8] = bytemuck::cast_slice(contents);
        let size = bytes.len() as u64;

        let limits = device.limits();
        let max = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if size > max {
            return Err(ApiError::new(format!(
                "{size} bytes exceeds the device's storage buffer limit of {max} bytes"
            )));
        }

        // Initialised at creation: the data is resident once this returns.
        scoped(device, "storage buffer", || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kiln::image"),
                contents: bytes,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            })
        })
    }

    fn read_buffer(
        &self,
        context: &WgpuContext,
        queue: &wgpu::Queue,
        buffer: &wgpu::Buffer,
        out: &mut [f32],
    ) -> Result<(), ApiError> {
        let device = &context.device;
        let size = buffer.size();
        let wanted = std::mem::size_of_val(out) as u64;
        if size != wanted {
            return Err(ApiError::new(format!(
                "buffer holds {size} bytes, destination wants {wanted}"
            )));
        }

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kiln::readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let index = scoped(device, "readback copy", || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kiln::readback"),
            });
            encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
            queue.submit(std::iter::once(encoder.finish()))
        })?;

        // Map is asynchronous; poll until the copy is done and the callback
        // has fired.
        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver outlives the poll below; a send error cannot happen.
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::Maintain::wait_for(index));

        rx.recv()
            .map_err(|_| ApiError::new("readback map callback never fired"))?
            .map_err(|e| ApiError::new(format!("readback map failed: {e}")))?;

        {
            let mapped = slice.get_mapped_range();
            let floats: &[f32] = bytemuck::try_cast_slice(&mapped[..])
                .map_err(|e| ApiError::new(format!("mapped range is not f32 data: {e}")))?;
            out.copy_from_slice(floats);
        }
        staging.unmap();
        Ok(())
    }

    fn build_program(
        &self,
        context: &WgpuContext,
        _device: &WgpuDevice,
        source: &str,
    ) -> Result<WgpuProgram, ApiError> {
        let ir = check_wgsl(source).map_err(ApiError::new)?;
        let device = &context.device;
        let module = scoped(device, "shader module", || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("kiln::kernel"),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
            })
        })?;
        Ok(WgpuProgram { module, ir })
    }

    fn create_kernel(
        &self,
        context: &WgpuContext,
        program: &WgpuProgram,
        entry: &str,
    ) -> Result<WgpuKernel, ApiError> {
        let workgroup_size = compute_entry_point(&program.ir, entry).map_err(ApiError::new)?;
        let device = &context.device;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kiln::kernel args"),
            entries: &[
                // 0: image data, read-write storage.
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                scalar_layout_entry(1), // width
                scalar_layout_entry(2), // height
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("kiln::kernel layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = scoped(device, "compute pipeline", || {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &program.module,
                entry_point: entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        })?;

        Ok(WgpuKernel { bind_group: None, scalar_args: Vec::new(), pipeline, layout, workgroup_size })
    }

    fn set_kernel_args(
        &self,
        context: &WgpuContext,
        kernel: &mut WgpuKernel,
        buffer: &wgpu::Buffer,
        width: u32,
        height: u32,
    ) -> Result<(), ApiError> {
        let device = &context.device;
        let width_arg = scalar_arg(device, "kiln::width", width);
        let height_arg = scalar_arg(device, "kiln::height", height);

        let bind_group = scoped(device, "bind group", || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("kiln::kernel args"),
                layout: &kernel.layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: width_arg.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: height_arg.as_entire_binding() },
                ],
            })
        })?;

        kernel.bind_group = Some(bind_group);
        kernel.scalar_args = vec![width_arg, height_arg];
        Ok(())
    }

    fn enqueue_2d(
        &self,
        context: &WgpuContext,
        queue: &wgpu::Queue,
        kernel: &WgpuKernel,
        global: [u32; 2],
    ) -> Result<(), ApiError> {
        let device = &context.device;
        let bind_group = kernel
            .bind_group
            .as_ref()
            .ok_or_else(|| ApiError::new("kernel arguments have not been bound"))?;

        let groups = workgroup_count(global, kernel.workgroup_size);
        let max = device.limits().max_compute_workgroups_per_dimension;
        if groups[0] > max || groups[1] > max {
            return Err(ApiError::new(format!(
                "{}x{} workgroups exceeds the device limit of {max} per dimension",
                groups[0], groups[1]
            )));
        }

        let index = scoped(device, "dispatch", || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kiln::dispatch"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("kiln::dispatch"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(groups[0], groups[1], 1);
            }
            queue.submit(std::iter::once(encoder.finish()))
        })?;

        // Synchronous: the caller never observes an in-flight kernel.
        let _ = device.poll(wgpu::Maintain::wait_for(index));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn classify(ty: wgpu::DeviceType) -> DeviceClass {
    match ty {
        wgpu::DeviceType::DiscreteGpu
        | wgpu::DeviceType::IntegratedGpu
        | wgpu::DeviceType::VirtualGpu => DeviceClass::Gpu,
        wgpu::DeviceType::Cpu => DeviceClass::Cpu,
        wgpu::DeviceType::Other => DeviceClass::Other,
    }
}

/// Run `f` with OutOfMemory and Validation error scopes pushed, and turn
/// whatever they caught into an `Err`.
fn scoped<T>(device: &wgpu::Device, what: &str, f: impl FnOnce() -> T) -> Result<T, ApiError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    match validation.or(oom) {
        None => Ok(value),
        Some(err) => Err(ApiError::new(format!("{what}: {err}"))),
    }
}

fn scalar_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn scalar_arg(device: &wgpu::Device, label: &str, value: u32) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(&ScalarArg { value, _pad: [0; 3] }),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

/// Workgroups needed to cover `global` work-items, per dimension.
pub(crate) fn workgroup_count(global: [u32; 2], workgroup_size: [u32; 3]) -> [u32; 2] {
    [
        global[0].div_ceil(workgroup_size[0].max(1)),
        global[1].div_ceil(workgroup_size[1].max(1)),
    ]
}

/// Parse and validate WGSL, returning naga's formatted diagnostic on failure.
///
/// The diagnostic is rendered against `source` with `wgsl:line:column`
/// locations. This is the same check `build_program` runs before the
/// driver sees the source.
pub fn check_wgsl(source: &str) -> Result<naga::Module, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;
    Ok(module)
}

/// Workgroup size of the compute entry point `entry`.
fn compute_entry_point(module: &naga::Module, entry: &str) -> Result<[u32; 3], String> {
    module
        .entry_points
        .iter()
        .find(|ep| ep.name == entry && ep.stage == naga::ShaderStage::Compute)
        .map(|ep| ep.workgroup_size)
        .ok_or_else(|| {
            let available: Vec<&str> = module
                .entry_points
                .iter()
                .filter(|ep| ep.stage == naga::ShaderStage::Compute)
                .map(|ep| ep.name.as_str())
                .collect();
            format!("no compute entry point named `{entry}` (available: {available:?})")
        })
}

/// Check WGSL kernel source without a device.
///
/// Parses and validates `source`, then resolves the compute entry point
/// `entry`. Returns its `@workgroup_size`.
///
/// # Errors
/// `CompileFailed` with the compiler diagnostic.
pub fn validate_wgsl(source: &str, entry: &str) -> Result<[u32; 3], DispatchError> {
    check_wgsl(source)
        .and_then(|module| compute_entry_point(&module, entry))
        .map_err(|log| DispatchError::CompileFailed {
            diagnostic: truncate_diagnostic(&log, MAX_BUILD_LOG_BYTES),
        })
}
