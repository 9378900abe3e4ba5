// tests/common/mod.rs — Counting compute-API double for lifecycle tests.
//
// `CountingApi` implements `ComputeApi` with no GPU at all. Every handle it
// hands out records an `Acquire` in a shared ledger when created and a
// `Release` when dropped, so a test can assert exactly what was created,
// what was released, and in which order.
//
// Failure injection: set `fail_at` to a `Step` and that step returns an
// error before acquiring anything. Program builds run the real WGSL front
// end, so broken source fails with the same diagnostic the wgpu backend
// produces. The "kernel" run by `enqueue_2d` is the
// CPU reference of whichever built-in filter's source was compiled.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use kiln::filter::{CpuFilter, FilterRegistry};
use kiln::gpu::api::ApiError;
use kiln::gpu::backend::check_wgsl;
use kiln::{ComputeApi, DeviceClass, DeviceInfo};

pub const TOL: f32 = 1e-5;

pub fn assert_close(got: &[f32], want: &[f32]) {
    assert_eq!(got.len(), want.len(), "length mismatch");
    for (i, (g, w)) in got.iter().zip(want).enumerate() {
        assert!((g - w).abs() <= TOL, "channel {i}: got {g}, want {w}");
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Context,
    Queue,
    Buffer,
    Program,
    Kernel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Acquire(Resource),
    Release(Resource),
}

/// Lifecycle steps that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Context,
    Queue,
    Buffer,
    Program,
    Kernel,
    Bind,
    Enqueue,
    Readback,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::Context,
        Step::Queue,
        Step::Buffer,
        Step::Program,
        Step::Kernel,
        Step::Bind,
        Step::Enqueue,
        Step::Readback,
    ];
}

pub type Ledger = Arc<Mutex<Vec<Event>>>;

/// Records its release when dropped.
#[derive(Debug)]
pub struct Tracked {
    resource: Resource,
    ledger: Ledger,
}

impl Tracked {
    fn acquire(ledger: &Ledger, resource: Resource) -> Self {
        ledger.lock().unwrap().push(Event::Acquire(resource));
        Tracked { resource, ledger: Arc::clone(ledger) }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.ledger.lock().unwrap().push(Event::Release(self.resource));
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub name: &'static str,
    pub class: DeviceClass,
}

pub struct MockBuffer {
    data: Arc<Mutex<Vec<f32>>>,
    _tracked: Tracked,
}

pub struct MockProgram {
    source: String,
    _tracked: Tracked,
}

pub struct MockKernel {
    cpu: CpuFilter,
    bound: Option<(Arc<Mutex<Vec<f32>>>, u32, u32)>,
    _tracked: Tracked,
}

// ---------------------------------------------------------------------------
// CountingApi
// ---------------------------------------------------------------------------

pub struct CountingApi {
    /// Devices per platform, in platform order.
    pub platforms: Vec<Vec<MockDevice>>,
    pub fail_at: Option<Step>,
    /// Build log returned when `fail_at == Some(Step::Program)`.
    pub build_log: String,
    pub ledger: Ledger,
}

impl CountingApi {
    /// One platform with one GPU.
    pub fn with_gpu() -> Self {
        Self::with_platforms(vec![vec![MockDevice { name: "mock-gpu", class: DeviceClass::Gpu }]])
    }

    /// No platforms at all.
    pub fn empty() -> Self {
        Self::with_platforms(Vec::new())
    }

    pub fn with_platforms(platforms: Vec<Vec<MockDevice>>) -> Self {
        CountingApi {
            platforms,
            fail_at: None,
            build_log: "mock.wgsl:3:5 error: expected ';'".to_string(),
            ledger: Arc::default(),
        }
    }

    pub fn failing_at(mut self, step: Step) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.ledger.lock().unwrap().clone()
    }

    pub fn acquired(&self) -> Vec<Resource> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Acquire(r) => Some(r),
                Event::Release(_) => None,
            })
            .collect()
    }

    pub fn released(&self) -> Vec<Resource> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Release(r) => Some(r),
                Event::Acquire(_) => None,
            })
            .collect()
    }

    /// Acquisitions not yet matched by a release.
    pub fn live(&self) -> usize {
        self.acquired().len() - self.released().len()
    }

    fn check(&self, step: Step) -> Result<(), ApiError> {
        if self.fail_at == Some(step) {
            let msg = match step {
                Step::Program => self.build_log.clone(),
                other => format!("injected failure at {other:?}"),
            };
            return Err(ApiError::new(msg));
        }
        Ok(())
    }
}

impl ComputeApi for CountingApi {
    type Platform = usize;
    type Device = MockDevice;
    type Context = Tracked;
    type Queue = Tracked;
    type Buffer = MockBuffer;
    type Program = MockProgram;
    type Kernel = MockKernel;

    fn platforms(&self) -> Vec<usize> {
        (0..self.platforms.len()).collect()
    }

    fn platform_name(&self, platform: &usize) -> String {
        format!("mock-platform-{platform}")
    }

    fn devices(&self, platform: &usize, class: DeviceClass) -> Vec<MockDevice> {
        self.platforms[*platform].iter().filter(|d| class.accepts(d.class)).cloned().collect()
    }

    fn device_info(&self, device: &MockDevice) -> DeviceInfo {
        DeviceInfo { name: device.name.to_string(), class: device.class, platform: "mock".into() }
    }

    fn create_context(&self, _device: &MockDevice) -> Result<Tracked, ApiError> {
        self.check(Step::Context)?;
        Ok(Tracked::acquire(&self.ledger, Resource::Context))
    }

    fn create_queue(&self, _context: &mut Tracked, _device: &MockDevice) -> Result<Tracked, ApiError> {
        self.check(Step::Queue)?;
        Ok(Tracked::acquire(&self.ledger, Resource::Queue))
    }

    fn create_buffer(&self, _context: &Tracked, _queue: &Tracked, contents: &[f32]) -> Result<MockBuffer, ApiError> {
        self.check(Step::Buffer)?;
        Ok(MockBuffer {
            data: Arc::new(Mutex::new(contents.to_vec())),
            _tracked: Tracked::acquire(&self.ledger, Resource::Buffer),
        })
    }

    fn read_buffer(
        &self,
        _context: &Tracked,
        _queue: &Tracked,
        buffer: &MockBuffer,
        out: &mut [f32],
    ) -> Result<(), ApiError> {
        self.check(Step::Readback)?;
        out.copy_from_slice(&buffer.data.lock().unwrap());
        Ok(())
    }

    fn build_program(&self, _context: &Tracked, _device: &MockDevice, source: &str) -> Result<MockProgram, ApiError> {
        self.check(Step::Program)?;
        check_wgsl(source).map_err(ApiError::new)?;
        Ok(MockProgram {
            source: source.to_string(),
            _tracked: Tracked::acquire(&self.ledger, Resource::Program),
        })
    }

    fn create_kernel(&self, _context: &Tracked, program: &MockProgram, entry: &str) -> Result<MockKernel, ApiError> {
        self.check(Step::Kernel)?;
        let registry = FilterRegistry::builtin();
        let cpu = registry
            .names()
            .filter_map(|n| registry.get(n).ok())
            .find(|def| def.source == program.source.as_str() && def.entry == entry)
            .and_then(|def| def.cpu)
            .ok_or_else(|| ApiError::new(format!("no compute entry point named `{entry}`")))?;
        Ok(MockKernel { cpu, bound: None, _tracked: Tracked::acquire(&self.ledger, Resource::Kernel) })
    }

    fn set_kernel_args(
        &self,
        _context: &Tracked,
        kernel: &mut MockKernel,
        buffer: &MockBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), ApiError> {
        self.check(Step::Bind)?;
        kernel.bound = Some((Arc::clone(&buffer.data), width, height));
        Ok(())
    }

    fn enqueue_2d(&self, _context: &Tracked, _queue: &Tracked, kernel: &MockKernel, global: [u32; 2]) -> Result<(), ApiError> {
        self.check(Step::Enqueue)?;
        let (data, w, h) = kernel.bound.as_ref().ok_or_else(|| ApiError::new("arguments not bound"))?;
        assert_eq!(global, [*w, *h], "global range must be one work-item per pixel");
        (kernel.cpu)(&mut data.lock().unwrap(), *w as usize, *h as usize);
        Ok(())
    }
}
