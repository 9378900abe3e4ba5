// gpu/context.rs — Execution context: device context + command queue.
//
// ACQUISITION ORDER
// ─────────────────
//   1. context   (create_context)
//   2. queue     (create_queue, on that context)
//
// If step 2 fails, the context acquired in step 1 is still a local owned by
// `open`, and the early return drops it. Nothing else was acquired, so
// exactly steps 1..k-1 are released.
//
// RELEASE ORDER
// ─────────────
// Rust drops struct fields in declaration order (top → bottom). `queue` is
// declared before `context`, so the queue is always released first. Every
// resource acquired later in a dispatch (buffers, programs) borrows the
// `ExecutionContext`, so the borrow checker guarantees those are dropped
// before it.

use std::fmt;

use tracing::debug;

use crate::error::DispatchError;
use crate::gpu::api::{ComputeApi, DeviceInfo};

/// A device context and its command queue, owned by one dispatch.
pub struct ExecutionContext<'api, A: ComputeApi> {
    // Field order is drop order: queue, then context, then the device handle.
    queue: A::Queue,
    context: A::Context,
    device: A::Device,
    info: DeviceInfo,
    api: &'api A,
}

impl<'api, A: ComputeApi> ExecutionContext<'api, A> {
    /// Create a context on `device`, then a queue on that context.
    ///
    /// # Errors
    /// `ContextCreationFailed` or `QueueCreationFailed`. On either, every
    /// resource created so far has already been released.
    pub fn open(api: &'api A, device: A::Device) -> Result<Self, DispatchError> {
        let info = api.device_info(&device);

        let mut context = api
            .create_context(&device)
            .map_err(|e| DispatchError::ContextCreationFailed(e.message))?;
        debug!(device = %info, "context created");

        let queue = api
            .create_queue(&mut context, &device)
            .map_err(|e| DispatchError::QueueCreationFailed(e.message))?;
        debug!("command queue created");

        Ok(ExecutionContext { queue, context, device, info, api })
    }

    #[inline]
    pub fn api(&self) -> &'api A {
        self.api
    }

    #[inline]
    pub fn context(&self) -> &A::Context {
        &self.context
    }

    #[inline]
    pub fn queue(&self) -> &A::Queue {
        &self.queue
    }

    #[inline]
    pub fn device(&self) -> &A::Device {
        &self.device
    }

    #[inline]
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }
}

impl<A: ComputeApi> fmt::Debug for ExecutionContext<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext").field("device", &self.info).finish()
    }
}
