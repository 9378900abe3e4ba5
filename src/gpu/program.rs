// gpu/program.rs — Kernel compilation.
//
// Two acquisitions, in order:
//   1. program — the compiled module (build_program)
//   2. kernel  — the named entry point resolved from it (create_kernel)
//
// Fields are declared kernel-first so the kernel is released before the
// program it was resolved from.
//
// A build failure is the only way malformed kernel source reaches the
// caller, so the build log is never dropped: it rides back inside
// `CompileFailed { diagnostic }`, capped at `max_log_bytes`. Nothing is
// cached; each dispatch compiles its own program.

use tracing::debug;

use crate::error::{truncate_diagnostic, DispatchError};
use crate::gpu::api::ComputeApi;
use crate::gpu::context::ExecutionContext;

/// Default cap on the build log carried by `CompileFailed`.
pub const MAX_BUILD_LOG_BYTES: usize = 16 * 1024;

/// A compiled program and its resolved entry point.
pub struct KernelProgram<'ctx, 'api, A: ComputeApi> {
    // Field order is drop order: kernel before program.
    kernel: A::Kernel,
    program: A::Program,
    entry: String,
    ctx: &'ctx ExecutionContext<'api, A>,
}

impl<'ctx, 'api, A: ComputeApi> KernelProgram<'ctx, 'api, A> {
    /// Compile `source` on the context's device and resolve `entry`.
    ///
    /// # Errors
    /// `CompileFailed` carrying the build log (truncated to `max_log_bytes`)
    /// when the source does not compile or has no entry point named `entry`.
    pub fn compile(
        ctx: &'ctx ExecutionContext<'api, A>,
        source: &str,
        entry: &str,
        max_log_bytes: usize,
    ) -> Result<Self, DispatchError> {
        let api = ctx.api();

        let program = api
            .build_program(ctx.context(), ctx.device(), source)
            .map_err(|e| compile_failed(&e.message, max_log_bytes))?;
        debug!(source_bytes = source.len(), "program built");

        let kernel = api
            .create_kernel(ctx.context(), &program, entry)
            .map_err(|e| compile_failed(&e.message, max_log_bytes))?;
        debug!(entry, "kernel resolved");

        Ok(KernelProgram { kernel, program, entry: entry.to_string(), ctx })
    }

    #[inline]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    #[inline]
    pub fn kernel(&self) -> &A::Kernel {
        &self.kernel
    }

    #[inline]
    pub fn kernel_mut(&mut self) -> &mut A::Kernel {
        &mut self.kernel
    }

    #[inline]
    pub fn program(&self) -> &A::Program {
        &self.program
    }

    #[inline]
    pub fn context(&self) -> &'ctx ExecutionContext<'api, A> {
        self.ctx
    }
}

fn compile_failed(log: &str, max_log_bytes: usize) -> DispatchError {
    // An empty log would leave the caller with nothing to show.
    let log = if log.trim().is_empty() { "compiler reported failure without a log" } else { log };
    DispatchError::CompileFailed { diagnostic: truncate_diagnostic(log, max_log_bytes) }
}
