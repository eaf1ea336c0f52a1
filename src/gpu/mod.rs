// ============================================================================
// GPU MODULE — compute offload for image rotation
// ============================================================================
//
// Architecture:
//   context.rs  — platform enumeration, device selection, device + queue
//   program.rs  — kernel source loading and compilation
//   dispatch.rs — buffers, argument binding, NDRange dispatch, readback
// ============================================================================

pub mod context;
pub mod dispatch;
pub mod program;

pub use context::{DeviceContext, PlatformPolicy, PlatformSummary, SelectorConfig};
pub use dispatch::rotate;
pub use program::{BuildOptions, CompiledProgram, KernelSource};

/// Run `f` inside a wgpu error scope and return whatever the scope caught.
///
/// Scopes nest, so callers can stack filters by nesting calls.
pub(crate) fn with_error_scope<T>(
    device: &wgpu::Device,
    filter: wgpu::ErrorFilter,
    f: impl FnOnce() -> T,
) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(filter);
    let value = f();
    let error = pollster::block_on(device.pop_error_scope());
    (value, error)
}
