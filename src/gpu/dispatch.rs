// ============================================================================
// TRANSFORM DISPATCHER — upload, bind, dispatch, read back
// ============================================================================
//
// Command order on the single queue:
//   1. blocking write of the widened source samples
//   2. kernel dispatch (asynchronous submit)
//   3. blocking read of the destination into a staging buffer
//   4. await_completion() on the queue's completion signal
//
// Step 4 is redundant with the blocking read on current drivers but is kept
// as the authoritative "everything finished" point for the run.

use std::sync::mpsc;

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use wgpu::util::DeviceExt;

use super::context::DeviceContext;
use super::program::CompiledProgram;
use super::with_error_scope;
use crate::error::{DeviceFault, RotateError};
use crate::log_info;
use crate::raster::Image;
use crate::rotate::RotationParams;

/// Uniform block bound at binding 2.  Field order is the kernel's
/// positional argument order after the two buffers; padded to 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct RotationUniforms {
    pub height: u32,
    pub width: u32,
    pub sin_theta: f32,
    pub cos_theta: f32,
    pub channels: u32,
    _pad: [u32; 3],
}

impl From<&RotationParams> for RotationUniforms {
    fn from(p: &RotationParams) -> Self {
        Self {
            height: p.height,
            width: p.width,
            sin_theta: p.sin_theta,
            cos_theta: p.cos_theta,
            channels: p.channels,
            _pad: [0; 3],
        }
    }
}

/// Index space of one dispatch.  The origin is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRange {
    pub global: [u32; 3],
    pub local: [u32; 3],
}

impl ExecutionRange {
    /// One work item per channel sample, unit work groups.
    pub fn for_image(image: &Image) -> Self {
        Self {
            global: [image.width(), image.height(), image.channels() as u32],
            local: [1, 1, 1],
        }
    }

    /// Work groups per dimension (`global / local`).
    pub fn workgroups(&self) -> [u32; 3] {
        [
            self.global[0] / self.local[0],
            self.global[1] / self.local[1],
            self.global[2] / self.local[2],
        ]
    }

    fn check_limit(&self, limit: u32) -> Result<(), DeviceFault> {
        if self.workgroups().iter().any(|&n| n > limit) {
            return Err(DeviceFault::DispatchLimit {
                grid: self.global,
                limit,
            });
        }
        Ok(())
    }
}

/// Sample count for `image`, or an error for layouts the kernel can't handle.
pub fn validate_layout(image: &Image) -> Result<usize, RotateError> {
    match image.channels() {
        3 | 4 => Ok(image.sample_count()),
        other => Err(RotateError::UnsupportedChannelLayout(other)),
    }
}

/// Widen 8-bit samples to the kernel's 32-bit element type.
pub fn widen(samples: &[u8]) -> Vec<u32> {
    samples.par_iter().map(|&s| s as u32).collect()
}

/// Narrow kernel output back to 8-bit samples.
pub fn narrow(elements: &[u32]) -> Vec<u8> {
    elements.par_iter().map(|&e| e.min(u8::MAX as u32) as u8).collect()
}

/// Device memory for one call.  Destroyed on drop, so every exit path
/// from [`rotate`] releases it.
struct DeviceBuffers {
    source: wgpu::Buffer,
    destination: wgpu::Buffer,
    staging: wgpu::Buffer,
    size: u64,
}

impl DeviceBuffers {
    fn allocate(ctx: &DeviceContext, sample_count: usize) -> Result<Self, RotateError> {
        let size = (sample_count * std::mem::size_of::<u32>()) as u64;
        let max_binding = ctx.limits.max_storage_buffer_binding_size as u64;
        if size > max_binding || size > ctx.limits.max_buffer_size {
            return Err(RotateError::DeviceBufferAllocationError(format!(
                "{} bytes exceeds device limit ({} binding, {} buffer)",
                size, max_binding, ctx.limits.max_buffer_size
            )));
        }

        let device = &ctx.device;
        let create = |label: &str, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        };

        let ((buffers, invalid), oom) = with_error_scope(device, wgpu::ErrorFilter::OutOfMemory, || {
            with_error_scope(device, wgpu::ErrorFilter::Validation, || Self {
                source: create(
                    "rotate_src",
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                ),
                destination: create(
                    "rotate_dst",
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                ),
                staging: create(
                    "rotate_staging",
                    wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                ),
                size,
            })
        });
        if let Some(err) = oom.or(invalid) {
            return Err(RotateError::DeviceBufferAllocationError(err.to_string()));
        }
        Ok(buffers)
    }
}

impl Drop for DeviceBuffers {
    fn drop(&mut self) {
        self.source.destroy();
        self.destination.destroy();
        self.staging.destroy();
    }
}

/// Pipeline, bind group and the uniform buffer they reference.
struct BoundKernel {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    _uniforms: wgpu::Buffer,
}

fn kernel_bgl(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("rotate_bgl"),
        entries: &[
            storage(0, true),
            storage(1, false),
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

/// Instantiate the entry point and bind (source, destination, params).
fn bind_arguments(
    ctx: &DeviceContext,
    program: &CompiledProgram,
    buffers: &DeviceBuffers,
    params: &RotationParams,
) -> Result<BoundKernel, RotateError> {
    let device = &ctx.device;
    let uniforms = RotationUniforms::from(params);

    let (bound, error) = with_error_scope(device, wgpu::ErrorFilter::Validation, || {
        let uniform_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("rotate_params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group_layout = kernel_bgl(device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rotate_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("rotate_pipeline"),
            layout: Some(&pipeline_layout),
            module: &program.module,
            entry_point: program.options.entry_point.as_str(),
            compilation_options: Default::default(),
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("rotate_bg"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.source.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.destination.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buf.as_entire_binding(),
                },
            ],
        });

        BoundKernel {
            pipeline,
            bind_group,
            _uniforms: uniform_buf,
        }
    });

    match error {
        Some(err) => Err(RotateError::KernelArgumentError(err.to_string())),
        None => Ok(bound),
    }
}

/// Blocking write: returns once the device holds the samples.
fn upload(ctx: &DeviceContext, buffer: &wgpu::Buffer, image: &Image) {
    let widened = widen(image.pixels());
    ctx.queue.write_buffer(buffer, 0, bytemuck::cast_slice(&widened));
    let index = ctx.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
    ctx.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
}

/// Submit the kernel without waiting for it.
fn enqueue_kernel(ctx: &DeviceContext, kernel: &BoundKernel, range: ExecutionRange) {
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("rotate_encoder"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("rotate_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&kernel.pipeline);
        pass.set_bind_group(0, &kernel.bind_group, &[]);
        let [x, y, z] = range.workgroups();
        pass.dispatch_workgroups(x, y, z);
    }
    ctx.queue.submit(std::iter::once(encoder.finish()));
}

/// Blocking read of the destination buffer, narrowed to 8-bit samples.
fn read_back(ctx: &DeviceContext, buffers: &DeviceBuffers) -> Result<Vec<u8>, RotateError> {
    let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("rotate_readback"),
    });
    encoder.copy_buffer_to_buffer(&buffers.destination, 0, &buffers.staging, 0, buffers.size);
    let index = ctx.queue.submit(std::iter::once(encoder.finish()));

    let slice = buffers.staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(DeviceFault::Map(e).into()),
        Err(_) => return Err(DeviceFault::CompletionSignalLost.into()),
    }

    let mapped = slice.get_mapped_range();
    let samples = narrow(bytemuck::cast_slice(&mapped[..]));
    drop(mapped);
    buffers.staging.unmap();
    Ok(samples)
}

/// Wait for the queue's completion signal covering all submitted work.
pub fn await_completion(ctx: &DeviceContext) -> Result<(), RotateError> {
    const ATTEMPTS: usize = 3;

    let (tx, rx) = mpsc::channel();
    ctx.queue.on_submitted_work_done(move || {
        let _ = tx.send(());
    });
    for _ in 0..ATTEMPTS {
        ctx.device.poll(wgpu::Maintain::Wait);
        match rx.try_recv() {
            Ok(()) => return Ok(()),
            Err(mpsc::TryRecvError::Empty) => continue,
            Err(mpsc::TryRecvError::Disconnected) => break,
        }
    }
    Err(DeviceFault::CompletionSignalLost.into())
}

/// Rotate `image` by `angle_radians` on the context's device.
///
/// Device buffers live only for this call.  Errors are terminal for the
/// transform; nothing is retried.
pub fn rotate(
    ctx: &DeviceContext,
    program: &CompiledProgram,
    image: &Image,
    angle_radians: f64,
) -> Result<Image, RotateError> {
    program.ensure_device(ctx)?;
    let sample_count = validate_layout(image)?;
    let params = RotationParams::new(angle_radians, image);
    let range = ExecutionRange::for_image(image);
    range.check_limit(ctx.limits.max_compute_workgroups_per_dimension)?;

    let buffers = DeviceBuffers::allocate(ctx, sample_count)?;

    let ((), upload_error) = with_error_scope(&ctx.device, wgpu::ErrorFilter::Validation, || {
        upload(ctx, &buffers.source, image)
    });
    if let Some(err) = upload_error {
        return Err(RotateError::from_scope(err));
    }

    let kernel = bind_arguments(ctx, program, &buffers, &params)?;
    log_info!(
        "Dispatching {} from {} grid {:?} local {:?} (angle {:.6} rad, sin {:.6}, cos {:.6})",
        program.options.entry_point,
        program.source_identifier,
        range.global,
        range.local,
        params.angle_radians,
        params.sin_theta,
        params.cos_theta
    );

    let (samples, fault) = with_error_scope(&ctx.device, wgpu::ErrorFilter::Validation, || {
        enqueue_kernel(ctx, &kernel, range);
        let samples = read_back(ctx, &buffers)?;
        await_completion(ctx)?;
        Ok::<_, RotateError>(samples)
    });
    if let Some(err) = fault {
        return Err(RotateError::from_scope(err));
    }
    let samples = samples?;
    log_info!("Received {} samples from device", samples.len());

    Image::new(image.width(), image.height(), image.channels(), samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<RotationUniforms>(), 32);
        assert_eq!(std::mem::offset_of!(RotationUniforms, height), 0);
        assert_eq!(std::mem::offset_of!(RotationUniforms, width), 4);
        assert_eq!(std::mem::offset_of!(RotationUniforms, sin_theta), 8);
        assert_eq!(std::mem::offset_of!(RotationUniforms, cos_theta), 12);
        assert_eq!(std::mem::offset_of!(RotationUniforms, channels), 16);
    }

    #[test]
    fn uniforms_carry_params_in_argument_order() {
        let img = Image::filled(6, 4, &[0, 0, 0, 0]).unwrap();
        let params = RotationParams::new(std::f64::consts::FRAC_PI_2, &img);
        let u = RotationUniforms::from(&params);
        assert_eq!((u.height, u.width, u.channels), (4, 6, 4));
        assert_eq!(u.sin_theta, 1.0);
        assert!(u.cos_theta.abs() < 1e-7);
    }

    #[test]
    fn execution_range_is_one_item_per_sample() {
        let img = Image::filled(5, 7, &[1, 2, 3]).unwrap();
        let range = ExecutionRange::for_image(&img);
        assert_eq!(range.global, [5, 7, 3]);
        assert_eq!(range.local, [1, 1, 1]);
        assert_eq!(range.workgroups(), [5, 7, 3]);
    }

    #[test]
    fn oversized_grid_hits_dispatch_limit() {
        let range = ExecutionRange {
            global: [70_000, 2, 3],
            local: [1, 1, 1],
        };
        assert!(matches!(
            range.check_limit(65_535),
            Err(DeviceFault::DispatchLimit { limit: 65_535, .. })
        ));
        assert!(range.check_limit(70_000).is_ok());
    }

    #[test]
    fn only_three_and_four_channels_dispatch() {
        let rgb = Image::filled(2, 2, &[1, 2, 3]).unwrap();
        assert_eq!(validate_layout(&rgb).unwrap(), 12);
        let gray = Image::filled(2, 2, &[9]).unwrap();
        assert!(matches!(
            validate_layout(&gray),
            Err(RotateError::UnsupportedChannelLayout(1))
        ));
    }

    #[test]
    fn narrowing_inverts_widening() {
        let samples: Vec<u8> = (0..=255).collect();
        assert_eq!(narrow(&widen(&samples)), samples);
    }
}
