// ============================================================================
// ERRORS — one failure kind per pipeline stage
// ============================================================================

use std::fmt;
use std::path::PathBuf;

use crate::gpu::program::BuildOptions;

/// Every way a rotation run can fail.  None of these are recoverable
/// within a single run; the CLI logs them and exits non-zero.
#[derive(Debug)]
pub enum RotateError {
    /// No adapters on any enabled backend.
    NoPlatformAvailable,
    /// `--platform-index` points past the enumerated platforms.
    PlatformIndexOutOfRange { index: usize, available: usize },
    /// The chosen platform exposes no GPU-class adapter.
    NoGpuDeviceAvailable { platform: String },
    /// The adapter refused to open a device.
    DeviceRequest(wgpu::RequestDeviceError),
    /// Kernel source file missing or unreadable.
    SourceNotFound { identifier: String, reason: String },
    /// Kernel failed to compile.  `log` is the compiler output verbatim.
    CompileError { log: String, options: BuildOptions },
    /// Program was compiled for another device and must be rebuilt.
    ProgramDeviceMismatch { built_for: String, current: String },
    FileNotFound(PathBuf),
    UnsupportedImageType { path: PathBuf, detail: String },
    WriteError { path: PathBuf, detail: String },
    /// Pixel data does not match the declared dimensions.
    InvalidImage(String),
    UnsupportedChannelLayout(u8),
    DeviceBufferAllocationError(String),
    KernelArgumentError(String),
    ExecutionError(DeviceFault),
    InvalidAngle(String),
}

/// Device-side failure reported while a transform is in flight.
#[derive(Debug)]
pub enum DeviceFault {
    Validation(String),
    OutOfMemory(String),
    Map(wgpu::BufferAsyncError),
    /// The queue dropped the completion callback without firing it.
    CompletionSignalLost,
    /// Grid exceeds `max_compute_workgroups_per_dimension`.
    DispatchLimit { grid: [u32; 3], limit: u32 },
}

impl RotateError {
    /// Error captured from a wgpu error scope during dispatch.
    pub(crate) fn from_scope(err: wgpu::Error) -> Self {
        match err {
            wgpu::Error::OutOfMemory { .. } => {
                RotateError::ExecutionError(DeviceFault::OutOfMemory(err.to_string()))
            }
            other => RotateError::ExecutionError(DeviceFault::Validation(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFault::Validation(msg) => write!(f, "validation error: {}", msg),
            DeviceFault::OutOfMemory(msg) => write!(f, "out of device memory: {}", msg),
            DeviceFault::Map(e) => write!(f, "buffer map failed: {}", e),
            DeviceFault::CompletionSignalLost => write!(f, "completion signal was dropped"),
            DeviceFault::DispatchLimit { grid, limit } => write!(
                f,
                "grid {}x{}x{} exceeds the per-dimension workgroup limit {}",
                grid[0], grid[1], grid[2], limit
            ),
        }
    }
}

impl fmt::Display for RotateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotateError::NoPlatformAvailable => write!(f, "no compute platforms available"),
            RotateError::PlatformIndexOutOfRange { index, available } => write!(
                f,
                "platform index {} out of range ({} platform(s) found)",
                index, available
            ),
            RotateError::NoGpuDeviceAvailable { platform } => {
                write!(f, "platform {} exposes no GPU device", platform)
            }
            RotateError::DeviceRequest(e) => write!(f, "could not open device: {}", e),
            RotateError::SourceNotFound { identifier, reason } => {
                write!(f, "kernel source file {} not found: {}", identifier, reason)
            }
            RotateError::CompileError { log, options } => write!(
                f,
                "kernel compilation failed ({})\n{}",
                options, log
            ),
            RotateError::ProgramDeviceMismatch { built_for, current } => write!(
                f,
                "program was built for {} but the context device is {}",
                built_for, current
            ),
            RotateError::FileNotFound(path) => write!(f, "file not found: {}", path.display()),
            RotateError::UnsupportedImageType { path, detail } => {
                write!(f, "unsupported image {}: {}", path.display(), detail)
            }
            RotateError::WriteError { path, detail } => {
                write!(f, "could not write {}: {}", path.display(), detail)
            }
            RotateError::InvalidImage(msg) => write!(f, "invalid image: {}", msg),
            RotateError::UnsupportedChannelLayout(n) => {
                write!(f, "unsupported channel layout: {} channel(s), expected 3 or 4", n)
            }
            RotateError::DeviceBufferAllocationError(msg) => {
                write!(f, "device buffer allocation failed: {}", msg)
            }
            RotateError::KernelArgumentError(msg) => write!(f, "kernel argument error: {}", msg),
            RotateError::ExecutionError(fault) => write!(f, "kernel execution failed: {}", fault),
            RotateError::InvalidAngle(input) => {
                write!(f, "'{}' is not a whole number of degrees", input)
            }
        }
    }
}

impl std::error::Error for RotateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RotateError::DeviceRequest(e) => Some(e),
            RotateError::ExecutionError(DeviceFault::Map(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceFault> for RotateError {
    fn from(fault: DeviceFault) -> Self {
        RotateError::ExecutionError(fault)
    }
}
