// ============================================================================
// PIPELINE — device context + compiled kernel, built once and reused
// ============================================================================

use std::path::Path;

use crate::error::RotateError;
use crate::gpu::{self, CompiledProgram, DeviceContext, KernelSource, SelectorConfig};
use crate::raster::Image;

/// Everything needed to run rotations on one device.
///
/// Build with [`Pipeline::new`]; independent pipelines can coexist in one
/// process.  Field order makes the program drop before its device.
pub struct Pipeline {
    pub program: CompiledProgram,
    pub context: DeviceContext,
}

impl Pipeline {
    /// Select a device and compile the kernel at `kernel_path`.
    ///
    /// The source is read before any device work so a missing file fails
    /// fast.
    pub fn new(config: &SelectorConfig, kernel_path: &Path) -> Result<Self, RotateError> {
        let source = KernelSource::load(kernel_path)?;
        Self::from_source(config, &source)
    }

    pub fn from_source(config: &SelectorConfig, source: &KernelSource) -> Result<Self, RotateError> {
        let context = DeviceContext::select(config)?;
        let program = CompiledProgram::build(&context, source)?;
        Ok(Self { program, context })
    }

    pub fn rotate(&self, image: &Image, angle_radians: f64) -> Result<Image, RotateError> {
        gpu::rotate(&self.context, &self.program, image, angle_radians)
    }

    /// Rotate by a whole number of degrees.
    pub fn rotate_degrees(&self, image: &Image, degrees: i32) -> Result<Image, RotateError> {
        self.rotate(image, (degrees as f64).to_radians())
    }
}
