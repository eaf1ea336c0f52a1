// ============================================================================
// PROGRAM BUILDER — load kernel source and compile it for one device
// ============================================================================

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use super::context::DeviceContext;
use super::with_error_scope;
use crate::error::RotateError;
use crate::log_info;

/// Compute entry point every rotation kernel must export.
pub const ROTATE_ENTRY_POINT: &str = "rotate_image";

/// Kernel source text plus the identifier it was loaded from.
#[derive(Debug, Clone)]
pub struct KernelSource {
    pub identifier: String,
    pub text: String,
}

impl KernelSource {
    /// Read kernel source from `path` (relative paths resolve against the
    /// working directory).
    pub fn load(path: &Path) -> Result<Self, RotateError> {
        let text = std::fs::read_to_string(path).map_err(|e| RotateError::SourceNotFound {
            identifier: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            identifier: path.display().to_string(),
            text,
        })
    }

    pub fn from_text(identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            text: text.into(),
        }
    }
}

/// What the program was compiled with.  Reported next to the compiler log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub label: String,
    pub entry_point: String,
    pub backend: wgpu::Backend,
    pub instance_flags: wgpu::InstanceFlags,
}

impl fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "label={} entry_point={} backend={:?} flags={:?}",
            self.label, self.entry_point, self.backend, self.instance_flags
        )
    }
}

/// A kernel compiled for the device of one [`DeviceContext`].
pub struct CompiledProgram {
    pub module: wgpu::ShaderModule,
    pub source_identifier: String,
    pub options: BuildOptions,
    device_id: u64,
    built_for: String,
}

impl CompiledProgram {
    /// Compile `source` on the context's device.
    ///
    /// Any shader error comes back as [`RotateError::CompileError`] with the
    /// compiler's full diagnostic text.  There is no retry.
    pub fn build(ctx: &DeviceContext, source: &KernelSource) -> Result<Self, RotateError> {
        let options = BuildOptions {
            label: source.identifier.clone(),
            entry_point: ROTATE_ENTRY_POINT.to_string(),
            backend: ctx.adapter_info.backend,
            instance_flags: ctx.instance_flags,
        };

        let (module, error) = with_error_scope(&ctx.device, wgpu::ErrorFilter::Validation, || {
            ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.identifier.as_str()),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&source.text)),
            })
        });
        if let Some(err) = error {
            return Err(RotateError::CompileError {
                log: err.to_string(),
                options,
            });
        }

        log_info!("Compiled {} for {}", source.identifier, ctx.identity());
        Ok(Self {
            module,
            source_identifier: source.identifier.clone(),
            options,
            device_id: ctx.id(),
            built_for: ctx.identity(),
        })
    }

    /// Adapter description of the device this program was compiled for.
    pub fn built_for(&self) -> &str {
        &self.built_for
    }

    /// [`DeviceContext::id`] of the device this program was compiled for.
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Fails unless `ctx` is the very device the program was compiled for.
    /// A second context on the same adapter counts as a different device.
    pub fn ensure_device(&self, ctx: &DeviceContext) -> Result<(), RotateError> {
        if ctx.id() != self.device_id {
            return Err(RotateError::ProgramDeviceMismatch {
                built_for: format!("{} (context #{})", self.built_for, self.device_id),
                current: ctx.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_names_the_file() {
        let err = KernelSource::load(Path::new("definitely/not/here/rotation.wgsl")).unwrap_err();
        match err {
            RotateError::SourceNotFound { identifier, reason } => {
                assert!(identifier.ends_with("rotation.wgsl"));
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bundled_kernel_loads_and_exports_entry_point() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("rotation.wgsl");
        let source = KernelSource::load(&path).unwrap();
        assert!(source.text.contains(&format!("fn {}", ROTATE_ENTRY_POINT)));
    }

    #[test]
    fn build_options_display_lists_entry_point() {
        let options = BuildOptions {
            label: "rotation.wgsl".into(),
            entry_point: ROTATE_ENTRY_POINT.into(),
            backend: wgpu::Backend::Vulkan,
            instance_flags: wgpu::InstanceFlags::empty(),
        };
        let text = options.to_string();
        assert!(text.contains("entry_point=rotate_image"));
        assert!(text.contains("Vulkan"));
    }
}
