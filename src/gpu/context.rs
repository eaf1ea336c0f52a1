// ============================================================================
// DEVICE CONTEXT — platform enumeration, device selection, queue creation
// ============================================================================
//
// A "platform" is one wgpu backend together with the adapters it exposes,
// in enumeration order.  Which platform to use is a policy decision because
// backend order differs between machines; the device on that platform must
// be GPU-class (software rasterizers are rejected, never used as fallback).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RotateError;
use crate::{log_err, log_info, log_warn};

/// How to pick a platform when more than one is enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlatformPolicy {
    /// First platform that exposes a GPU-class adapter, else the first one.
    #[default]
    PreferGpu,
    /// One platform: use it.  Several: use the second.
    SecondIfMany,
    /// Exactly two platforms: use the second.  Otherwise the first.
    SecondIfTwo,
    /// Always this index.
    Index(usize),
}

impl fmt::Display for PlatformPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformPolicy::PreferGpu => write!(f, "prefer-gpu"),
            PlatformPolicy::SecondIfMany => write!(f, "second-if-many"),
            PlatformPolicy::SecondIfTwo => write!(f, "second-if-two"),
            PlatformPolicy::Index(i) => write!(f, "index {}", i),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub backends: wgpu::Backends,
    pub policy: PlatformPolicy,
}

impl Default for SelectorConfig {
    /// Honours `WGPU_BACKEND` (e.g. `vulkan,metal`), otherwise the primary
    /// backends.  GL is left out because compute support there is spotty.
    fn default() -> Self {
        Self {
            backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::PRIMARY),
            policy: PlatformPolicy::default(),
        }
    }
}

/// One backend and the adapters it reported, without live handles.
#[derive(Debug, Clone)]
pub struct PlatformSummary {
    pub backend: wgpu::Backend,
    pub adapters: Vec<wgpu::AdapterInfo>,
}

impl PlatformSummary {
    pub fn name(&self) -> String {
        format!("{:?}", self.backend)
    }

    pub fn has_gpu(&self) -> bool {
        self.adapters.iter().any(|a| is_gpu_class(a.device_type))
    }
}

pub fn is_gpu_class(device_type: wgpu::DeviceType) -> bool {
    matches!(
        device_type,
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::VirtualGpu
    )
}

/// Apply `policy` to the enumerated platforms.
pub fn choose_platform(platforms: &[PlatformSummary], policy: PlatformPolicy) -> Result<usize, RotateError> {
    if platforms.is_empty() {
        return Err(RotateError::NoPlatformAvailable);
    }
    let index = match policy {
        PlatformPolicy::PreferGpu => platforms.iter().position(PlatformSummary::has_gpu).unwrap_or(0),
        PlatformPolicy::SecondIfMany => {
            if platforms.len() == 1 { 0 } else { 1 }
        }
        PlatformPolicy::SecondIfTwo => {
            if platforms.len() == 2 { 1 } else { 0 }
        }
        PlatformPolicy::Index(i) => i,
    };
    if index >= platforms.len() {
        return Err(RotateError::PlatformIndexOutOfRange {
            index,
            available: platforms.len(),
        });
    }
    Ok(index)
}

/// Index of the best GPU-class adapter: discrete, then integrated, then
/// virtual.  Ties keep enumeration order.
pub fn choose_device(device_types: &[wgpu::DeviceType]) -> Option<usize> {
    device_types
        .iter()
        .enumerate()
        .filter(|(_, t)| is_gpu_class(**t))
        .min_by_key(|(_, t)| match t {
            wgpu::DeviceType::DiscreteGpu => 0,
            wgpu::DeviceType::IntegratedGpu => 1,
            _ => 2,
        })
        .map(|(i, _)| i)
}

/// Group adapters by backend, keeping first-seen order.
fn enumerate_platforms(instance: &wgpu::Instance, backends: wgpu::Backends) -> Vec<(wgpu::Backend, Vec<wgpu::Adapter>)> {
    let mut platforms: Vec<(wgpu::Backend, Vec<wgpu::Adapter>)> = Vec::new();
    for adapter in instance.enumerate_adapters(backends) {
        let backend = adapter.get_info().backend;
        match platforms.iter_mut().find(|(b, _)| *b == backend) {
            Some((_, adapters)) => adapters.push(adapter),
            None => platforms.push((backend, vec![adapter])),
        }
    }
    platforms
}

fn new_instance(backends: wgpu::Backends, flags: wgpu::InstanceFlags) -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        flags,
        ..Default::default()
    })
}

/// Every platform and adapter visible on `backends`, for `--list-devices`.
pub fn list_platforms(backends: wgpu::Backends) -> Vec<PlatformSummary> {
    let instance = new_instance(backends, wgpu::InstanceFlags::from_build_config());
    enumerate_platforms(&instance, backends)
        .into_iter()
        .map(|(backend, adapters)| PlatformSummary {
            backend,
            adapters: adapters.iter().map(|a| a.get_info()).collect(),
        })
        .collect()
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for a newly opened device.  Two contexts on the same
/// adapter still get different ids.
fn next_context_id() -> u64 {
    NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// The selected device and its command queue.
///
/// Fields drop top to bottom, so `_instance` is declared last to outlive
/// the device and queue created from it.
pub struct DeviceContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub platform_index: usize,
    pub platform: PlatformSummary,
    pub adapter_info: wgpu::AdapterInfo,
    pub limits: wgpu::Limits,
    pub instance_flags: wgpu::InstanceFlags,
    id: u64,
    _instance: wgpu::Instance,
}

impl DeviceContext {
    /// Enumerate platforms, pick one per `config.policy`, and open its best
    /// GPU-class adapter.
    pub fn select(config: &SelectorConfig) -> Result<Self, RotateError> {
        pollster::block_on(Self::select_async(config))
    }

    async fn select_async(config: &SelectorConfig) -> Result<Self, RotateError> {
        let instance_flags = wgpu::InstanceFlags::from_build_config();
        let instance = new_instance(config.backends, instance_flags);
        let mut platforms = enumerate_platforms(&instance, config.backends);

        let summaries: Vec<PlatformSummary> = platforms
            .iter()
            .map(|(backend, adapters)| PlatformSummary {
                backend: *backend,
                adapters: adapters.iter().map(|a| a.get_info()).collect(),
            })
            .collect();
        log_info!("Found {} platform(s) on {:?}", summaries.len(), config.backends);

        let platform_index = choose_platform(&summaries, config.policy)?;
        let platform = summaries[platform_index].clone();
        if !platform.has_gpu() {
            log_warn!("Platform {} ({}) lists no GPU-class adapter", platform_index, platform.name());
        }
        let (_, mut adapters) = platforms.swap_remove(platform_index);

        let types: Vec<wgpu::DeviceType> = platform.adapters.iter().map(|a| a.device_type).collect();
        let device_index = choose_device(&types).ok_or_else(|| RotateError::NoGpuDeviceAvailable {
            platform: platform.name(),
        })?;
        let adapter = adapters.swap_remove(device_index);
        let adapter_info = adapter.get_info();
        log_info!(
            "Selected platform {} ({}) device {} ({:?})",
            platform_index,
            platform.name(),
            adapter_info.name,
            adapter_info.device_type
        );

        // Ask for exactly what the adapter offers; large images need the
        // full storage-buffer binding size.
        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gpu-rotate"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                },
                None,
            )
            .await
            .map_err(RotateError::DeviceRequest)?;

        // Errors outside an explicit scope would otherwise panic.
        device.on_uncaptured_error(Box::new(|err| {
            log_err!("Uncaptured device error: {}", err);
        }));

        Ok(Self {
            device,
            queue,
            platform_index,
            platform,
            adapter_info,
            limits,
            instance_flags,
            id: next_context_id(),
            _instance: instance,
        })
    }

    /// Id of this opened device.  Compiled programs are tied to it.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Readable description of the adapter behind the device.
    pub fn identity(&self) -> String {
        format!(
            "{} [{:?} {:04x}:{:04x}]",
            self.adapter_info.name,
            self.adapter_info.backend,
            self.adapter_info.vendor,
            self.adapter_info.device
        )
    }

    /// Human-readable platform and device report.
    pub fn diagnostics(&self) -> Vec<String> {
        let info = &self.adapter_info;
        vec![
            format!("Platform ID: {}", self.platform_index),
            format!("Platform Name: {}", self.platform.name()),
            format!("Device Name: {}", info.name),
            format!("Device Type: {:?}", info.device_type),
            format!("Vendor: 0x{:04x} (device 0x{:04x})", info.vendor, info.device),
            format!("Driver: {} {}", info.driver, info.driver_info),
        ]
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on platform {} (context #{})", self.identity(), self.platform_index, self.id)
    }
}
