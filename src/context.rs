//! The graphics context the core receives.
//!
//! Window and surface creation stay outside the crate; callers hand the
//! core a ready device and queue. The context also owns the device error
//! policy: once resources are live, a device-reported error leaves buffer
//! contents undefined, so errors outside checked construction scopes log
//! and abort the process instead of propagating.

use crate::error::DeviceError;

/// Device and queue handle shared by every GPU-facing call in the crate.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    /// Wraps an externally created device and queue and installs the
    /// uncaptured-error handler.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        install_error_handler(&device);
        Self { device, queue }
    }

    /// Acquires a device with no surface attached, preferring a discrete
    /// adapter. Used by tests and offscreen tools.
    pub fn headless() -> Result<Self, DeviceError> {
        pollster::block_on(Self::headless_async())
    }

    async fn headless_async() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(DeviceError::NoAdapter)?;
        let info = adapter.get_info();
        tracing::info!("using adapter: {} ({:?})", info.name, info.backend);
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("particle device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

fn install_error_handler(device: &wgpu::Device) {
    device.on_uncaptured_error(Box::new(|error| {
        tracing::error!("uncaptured device error: {error}");
        std::process::abort();
    }));
}

/// Reports whether any GPU adapter is present. Lets GPU-dependent tests
/// skip cleanly on machines without one.
pub fn gpu_available() -> bool {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .is_some()
    })
}
