use std::sync::Arc;

use anyhow::{Context, Result};

/// Initialization parameters for the headless GPU device.
///
/// Keep this structure minimal. Add flags only when a concrete platform or
/// backend requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Backends wgpu may pick from.
    pub backends: wgpu::Backends,

    pub power_preference: wgpu::PowerPreference,

    /// Use a software adapter (e.g. lavapipe, WARP) when no hardware one exists.
    pub force_fallback_adapter: bool,

    /// Required wgpu features.
    ///
    /// Favor an empty set for portability; depth peeling needs none.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        }
    }
}

/// Owns the wgpu instance, device and queue. No surface: everything renders offscreen.
pub struct Gpu {
    /// Kept alive for the lifetime of the device.
    _instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl Gpu {
    /// Acquires an adapter and device.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu; see
    /// [`Gpu::new_blocking`] for synchronous callers.
    pub async fn new(init: &GpuInit) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: init.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("lucent device"),
                required_features: init.required_features,
                required_limits: init.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        // A program broken by instrumentation fails pipeline validation. Report
        // it instead of taking the process down with the default handler.
        device.on_uncaptured_error(Arc::new(|error: wgpu::Error| {
            log::error!("wgpu: {error}");
        }));

        let info = adapter.get_info();
        log::info!("using adapter '{}' ({:?})", info.name, info.backend);

        Ok(Self {
            _instance: instance,
            device,
            queue,
        })
    }

    pub fn new_blocking(init: &GpuInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }

    #[inline]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}
