use std::fmt;

use crate::config::Config;

/// Errors that can occur during GPU context initialization.
#[derive(Debug)]
pub enum RenderContextError {
    /// No compatible GPU adapter found.
    AdapterRequest(wgpu::RequestAdapterError),
    /// GPU device request failed (limits or features not met).
    DeviceRequest(wgpu::RequestDeviceError),
}

impl fmt::Display for RenderContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterRequest(e) => {
                write!(f, "no compatible GPU adapter found: {e}")
            }
            Self::DeviceRequest(e) => write!(f, "device request failed: {e}"),
        }
    }
}

impl std::error::Error for RenderContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AdapterRequest(e) => Some(e),
            Self::DeviceRequest(e) => Some(e),
        }
    }
}

/// Compressed-texture features requested when the adapter offers them.
const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::TEXTURE_COMPRESSION_BC
    .union(wgpu::Features::TEXTURE_COMPRESSION_ETC2)
    .union(wgpu::Features::TEXTURE_COMPRESSION_ASTC)
    .union(wgpu::Features::TEXTURE_COMPRESSION_ASTC_HDR)
    .union(wgpu::Features::FLOAT32_FILTERABLE);

/// Owns the core wgpu resources: device and queue. No presentation
/// surface; the system framebuffer is an offscreen texture owned by the
/// device wrapper.
pub struct RenderContext {
    /// The wgpu logical device.
    pub device: wgpu::Device,
    /// The wgpu command queue.
    pub queue: wgpu::Queue,
    /// Features enabled on `device`.
    pub features: wgpu::Features,
    /// Limits of `device`.
    pub limits: wgpu::Limits,
}

impl RenderContext {
    /// Request an adapter and device without a surface, enabling every
    /// compressed-texture feature the adapter supports.
    ///
    /// # Errors
    ///
    /// Returns `RenderContextError` if the adapter or device request fails.
    pub async fn new() -> Result<Self, RenderContextError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface: None,
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .map_err(RenderContextError::AdapterRequest)?;

        let info = adapter.get_info();
        log::info!("texture storage adapter: {} ({:?})", info.name, info.backend);

        let required_features = adapter.features() & OPTIONAL_FEATURES;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Texture Storage Device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .map_err(RenderContextError::DeviceRequest)?;

        Ok(Self::from_device(device, queue))
    }

    /// Create a render context from an externally-owned device and queue.
    #[must_use]
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let features = device.features();
        let limits = device.limits();
        Self {
            device,
            queue,
            features,
            limits,
        }
    }

    /// Capability registry describing this device.
    #[must_use]
    pub fn capabilities(&self) -> Config {
        Config::from_wgpu(self.features, &self.limits)
    }

    /// Create a new command encoder for recording GPU commands.
    #[must_use]
    pub fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(label),
            })
    }

    /// Finish the encoder and submit its command buffer to the GPU queue.
    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        let _ = self.queue.submit(std::iter::once(encoder.finish()));
    }
}
