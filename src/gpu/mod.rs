//! GPU device seam and its two implementations.
//!
//! [`GpuDevice`] is the narrow machine-state interface the storage layer
//! drives. [`headless::HeadlessDevice`] evaluates it on the CPU for tests and
//! tooling; [`wgpu_device::WgpuDevice`] runs it on real hardware through the
//! copy shader.

mod device;
/// CPU-evaluated device used by tests and headless tools.
pub mod headless;
/// Bind group layout and pipelines of the copy shader.
pub mod pipeline_helpers;
/// wgpu device and queue initialization.
pub mod render_context;
/// WGSL shader composition with `#import` support via naga-oil.
pub mod shader_composer;
/// wgpu texture objects and format mapping.
pub mod texture;
/// Hardware device.
pub mod wgpu_device;

pub use device::{
    CompressedFormat, FboId, Filter, FramebufferStatus, GpuDevice, GpuFormat, InternalFormat,
    PixelType, Primitive, SamplerState, TexId, TextureDesc, TextureTarget, TransferFormat, Upload,
};
