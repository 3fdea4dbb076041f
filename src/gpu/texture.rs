//! wgpu-side texture objects and format mapping.

use super::device::{CompressedFormat, InternalFormat, SamplerState, TextureDesc};
use crate::image::ImageFormat;

/// How a texture's channels are remapped when sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swizzle {
    /// Channels as stored.
    Identity = 0,
    /// `r` holds alpha; colour reads as black.
    Alpha = 1,
    /// `r` holds luminance; alpha reads as one.
    Luminance = 2,
    /// `r` holds luminance and `g` alpha.
    LuminanceAlpha = 3,
}

/// wgpu storage for an internal format, with the channel swizzle applied on
/// sampling.
#[must_use]
pub fn wgpu_format(internal: InternalFormat) -> (wgpu::TextureFormat, Swizzle) {
    use wgpu::TextureFormat as F;
    let format = match internal {
        InternalFormat::Alpha => return (F::R8Unorm, Swizzle::Alpha),
        InternalFormat::Luminance => return (F::R8Unorm, Swizzle::Luminance),
        InternalFormat::LuminanceAlpha => return (F::Rg8Unorm, Swizzle::LuminanceAlpha),
        InternalFormat::R8 => F::R8Unorm,
        InternalFormat::Rg8 => F::Rg8Unorm,
        InternalFormat::Rgb8 | InternalFormat::Rgba8 | InternalFormat::Rgba4 | InternalFormat::Rgb565 => {
            F::Rgba8Unorm
        }
        InternalFormat::R16F => F::R16Float,
        InternalFormat::Rg16F => F::Rg16Float,
        InternalFormat::Rgb16F | InternalFormat::Rgba16F => F::Rgba16Float,
        InternalFormat::R32F => F::R32Float,
        InternalFormat::Rg32F | InternalFormat::Rg16I => F::Rg32Float,
        InternalFormat::Rgb32F | InternalFormat::Rgba32F => F::Rgba32Float,
        InternalFormat::Rgb9E5 => F::Rgb9e5Ufloat,
        InternalFormat::Depth24 => F::Depth24Plus,
        InternalFormat::Compressed(c) => compressed_format(c),
    };
    (format, Swizzle::Identity)
}

const fn compressed_format(format: CompressedFormat) -> wgpu::TextureFormat {
    use wgpu::{AstcBlock, AstcChannel, TextureFormat as F};
    match format {
        CompressedFormat::S3tcDxt1 => F::Bc1RgbaUnorm,
        CompressedFormat::S3tcDxt3 => F::Bc2RgbaUnorm,
        CompressedFormat::S3tcDxt5 => F::Bc3RgbaUnorm,
        CompressedFormat::RgtcRed => F::Bc4RUnorm,
        CompressedFormat::RgtcRg => F::Bc5RgUnorm,
        CompressedFormat::BptcRgba => F::Bc7RgbaUnorm,
        CompressedFormat::BptcRgbFloat => F::Bc6hRgbFloat,
        CompressedFormat::BptcRgbUFloat => F::Bc6hRgbUfloat,
        CompressedFormat::Etc2R11 => F::EacR11Unorm,
        CompressedFormat::Etc2R11Signed => F::EacR11Snorm,
        CompressedFormat::Etc2Rg11 => F::EacRg11Unorm,
        CompressedFormat::Etc2Rg11Signed => F::EacRg11Snorm,
        CompressedFormat::Etc2Rgb8 => F::Etc2Rgb8Unorm,
        CompressedFormat::Etc2Rgba8 => F::Etc2Rgba8Unorm,
        CompressedFormat::Etc2Rgb8A1 => F::Etc2Rgb8A1Unorm,
        CompressedFormat::Astc4x4 => F::Astc {
            block: AstcBlock::B4x4,
            channel: AstcChannel::Unorm,
        },
        CompressedFormat::Astc4x4Hdr => F::Astc {
            block: AstcBlock::B4x4,
            channel: AstcChannel::Hdr,
        },
        CompressedFormat::Astc8x8 => F::Astc {
            block: AstcBlock::B8x8,
            channel: AstcChannel::Unorm,
        },
        CompressedFormat::Astc8x8Hdr => F::Astc {
            block: AstcBlock::B8x8,
            channel: AstcChannel::Hdr,
        },
    }
}

/// Byte layout of the wgpu storage of an uncompressed internal format.
#[must_use]
pub const fn storage_layout(internal: InternalFormat) -> Option<ImageFormat> {
    let format = match internal {
        InternalFormat::Alpha | InternalFormat::Luminance | InternalFormat::R8 => ImageFormat::R8,
        InternalFormat::LuminanceAlpha | InternalFormat::Rg8 => ImageFormat::Rg8,
        InternalFormat::Rgb8 | InternalFormat::Rgba8 | InternalFormat::Rgba4 | InternalFormat::Rgb565 => {
            ImageFormat::Rgba8
        }
        InternalFormat::R16F => ImageFormat::Rh,
        InternalFormat::Rg16F => ImageFormat::Rgh,
        InternalFormat::Rgb16F | InternalFormat::Rgba16F => ImageFormat::Rgbah,
        InternalFormat::R32F => ImageFormat::Rf,
        InternalFormat::Rg32F | InternalFormat::Rg16I => ImageFormat::Rgf,
        InternalFormat::Rgb32F | InternalFormat::Rgba32F => ImageFormat::Rgbaf,
        InternalFormat::Rgb9E5 => ImageFormat::Rgbe9995,
        InternalFormat::Depth24 | InternalFormat::Compressed(_) => return None,
    };
    Some(format)
}

/// A device texture plus the state the copy pipeline needs to sample it.
pub struct GpuTexture {
    /// The underlying GPU texture.
    pub texture: wgpu::Texture,
    /// Creation parameters.
    pub desc: TextureDesc,
    /// Storage format.
    pub format: wgpu::TextureFormat,
    /// Channel remap applied when sampled.
    pub swizzle: Swizzle,
    /// Filtering, wrap and base level.
    pub sampler: SamplerState,
}

impl GpuTexture {
    /// Create storage for `desc`. Block-compressed textures are padded to
    /// whole blocks.
    #[must_use]
    pub fn new(device: &wgpu::Device, desc: &TextureDesc) -> Self {
        let (format, swizzle) = wgpu_format(desc.format.internal);
        let (bw, bh) = format.block_dimensions();
        let usage = if format.is_depth_stencil_format() {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        } else if format.is_compressed() || format == wgpu::TextureFormat::Rgb9e5Ufloat {
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
        } else {
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width.max(1).next_multiple_of(bw),
                height: desc.height.max(1).next_multiple_of(bh),
                depth_or_array_layers: desc.layers.max(1),
            },
            mip_level_count: desc.levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        Self {
            texture,
            desc: *desc,
            format,
            swizzle,
            sampler: SamplerState::default(),
        }
    }

    /// Whether the copy shader can read this texture.
    #[must_use]
    pub fn is_sampleable(&self) -> bool {
        !self.format.is_depth_stencil_format()
    }

    /// Array view starting at the sampler's base level. With `single_level`
    /// only that level is visible, so other levels can be render targets in
    /// the same pass.
    #[must_use]
    pub fn sample_view(&self, single_level: bool) -> wgpu::TextureView {
        let base = self.sampler.base_level.min(self.desc.levels.max(1) - 1);
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Copy Source View"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            base_mip_level: base,
            mip_level_count: single_level.then_some(1),
            ..Default::default()
        })
    }

    /// Single-level, single-layer view for render attachments.
    #[must_use]
    pub fn attachment_view(&self, level: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Attachment View"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: level,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }

    /// Physical extent of a level, whole blocks for compressed formats.
    #[must_use]
    pub fn level_extent(&self, level: u32) -> wgpu::Extent3d {
        let (bw, bh) = self.format.block_dimensions();
        wgpu::Extent3d {
            width: (self.desc.width >> level).max(1).next_multiple_of(bw),
            height: (self.desc.height >> level).max(1).next_multiple_of(bh),
            depth_or_array_layers: 1,
        }
    }
}
