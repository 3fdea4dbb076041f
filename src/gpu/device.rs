//! The GPU machine-state seam used by the storage layer.
//!
//! [`GpuDevice`] exposes the small set of texture, framebuffer and draw
//! operations the storage layer issues. The device owns the "currently bound
//! framebuffer" and texture-unit state; callers are responsible for leaving
//! it as the next caller expects.

use std::fmt;
use std::num::NonZeroU32;

use glam::Vec4;

use crate::effects::BoundProgram;
use crate::image::ImageFormat;
use crate::util::rect::Rect2i;

/// Device-side texture name. Zero is never a valid name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TexId(NonZeroU32);

impl TexId {
    /// Wrap a non-zero name.
    #[must_use]
    pub const fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    /// Wrap a raw name, `None` for zero.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Raw name.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.get()
    }
}

/// Device-side framebuffer name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FboId(NonZeroU32);

impl FboId {
    /// Wrap a non-zero name.
    #[must_use]
    pub const fn new(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    /// Wrap a raw name, `None` for zero.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Raw name.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.get()
    }
}

/// Texture binding target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// Plain 2D.
    Texture2D,
    /// Six-sided cubemap; layer index selects the face.
    CubeMap,
    /// 2D array.
    Texture2DArray,
    /// Volume texture; layer index selects the slice.
    Texture3D,
}

/// Block-compressed storage formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CompressedFormat {
    S3tcDxt1,
    S3tcDxt3,
    S3tcDxt5,
    RgtcRed,
    RgtcRg,
    BptcRgba,
    BptcRgbFloat,
    BptcRgbUFloat,
    Etc2R11,
    Etc2R11Signed,
    Etc2Rg11,
    Etc2Rg11Signed,
    Etc2Rgb8,
    Etc2Rgba8,
    Etc2Rgb8A1,
    Astc4x4,
    Astc4x4Hdr,
    Astc8x8,
    Astc8x8Hdr,
}

impl CompressedFormat {
    /// Image format whose blocks this storage format holds.
    #[must_use]
    pub const fn image_format(self) -> ImageFormat {
        match self {
            Self::S3tcDxt1 => ImageFormat::Dxt1,
            Self::S3tcDxt3 => ImageFormat::Dxt3,
            Self::S3tcDxt5 => ImageFormat::Dxt5,
            Self::RgtcRed => ImageFormat::RgtcR,
            Self::RgtcRg => ImageFormat::RgtcRg,
            Self::BptcRgba => ImageFormat::BptcRgba,
            Self::BptcRgbFloat => ImageFormat::BptcRgbf,
            Self::BptcRgbUFloat => ImageFormat::BptcRgbfu,
            Self::Etc2R11 => ImageFormat::Etc2R11,
            Self::Etc2R11Signed => ImageFormat::Etc2R11s,
            Self::Etc2Rg11 => ImageFormat::Etc2Rg11,
            Self::Etc2Rg11Signed => ImageFormat::Etc2Rg11s,
            Self::Etc2Rgb8 => ImageFormat::Etc2Rgb8,
            Self::Etc2Rgba8 => ImageFormat::Etc2Rgba8,
            Self::Etc2Rgb8A1 => ImageFormat::Etc2Rgb8a1,
            Self::Astc4x4 => ImageFormat::Astc4x4,
            Self::Astc4x4Hdr => ImageFormat::Astc4x4Hdr,
            Self::Astc8x8 => ImageFormat::Astc8x8,
            Self::Astc8x8Hdr => ImageFormat::Astc8x8Hdr,
        }
    }
}

/// How the device stores texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum InternalFormat {
    Alpha,
    Luminance,
    LuminanceAlpha,
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Rgba4,
    Rgb565,
    R16F,
    Rg16F,
    Rgb16F,
    Rgba16F,
    R32F,
    Rg32F,
    Rgb32F,
    Rgba32F,
    Rgb9E5,
    Rg16I,
    Depth24,
    Compressed(CompressedFormat),
}

impl InternalFormat {
    /// Bytes of storage per texel, zero for compressed formats.
    #[must_use]
    pub const fn texel_bytes(self) -> u32 {
        match self {
            Self::Alpha | Self::Luminance | Self::R8 => 1,
            Self::LuminanceAlpha | Self::Rg8 | Self::Rgba4 | Self::Rgb565 | Self::R16F => 2,
            Self::Rgb8 | Self::Depth24 => 3,
            Self::Rgba8 | Self::Rg16F | Self::R32F | Self::Rgb9E5 | Self::Rg16I => 4,
            Self::Rgb16F => 6,
            Self::Rgba16F | Self::Rg32F => 8,
            Self::Rgb32F => 12,
            Self::Rgba32F => 16,
            Self::Compressed(_) => 0,
        }
    }
}

/// Channel layout of data crossing the CPU/GPU boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TransferFormat {
    Alpha,
    Luminance,
    LuminanceAlpha,
    Red,
    Rg,
    Rgb,
    Rgba,
    RgInteger,
    Depth,
}

/// Component type of transferred data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum PixelType {
    UnsignedByte,
    UnsignedShort4444,
    UnsignedShort565,
    HalfFloat,
    Float,
    UnsignedInt5999Rev,
    Short,
    UnsignedInt,
}

/// The (internal, transfer, component) triple describing a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuFormat {
    /// Device storage format.
    pub internal: InternalFormat,
    /// Channel layout of uploads and readbacks.
    pub transfer: TransferFormat,
    /// Component type of uploads and readbacks.
    pub pixel_type: PixelType,
}

impl GpuFormat {
    /// Format used for colour render targets and the atlas.
    pub const RGBA8: Self = Self::new(
        InternalFormat::Rgba8,
        TransferFormat::Rgba,
        PixelType::UnsignedByte,
    );

    /// Format used for depth attachments.
    pub const DEPTH: Self = Self::new(
        InternalFormat::Depth24,
        TransferFormat::Depth,
        PixelType::UnsignedInt,
    );

    /// Bundle a triple.
    #[must_use]
    pub const fn new(internal: InternalFormat, transfer: TransferFormat, pixel_type: PixelType) -> Self {
        Self {
            internal,
            transfer,
            pixel_type,
        }
    }

    /// Whether uploads are whole compressed blocks.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        matches!(self.internal, InternalFormat::Compressed(_))
    }

    /// Image format matching the byte layout of uncompressed transfers.
    ///
    /// `Alpha` transfers use the single-channel layouts; the device routes
    /// the value into the alpha channel.
    #[must_use]
    pub const fn transfer_layout(&self) -> Option<ImageFormat> {
        use PixelType as P;
        use TransferFormat as T;
        let format = match (self.transfer, self.pixel_type) {
            (T::Alpha | T::Red, P::UnsignedByte) => ImageFormat::R8,
            (T::Alpha | T::Red, P::Float) => ImageFormat::Rf,
            (T::Alpha | T::Red, P::HalfFloat) => ImageFormat::Rh,
            (T::Luminance, P::UnsignedByte) => ImageFormat::L8,
            (T::LuminanceAlpha, P::UnsignedByte) => ImageFormat::La8,
            (T::Rg, P::UnsignedByte) => ImageFormat::Rg8,
            (T::Rg, P::Float) => ImageFormat::Rgf,
            (T::Rg, P::HalfFloat) => ImageFormat::Rgh,
            (T::Rgb, P::UnsignedByte) => ImageFormat::Rgb8,
            (T::Rgb, P::UnsignedShort565) => ImageFormat::Rgb565,
            (T::Rgb, P::Float) => ImageFormat::Rgbf,
            (T::Rgb, P::HalfFloat) => ImageFormat::Rgbh,
            (T::Rgb, P::UnsignedInt5999Rev) => ImageFormat::Rgbe9995,
            (T::Rgba, P::UnsignedByte) => ImageFormat::Rgba8,
            (T::Rgba, P::UnsignedShort4444) => ImageFormat::Rgba4444,
            (T::Rgba, P::Float) => ImageFormat::Rgbaf,
            (T::Rgba, P::HalfFloat) => ImageFormat::Rgbah,
            _ => return None,
        };
        Some(format)
    }
}

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    /// Point sampling.
    #[default]
    Nearest,
    /// Bilinear sampling.
    Linear,
    /// Point sampling with nearest mip selection.
    NearestMipmap,
    /// Trilinear sampling.
    LinearMipmap,
}

impl Filter {
    /// Whether texels are blended within a level.
    #[must_use]
    pub const fn is_linear(self) -> bool {
        matches!(self, Self::Linear | Self::LinearMipmap)
    }
}

/// Sampler state attached to a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerState {
    /// Min/mag filter.
    pub filter: Filter,
    /// Repeat (`true`) or clamp to edge.
    pub repeat: bool,
    /// Lowest mip level sampling may read.
    pub base_level: u32,
}

/// Texture creation parameters. Storage for every level is allocated
/// zero-filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    /// Binding target.
    pub target: TextureTarget,
    /// Storage and transfer formats.
    pub format: GpuFormat,
    /// Base level width.
    pub width: u32,
    /// Base level height.
    pub height: u32,
    /// Layers (array), faces (cube, always 6) or slices (3D).
    pub layers: u32,
    /// Number of mip levels, at least 1.
    pub levels: u32,
    /// Debug label.
    pub label: &'static str,
}

impl TextureDesc {
    /// Single-level 2D texture.
    #[must_use]
    pub const fn texture_2d(format: GpuFormat, width: u32, height: u32, label: &'static str) -> Self {
        Self {
            target: TextureTarget::Texture2D,
            format,
            width,
            height,
            layers: 1,
            levels: 1,
            label,
        }
    }

    /// Same descriptor with `levels` mip levels.
    #[must_use]
    pub const fn with_levels(mut self, levels: u32) -> Self {
        self.levels = if levels == 0 { 1 } else { levels };
        self
    }
}

/// Destination of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upload {
    /// Layer, cube face or slice.
    pub layer: u32,
    /// Mip level.
    pub level: u32,
    /// Level width.
    pub width: u32,
    /// Level height.
    pub height: u32,
}

/// Outcome of a framebuffer completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    /// Ready to draw.
    Complete,
    /// An attachment is missing its texture or has an unrenderable format.
    IncompleteAttachment,
    /// No attachments at all.
    MissingAttachment,
    /// Attachments disagree on size.
    IncompleteDimensions,
    /// The combination of formats is not supported by the driver.
    Unsupported,
}

impl FramebufferStatus {
    /// Whether the framebuffer can be drawn to.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Complete => "FRAMEBUFFER_COMPLETE",
            Self::IncompleteAttachment => "FRAMEBUFFER_INCOMPLETE_ATTACHMENT",
            Self::MissingAttachment => "FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT",
            Self::IncompleteDimensions => "FRAMEBUFFER_INCOMPLETE_DIMENSIONS",
            Self::Unsupported => "FRAMEBUFFER_UNSUPPORTED",
        };
        f.write_str(name)
    }
}

/// Pre-allocated geometry used by copy effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Oversized triangle `(-1,-1) (3,-1) (-1,3)` covering the viewport.
    ScreenTriangle,
    /// Two triangles covering `[-1, 1]²`, placed by the copy section.
    ScreenQuad,
}

/// Texture, framebuffer and draw operations issued by the storage layer.
pub trait GpuDevice {
    /// Create a texture with zeroed storage for every level.
    fn create_texture(&mut self, desc: &TextureDesc) -> TexId;
    /// Release a texture. Unknown names are ignored.
    fn delete_texture(&mut self, id: TexId);
    /// Replace one level of one layer. Compressed formats take whole blocks.
    fn upload(&mut self, id: TexId, upload: Upload, data: &[u8]);
    /// Set filtering, wrap and base level.
    fn set_sampler(&mut self, id: TexId, sampler: SamplerState);
    /// Read one level back in the texture's transfer layout.
    ///
    /// `None` when the device cannot transfer images directly.
    fn read_texture(&mut self, id: TexId, layer: u32, level: u32) -> Option<Vec<u8>>;

    /// Create an empty framebuffer.
    fn create_framebuffer(&mut self) -> FboId;
    /// Release a framebuffer. Unknown names are ignored.
    fn delete_framebuffer(&mut self, id: FboId);
    /// Attach (or detach with `None`) a colour level.
    fn attach_color(&mut self, fbo: FboId, texture: Option<TexId>, level: u32);
    /// Attach (or detach with `None`) a depth texture.
    fn attach_depth(&mut self, fbo: FboId, texture: Option<TexId>);
    /// Completeness of a framebuffer.
    fn framebuffer_status(&self, fbo: FboId) -> FramebufferStatus;
    /// Bind a framebuffer; `None` binds the system framebuffer.
    fn bind_framebuffer(&mut self, fbo: Option<FboId>);

    /// Set the draw viewport in pixels.
    fn viewport(&mut self, rect: Rect2i);
    /// Restrict draws and clears, or lift the restriction with `None`.
    fn scissor(&mut self, rect: Option<Rect2i>);
    /// Clear colour and depth of the bound framebuffer.
    fn clear(&mut self, color: Vec4);
    /// Bind a texture to a sampling unit.
    fn bind_texture(&mut self, unit: u32, id: Option<TexId>);
    /// Draw geometry with a bound copy program into the bound framebuffer.
    fn draw(&mut self, primitive: Primitive, program: &BoundProgram);
    /// Read RGBA8 rows from the bound framebuffer's colour attachment.
    fn read_pixels(&mut self, rect: Rect2i) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_name() {
        assert!(TexId::from_raw(0).is_none());
        assert_eq!(FboId::from_raw(9).map(FboId::raw), Some(9));
    }

    #[test]
    fn alpha_transfers_use_single_channel_layout() {
        let alpha = GpuFormat::new(
            InternalFormat::Alpha,
            TransferFormat::Alpha,
            PixelType::UnsignedByte,
        );
        assert_eq!(alpha.transfer_layout(), Some(ImageFormat::R8));
        assert_eq!(GpuFormat::DEPTH.transfer_layout(), None);
    }

    #[test]
    fn status_names_match_driver_strings() {
        assert_eq!(
            FramebufferStatus::Unsupported.to_string(),
            "FRAMEBUFFER_UNSUPPORTED"
        );
        assert!(FramebufferStatus::Complete.is_complete());
    }
}
