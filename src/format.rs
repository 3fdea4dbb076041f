//! Format negotiation between image formats and device storage.
//!
//! [`plan`] looks a logical [`ImageFormat`] up in the table of the active
//! capability tier and returns the device format triple, whether data
//! travels as compressed blocks, the format actually stored (`real_format`)
//! and the [`Transform`] that must be applied to pixel data before upload.
//! Missing capability never uploads the wrong bytes: it always routes
//! through decompression and a canonical uncompressed format.

use std::borrow::Cow;

use crate::config::{Config, Tier};
use crate::error::StorageError;
use crate::gpu::{CompressedFormat, GpuFormat, InternalFormat, PixelType, TransferFormat};
use crate::image::{Image, ImageFormat};

/// Pixel data rewrite required before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Upload the bytes as they are.
    None,
    /// Re-encode into the real format.
    Convert,
    /// Re-encode shared-exponent HDR as sRGB 8-bit.
    RgbeToSrgb,
    /// Decode blocks, then re-encode into the real format.
    Decompress {
        /// Move alpha into green before the final conversion.
        ra_to_rg: bool,
    },
}

/// Outcome of negotiating one image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatPlan {
    /// Device storage and transfer description.
    pub gpu: GpuFormat,
    /// Whether data is uploaded as compressed blocks.
    pub compressed: bool,
    /// Format of the bytes the device receives.
    pub real_format: ImageFormat,
    /// Rewrite applied to the image before upload.
    pub transform: Transform,
}

impl FormatPlan {
    const fn native(format: ImageFormat, gpu: GpuFormat) -> Self {
        Self {
            gpu,
            compressed: false,
            real_format: format,
            transform: Transform::None,
        }
    }

    const fn converted(real_format: ImageFormat, gpu: GpuFormat) -> Self {
        Self {
            gpu,
            compressed: false,
            real_format,
            transform: Transform::Convert,
        }
    }

    const fn blocks(format: ImageFormat, block: CompressedFormat, transfer: TransferFormat) -> Self {
        let pixel_type = match block {
            CompressedFormat::BptcRgbFloat | CompressedFormat::BptcRgbUFloat => PixelType::Float,
            _ => PixelType::UnsignedByte,
        };
        Self {
            gpu: GpuFormat::new(InternalFormat::Compressed(block), transfer, pixel_type),
            compressed: true,
            real_format: format,
            transform: Transform::None,
        }
    }

    /// Apply the transform to `image`, borrowing it when nothing changes.
    ///
    /// # Errors
    ///
    /// [`StorageError::Image`] when the image layer cannot decode or convert
    /// the data.
    pub fn apply<'a>(&self, image: &'a Image) -> Result<Cow<'a, Image>, StorageError> {
        match self.transform {
            Transform::None => Ok(Cow::Borrowed(image)),
            Transform::Convert => {
                let mut converted = image.duplicate();
                converted.convert(self.real_format)?;
                Ok(Cow::Owned(converted))
            }
            Transform::RgbeToSrgb => Ok(Cow::Owned(image.rgbe_to_srgb()?)),
            Transform::Decompress { ra_to_rg } => {
                let mut decoded = image.duplicate();
                decoded.decompress()?;
                if ra_to_rg {
                    decoded.convert(ImageFormat::Rgba8)?;
                    decoded.shuffle_ra_to_rg()?;
                    decoded.convert(ImageFormat::Rg8)?;
                }
                decoded.convert(self.real_format)?;
                Ok(Cow::Owned(decoded))
            }
        }
    }
}

const fn triple(internal: InternalFormat, transfer: TransferFormat, pixel_type: PixelType) -> GpuFormat {
    GpuFormat::new(internal, transfer, pixel_type)
}

const RGB8: GpuFormat = triple(InternalFormat::Rgb8, TransferFormat::Rgb, PixelType::UnsignedByte);
const RG8: GpuFormat = triple(InternalFormat::Rg8, TransferFormat::Rg, PixelType::UnsignedByte);

/// Negotiate the storage of `format` on the device described by `config`.
///
/// `force_decompress` routes even natively supported formats through the
/// decompression path, which is how textures that must be resized to a
/// power of two get an editable uncompressed copy.
///
/// # Errors
///
/// [`StorageError::Unsupported`] for formats with no representation on the
/// active tier.
pub fn plan(config: &Config, format: ImageFormat, force_decompress: bool) -> Result<FormatPlan, StorageError> {
    let entry = match config.tier {
        Tier::Full => full_tier(config, format),
        Tier::Reduced => reduced_tier(config, format),
    };
    let Some(entry) = entry else {
        return Err(StorageError::Unsupported(format!(
            "image format {format:?} is not supported by the {:?} tier",
            config.tier
        )));
    };
    match entry {
        Entry::Plan(plan) if !force_decompress => Ok(plan),
        Entry::Plan(plan) if plan.transform == Transform::RgbeToSrgb => Ok(plan),
        Entry::Plan(_) => Ok(decompressed(config.tier, format, false)),
        Entry::Decompress { ra_to_rg } => {
            log::debug!("{format:?} has no native support, decompressing before upload");
            Ok(decompressed(config.tier, format, ra_to_rg))
        }
    }
}

enum Entry {
    Plan(FormatPlan),
    Decompress { ra_to_rg: bool },
}

fn reduced_tier(config: &Config, format: ImageFormat) -> Option<Entry> {
    use ImageFormat as I;
    use InternalFormat as N;
    use PixelType as P;
    use TransferFormat as T;
    let plan = match format {
        I::L8 => FormatPlan::native(format, triple(N::Luminance, T::Luminance, P::UnsignedByte)),
        I::La8 => FormatPlan::native(
            format,
            triple(N::LuminanceAlpha, T::LuminanceAlpha, P::UnsignedByte),
        ),
        I::R8 => FormatPlan::native(format, triple(N::Alpha, T::Alpha, P::UnsignedByte)),
        I::Rg8 | I::Rgf | I::Rgbf => {
            log::warn!("{format:?} is not supported by the reduced tier, converting to Rgb8");
            FormatPlan::converted(I::Rgb8, RGB8)
        }
        I::Rgb8 => FormatPlan::native(format, RGB8),
        I::Rgba8 => FormatPlan::native(format, GpuFormat::RGBA8),
        I::Rgba4444 => FormatPlan::native(
            format,
            triple(N::Rgba4, T::Rgba, P::UnsignedShort4444),
        ),
        I::Rgb565 => FormatPlan::native(format, triple(N::Rgb565, T::Rgb, P::UnsignedShort565)),
        I::Rf if config.float_texture_supported => {
            FormatPlan::native(format, triple(N::Alpha, T::Alpha, P::Float))
        }
        I::Rf | I::Rgbaf | I::Rh | I::Rgh | I::Rgbh | I::Rgbah => {
            log::warn!("{format:?} is not supported by the reduced tier, converting to Rgba8");
            FormatPlan::converted(I::Rgba8, GpuFormat::RGBA8)
        }
        I::Rgbe9995 => FormatPlan {
            gpu: RGB8,
            compressed: false,
            real_format: I::Rgb8,
            transform: Transform::RgbeToSrgb,
        },
        _ => return compressed(config, format),
    };
    Some(Entry::Plan(plan))
}

fn full_tier(config: &Config, format: ImageFormat) -> Option<Entry> {
    use ImageFormat as I;
    use InternalFormat as N;
    use PixelType as P;
    use TransferFormat as T;
    let plan = match format {
        I::L8 => FormatPlan::native(format, triple(N::Luminance, T::Luminance, P::UnsignedByte)),
        I::La8 => FormatPlan::native(
            format,
            triple(N::LuminanceAlpha, T::LuminanceAlpha, P::UnsignedByte),
        ),
        I::R8 => FormatPlan::native(format, triple(N::R8, T::Red, P::UnsignedByte)),
        I::Rg8 => FormatPlan::native(format, RG8),
        I::Rgb8 => FormatPlan::native(format, RGB8),
        I::Rgba8 => FormatPlan::native(format, GpuFormat::RGBA8),
        I::Rgba4444 => FormatPlan::native(
            format,
            triple(N::Rgba4, T::Rgba, P::UnsignedShort4444),
        ),
        I::Rgb565 => FormatPlan::native(format, triple(N::Rgb565, T::Rgb, P::UnsignedShort565)),
        I::Rf => FormatPlan::native(format, triple(N::R32F, T::Red, P::Float)),
        I::Rgf => FormatPlan::native(format, triple(N::Rg32F, T::Rg, P::Float)),
        I::Rgbf => FormatPlan::native(format, triple(N::Rgb32F, T::Rgb, P::Float)),
        I::Rgbaf => FormatPlan::native(format, triple(N::Rgba32F, T::Rgba, P::Float)),
        I::Rh => FormatPlan::native(format, triple(N::R16F, T::Red, P::HalfFloat)),
        I::Rgh => FormatPlan::native(format, triple(N::Rg16F, T::Rg, P::HalfFloat)),
        I::Rgbh => FormatPlan::native(format, triple(N::Rgb16F, T::Rgb, P::HalfFloat)),
        I::Rgbah => FormatPlan::native(format, triple(N::Rgba16F, T::Rgba, P::HalfFloat)),
        I::Rgbe9995 => FormatPlan::native(
            format,
            triple(N::Rgb9E5, T::Rgb, P::UnsignedInt5999Rev),
        ),
        _ => return compressed(config, format),
    };
    Some(Entry::Plan(plan))
}

/// Block formats shared by both tiers. `None` for formats no tier knows.
fn compressed(config: &Config, format: ImageFormat) -> Option<Entry> {
    use CompressedFormat as C;
    use ImageFormat as I;
    use TransferFormat as T;
    let etc2 = config.etc2_supported && config.tier == Tier::Full;
    let (supported, block, transfer) = match format {
        I::Dxt1 => (config.s3tc_supported, C::S3tcDxt1, T::Rgba),
        I::Dxt3 => (config.s3tc_supported, C::S3tcDxt3, T::Rgba),
        I::Dxt5 => (config.s3tc_supported, C::S3tcDxt5, T::Rgba),
        I::RgtcR => (config.rgtc_supported, C::RgtcRed, T::Rgba),
        I::RgtcRg => (config.rgtc_supported, C::RgtcRg, T::Rgba),
        I::BptcRgba => (config.bptc_supported, C::BptcRgba, T::Rgba),
        I::BptcRgbf => (config.bptc_supported, C::BptcRgbFloat, T::Rgb),
        I::BptcRgbfu => (config.bptc_supported, C::BptcRgbUFloat, T::Rgb),
        I::Etc2R11 => (etc2, C::Etc2R11, T::Red),
        I::Etc2R11s => (etc2, C::Etc2R11Signed, T::Red),
        I::Etc2Rg11 => (etc2, C::Etc2Rg11, T::Rg),
        I::Etc2Rg11s => (etc2, C::Etc2Rg11Signed, T::Rg),
        I::Etc2Rgb8 => (etc2, C::Etc2Rgb8, T::Rgb),
        I::Etc2Rgba8 => (etc2, C::Etc2Rgba8, T::Rgba),
        I::Etc2Rgb8a1 => (etc2, C::Etc2Rgb8A1, T::Rgba),
        I::Astc4x4 => (config.astc_supported, C::Astc4x4, T::Rgba),
        I::Astc4x4Hdr => (config.astc_hdr_supported, C::Astc4x4Hdr, T::Rgba),
        I::Astc8x8 => (config.astc_supported, C::Astc8x8, T::Rgba),
        I::Astc8x8Hdr => (config.astc_hdr_supported, C::Astc8x8Hdr, T::Rgba),
        I::Etc2RaAsRg | I::Dxt5RaAsRg => return Some(Entry::Decompress { ra_to_rg: true }),
        _ => return None,
    };
    if supported {
        Some(Entry::Plan(FormatPlan::blocks(format, block, transfer)))
    } else {
        Some(Entry::Decompress { ra_to_rg: false })
    }
}

/// Uncompressed format a block format decodes to.
const fn decoded_format(format: ImageFormat) -> ImageFormat {
    use ImageFormat as I;
    match format {
        I::RgtcRg | I::Etc2Rg11 | I::Etc2Rg11s | I::Etc2RaAsRg | I::Dxt5RaAsRg => I::Rg8,
        I::RgtcR | I::Etc2R11 | I::Etc2R11s => I::R8,
        f if f.is_compressed() => I::Rgba8,
        f => f,
    }
}

fn decompressed(tier: Tier, format: ImageFormat, ra_to_rg: bool) -> FormatPlan {
    let (real_format, gpu) = match decoded_format(format) {
        ImageFormat::Rg8 if tier == Tier::Full => (ImageFormat::Rg8, RG8),
        ImageFormat::Rg8 | ImageFormat::Rgb8 => (ImageFormat::Rgb8, RGB8),
        _ => (ImageFormat::Rgba8, GpuFormat::RGBA8),
    };
    FormatPlan {
        gpu,
        compressed: false,
        real_format,
        transform: Transform::Decompress { ra_to_rg },
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;

    fn reduced() -> Config {
        Config::for_tier(Tier::Reduced)
    }

    fn full() -> Config {
        Config::for_tier(Tier::Full)
    }

    #[test]
    fn reduced_tier_promotes_rg8_to_rgb8() {
        let plan = plan(&reduced(), ImageFormat::Rg8, false).unwrap();
        assert_eq!(plan.real_format, ImageFormat::Rgb8);
        assert_eq!(plan.gpu.internal, InternalFormat::Rgb8);
        assert_eq!(plan.transform, Transform::Convert);

        let full_plan = super::plan(&full(), ImageFormat::Rg8, false).unwrap();
        assert_eq!(full_plan.real_format, ImageFormat::Rg8);
        assert_eq!(full_plan.transform, Transform::None);
    }

    #[test]
    fn r8_is_stored_as_alpha_on_the_reduced_tier() {
        let plan = plan(&reduced(), ImageFormat::R8, false).unwrap();
        assert_eq!(plan.gpu.internal, InternalFormat::Alpha);
        assert_eq!(plan.gpu.transfer, TransferFormat::Alpha);
        assert_eq!(plan.real_format, ImageFormat::R8);
    }

    #[test]
    fn rf_depends_on_float_support() {
        let mut config = reduced();
        assert_eq!(
            plan(&config, ImageFormat::Rf, false).unwrap().real_format,
            ImageFormat::Rgba8
        );
        config.float_texture_supported = true;
        let native = plan(&config, ImageFormat::Rf, false).unwrap();
        assert_eq!(native.real_format, ImageFormat::Rf);
        assert_eq!(native.gpu.pixel_type, PixelType::Float);
    }

    #[test]
    fn s3tc_uploads_compressed_only_with_support() {
        let mut config = reduced();
        let fallback = plan(&config, ImageFormat::Dxt1, false).unwrap();
        assert!(!fallback.compressed);
        assert_eq!(fallback.real_format, ImageFormat::Rgba8);
        assert_eq!(fallback.transform, Transform::Decompress { ra_to_rg: false });

        config.s3tc_supported = true;
        let native = plan(&config, ImageFormat::Dxt1, false).unwrap();
        assert!(native.compressed);
        assert_eq!(
            native.gpu.internal,
            InternalFormat::Compressed(CompressedFormat::S3tcDxt1)
        );
        assert_eq!(native.real_format, ImageFormat::Dxt1);
    }

    #[test]
    fn etc2_never_uploads_on_the_reduced_tier() {
        let mut config = reduced();
        config.etc2_supported = true;
        let plan = plan(&config, ImageFormat::Etc2Rgb8, false).unwrap();
        assert!(!plan.compressed);
        assert_eq!(plan.real_format, ImageFormat::Rgba8);
    }

    #[test]
    fn rgtc_rg_fallback_depends_on_tier() {
        let reduced_plan = plan(&reduced(), ImageFormat::RgtcRg, false).unwrap();
        assert_eq!(reduced_plan.real_format, ImageFormat::Rgb8);
        let full_plan = plan(&full(), ImageFormat::RgtcRg, false).unwrap();
        assert_eq!(full_plan.real_format, ImageFormat::Rg8);
        let single = plan(&full(), ImageFormat::RgtcR, false).unwrap();
        assert_eq!(single.real_format, ImageFormat::Rgba8);
    }

    #[test]
    fn ra_as_rg_always_decompresses_with_shuffle() {
        let mut config = full();
        config.s3tc_supported = true;
        let plan = plan(&config, ImageFormat::Dxt5RaAsRg, false).unwrap();
        assert_eq!(plan.transform, Transform::Decompress { ra_to_rg: true });
        assert_eq!(plan.real_format, ImageFormat::Rg8);
    }

    #[test]
    fn force_decompress_canonicalizes_uncompressed_formats() {
        let plan = plan(&full(), ImageFormat::La8, true).unwrap();
        assert_eq!(plan.real_format, ImageFormat::Rgba8);
        let rgb = super::plan(&full(), ImageFormat::Rgb8, true).unwrap();
        assert_eq!(rgb.real_format, ImageFormat::Rgb8);
    }

    #[test]
    fn unknown_formats_fail() {
        assert!(matches!(
            plan(&reduced(), ImageFormat::Etc, false),
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn rgbe_is_native_on_full_and_srgb_on_reduced() {
        let full_plan = plan(&full(), ImageFormat::Rgbe9995, false).unwrap();
        assert_eq!(full_plan.gpu.internal, InternalFormat::Rgb9E5);
        let reduced_plan = plan(&reduced(), ImageFormat::Rgbe9995, false).unwrap();
        assert_eq!(reduced_plan.transform, Transform::RgbeToSrgb);
        assert_eq!(reduced_plan.real_format, ImageFormat::Rgb8);
    }

    #[test]
    fn apply_borrows_native_data_and_rewrites_the_rest() {
        let image = Image::filled(2, 2, false, ImageFormat::Rg8, Vec4::new(1.0, 0.0, 0.0, 1.0)).unwrap();
        let native = plan(&full(), ImageFormat::Rg8, false).unwrap();
        assert!(matches!(native.apply(&image).unwrap(), Cow::Borrowed(_)));

        let promoted = plan(&reduced(), ImageFormat::Rg8, false).unwrap();
        let out = promoted.apply(&image).unwrap();
        assert_eq!(out.format(), ImageFormat::Rgb8);
        assert_eq!(out.pixel(1, 1), Some(Vec4::new(1.0, 0.0, 0.0, 1.0)));
    }

    #[test]
    fn apply_decompresses_dxt1() {
        let block = vec![0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];
        let image = Image::new(4, 4, false, ImageFormat::Dxt1, block).unwrap();
        let plan = plan(&reduced(), ImageFormat::Dxt1, false).unwrap();
        let out = plan.apply(&image).unwrap();
        assert_eq!(out.format(), ImageFormat::Rgba8);
        assert_eq!(out.pixel(3, 3), Some(Vec4::ONE));
    }

    #[test]
    fn bptc_without_decoder_reports_an_image_error() {
        let image = Image::new(4, 4, false, ImageFormat::BptcRgba, vec![0; 16]).unwrap();
        let plan = plan(&reduced(), ImageFormat::BptcRgba, false).unwrap();
        assert!(matches!(
            plan.apply(&image),
            Err(StorageError::Image(_))
        ));
    }
}
