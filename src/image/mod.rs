//! CPU-side image value consumed and produced by the texture store.
//!
//! An [`Image`] is a base level plus, optionally, the full mip chain down to
//! 1×1, stored back to back in one byte buffer. Uncompressed formats can be
//! converted, resized and mipmapped in place; S3TC and RGTC blocks can be
//! decompressed. Other block families (BPTC, ETC2, ASTC) travel as opaque
//! bytes and report [`ImageError::NoDecoder`] when asked to decompress.

mod bcn;
mod format;
pub mod pixel;

pub use format::{required_mipmaps, ImageFormat, Layout};
use glam::Vec4;

use crate::error::ImageError;

/// Pixel data plus the metadata needed to interpret it.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    format: ImageFormat,
    mipmaps: bool,
    data: Vec<u8>,
}

impl Image {
    /// Wrap `data`, validating its length against format and size.
    ///
    /// # Errors
    ///
    /// [`ImageError::EmptySize`] for a zero dimension,
    /// [`ImageError::DataSize`] when `data` has the wrong length.
    pub fn new(
        width: u32,
        height: u32,
        mipmaps: bool,
        format: ImageFormat,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::EmptySize);
        }
        let expected = Self::data_size_for(width, height, format, mipmaps);
        if data.len() != expected {
            return Err(ImageError::DataSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            mipmaps,
            data,
        })
    }

    /// Image with every texel of every level set to `color`.
    ///
    /// # Errors
    ///
    /// Fails for zero sizes and block-compressed formats.
    pub fn filled(
        width: u32,
        height: u32,
        mipmaps: bool,
        format: ImageFormat,
        color: Vec4,
    ) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::EmptySize);
        }
        let mut texel = Vec::new();
        if !pixel::encode(format, color, &mut texel) {
            return Err(ImageError::Conversion(ImageFormat::Rgbaf, format));
        }
        let size = Self::data_size_for(width, height, format, mipmaps);
        let data = texel.iter().copied().cycle().take(size).collect();
        Self::new(width, height, mipmaps, format, data)
    }

    /// Byte size of an image with the given shape.
    #[must_use]
    pub fn data_size_for(width: u32, height: u32, format: ImageFormat, mipmaps: bool) -> usize {
        let levels = if mipmaps {
            required_mipmaps(width, height) + 1
        } else {
            1
        };
        (0..levels)
            .map(|level| {
                let (w, h) = level_dims(width, height, level);
                format.level_size(w, h)
            })
            .sum()
    }

    /// Base level width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Base level height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Logical pixel format.
    #[must_use]
    pub const fn format(&self) -> ImageFormat {
        self.format
    }

    /// Whether the full mip chain is present.
    #[must_use]
    pub const fn has_mipmaps(&self) -> bool {
        self.mipmaps
    }

    /// Number of levels below the base level.
    #[must_use]
    pub fn mipmap_count(&self) -> u32 {
        if self.mipmaps {
            required_mipmaps(self.width, self.height)
        } else {
            0
        }
    }

    /// Total stored levels, base included.
    #[must_use]
    pub fn level_count(&self) -> u32 {
        self.mipmap_count() + 1
    }

    /// Raw bytes of every level.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total byte size.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Dimensions of `level`.
    #[must_use]
    pub fn mipmap_size(&self, level: u32) -> (u32, u32) {
        level_dims(self.width, self.height, level)
    }

    /// Byte offset and size of `level` inside [`Self::data`].
    #[must_use]
    pub fn mipmap_offset_and_size(&self, level: u32) -> (usize, usize) {
        let mut offset = 0;
        for l in 0..level {
            let (w, h) = self.mipmap_size(l);
            offset += self.format.level_size(w, h);
        }
        let (w, h) = self.mipmap_size(level);
        (offset, self.format.level_size(w, h))
    }

    /// Bytes of `level`, empty if the level does not exist.
    #[must_use]
    pub fn mipmap_data(&self, level: u32) -> &[u8] {
        if level >= self.level_count() {
            return &[];
        }
        let (offset, size) = self.mipmap_offset_and_size(level);
        self.data.get(offset..offset + size).unwrap_or(&[])
    }

    /// Decoded base-level texel, `None` for compressed formats or out of
    /// bounds coordinates.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Vec4> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let Layout::Pixel(bpp) = self.format.layout() else {
            return None;
        };
        let offset = ((y * self.width + x) * bpp) as usize;
        pixel::decode(self.format, self.data.get(offset..)?)
    }

    /// Copy of this image.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Re-encode every level into `format`.
    ///
    /// # Errors
    ///
    /// [`ImageError::Conversion`] if either side is block-compressed.
    pub fn convert(&mut self, format: ImageFormat) -> Result<(), ImageError> {
        if format == self.format {
            return Ok(());
        }
        if self.format.is_compressed() || format.is_compressed() {
            return Err(ImageError::Conversion(self.format, format));
        }
        let mut data = Vec::with_capacity(Self::data_size_for(
            self.width,
            self.height,
            format,
            self.mipmaps,
        ));
        for level in 0..self.level_count() {
            for texel in self.level_texels(level)? {
                let _ = pixel::encode(format, texel, &mut data);
            }
        }
        self.format = format;
        self.data = data;
        Ok(())
    }

    /// Decode block-compressed data into an uncompressed format.
    ///
    /// S3TC decodes to RGBA8, RGTC to R8/RG8. No-op for uncompressed images.
    ///
    /// # Errors
    ///
    /// [`ImageError::NoDecoder`] for block families without a decoder.
    pub fn decompress(&mut self) -> Result<(), ImageError> {
        if !self.format.is_compressed() {
            return Ok(());
        }
        let mut out_format = None;
        let mut data = Vec::new();
        for level in 0..self.level_count() {
            let (w, h) = self.mipmap_size(level);
            let (format, texels) = bcn::decode_level(self.format, w, h, self.mipmap_data(level))
                .ok_or(ImageError::NoDecoder(self.format))?;
            out_format = Some(format);
            data.extend_from_slice(&texels);
        }
        self.format = out_format.ok_or(ImageError::NoDecoder(self.format))?;
        self.data = data;
        Ok(())
    }

    /// Rebuild the mip chain from the base level with a 2×2 box filter.
    ///
    /// # Errors
    ///
    /// [`ImageError::Conversion`] for block-compressed images.
    pub fn generate_mipmaps(&mut self) -> Result<(), ImageError> {
        if self.format.is_compressed() {
            return Err(ImageError::Conversion(self.format, self.format));
        }
        let mut level = self.level_texels(0)?;
        let (mut w, mut h) = (self.width, self.height);
        let mut data = self.mipmap_data(0).to_vec();
        while w > 1 || h > 1 {
            let (nw, nh) = ((w >> 1).max(1), (h >> 1).max(1));
            let mut next = Vec::with_capacity((nw * nh) as usize);
            for y in 0..nh {
                for x in 0..nw {
                    let sx = (x * 2).min(w - 1);
                    let sy = (y * 2).min(h - 1);
                    let sx1 = (sx + 1).min(w - 1);
                    let sy1 = (sy + 1).min(h - 1);
                    let at = |xx: u32, yy: u32| level[(yy * w + xx) as usize];
                    next.push((at(sx, sy) + at(sx1, sy) + at(sx, sy1) + at(sx1, sy1)) * 0.25);
                }
            }
            for texel in &next {
                let _ = pixel::encode(self.format, *texel, &mut data);
            }
            level = next;
            (w, h) = (nw, nh);
        }
        self.data = data;
        self.mipmaps = true;
        Ok(())
    }

    /// Drop every level below the base.
    pub fn clear_mipmaps(&mut self) {
        if !self.mipmaps {
            return;
        }
        let (_, size) = self.mipmap_offset_and_size(0);
        self.data.truncate(size);
        self.mipmaps = false;
    }

    /// Bilinear resize of the base level to power-of-two dimensions.
    ///
    /// Mipmaps are regenerated if present.
    ///
    /// # Errors
    ///
    /// [`ImageError::Conversion`] for block-compressed images.
    pub fn resize_to_po2(&mut self) -> Result<(), ImageError> {
        self.resize(self.width.next_power_of_two(), self.height.next_power_of_two())
    }

    /// Bilinear resize of the base level to `width`×`height`.
    ///
    /// Mipmaps are regenerated if present.
    ///
    /// # Errors
    ///
    /// [`ImageError::EmptySize`] for a zero dimension,
    /// [`ImageError::Conversion`] for block-compressed images.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::EmptySize);
        }
        let (nw, nh) = (width, height);
        if (nw, nh) == (self.width, self.height) {
            return Ok(());
        }
        if self.format.is_compressed() {
            return Err(ImageError::Conversion(self.format, self.format));
        }
        let src = self.level_texels(0)?;
        let (w, h) = (self.width, self.height);
        let fetch = |x: i64, y: i64| {
            let x = x.clamp(0, i64::from(w) - 1) as u32;
            let y = y.clamp(0, i64::from(h) - 1) as u32;
            src[(y * w + x) as usize]
        };
        let mut data = Vec::new();
        for y in 0..nh {
            for x in 0..nw {
                let fx = (x as f32 + 0.5) * w as f32 / nw as f32 - 0.5;
                let fy = (y as f32 + 0.5) * h as f32 / nh as f32 - 0.5;
                let (x0, y0) = (fx.floor() as i64, fy.floor() as i64);
                let (tx, ty) = (fx - fx.floor(), fy - fy.floor());
                let top = fetch(x0, y0).lerp(fetch(x0 + 1, y0), tx);
                let bottom = fetch(x0, y0 + 1).lerp(fetch(x0 + 1, y0 + 1), tx);
                let _ = pixel::encode(self.format, top.lerp(bottom, ty), &mut data);
            }
        }
        let had_mipmaps = self.mipmaps;
        self.width = nw;
        self.height = nh;
        self.mipmaps = false;
        self.data = data;
        if had_mipmaps {
            self.generate_mipmaps()?;
        }
        Ok(())
    }

    /// Shared-exponent HDR image re-encoded as sRGB `Rgb8`.
    ///
    /// # Errors
    ///
    /// [`ImageError::Conversion`] unless the image is `Rgbe9995`.
    pub fn rgbe_to_srgb(&self) -> Result<Self, ImageError> {
        if self.format != ImageFormat::Rgbe9995 {
            return Err(ImageError::Conversion(self.format, ImageFormat::Rgb8));
        }
        let mut data = Vec::new();
        for level in 0..self.level_count() {
            for texel in self.level_texels(level)? {
                let srgb = Vec4::new(
                    pixel::linear_to_srgb(texel.x),
                    pixel::linear_to_srgb(texel.y),
                    pixel::linear_to_srgb(texel.z),
                    1.0,
                );
                let _ = pixel::encode(ImageFormat::Rgb8, srgb, &mut data);
            }
        }
        Self::new(self.width, self.height, self.mipmaps, ImageFormat::Rgb8, data)
    }

    /// Move alpha into green for "RA packed as RG" sources.
    ///
    /// # Errors
    ///
    /// [`ImageError::Conversion`] unless the image is `Rgba8`.
    pub fn shuffle_ra_to_rg(&mut self) -> Result<(), ImageError> {
        if self.format != ImageFormat::Rgba8 {
            return Err(ImageError::Conversion(self.format, ImageFormat::Rg8));
        }
        for texel in self.data.chunks_exact_mut(4) {
            texel[1] = texel[3];
            texel[2] = 0;
            texel[3] = 255;
        }
        Ok(())
    }

    fn level_texels(&self, level: u32) -> Result<Vec<Vec4>, ImageError> {
        let Layout::Pixel(bpp) = self.format.layout() else {
            return Err(ImageError::Conversion(self.format, ImageFormat::Rgbaf));
        };
        self.mipmap_data(level)
            .chunks_exact(bpp as usize)
            .map(|texel| {
                pixel::decode(self.format, texel)
                    .ok_or(ImageError::Conversion(self.format, ImageFormat::Rgbaf))
            })
            .collect()
    }
}

fn level_dims(width: u32, height: u32, level: u32) -> (u32, u32) {
    (
        width.checked_shr(level).unwrap_or(0).max(1),
        height.checked_shr(level).unwrap_or(0).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_data_length() {
        let err = Image::new(2, 2, false, ImageFormat::Rgba8, vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            ImageError::DataSize {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn mip_offsets_walk_the_chain() {
        let img = Image::filled(4, 4, true, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        assert_eq!(img.level_count(), 3);
        assert_eq!(img.mipmap_offset_and_size(0), (0, 64));
        assert_eq!(img.mipmap_offset_and_size(1), (64, 16));
        assert_eq!(img.mipmap_offset_and_size(2), (80, 4));
        assert_eq!(img.data_size(), 84);
    }

    #[test]
    fn convert_rgba8_to_la8_keeps_alpha() {
        let mut img =
            Image::filled(2, 1, false, ImageFormat::Rgba8, Vec4::new(1.0, 1.0, 1.0, 0.0))
                .unwrap();
        img.convert(ImageFormat::La8).unwrap();
        assert_eq!(img.data(), &[255, 0, 255, 0]);
    }

    #[test]
    fn generate_mipmaps_averages() {
        let data = vec![0, 0, 0, 255, 255, 255, 255, 255];
        let mut img = Image::new(2, 1, false, ImageFormat::Rgba8, data).unwrap();
        img.generate_mipmaps().unwrap();
        assert!(img.has_mipmaps());
        assert_eq!(img.mipmap_data(1), &[128, 128, 128, 255]);
    }

    #[test]
    fn resize_to_po2_rounds_up() {
        let mut img = Image::filled(3, 5, true, ImageFormat::Rgb8, Vec4::ONE).unwrap();
        img.resize_to_po2().unwrap();
        assert_eq!((img.width(), img.height()), (4, 8));
        assert!(img.has_mipmaps());
        assert_eq!(img.pixel(3, 7), Some(Vec4::ONE));
    }

    #[test]
    fn resize_shrinks_and_keeps_mipmaps() {
        let mut img = Image::filled(8, 8, true, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        img.resize(6, 5).unwrap();
        assert_eq!((img.width(), img.height()), (6, 5));
        assert_eq!(img.level_count(), 3);
        assert_eq!(img.pixel(5, 4), Some(Vec4::ONE));
        assert!(matches!(img.resize(0, 4), Err(ImageError::EmptySize)));
    }

    #[test]
    fn decompress_dxt1_gives_rgba8() {
        let block = vec![0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];
        let mut img = Image::new(4, 4, false, ImageFormat::Dxt1, block).unwrap();
        img.decompress().unwrap();
        assert_eq!(img.format(), ImageFormat::Rgba8);
        assert_eq!(img.pixel(0, 0), Some(Vec4::ONE));
    }

    #[test]
    fn decompress_without_decoder_fails() {
        let mut img = Image::new(4, 4, false, ImageFormat::BptcRgba, vec![0; 16]).unwrap();
        assert_eq!(
            img.decompress(),
            Err(ImageError::NoDecoder(ImageFormat::BptcRgba))
        );
    }

    #[test]
    fn ra_shuffle_moves_alpha_to_green() {
        let mut img = Image::new(1, 1, false, ImageFormat::Rgba8, vec![10, 20, 30, 40]).unwrap();
        img.shuffle_ra_to_rg().unwrap();
        assert_eq!(img.data(), &[10, 40, 0, 255]);
    }

    #[test]
    fn rgbe_to_srgb_produces_rgb8() {
        let img = Image::filled(2, 2, false, ImageFormat::Rgbe9995, Vec4::ONE).unwrap();
        let srgb = img.rgbe_to_srgb().unwrap();
        assert_eq!(srgb.format(), ImageFormat::Rgb8);
        assert_eq!(srgb.pixel(1, 1), Some(Vec4::ONE));
    }
}
