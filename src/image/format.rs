//! Logical pixel formats and their storage geometry.

use serde::{Deserialize, Serialize};

/// Logical pixel format of an [`super::Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ImageFormat {
    L8,
    La8,
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Rgba4444,
    Rgb565,
    Rf,
    Rgf,
    Rgbf,
    Rgbaf,
    Rh,
    Rgh,
    Rgbh,
    Rgbah,
    Rgbe9995,
    Dxt1,
    Dxt3,
    Dxt5,
    RgtcR,
    RgtcRg,
    BptcRgba,
    BptcRgbf,
    BptcRgbfu,
    Etc,
    Etc2R11,
    Etc2R11s,
    Etc2Rg11,
    Etc2Rg11s,
    Etc2Rgb8,
    Etc2Rgba8,
    Etc2Rgb8a1,
    Etc2RaAsRg,
    Dxt5RaAsRg,
    Astc4x4,
    Astc4x4Hdr,
    Astc8x8,
    Astc8x8Hdr,
}

/// How texels of a format are laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One texel occupies this many bytes.
    Pixel(u32),
    /// Fixed-size blocks of `width × height` texels.
    Block {
        /// Block width in texels.
        width: u32,
        /// Block height in texels.
        height: u32,
        /// Bytes per block.
        bytes: u32,
    },
}

impl ImageFormat {
    /// Memory layout of one texel or block.
    #[must_use]
    pub const fn layout(self) -> Layout {
        match self {
            Self::L8 | Self::R8 => Layout::Pixel(1),
            Self::La8 | Self::Rg8 | Self::Rgba4444 | Self::Rgb565 | Self::Rh => {
                Layout::Pixel(2)
            }
            Self::Rgb8 => Layout::Pixel(3),
            Self::Rgba8 | Self::Rf | Self::Rgh | Self::Rgbe9995 => Layout::Pixel(4),
            Self::Rgbh => Layout::Pixel(6),
            Self::Rgf | Self::Rgbah => Layout::Pixel(8),
            Self::Rgbf => Layout::Pixel(12),
            Self::Rgbaf => Layout::Pixel(16),
            Self::Dxt1
            | Self::RgtcR
            | Self::Etc
            | Self::Etc2R11
            | Self::Etc2R11s
            | Self::Etc2Rgb8
            | Self::Etc2Rgb8a1 => block4(8),
            Self::Dxt3
            | Self::Dxt5
            | Self::RgtcRg
            | Self::BptcRgba
            | Self::BptcRgbf
            | Self::BptcRgbfu
            | Self::Etc2Rg11
            | Self::Etc2Rg11s
            | Self::Etc2Rgba8
            | Self::Etc2RaAsRg
            | Self::Dxt5RaAsRg
            | Self::Astc4x4
            | Self::Astc4x4Hdr => block4(16),
            Self::Astc8x8 | Self::Astc8x8Hdr => Layout::Block {
                width: 8,
                height: 8,
                bytes: 16,
            },
        }
    }

    /// Whether texels are stored in compressed blocks.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        matches!(self.layout(), Layout::Block { .. })
    }

    /// Number of colour channels the format carries.
    #[must_use]
    pub const fn channels(self) -> u32 {
        match self {
            Self::L8 | Self::R8 | Self::Rf | Self::Rh | Self::RgtcR => 1,
            Self::Etc2R11 | Self::Etc2R11s => 1,
            Self::La8 | Self::Rg8 | Self::Rgf | Self::Rgh | Self::RgtcRg => 2,
            Self::Etc2Rg11 | Self::Etc2Rg11s | Self::Etc2RaAsRg | Self::Dxt5RaAsRg => 2,
            Self::Rgb8
            | Self::Rgb565
            | Self::Rgbf
            | Self::Rgbh
            | Self::Rgbe9995
            | Self::Dxt1
            | Self::BptcRgbf
            | Self::BptcRgbfu
            | Self::Etc
            | Self::Etc2Rgb8 => 3,
            _ => 4,
        }
    }

    /// Byte size of one `width × height` level.
    #[must_use]
    pub fn level_size(self, width: u32, height: u32) -> usize {
        let (width, height) = (width.max(1) as usize, height.max(1) as usize);
        match self.layout() {
            Layout::Pixel(bytes) => width * height * bytes as usize,
            Layout::Block {
                width: bw,
                height: bh,
                bytes,
            } => {
                let (bw, bh) = (bw as usize, bh as usize);
                width.div_ceil(bw) * height.div_ceil(bh) * bytes as usize
            }
        }
    }
}

const fn block4(bytes: u32) -> Layout {
    Layout::Block {
        width: 4,
        height: 4,
        bytes,
    }
}

/// Number of extra mip levels below a `width × height` base level.
#[must_use]
pub fn required_mipmaps(width: u32, height: u32) -> u32 {
    let (mut w, mut h) = (width.max(1), height.max(1));
    let mut count = 0;
    while w > 1 || h > 1 {
        w = (w >> 1).max(1);
        h = (h >> 1).max(1);
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_mipmaps_counts_down_to_one_texel() {
        assert_eq!(required_mipmaps(1, 1), 0);
        assert_eq!(required_mipmaps(4, 4), 2);
        assert_eq!(required_mipmaps(64, 8), 6);
        assert_eq!(required_mipmaps(1920, 1080), 10);
    }

    #[test]
    fn block_formats_round_up_to_whole_blocks() {
        assert_eq!(ImageFormat::Dxt1.level_size(1, 1), 8);
        assert_eq!(ImageFormat::Dxt5.level_size(5, 4), 32);
        assert_eq!(ImageFormat::Astc8x8.level_size(16, 9), 64);
    }

    #[test]
    fn pixel_formats_multiply_out() {
        assert_eq!(ImageFormat::Rgba8.level_size(4, 4), 64);
        assert_eq!(ImageFormat::Rgbh.level_size(2, 3), 36);
        assert!(!ImageFormat::Rgbe9995.is_compressed());
        assert!(ImageFormat::Etc2RaAsRg.is_compressed());
    }
}
