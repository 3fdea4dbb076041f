//! Per-texel decode/encode for uncompressed formats.
//!
//! Every conversion goes through linear `Vec4` RGBA. Integer formats are
//! normalized to `[0, 1]`; float formats pass through unclamped.

use glam::Vec4;
use half::f16;

use super::ImageFormat;

/// Decode one texel of `format` from the front of `bytes`.
///
/// Returns `None` for block-compressed formats or a short slice.
#[must_use]
pub fn decode(format: ImageFormat, bytes: &[u8]) -> Option<Vec4> {
    let unorm = |i: usize| bytes.get(i).map(|&b| f32::from(b) / 255.0);
    let f32_at = |i: usize| {
        bytes
            .get(i * 4..i * 4 + 4)
            .map(|s| f32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    };
    let f16_at = |i: usize| {
        bytes
            .get(i * 2..i * 2 + 2)
            .map(|s| f16::from_le_bytes([s[0], s[1]]).to_f32())
    };
    let u16_at = || bytes.get(0..2).map(|s| u16::from_le_bytes([s[0], s[1]]));

    let texel = match format {
        ImageFormat::L8 => {
            let l = unorm(0)?;
            Vec4::new(l, l, l, 1.0)
        }
        ImageFormat::La8 => {
            let l = unorm(0)?;
            Vec4::new(l, l, l, unorm(1)?)
        }
        ImageFormat::R8 => Vec4::new(unorm(0)?, 0.0, 0.0, 1.0),
        ImageFormat::Rg8 => Vec4::new(unorm(0)?, unorm(1)?, 0.0, 1.0),
        ImageFormat::Rgb8 => Vec4::new(unorm(0)?, unorm(1)?, unorm(2)?, 1.0),
        ImageFormat::Rgba8 => Vec4::new(unorm(0)?, unorm(1)?, unorm(2)?, unorm(3)?),
        ImageFormat::Rgba4444 => {
            let u = u16_at()?;
            let nib = |shift: u16| f32::from((u >> shift) & 0xF) / 15.0;
            Vec4::new(nib(12), nib(8), nib(4), nib(0))
        }
        ImageFormat::Rgb565 => {
            let u = u16_at()?;
            Vec4::new(
                f32::from(u & 0x1F) / 31.0,
                f32::from((u >> 5) & 0x3F) / 63.0,
                f32::from((u >> 11) & 0x1F) / 31.0,
                1.0,
            )
        }
        ImageFormat::Rf => Vec4::new(f32_at(0)?, 0.0, 0.0, 1.0),
        ImageFormat::Rgf => Vec4::new(f32_at(0)?, f32_at(1)?, 0.0, 1.0),
        ImageFormat::Rgbf => Vec4::new(f32_at(0)?, f32_at(1)?, f32_at(2)?, 1.0),
        ImageFormat::Rgbaf => Vec4::new(f32_at(0)?, f32_at(1)?, f32_at(2)?, f32_at(3)?),
        ImageFormat::Rh => Vec4::new(f16_at(0)?, 0.0, 0.0, 1.0),
        ImageFormat::Rgh => Vec4::new(f16_at(0)?, f16_at(1)?, 0.0, 1.0),
        ImageFormat::Rgbh => Vec4::new(f16_at(0)?, f16_at(1)?, f16_at(2)?, 1.0),
        ImageFormat::Rgbah => Vec4::new(f16_at(0)?, f16_at(1)?, f16_at(2)?, f16_at(3)?),
        ImageFormat::Rgbe9995 => {
            let s = bytes.get(0..4)?;
            from_rgbe9995(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
        }
        _ => return None,
    };
    Some(texel)
}

/// Append one texel of `format` to `out`.
///
/// Returns `false` for block-compressed formats.
pub fn encode(format: ImageFormat, texel: Vec4, out: &mut Vec<u8>) -> bool {
    let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let nibble = |v: f32| u16::from((v.clamp(0.0, 1.0) * 15.0).round() as u8);
    let put_f32 = |out: &mut Vec<u8>, values: &[f32]| {
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
    };
    let put_f16 = |out: &mut Vec<u8>, values: &[f32]| {
        for v in values {
            out.extend_from_slice(&f16::from_f32(*v).to_le_bytes());
        }
    };

    match format {
        ImageFormat::L8 | ImageFormat::R8 => out.push(unorm(texel.x)),
        ImageFormat::La8 => out.extend_from_slice(&[unorm(texel.x), unorm(texel.w)]),
        ImageFormat::Rg8 => out.extend_from_slice(&[unorm(texel.x), unorm(texel.y)]),
        ImageFormat::Rgb8 => {
            out.extend_from_slice(&[unorm(texel.x), unorm(texel.y), unorm(texel.z)]);
        }
        ImageFormat::Rgba8 => out.extend_from_slice(&[
            unorm(texel.x),
            unorm(texel.y),
            unorm(texel.z),
            unorm(texel.w),
        ]),
        ImageFormat::Rgba4444 => {
            let u = (nibble(texel.x) << 12)
                | (nibble(texel.y) << 8)
                | (nibble(texel.z) << 4)
                | nibble(texel.w);
            out.extend_from_slice(&u.to_le_bytes());
        }
        ImageFormat::Rgb565 => {
            let r = u16::from((texel.x.clamp(0.0, 1.0) * 31.0).round() as u8);
            let g = u16::from((texel.y.clamp(0.0, 1.0) * 63.0).round() as u8);
            let b = u16::from((texel.z.clamp(0.0, 1.0) * 31.0).round() as u8);
            out.extend_from_slice(&(r | (g << 5) | (b << 11)).to_le_bytes());
        }
        ImageFormat::Rf => put_f32(out, &[texel.x]),
        ImageFormat::Rgf => put_f32(out, &[texel.x, texel.y]),
        ImageFormat::Rgbf => put_f32(out, &[texel.x, texel.y, texel.z]),
        ImageFormat::Rgbaf => put_f32(out, &texel.to_array()),
        ImageFormat::Rh => put_f16(out, &[texel.x]),
        ImageFormat::Rgh => put_f16(out, &[texel.x, texel.y]),
        ImageFormat::Rgbh => put_f16(out, &[texel.x, texel.y, texel.z]),
        ImageFormat::Rgbah => put_f16(out, &texel.to_array()),
        ImageFormat::Rgbe9995 => {
            out.extend_from_slice(&to_rgbe9995(texel).to_le_bytes());
        }
        _ => return false,
    }
    true
}

/// Decode a shared-exponent RGB value.
#[must_use]
pub fn from_rgbe9995(packed: u32) -> Vec4 {
    let r = (packed & 0x1FF) as f32;
    let g = ((packed >> 9) & 0x1FF) as f32;
    let b = ((packed >> 18) & 0x1FF) as f32;
    let exponent = ((packed >> 27) & 0x1F) as i32;
    let scale = 2.0_f32.powi(exponent - 15 - 9);
    Vec4::new(r * scale, g * scale, b * scale, 1.0)
}

/// Encode linear RGB into 9-bit mantissas with a shared 5-bit exponent.
#[must_use]
pub fn to_rgbe9995(texel: Vec4) -> u32 {
    const POW2_TO_9: f32 = 512.0;
    const BIAS: f32 = 15.0;
    const MANTISSA: f32 = 9.0;
    const SHARED_MAX: f32 = 65408.0;

    let r = texel.x.clamp(0.0, SHARED_MAX);
    let g = texel.y.clamp(0.0, SHARED_MAX);
    let b = texel.z.clamp(0.0, SHARED_MAX);
    let max = r.max(g).max(b);

    let exp_p = (-BIAS - 1.0).max(max.log2().floor()) + 1.0 + BIAS;
    let s_max = (max / 2.0_f32.powf(exp_p - BIAS - MANTISSA) + 0.5).floor();
    let exp_s = if (0.0..POW2_TO_9).contains(&s_max) {
        exp_p
    } else {
        exp_p + 1.0
    };
    let scale = 2.0_f32.powf(exp_s - BIAS - MANTISSA);
    let quantize = |c: f32| ((c / scale + 0.5).floor() as u32) & 0x1FF;

    quantize(r) | (quantize(g) << 9) | (quantize(b) << 18) | (((exp_s as u32) & 0x1F) << 27)
}

/// sRGB transfer function applied to one linear channel.
#[must_use]
pub fn linear_to_srgb(c: f32) -> f32 {
    if c < 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba4444_keeps_red_in_high_nibble() {
        let mut out = Vec::new();
        assert!(encode(ImageFormat::Rgba4444, Vec4::new(1.0, 0.0, 0.0, 0.0), &mut out));
        assert_eq!(u16::from_le_bytes([out[0], out[1]]), 0xF000);
        let back = decode(ImageFormat::Rgba4444, &out).unwrap();
        assert_eq!(back, Vec4::new(1.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn luminance_expands_to_grey() {
        let texel = decode(ImageFormat::La8, &[255, 0]).unwrap();
        assert_eq!(texel, Vec4::new(1.0, 1.0, 1.0, 0.0));
    }

    #[test]
    fn rgbe_preserves_simple_values() {
        let texel = Vec4::new(1.0, 0.5, 2.0, 1.0);
        let back = from_rgbe9995(to_rgbe9995(texel));
        assert!((back - texel).abs().max_element() < 0.01);
        assert_eq!(from_rgbe9995(to_rgbe9995(Vec4::ZERO)).x, 0.0);
    }

    #[test]
    fn half_floats_decode() {
        let mut out = Vec::new();
        assert!(encode(ImageFormat::Rgh, Vec4::new(0.25, -3.0, 0.0, 1.0), &mut out));
        assert_eq!(out.len(), 4);
        let back = decode(ImageFormat::Rgh, &out).unwrap();
        assert_eq!(back, Vec4::new(0.25, -3.0, 0.0, 1.0));
    }

    #[test]
    fn compressed_formats_have_no_texel_codec() {
        assert!(decode(ImageFormat::Dxt1, &[0; 8]).is_none());
        assert!(!encode(ImageFormat::Astc4x4, Vec4::ONE, &mut Vec::new()));
    }
}
