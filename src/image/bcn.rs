//! Block decoders for the S3TC (BC1-3) and RGTC (BC4-5) families.

use super::ImageFormat;

/// Decode one level of `format` blocks into tightly packed texels.
///
/// Output is RGBA8 for the S3TC formats, R8 for `RgtcR` and RG8 for
/// `RgtcRg`. Returns `None` for formats this module has no decoder for or
/// when `data` is shorter than the level requires.
#[must_use]
pub fn decode_level(
    format: ImageFormat,
    width: u32,
    height: u32,
    data: &[u8],
) -> Option<(ImageFormat, Vec<u8>)> {
    let (block_bytes, out_format) = match format {
        ImageFormat::Dxt1 => (8, ImageFormat::Rgba8),
        ImageFormat::Dxt3 | ImageFormat::Dxt5 | ImageFormat::Dxt5RaAsRg => {
            (16, ImageFormat::Rgba8)
        }
        ImageFormat::RgtcR => (8, ImageFormat::R8),
        ImageFormat::RgtcRg => (16, ImageFormat::Rg8),
        _ => return None,
    };
    let texel_bytes = match out_format {
        ImageFormat::R8 => 1,
        ImageFormat::Rg8 => 2,
        _ => 4,
    };

    let (w, h) = (width.max(1) as usize, height.max(1) as usize);
    let (blocks_x, blocks_y) = (w.div_ceil(4), h.div_ceil(4));
    if data.len() < blocks_x * blocks_y * block_bytes {
        return None;
    }

    let mut out = vec![0_u8; w * h * texel_bytes];
    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let offset = (by * blocks_x + bx) * block_bytes;
            let block = &data[offset..offset + block_bytes];
            let texels = decode_block(format, block);
            for (i, texel) in texels.iter().enumerate() {
                let (x, y) = (bx * 4 + i % 4, by * 4 + i / 4);
                if x >= w || y >= h {
                    continue;
                }
                let dst = (y * w + x) * texel_bytes;
                out[dst..dst + texel_bytes].copy_from_slice(&texel[..texel_bytes]);
            }
        }
    }
    Some((out_format, out))
}

fn decode_block(format: ImageFormat, block: &[u8]) -> [[u8; 4]; 16] {
    let mut texels = [[0_u8; 4]; 16];
    match format {
        ImageFormat::Dxt1 => decode_color(block, true, &mut texels),
        ImageFormat::Dxt3 => {
            decode_color(&block[8..], false, &mut texels);
            for (i, texel) in texels.iter_mut().enumerate() {
                let nibble = (block[i / 2] >> ((i % 2) * 4)) & 0xF;
                texel[3] = nibble * 17;
            }
        }
        ImageFormat::Dxt5 | ImageFormat::Dxt5RaAsRg => {
            decode_color(&block[8..], false, &mut texels);
            let alpha = decode_alpha(&block[..8]);
            for (texel, a) in texels.iter_mut().zip(alpha) {
                texel[3] = a;
            }
        }
        ImageFormat::RgtcR => {
            for (texel, r) in texels.iter_mut().zip(decode_alpha(block)) {
                texel[0] = r;
            }
        }
        ImageFormat::RgtcRg => {
            let red = decode_alpha(&block[..8]);
            let green = decode_alpha(&block[8..]);
            for (i, texel) in texels.iter_mut().enumerate() {
                texel[0] = red[i];
                texel[1] = green[i];
            }
        }
        _ => {}
    }
    texels
}

fn expand_565(c: u16) -> [u8; 3] {
    let r = ((c >> 11) & 0x1F) as u8;
    let g = ((c >> 5) & 0x3F) as u8;
    let b = (c & 0x1F) as u8;
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
}

fn decode_color(block: &[u8], allow_punch_through: bool, texels: &mut [[u8; 4]; 16]) {
    let c0 = u16::from_le_bytes([block[0], block[1]]);
    let c1 = u16::from_le_bytes([block[2], block[3]]);
    let (e0, e1) = (expand_565(c0), expand_565(c1));

    let mut palette = [[0_u8; 4]; 4];
    palette[0] = [e0[0], e0[1], e0[2], 255];
    palette[1] = [e1[0], e1[1], e1[2], 255];
    let lerp = |a: u8, b: u8, wa: u16, wb: u16, div: u16| {
        ((u16::from(a) * wa + u16::from(b) * wb) / div) as u8
    };
    if c0 > c1 || !allow_punch_through {
        for ch in 0..3 {
            palette[2][ch] = lerp(e0[ch], e1[ch], 2, 1, 3);
            palette[3][ch] = lerp(e0[ch], e1[ch], 1, 2, 3);
        }
        palette[2][3] = 255;
        palette[3][3] = 255;
    } else {
        for ch in 0..3 {
            palette[2][ch] = lerp(e0[ch], e1[ch], 1, 1, 2);
        }
        palette[2][3] = 255;
        palette[3] = [0, 0, 0, 0];
    }

    let indices = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
    for (i, texel) in texels.iter_mut().enumerate() {
        *texel = palette[((indices >> (i * 2)) & 0x3) as usize];
    }
}

fn decode_alpha(block: &[u8]) -> [u8; 16] {
    let (a0, a1) = (u32::from(block[0]), u32::from(block[1]));
    let mut palette = [0_u8; 8];
    palette[0] = a0 as u8;
    palette[1] = a1 as u8;
    if a0 > a1 {
        for i in 1..7_u32 {
            palette[i as usize + 1] = (((7 - i) * a0 + i * a1) / 7) as u8;
        }
    } else {
        for i in 1..5_u32 {
            palette[i as usize + 1] = (((5 - i) * a0 + i * a1) / 5) as u8;
        }
        palette[6] = 0;
        palette[7] = 255;
    }

    let mut bits = 0_u64;
    for (i, byte) in block[2..8].iter().enumerate() {
        bits |= u64::from(*byte) << (8 * i);
    }
    let mut out = [0_u8; 16];
    for (i, value) in out.iter_mut().enumerate() {
        *value = palette[((bits >> (3 * i)) & 0x7) as usize];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dxt1_solid_white_block() {
        // c0 = c1 = 0xFFFF, all indices 0.
        let block = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];
        let (format, texels) = decode_level(ImageFormat::Dxt1, 4, 4, &block).unwrap();
        assert_eq!(format, ImageFormat::Rgba8);
        assert!(texels.iter().all(|&b| b == 255));
    }

    #[test]
    fn dxt1_punch_through_is_transparent() {
        // c0 < c1 selects 3-colour mode; index 3 is transparent black.
        let block = [0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let (_, texels) = decode_level(ImageFormat::Dxt1, 4, 4, &block).unwrap();
        assert!(texels.chunks(4).all(|t| t == [0, 0, 0, 0]));
    }

    #[test]
    fn rgtc_r_interpolates_endpoints() {
        // a0 = 255, a1 = 0, every index 1 -> a1.
        let mut block = [255, 0, 0, 0, 0, 0, 0, 0];
        let ones: u64 = (0..16).fold(0, |acc, i| acc | (1 << (3 * i)));
        block[2..8].copy_from_slice(&ones.to_le_bytes()[..6]);
        let (format, texels) = decode_level(ImageFormat::RgtcR, 4, 4, &block).unwrap();
        assert_eq!(format, ImageFormat::R8);
        assert_eq!(texels, vec![0; 16]);
    }

    #[test]
    fn partial_blocks_are_cropped() {
        let block = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];
        let (_, texels) = decode_level(ImageFormat::Dxt1, 2, 3, &block).unwrap();
        assert_eq!(texels.len(), 2 * 3 * 4);
    }

    #[test]
    fn unknown_formats_have_no_decoder() {
        assert!(decode_level(ImageFormat::Astc4x4, 4, 4, &[0; 16]).is_none());
        assert!(decode_level(ImageFormat::Dxt5, 4, 4, &[0; 8]).is_none());
    }
}
