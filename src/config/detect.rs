//! Capability detection from driver extension strings or wgpu features.

use rustc_hash::FxHashSet;

use super::{Config, Tier};

/// Numeric limits queried from the driver alongside its extension list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLimits {
    /// Largest 2D texture side.
    pub max_texture_size: u32,
    /// Fragment texture units.
    pub max_texture_image_units: u32,
    /// Vertex texture units.
    pub max_vertex_texture_image_units: u32,
    /// Largest viewport `[width, height]`.
    pub max_viewport_size: [u32; 2],
    /// Maximum anisotropy reported by the driver.
    pub max_anisotropy: f32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_texture_size: 2048,
            max_texture_image_units: 8,
            max_vertex_texture_image_units: 0,
            max_viewport_size: [2048, 2048],
            max_anisotropy: 1.0,
        }
    }
}

impl Config {
    /// Detect capabilities from a GL-style extension list.
    ///
    /// The full tier implies ETC2 and float render targets are core; the
    /// reduced tier needs an extension for each.
    pub fn from_extensions<'a>(
        tier: Tier,
        extensions: impl IntoIterator<Item = &'a str>,
        limits: DeviceLimits,
    ) -> Self {
        let ext: FxHashSet<&str> = extensions.into_iter().map(str::trim).collect();
        let has = |name: &str| ext.contains(name);
        let full = tier == Tier::Full;

        let support_anisotropic_filter = has("GL_EXT_texture_filter_anisotropic");
        let config = Self {
            tier,
            float_texture_supported: full
                || has("GL_EXT_color_buffer_float")
                || has("GL_OES_texture_float"),
            s3tc_supported: has("GL_EXT_texture_compression_dxt1")
                || has("GL_EXT_texture_compression_s3tc")
                || has("WEBGL_compressed_texture_s3tc"),
            rgtc_supported: has("GL_EXT_texture_compression_rgtc")
                || has("GL_ARB_texture_compression_rgtc")
                || has("EXT_texture_compression_rgtc"),
            bptc_supported: has("GL_ARB_texture_compression_bptc")
                || has("EXT_texture_compression_bptc"),
            etc2_supported: full,
            astc_supported: has("GL_KHR_texture_compression_astc")
                || has("GL_OES_texture_compression_astc")
                || has("GL_KHR_texture_compression_astc_ldr")
                || has("GL_KHR_texture_compression_astc_hdr"),
            astc_hdr_supported: has("GL_KHR_texture_compression_astc_hdr"),
            astc_layered_supported: has("GL_KHR_texture_compression_astc_sliced_3d"),
            support_anisotropic_filter,
            anisotropic_level: if support_anisotropic_filter {
                limits.max_anisotropy.max(1.0)
            } else {
                1.0
            },
            msaa_supported: full || has("GL_EXT_framebuffer_multisample"),
            rt_msaa_supported: has("GL_EXT_multisampled_render_to_texture"),
            multiview_supported: has("GL_OVR_multiview2") || has("GL_OVR_multiview"),
            support_npot_repeat_mipmap: full || has("GL_OES_texture_npot"),
            max_texture_size: limits.max_texture_size,
            max_texture_image_units: limits.max_texture_image_units,
            max_vertex_texture_image_units: limits.max_vertex_texture_image_units,
            max_viewport_size: limits.max_viewport_size,
            ..Self::default()
        };
        log::debug!(
            "detected {tier:?} capabilities from {} extensions",
            ext.len()
        );
        config
    }

    /// Capabilities of a wgpu device. Always the full tier.
    #[must_use]
    pub fn from_wgpu(features: wgpu::Features, limits: &wgpu::Limits) -> Self {
        let bc = features.contains(wgpu::Features::TEXTURE_COMPRESSION_BC);
        let astc = features.contains(wgpu::Features::TEXTURE_COMPRESSION_ASTC);
        Self {
            tier: Tier::Full,
            float_texture_supported: true,
            s3tc_supported: bc,
            rgtc_supported: bc,
            bptc_supported: bc,
            etc2_supported: features.contains(wgpu::Features::TEXTURE_COMPRESSION_ETC2),
            astc_supported: astc,
            astc_hdr_supported: features.contains(wgpu::Features::TEXTURE_COMPRESSION_ASTC_HDR),
            astc_layered_supported: astc,
            support_anisotropic_filter: true,
            anisotropic_level: 16.0,
            msaa_supported: true,
            rt_msaa_supported: true,
            multiview_supported: features.contains(wgpu::Features::MULTIVIEW),
            support_npot_repeat_mipmap: true,
            max_texture_size: limits.max_texture_dimension_2d,
            max_texture_image_units: limits.max_sampled_textures_per_shader_stage,
            max_vertex_texture_image_units: limits.max_sampled_textures_per_shader_stage,
            max_viewport_size: [limits.max_texture_dimension_2d; 2],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduced_tier_needs_extensions() {
        let config = Config::from_extensions(Tier::Reduced, [], DeviceLimits::default());
        assert!(!config.s3tc_supported);
        assert!(!config.etc2_supported);
        assert!(!config.float_texture_supported);
        assert!(!config.has_image_transfer());
    }

    #[test]
    fn extension_names_map_to_flags() {
        let exts = [
            "GL_EXT_texture_compression_s3tc",
            "EXT_texture_compression_bptc",
            "GL_ARB_texture_compression_rgtc",
            "GL_KHR_texture_compression_astc_ldr",
            "GL_EXT_texture_filter_anisotropic",
        ];
        let limits = DeviceLimits {
            max_anisotropy: 8.0,
            ..DeviceLimits::default()
        };
        let config = Config::from_extensions(Tier::Reduced, exts, limits);
        assert!(config.s3tc_supported);
        assert!(config.bptc_supported);
        assert!(config.rgtc_supported);
        assert!(config.astc_supported);
        assert!(!config.astc_hdr_supported);
        assert_eq!(config.anisotropic_level, 8.0);
    }

    #[test]
    fn full_tier_has_core_etc2() {
        let config = Config::from_extensions(Tier::Full, [], DeviceLimits::default());
        assert!(config.etc2_supported);
        assert!(config.float_texture_supported);
        assert!(config.has_image_transfer());
    }

    #[test]
    fn wgpu_bc_feature_enables_block_formats() {
        let config = Config::from_wgpu(
            wgpu::Features::TEXTURE_COMPRESSION_BC,
            &wgpu::Limits::default(),
        );
        assert!(config.s3tc_supported && config.rgtc_supported && config.bptc_supported);
        assert!(!config.astc_supported);
        assert_eq!(config.max_texture_size, 8192);
    }
}
