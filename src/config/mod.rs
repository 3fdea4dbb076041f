//! GPU capability registry with TOML preset support.
//!
//! A [`Config`] is built once at backend start, either detected from the
//! driver ([`Config::from_extensions`], [`Config::from_wgpu`]) or loaded
//! from a TOML preset, and is read-only afterwards. Every field uses
//! `#[serde(default)]` so a partial preset only overrides what it names.

mod detect;

use std::path::Path;

pub use detect::DeviceLimits;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Feature tier of the active backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Direct image transfer, native RG/float formats, layered textures,
    /// SDF processing.
    Full,
    /// Baseline tier: luminance/alpha formats, no texture readback, no
    /// arrays, no 3D textures.
    #[default]
    Reduced,
}

/// Capability flags and limits of the GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Backend feature tier.
    pub tier: Tier,
    /// Float textures can be sampled and rendered to.
    pub float_texture_supported: bool,
    /// S3TC / BC1-3.
    pub s3tc_supported: bool,
    /// RGTC / BC4-5.
    pub rgtc_supported: bool,
    /// BPTC / BC6H-7.
    pub bptc_supported: bool,
    /// ETC2 / EAC.
    pub etc2_supported: bool,
    /// ASTC LDR.
    pub astc_supported: bool,
    /// ASTC HDR.
    pub astc_hdr_supported: bool,
    /// ASTC in layered and 3D textures.
    pub astc_layered_supported: bool,
    /// Anisotropic filtering is available.
    pub support_anisotropic_filter: bool,
    /// Anisotropy applied when enabled.
    pub anisotropic_level: f32,
    /// Multisampled framebuffers.
    pub msaa_supported: bool,
    /// Multisampled render-to-texture.
    pub rt_msaa_supported: bool,
    /// Multiview framebuffers.
    pub multiview_supported: bool,
    /// Repeat wrap and mipmaps work on non-power-of-two textures.
    pub support_npot_repeat_mipmap: bool,
    /// Largest 2D texture side.
    pub max_texture_size: u32,
    /// Fragment texture units.
    pub max_texture_image_units: u32,
    /// Vertex texture units.
    pub max_vertex_texture_image_units: u32,
    /// Largest viewport `[width, height]`.
    pub max_viewport_size: [u32; 2],
    /// Use nearest filtering between mip levels.
    pub use_nearest_mip_filter: bool,
    /// Render a depth-only pass before the opaque pass.
    pub use_depth_prepass: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tier: Tier::Reduced,
            float_texture_supported: false,
            s3tc_supported: false,
            rgtc_supported: false,
            bptc_supported: false,
            etc2_supported: false,
            astc_supported: false,
            astc_hdr_supported: false,
            astc_layered_supported: false,
            support_anisotropic_filter: false,
            anisotropic_level: 1.0,
            msaa_supported: false,
            rt_msaa_supported: false,
            multiview_supported: false,
            support_npot_repeat_mipmap: false,
            max_texture_size: 2048,
            max_texture_image_units: 8,
            max_vertex_texture_image_units: 0,
            max_viewport_size: [2048, 2048],
            use_nearest_mip_filter: false,
            use_depth_prepass: true,
        }
    }
}

impl Config {
    /// Baseline config for `tier` with no optional features.
    #[must_use]
    pub fn for_tier(tier: Tier) -> Self {
        Self {
            tier,
            etc2_supported: tier == Tier::Full,
            ..Self::default()
        }
    }

    /// Whether textures can be read back directly from the GPU.
    #[must_use]
    pub fn has_image_transfer(&self) -> bool {
        self.tier == Tier::Full
    }

    /// Generate JSON Schema describing the preset file.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(Config)
    }

    /// Load a preset from a TOML file. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// I/O failure or malformed TOML.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path).map_err(StorageError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse a preset from TOML text.
    ///
    /// # Errors
    ///
    /// [`StorageError::ConfigParse`] on malformed TOML.
    pub fn from_toml(content: &str) -> Result<Self, StorageError> {
        toml::from_str(content).map_err(|e| StorageError::ConfigParse(e.to_string()))
    }

    /// Save as a pretty-printed TOML preset.
    ///
    /// # Errors
    ///
    /// Serialization or I/O failure.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StorageError::ConfigParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
        }
        std::fs::write(path, content).map_err(StorageError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_toml() {
        let config = Config::for_tier(Tier::Full);
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::from_toml(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
tier = "full"
s3tc_supported = true
max_texture_size = 16384
"#;
        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.tier, Tier::Full);
        assert!(config.s3tc_supported);
        assert_eq!(config.max_texture_size, 16384);
        assert!(!config.bptc_supported);
        assert!(config.use_depth_prepass);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::from_toml("tier = 3").unwrap_err();
        assert!(matches!(err, StorageError::ConfigParse(_)));
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join("texstore_config_test");
        let path = dir.join("preset.toml");
        let mut config = Config::for_tier(Tier::Reduced);
        config.astc_supported = true;
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn schema_lists_capability_flags() {
        let schema = serde_json::to_value(Config::json_schema()).unwrap();
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("tier"));
        assert!(props.contains_key("s3tc_supported"));
        assert!(props.contains_key("max_viewport_size"));
    }
}
