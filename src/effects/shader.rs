//! Copy shader variants, uniforms and the per-tier program capability.

use glam::{Vec2, Vec4};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::Tier;
use crate::util::rect::Rect2;

/// Fragment behaviour selected for a copy draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyVariant {
    /// Sample the source across the whole viewport.
    Default,
    /// Draw the source into the copy section.
    CopySection,
    /// Draw the source section into the copy section.
    CopySectionSource,
    /// Draw one slice of a volume texture into the copy section.
    CopySection3d,
    /// Draw one layer of an array texture into the copy section.
    CopySection2dArray,
    /// Full-screen copy with the colour scaled by `Multiply`.
    Screen,
    /// One level of the mip-chain blur.
    GaussianBlur,
    /// Plain downsample of the previous level.
    Mipmap,
    /// Fill the copy section with `ColorIn`.
    SimpleColor,
    /// Reproject a cubemap to an octahedral map.
    CubeToOctahedral,
    /// Reproject a cubemap to an equirectangular panorama.
    CubeToPanorama,
    /// Seed the jump flood from the SDF write texture.
    SdfLoad,
    /// Seed the jump flood at a reduced resolution.
    SdfLoadShrink,
    /// One strided jump-flood pass.
    SdfProcess,
    /// Write signed distances into the SDF read texture.
    SdfStore,
    /// Write signed distances from a reduced-resolution flood.
    SdfStoreShrink,
}

impl CopyVariant {
    /// Every variant, in shader mode order.
    pub const ALL: [Self; 16] = [
        Self::Default,
        Self::CopySection,
        Self::CopySectionSource,
        Self::CopySection3d,
        Self::CopySection2dArray,
        Self::Screen,
        Self::GaussianBlur,
        Self::Mipmap,
        Self::SimpleColor,
        Self::CubeToOctahedral,
        Self::CubeToPanorama,
        Self::SdfLoad,
        Self::SdfLoadShrink,
        Self::SdfProcess,
        Self::SdfStore,
        Self::SdfStoreShrink,
    ];

    /// Mode index understood by the copy shader.
    #[must_use]
    pub const fn mode(self) -> u32 {
        self as u32
    }

    /// Whether quads are placed by the `CopySection` uniform.
    #[must_use]
    pub const fn uses_copy_section(self) -> bool {
        matches!(
            self,
            Self::CopySection
                | Self::CopySectionSource
                | Self::CopySection3d
                | Self::CopySection2dArray
                | Self::GaussianBlur
                | Self::SimpleColor
                | Self::CubeToOctahedral
        )
    }

    /// Whether sampling is remapped by the `SourceSection` uniform.
    #[must_use]
    pub const fn uses_source_section(self) -> bool {
        matches!(self, Self::CopySectionSource | Self::GaussianBlur)
    }

    /// Jump-flood passes of the SDF pipeline.
    #[must_use]
    pub const fn is_sdf(self) -> bool {
        matches!(
            self,
            Self::SdfLoad
                | Self::SdfLoadShrink
                | Self::SdfProcess
                | Self::SdfStore
                | Self::SdfStoreShrink
        )
    }

    /// Variants that sample a cubemap.
    #[must_use]
    pub const fn samples_cube(self) -> bool {
        matches!(self, Self::CubeToOctahedral | Self::CubeToPanorama)
    }
}

/// Named uniforms of the copy shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CopyUniform {
    CopySection,
    SourceSection,
    Layer,
    Lod,
    ColorIn,
    Multiply,
    PixelSize,
    MipLevel,
    BaseSize,
    Size,
    Stride,
    Shift,
}

/// One to four floats or a colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// Scalar.
    Float(f32),
    /// Two components.
    Vec2([f32; 2]),
    /// Four components.
    Vec4([f32; 4]),
    /// RGBA colour.
    Color(Vec4),
}

impl UniformValue {
    /// Components padded with zeros.
    #[must_use]
    pub fn to_array(self) -> [f32; 4] {
        match self {
            Self::Float(x) => [x, 0.0, 0.0, 0.0],
            Self::Vec2([x, y]) => [x, y, 0.0, 0.0],
            Self::Vec4(v) => v,
            Self::Color(c) => c.to_array(),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<Vec2> for UniformValue {
    fn from(value: Vec2) -> Self {
        Self::Vec2(value.to_array())
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        Self::Color(value)
    }
}

impl From<Rect2> for UniformValue {
    fn from(value: Rect2) -> Self {
        Self::Vec4(value.to_array())
    }
}

/// Current uniform values of one program variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyUniforms {
    /// Destination rect in normalized viewport space.
    pub copy_section: Vec4,
    /// Source rect in normalized texture space.
    pub source_section: Vec4,
    /// Array layer or volume slice.
    pub layer: f32,
    /// Level sampled from layered sources.
    pub lod: f32,
    /// Fill colour.
    pub color_in: Vec4,
    /// Colour scale of the screen copy.
    pub multiply: f32,
    /// Texel size of the blur source.
    pub pixel_size: Vec2,
    /// Level sampled by the panorama reprojection.
    pub mip_level: f32,
    /// Full-resolution SDF size.
    pub base_size: Vec2,
    /// Jump-flood resolution.
    pub size: Vec2,
    /// Jump-flood step in texels.
    pub stride: f32,
    /// Log2 of the jump-flood reduction.
    pub shift: f32,
}

impl Default for CopyUniforms {
    fn default() -> Self {
        Self {
            copy_section: Vec4::new(0.0, 0.0, 1.0, 1.0),
            source_section: Vec4::new(0.0, 0.0, 1.0, 1.0),
            layer: 0.0,
            lod: 0.0,
            color_in: Vec4::ZERO,
            multiply: 1.0,
            pixel_size: Vec2::ONE,
            mip_level: 0.0,
            base_size: Vec2::ONE,
            size: Vec2::ONE,
            stride: 1.0,
            shift: 0.0,
        }
    }
}

impl CopyUniforms {
    /// Store `value` into `uniform`.
    pub fn set(&mut self, uniform: CopyUniform, value: UniformValue) {
        let [x, y, z, w] = value.to_array();
        match uniform {
            CopyUniform::CopySection => self.copy_section = Vec4::new(x, y, z, w),
            CopyUniform::SourceSection => self.source_section = Vec4::new(x, y, z, w),
            CopyUniform::Layer => self.layer = x,
            CopyUniform::Lod => self.lod = x,
            CopyUniform::ColorIn => self.color_in = Vec4::new(x, y, z, w),
            CopyUniform::Multiply => self.multiply = x,
            CopyUniform::PixelSize => self.pixel_size = Vec2::new(x, y),
            CopyUniform::MipLevel => self.mip_level = x,
            CopyUniform::BaseSize => self.base_size = Vec2::new(x, y),
            CopyUniform::Size => self.size = Vec2::new(x, y),
            CopyUniform::Stride => self.stride = x,
            CopyUniform::Shift => self.shift = x,
        }
    }
}

/// The program a draw runs with: the resolved variant and its uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundProgram {
    /// Variant actually bound after tier resolution.
    pub variant: CopyVariant,
    /// Uniform values of that variant.
    pub uniforms: CopyUniforms,
}

/// Shader program capability consumed by [`CopyEffects`](super::CopyEffects).
pub trait CopyShader {
    /// Bind a variant. `false` when the variant cannot be used.
    fn bind(&mut self, variant: CopyVariant) -> bool;
    /// Set a uniform of `variant`.
    fn set_uniform(&mut self, uniform: CopyUniform, value: UniformValue, variant: CopyVariant);
    /// The currently bound program.
    fn bound(&self) -> Option<&BoundProgram>;
}

/// Copy shader with the variant and uniform support of a backend tier.
///
/// The reduced tier has no section-source, 3D or array variants (they fall
/// back to `Default`), ignores `Layer` and `Lod`, and has no SDF passes.
#[derive(Debug)]
pub struct TieredCopyShader {
    tier: Tier,
    programs: FxHashMap<CopyVariant, BoundProgram>,
    current: Option<CopyVariant>,
    unavailable: FxHashSet<CopyVariant>,
}

impl TieredCopyShader {
    /// Shader for `tier`.
    #[must_use]
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            programs: FxHashMap::default(),
            current: None,
            unavailable: FxHashSet::default(),
        }
    }

    /// Mark a variant as failed to compile; binding it returns `false`.
    #[must_use]
    pub fn without_variant(mut self, variant: CopyVariant) -> Self {
        let _ = self.unavailable.insert(variant);
        self
    }

    /// Tier the shader was built for.
    #[must_use]
    pub const fn tier(&self) -> Tier {
        self.tier
    }

    /// Variant that actually runs when `variant` is requested.
    #[must_use]
    pub const fn resolve(&self, variant: CopyVariant) -> CopyVariant {
        match (self.tier, variant) {
            (
                Tier::Reduced,
                CopyVariant::CopySectionSource
                | CopyVariant::CopySection3d
                | CopyVariant::CopySection2dArray,
            ) => CopyVariant::Default,
            _ => variant,
        }
    }

    fn supports(&self, variant: CopyVariant) -> bool {
        if self.unavailable.contains(&variant) {
            return false;
        }
        !(self.tier == Tier::Reduced && variant.is_sdf())
    }
}

impl CopyShader for TieredCopyShader {
    fn bind(&mut self, variant: CopyVariant) -> bool {
        let resolved = self.resolve(variant);
        if !self.supports(resolved) {
            return false;
        }
        let _ = self.programs.entry(resolved).or_insert(BoundProgram {
            variant: resolved,
            uniforms: CopyUniforms::default(),
        });
        self.current = Some(resolved);
        true
    }

    fn set_uniform(&mut self, uniform: CopyUniform, value: UniformValue, variant: CopyVariant) {
        if self.tier == Tier::Reduced && matches!(uniform, CopyUniform::Layer | CopyUniform::Lod) {
            log::error!("{uniform:?} uniform is not implemented on the reduced tier");
            return;
        }
        let resolved = self.resolve(variant);
        self.programs
            .entry(resolved)
            .or_insert(BoundProgram {
                variant: resolved,
                uniforms: CopyUniforms::default(),
            })
            .uniforms
            .set(uniform, value);
    }

    fn bound(&self) -> Option<&BoundProgram> {
        self.current.and_then(|v| self.programs.get(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduced_tier_maps_section_source_to_default() {
        let mut shader = TieredCopyShader::new(Tier::Reduced);
        assert!(shader.bind(CopyVariant::CopySectionSource));
        assert_eq!(shader.bound().unwrap().variant, CopyVariant::Default);
        assert!(shader.bind(CopyVariant::CopySection2dArray));
        assert_eq!(shader.bound().unwrap().variant, CopyVariant::Default);
    }

    #[test]
    fn reduced_tier_ignores_layer_uniforms() {
        let mut shader = TieredCopyShader::new(Tier::Reduced);
        assert!(shader.bind(CopyVariant::CopySection3d));
        shader.set_uniform(CopyUniform::Layer, UniformValue::Float(3.0), CopyVariant::CopySection3d);
        shader.set_uniform(CopyUniform::Lod, UniformValue::Float(2.0), CopyVariant::CopySection3d);
        let uniforms = shader.bound().unwrap().uniforms;
        assert_eq!(uniforms.layer, 0.0);
        assert_eq!(uniforms.lod, 0.0);
    }

    #[test]
    fn full_tier_keeps_uniforms_per_variant() {
        let mut shader = TieredCopyShader::new(Tier::Full);
        assert!(shader.bind(CopyVariant::CopySection2dArray));
        shader.set_uniform(CopyUniform::Layer, UniformValue::Float(2.0), CopyVariant::CopySection2dArray);
        assert!(shader.bind(CopyVariant::SimpleColor));
        shader.set_uniform(
            CopyUniform::ColorIn,
            Vec4::new(1.0, 0.0, 0.0, 1.0).into(),
            CopyVariant::SimpleColor,
        );
        assert!(shader.bind(CopyVariant::CopySection2dArray));
        let program = shader.bound().unwrap();
        assert_eq!(program.variant, CopyVariant::CopySection2dArray);
        assert_eq!(program.uniforms.layer, 2.0);
        assert_eq!(program.uniforms.color_in, Vec4::ZERO);
    }

    #[test]
    fn sdf_variants_need_the_full_tier() {
        let mut reduced = TieredCopyShader::new(Tier::Reduced);
        let mut full = TieredCopyShader::new(Tier::Full);
        for variant in CopyVariant::ALL.into_iter().filter(|v| v.is_sdf()) {
            assert!(!reduced.bind(variant));
            assert!(full.bind(variant));
        }
    }

    #[test]
    fn failed_variant_does_not_bind() {
        let mut shader =
            TieredCopyShader::new(Tier::Full).without_variant(CopyVariant::GaussianBlur);
        assert!(!shader.bind(CopyVariant::GaussianBlur));
        assert!(shader.bound().is_none());
    }

    #[test]
    fn mode_matches_declaration_order() {
        for (i, variant) in CopyVariant::ALL.into_iter().enumerate() {
            assert_eq!(variant.mode(), u32::try_from(i).unwrap());
        }
    }
}
