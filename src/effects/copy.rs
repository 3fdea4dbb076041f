use glam::{IVec2, Vec2, Vec4};

use super::shader::{CopyShader, CopyUniform, CopyVariant, TieredCopyShader, UniformValue};
use crate::config::Tier;
use crate::gpu::{Filter, GpuDevice, Primitive, SamplerState, TexId};
use crate::storage::TextureKind;
use crate::util::rect::{Rect2, Rect2i};

/// Uniforms of one jump-flood pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdfPass {
    /// Full-resolution SDF size.
    pub base_size: IVec2,
    /// Jump-flood resolution.
    pub size: IVec2,
    /// Step in texels (process passes).
    pub stride: i32,
    /// Log2 of the reduction (load and store passes).
    pub shift: i32,
}

/// Full-screen and quad copy operations.
///
/// Every operation assumes the caller has bound the destination framebuffer,
/// viewport and source texture. Only [`gaussian_blur`](Self::gaussian_blur)
/// binds a framebuffer itself, and it restores the system framebuffer before
/// returning. A variant that fails to bind is reported and its draw skipped.
pub struct CopyEffects {
    shader: Box<dyn CopyShader>,
}

impl CopyEffects {
    /// Dispatcher over a shader capability.
    #[must_use]
    pub fn new(shader: Box<dyn CopyShader>) -> Self {
        Self { shader }
    }

    /// Dispatcher using the built-in shader of `tier`.
    #[must_use]
    pub fn for_tier(tier: Tier) -> Self {
        Self::new(Box::new(TieredCopyShader::new(tier)))
    }

    /// The shader capability.
    #[must_use]
    pub fn shader(&self) -> &dyn CopyShader {
        self.shader.as_ref()
    }

    fn bind(&mut self, variant: CopyVariant) -> bool {
        if self.shader.bind(variant) {
            return true;
        }
        log::error!("copy shader variant {variant:?} could not be bound, skipping draw");
        false
    }

    fn set(&mut self, uniform: CopyUniform, value: impl Into<UniformValue>, variant: CopyVariant) {
        self.shader.set_uniform(uniform, value.into(), variant);
    }

    /// Copy the bound 2D texture into a normalized rect of the viewport.
    pub fn copy_to_rect(&mut self, device: &mut dyn GpuDevice, rect: Rect2) {
        let variant = CopyVariant::CopySection;
        if !self.bind(variant) {
            return;
        }
        self.set(CopyUniform::CopySection, rect, variant);
        self.draw_screen_quad(device);
    }

    /// Copy one layer of the bound layered or volume texture into a
    /// normalized rect of the viewport.
    pub fn copy_to_rect_3d(
        &mut self,
        device: &mut dyn GpuDevice,
        rect: Rect2,
        layer: f32,
        kind: TextureKind,
        lod: f32,
    ) {
        let variant = match kind {
            TextureKind::Layered => CopyVariant::CopySection2dArray,
            TextureKind::ThreeD => CopyVariant::CopySection3d,
            TextureKind::Plain2D => {
                log::error!("copy_to_rect_3d requires a layered or 3D texture");
                return;
            }
        };
        if !self.bind(variant) {
            return;
        }
        self.set(CopyUniform::CopySection, rect, variant);
        self.set(CopyUniform::Layer, layer, variant);
        self.set(CopyUniform::Lod, lod, variant);
        self.draw_screen_quad(device);
    }

    /// Copy the same normalized rect from the bound texture into the
    /// viewport.
    pub fn copy_to_and_from_rect(&mut self, device: &mut dyn GpuDevice, rect: Rect2) {
        let variant = CopyVariant::CopySectionSource;
        if !self.bind(variant) {
            return;
        }
        self.set(CopyUniform::CopySection, rect, variant);
        self.set(CopyUniform::SourceSection, rect, variant);
        self.draw_screen_quad(device);
    }

    /// Copy the bound texture over the whole viewport, scaling colour.
    pub fn copy_screen(&mut self, device: &mut dyn GpuDevice, multiply: f32) {
        let variant = CopyVariant::Screen;
        if !self.bind(variant) {
            return;
        }
        self.set(CopyUniform::Multiply, multiply, variant);
        self.draw_screen_triangle(device);
    }

    /// Reproject the bound cubemap to an octahedral map in a normalized rect.
    pub fn copy_cube_to_rect(&mut self, device: &mut dyn GpuDevice, rect: Rect2) {
        let variant = CopyVariant::CubeToOctahedral;
        if !self.bind(variant) {
            return;
        }
        self.set(CopyUniform::CopySection, rect, variant);
        self.draw_screen_quad(device);
    }

    /// Reproject one level of the bound cubemap to a panorama.
    pub fn copy_cube_to_panorama(&mut self, device: &mut dyn GpuDevice, mip_level: f32) {
        let variant = CopyVariant::CubeToPanorama;
        if !self.bind(variant) {
            return;
        }
        self.set(CopyUniform::MipLevel, mip_level, variant);
        self.draw_screen_quad(device);
    }

    /// Fill each mip level `1..mipmap_count` of `source` with a blurred
    /// copy of the level above, restricted to `region` of a `size` base.
    ///
    /// Owns a scratch framebuffer for the duration of the call; the system
    /// framebuffer is bound and the viewport reset to `size` on return.
    pub fn gaussian_blur(
        &mut self,
        device: &mut dyn GpuDevice,
        source: TexId,
        mipmap_count: u32,
        region: Rect2i,
        size: IVec2,
    ) {
        let fbo = device.create_framebuffer();
        device.bind_framebuffer(Some(fbo));
        device.bind_texture(0, Some(source));

        let mut base_size = size;
        let mut dest_region = region;
        let mut normalized_source = region.normalized(size);

        for level in 1..mipmap_count {
            dest_region.position >>= 1;
            dest_region.size = (dest_region.size >> 1_i32).max(IVec2::ONE);
            base_size = (base_size >> 1_i32).max(IVec2::ONE);

            device.set_sampler(
                source,
                SamplerState {
                    filter: Filter::Linear,
                    repeat: false,
                    base_level: level - 1,
                },
            );
            device.attach_color(fbo, Some(source), level);
            device.viewport(Rect2i::from_size(base_size));

            let variant = CopyVariant::GaussianBlur;
            if !self.bind(variant) {
                break;
            }
            let normalized_dest = dest_region.normalized(base_size);
            self.set(CopyUniform::CopySection, normalized_dest, variant);
            self.set(CopyUniform::SourceSection, normalized_source, variant);
            // Kernel taps are spaced in destination texels.
            self.set(CopyUniform::PixelSize, Vec2::ONE / base_size.as_vec2(), variant);
            self.draw_screen_quad(device);

            normalized_source = normalized_dest;
        }

        device.set_sampler(
            source,
            SamplerState {
                filter: Filter::LinearMipmap,
                repeat: false,
                base_level: 0,
            },
        );
        device.bind_texture(0, None);
        device.bind_framebuffer(None);
        device.delete_framebuffer(fbo);
        device.viewport(Rect2i::from_size(size));
    }

    /// Fill a normalized rect of the viewport with `color`.
    pub fn set_color(&mut self, device: &mut dyn GpuDevice, color: Vec4, region: Rect2) {
        let variant = CopyVariant::SimpleColor;
        if !self.bind(variant) {
            return;
        }
        self.set(CopyUniform::CopySection, region, variant);
        self.set(CopyUniform::ColorIn, color, variant);
        self.draw_screen_quad(device);
    }

    /// Run one jump-flood pass over the viewport. `false` when the variant
    /// is unavailable and nothing was drawn.
    pub fn sdf_pass(&mut self, device: &mut dyn GpuDevice, variant: CopyVariant, pass: SdfPass) -> bool {
        if !self.bind(variant) {
            return false;
        }
        self.set(CopyUniform::BaseSize, pass.base_size.as_vec2(), variant);
        self.set(CopyUniform::Size, pass.size.as_vec2(), variant);
        self.set(CopyUniform::Stride, pass.stride as f32, variant);
        self.set(CopyUniform::Shift, pass.shift as f32, variant);
        self.draw_screen_triangle(device);
        true
    }

    /// Draw the oversized triangle with the bound program.
    pub fn draw_screen_triangle(&self, device: &mut dyn GpuDevice) {
        self.draw(device, Primitive::ScreenTriangle);
    }

    /// Draw the unit quad with the bound program.
    pub fn draw_screen_quad(&self, device: &mut dyn GpuDevice) {
        self.draw(device, Primitive::ScreenQuad);
    }

    fn draw(&self, device: &mut dyn GpuDevice, primitive: Primitive) {
        match self.shader.bound() {
            Some(program) => device.draw(primitive, program),
            None => log::error!("no copy program bound for {primitive:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessDevice;
    use crate::gpu::{GpuFormat, TextureDesc, Upload};

    fn solid_texture(device: &mut HeadlessDevice, size: u32, rgba: [u8; 4]) -> TexId {
        let id = device.create_texture(&TextureDesc::texture_2d(GpuFormat::RGBA8, size, size, "test"));
        let data: Vec<u8> = rgba.iter().copied().cycle().take((size * size * 4) as usize).collect();
        device.upload(
            id,
            Upload {
                layer: 0,
                level: 0,
                width: size,
                height: size,
            },
            &data,
        );
        id
    }

    fn target(device: &mut HeadlessDevice, size: u32) -> TexId {
        let color = device.create_texture(&TextureDesc::texture_2d(GpuFormat::RGBA8, size, size, "target"));
        let fbo = device.create_framebuffer();
        device.attach_color(fbo, Some(color), 0);
        device.bind_framebuffer(Some(fbo));
        device.viewport(Rect2i::from_size(IVec2::splat(size as i32)));
        color
    }

    #[test]
    fn copy_to_rect_fills_only_the_section() {
        let mut device = HeadlessDevice::new();
        let source = solid_texture(&mut device, 2, [255, 0, 0, 255]);
        let dest = target(&mut device, 4);
        device.bind_texture(0, Some(source));

        let mut effects = CopyEffects::for_tier(Tier::Full);
        effects.copy_to_rect(&mut device, Rect2::new(0.0, 0.0, 0.5, 0.5));

        let texels = device.texels(dest, 0, 0).unwrap();
        assert_eq!(texels[0], Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(texels[3], Vec4::ZERO);
        assert_eq!(texels[15], Vec4::ZERO);
    }

    #[test]
    fn set_color_uses_normalized_region() {
        let mut device = HeadlessDevice::new();
        let dest = target(&mut device, 4);
        let mut effects = CopyEffects::for_tier(Tier::Reduced);
        let green = Vec4::new(0.0, 1.0, 0.0, 1.0);
        effects.set_color(&mut device, green, Rect2::new(0.5, 0.0, 0.5, 1.0));

        let texels = device.texels(dest, 0, 0).unwrap();
        assert_eq!(texels[0], Vec4::ZERO);
        assert_eq!(texels[2], green);
        assert_eq!(texels[15], green);
    }

    #[test]
    fn copy_screen_scales_color() {
        let mut device = HeadlessDevice::new();
        let source = solid_texture(&mut device, 4, [200, 100, 50, 255]);
        let dest = target(&mut device, 4);
        device.bind_texture(0, Some(source));
        let mut effects = CopyEffects::for_tier(Tier::Full);
        effects.copy_screen(&mut device, 0.5);

        let texel = device.texels(dest, 0, 0).unwrap()[5];
        assert!((texel.x - 100.0 / 255.0).abs() < 1e-3);
        assert!((texel.w - 1.0).abs() < 1e-6);
        assert_eq!(device.draw_log().last().map(|d| d.0), Some(CopyVariant::Screen));
    }

    #[test]
    fn copy_to_rect_3d_rejects_plain_textures() {
        let mut device = HeadlessDevice::new();
        let _ = target(&mut device, 2);
        let mut effects = CopyEffects::for_tier(Tier::Full);
        effects.copy_to_rect_3d(&mut device, Rect2::UNIT, 0.0, TextureKind::Plain2D, 0.0);
        assert!(device.draw_log().is_empty());
    }

    #[test]
    fn unbindable_variant_skips_the_draw() {
        let mut device = HeadlessDevice::new();
        let _ = target(&mut device, 2);
        let shader = TieredCopyShader::new(Tier::Full).without_variant(CopyVariant::SimpleColor);
        let mut effects = CopyEffects::new(Box::new(shader));
        effects.set_color(&mut device, Vec4::ONE, Rect2::UNIT);
        assert!(device.draw_log().is_empty());
    }

    #[test]
    fn sdf_pass_is_skipped_on_the_reduced_tier() {
        let mut device = HeadlessDevice::new();
        let mut effects = CopyEffects::for_tier(Tier::Reduced);
        let pass = SdfPass {
            base_size: IVec2::splat(4),
            size: IVec2::splat(4),
            stride: 1,
            shift: 0,
        };
        assert!(!effects.sdf_pass(&mut device, CopyVariant::SdfLoad, pass));
        assert!(device.draw_log().is_empty());
    }

    #[test]
    fn gaussian_blur_fills_every_level_and_restores_state() {
        let mut device = HeadlessDevice::new();
        let desc = TextureDesc::texture_2d(GpuFormat::RGBA8, 8, 8, "chain").with_levels(3);
        let chain = device.create_texture(&desc);
        let white = vec![255_u8; 8 * 8 * 4];
        device.upload(
            chain,
            Upload {
                layer: 0,
                level: 0,
                width: 8,
                height: 8,
            },
            &white,
        );
        let framebuffers_before = device.live_framebuffers();

        let mut effects = CopyEffects::for_tier(Tier::Full);
        effects.gaussian_blur(&mut device, chain, 3, Rect2i::from_size(IVec2::splat(8)), IVec2::splat(8));

        let level1 = device.texels(chain, 0, 1).unwrap();
        assert_eq!(level1.len(), 16);
        assert!(level1.iter().all(|t| (t.x - 1.0).abs() < 1e-4));
        let level2 = device.texels(chain, 0, 2).unwrap();
        assert!(level2.iter().all(|t| (t.w - 1.0).abs() < 1e-4));
        assert_eq!(device.live_framebuffers(), framebuffers_before);
        assert_eq!(device.bound_framebuffer(), None);
        assert_eq!(device.draw_log().len(), 2);
    }

    #[test]
    fn gaussian_blur_pixel_size_follows_the_destination_level() {
        let mut device = HeadlessDevice::new();
        let desc = TextureDesc::texture_2d(GpuFormat::RGBA8, 12, 8, "chain").with_levels(3);
        let chain = device.create_texture(&desc);
        let mut effects = CopyEffects::for_tier(Tier::Full);
        effects.gaussian_blur(&mut device, chain, 3, Rect2i::from_size(IVec2::new(12, 8)), IVec2::new(12, 8));

        let program = effects.shader().bound().unwrap();
        assert_eq!(program.variant, CopyVariant::GaussianBlur);
        assert_eq!(program.uniforms.pixel_size, Vec2::new(1.0 / 3.0, 0.5));
    }
}
