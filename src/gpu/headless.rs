//! Software [`GpuDevice`] that keeps every texel on the CPU.
//!
//! Textures are stored as linear `Vec4` texels per layer and level, and
//! every copy variant is rasterized per pixel centre. Compressed uploads are
//! decoded when the image layer has a decoder; otherwise the blocks are kept
//! for readback and sample as transparent black.
//!
//! Row 0 of a texture, of a framebuffer and of the viewport all map to
//! normalized coordinate 0, so copies never flip.

use std::f32::consts::PI;
use std::num::NonZeroU32;

use glam::{IVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use rustc_hash::{FxHashMap, FxHashSet};

use super::device::{
    FboId, FramebufferStatus, GpuDevice, InternalFormat, Primitive, SamplerState, TexId,
    TextureDesc, TransferFormat, Upload,
};
use crate::effects::{BoundProgram, CopyUniforms, CopyVariant};
use crate::image::{pixel, Image, ImageFormat, Layout};
use crate::util::rect::Rect2i;

/// Seed coordinate marking "no edge found yet" in jump-flood textures.
const NO_SEED: f32 = -32767.0;

/// Side of the default system framebuffer.
const SCREEN_SIZE: u32 = 64;

/// One mip level of one layer.
#[derive(Debug, Clone)]
struct SoftLevel {
    width: u32,
    height: u32,
    texels: Vec<Vec4>,
    blocks: Option<Vec<u8>>,
}

impl SoftLevel {
    fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        Self {
            width,
            height,
            texels: vec![Vec4::ZERO; (width * height) as usize],
            blocks: None,
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let inside = x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height;
        inside.then(|| y as usize * self.width as usize + x as usize)
    }

    fn fetch(&self, p: IVec2, repeat: bool) -> Vec4 {
        let (w, h) = (self.width as i32, self.height as i32);
        let (x, y) = if repeat {
            (p.x.rem_euclid(w), p.y.rem_euclid(h))
        } else {
            (p.x.clamp(0, w - 1), p.y.clamp(0, h - 1))
        };
        self.index(x, y)
            .and_then(|i| self.texels.get(i).copied())
            .unwrap_or(Vec4::ZERO)
    }

    fn sample(&self, uv: Vec2, sampler: SamplerState) -> Vec4 {
        let size = Vec2::new(self.width as f32, self.height as f32);
        if !sampler.filter.is_linear() {
            return self.fetch((uv * size).floor().as_ivec2(), sampler.repeat);
        }
        let p = uv * size - 0.5;
        let base = p.floor();
        let f = p - base;
        let i = base.as_ivec2();
        let a = self.fetch(i, sampler.repeat);
        let b = self.fetch(i + IVec2::X, sampler.repeat);
        let c = self.fetch(i + IVec2::Y, sampler.repeat);
        let d = self.fetch(i + IVec2::ONE, sampler.repeat);
        a.lerp(b, f.x).lerp(c.lerp(d, f.x), f.y)
    }
}

#[derive(Debug, Clone)]
struct SoftTexture {
    desc: TextureDesc,
    sampler: SamplerState,
    layers: Vec<Vec<SoftLevel>>,
}

impl SoftTexture {
    fn level(&self, layer: u32, level: u32) -> Option<&SoftLevel> {
        self.layers.get(layer as usize)?.get(level as usize)
    }

    fn level_mut(&mut self, layer: u32, level: u32) -> Option<&mut SoftLevel> {
        self.layers.get_mut(layer as usize)?.get_mut(level as usize)
    }

    fn sample(&self, uv: Vec2, layer: u32, level: u32) -> Vec4 {
        let layer = layer.min(self.desc.layers.saturating_sub(1));
        let level = level.min(self.desc.levels.saturating_sub(1));
        self.level(layer, level)
            .map_or(Vec4::ZERO, |l| l.sample(uv, self.sampler))
    }

    fn fetch(&self, p: IVec2) -> Vec4 {
        self.level(0, 0).map_or(Vec4::ZERO, |l| l.fetch(p, false))
    }

    fn sample_cube(&self, dir: Vec3, level: u32) -> Vec4 {
        let a = dir.abs();
        let (face, st, ma) = if a.x >= a.y && a.x >= a.z {
            if dir.x > 0.0 {
                (0, Vec2::new(-dir.z, -dir.y), a.x)
            } else {
                (1, Vec2::new(dir.z, -dir.y), a.x)
            }
        } else if a.y >= a.z {
            if dir.y > 0.0 {
                (2, Vec2::new(dir.x, dir.z), a.y)
            } else {
                (3, Vec2::new(dir.x, -dir.z), a.y)
            }
        } else if dir.z > 0.0 {
            (4, Vec2::new(dir.x, -dir.y), a.z)
        } else {
            (5, Vec2::new(-dir.x, -dir.y), a.z)
        };
        self.sample((st / ma + 1.0) * 0.5, face, level)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SoftFramebuffer {
    color: Option<(TexId, u32)>,
    depth: Option<TexId>,
}

/// CPU-only device used by tests and tools.
#[derive(Debug)]
pub struct HeadlessDevice {
    textures: FxHashMap<TexId, SoftTexture>,
    framebuffers: FxHashMap<FboId, SoftFramebuffer>,
    next_name: NonZeroU32,
    bound: Option<FboId>,
    viewport: Rect2i,
    scissor: Option<Rect2i>,
    units: FxHashMap<u32, TexId>,
    screen: SoftLevel,
    unrenderable: FxHashSet<InternalFormat>,
    image_transfer: bool,
    draws: Vec<(CopyVariant, Primitive)>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Device with a 64×64 system framebuffer and direct image transfer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            textures: FxHashMap::default(),
            framebuffers: FxHashMap::default(),
            next_name: NonZeroU32::MIN,
            bound: None,
            viewport: Rect2i::from_size(IVec2::splat(SCREEN_SIZE as i32)),
            scissor: None,
            units: FxHashMap::default(),
            screen: SoftLevel::new(SCREEN_SIZE, SCREEN_SIZE),
            unrenderable: FxHashSet::default(),
            image_transfer: true,
            draws: Vec::new(),
        }
    }

    /// Same device without direct texture readback, like the reduced tier.
    #[must_use]
    pub fn without_image_transfer(mut self) -> Self {
        self.image_transfer = false;
        self
    }

    /// Report framebuffers with a `format` attachment as unsupported.
    pub fn reject_attachment_format(&mut self, format: InternalFormat) {
        let _ = self.unrenderable.insert(format);
    }

    /// Accept every renderable attachment format again.
    pub fn accept_all_attachment_formats(&mut self) {
        self.unrenderable.clear();
    }

    /// Texels of one level, row-major from row 0.
    #[must_use]
    pub fn texels(&self, id: TexId, layer: u32, level: u32) -> Option<&[Vec4]> {
        self.textures
            .get(&id)?
            .level(layer, level)
            .map(|l| l.texels.as_slice())
    }

    /// Texels of the system framebuffer.
    #[must_use]
    pub fn screen_texels(&self) -> &[Vec4] {
        &self.screen.texels
    }

    /// Creation parameters of a live texture.
    #[must_use]
    pub fn texture_desc(&self, id: TexId) -> Option<&TextureDesc> {
        self.textures.get(&id).map(|t| &t.desc)
    }

    /// Sampler state of a live texture.
    #[must_use]
    pub fn sampler(&self, id: TexId) -> Option<SamplerState> {
        self.textures.get(&id).map(|t| t.sampler)
    }

    /// Number of live textures.
    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Number of live framebuffers.
    #[must_use]
    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Currently bound framebuffer, `None` for the system framebuffer.
    #[must_use]
    pub const fn bound_framebuffer(&self) -> Option<FboId> {
        self.bound
    }

    /// Colour attachment of a framebuffer.
    #[must_use]
    pub fn color_attachment(&self, fbo: FboId) -> Option<TexId> {
        self.framebuffers.get(&fbo)?.color.map(|(id, _)| id)
    }

    /// Depth attachment of a framebuffer.
    #[must_use]
    pub fn depth_attachment(&self, fbo: FboId) -> Option<TexId> {
        self.framebuffers.get(&fbo)?.depth
    }

    /// Texture bound to a sampling unit.
    #[must_use]
    pub fn bound_texture(&self, unit: u32) -> Option<TexId> {
        self.units.get(&unit).copied()
    }

    /// Current viewport.
    #[must_use]
    pub const fn current_viewport(&self) -> Rect2i {
        self.viewport
    }

    /// Every draw issued so far.
    #[must_use]
    pub fn draw_log(&self) -> &[(CopyVariant, Primitive)] {
        &self.draws
    }

    fn next_name(&mut self) -> NonZeroU32 {
        let name = self.next_name;
        self.next_name = name.saturating_add(1);
        name
    }

    fn unit(&self, unit: u32) -> Option<&SoftTexture> {
        self.textures.get(self.units.get(&unit)?)
    }

    fn target(&self) -> Option<&SoftLevel> {
        match self.bound {
            None => Some(&self.screen),
            Some(fbo) => {
                let (id, level) = self.framebuffers.get(&fbo)?.color?;
                self.textures.get(&id)?.level(0, level)
            }
        }
    }

    fn target_mut(&mut self) -> Option<&mut SoftLevel> {
        match self.bound {
            None => Some(&mut self.screen),
            Some(fbo) => {
                let (id, level) = self.framebuffers.get(&fbo)?.color?;
                self.textures.get_mut(&id)?.level_mut(0, level)
            }
        }
    }

    /// Pixels of the bound target covered by viewport and scissor.
    fn draw_area(&self, target: &SoftLevel, restrict_to_viewport: bool) -> Rect2i {
        let full = Rect2i::from_size(IVec2::new(target.width as i32, target.height as i32));
        let mut area = if restrict_to_viewport {
            full.intersection(&self.viewport)
        } else {
            full
        };
        if let Some(scissor) = self.scissor {
            area = area.intersection(&scissor);
        }
        area
    }

    fn decode_upload(desc: &TextureDesc, upload: Upload, data: &[u8]) -> Option<SoftLevel> {
        let mut level = SoftLevel::new(upload.width, upload.height);
        if let InternalFormat::Compressed(compressed) = desc.format.internal {
            level.blocks = Some(data.to_vec());
            let decoded = Image::new(
                upload.width,
                upload.height,
                false,
                compressed.image_format(),
                data.to_vec(),
            )
            .and_then(|mut image| image.decompress().map(|()| image));
            match decoded {
                Ok(image) => {
                    for (i, texel) in level.texels.iter_mut().enumerate() {
                        let x = i as u32 % upload.width;
                        let y = i as u32 / upload.width;
                        *texel = image.pixel(x, y).unwrap_or(Vec4::ZERO);
                    }
                }
                Err(e) => log::debug!("keeping {compressed:?} blocks undecoded: {e}"),
            }
            return Some(level);
        }

        let layout = desc.format.transfer_layout()?;
        let Layout::Pixel(stride) = layout.layout() else {
            return None;
        };
        let stride = stride as usize;
        if data.len() < level.texels.len() * stride {
            log::error!(
                "upload of {}x{} needs {} bytes, got {}",
                upload.width,
                upload.height,
                level.texels.len() * stride,
                data.len()
            );
            return None;
        }
        let alpha = desc.format.transfer == TransferFormat::Alpha;
        for (texel, bytes) in level.texels.iter_mut().zip(data.chunks_exact(stride)) {
            let value = pixel::decode(layout, bytes).unwrap_or(Vec4::ZERO);
            *texel = if alpha {
                Vec4::new(0.0, 0.0, 0.0, value.x)
            } else {
                value
            };
        }
        Some(level)
    }

    fn shade(&self, primitive: Primitive, program: &BoundProgram, local_px: Vec2) -> Option<Vec4> {
        let u = &program.uniforms;
        let variant = program.variant;
        let uv = local_px / self.viewport.size.max(IVec2::ONE).as_vec2();
        let pos = local_px.floor().as_ivec2();

        let mut local = uv;
        if primitive == Primitive::ScreenQuad && variant.uses_copy_section() {
            let cs = u.copy_section;
            let end = cs.xy() + cs.zw();
            if uv.x < cs.x || uv.y < cs.y || uv.x >= end.x || uv.y >= end.y {
                return None;
            }
            local = (uv - cs.xy()) / cs.zw();
        }
        let sourced = u.source_section.xy() + local * u.source_section.zw();

        let source = self.unit(0);
        let base_level = source.map_or(0, |t| t.sampler.base_level);
        let sample = |uv: Vec2, layer: u32, level: u32| {
            source.map_or(Vec4::ZERO, |t| t.sample(uv, layer, level))
        };

        let color = match variant {
            CopyVariant::CopySectionSource => sample(sourced, 0, base_level),
            CopyVariant::CopySection3d | CopyVariant::CopySection2dArray => {
                sample(local, u.layer.round().max(0.0) as u32, u.lod.max(0.0) as u32)
            }
            CopyVariant::Screen => {
                let c = sample(local, 0, base_level);
                (c.xyz() * u.multiply).extend(c.w)
            }
            CopyVariant::GaussianBlur => gaussian(|p| sample(p, 0, base_level), sourced, u.pixel_size),
            CopyVariant::SimpleColor => u.color_in,
            CopyVariant::CubeToOctahedral => {
                let dir = oct_to_dir(local * 2.0 - 1.0);
                source
                    .map_or(Vec4::ZERO, |t| t.sample_cube(dir, base_level))
                    .xyz()
                    .extend(1.0)
            }
            CopyVariant::CubeToPanorama => {
                let phi = local.x * 2.0 * PI;
                let theta = local.y * PI;
                let normal = Vec3::new(
                    -phi.sin() * theta.sin(),
                    theta.cos(),
                    -phi.cos() * theta.sin(),
                );
                source
                    .map_or(Vec4::ZERO, |t| t.sample_cube(normal, u.mip_level.max(0.0) as u32))
                    .xyz()
                    .extend(1.0)
            }
            CopyVariant::SdfLoad | CopyVariant::SdfLoadShrink => self.sdf_load(pos, u),
            CopyVariant::SdfProcess => self.sdf_process(pos, u),
            CopyVariant::SdfStore | CopyVariant::SdfStoreShrink => self.sdf_store(pos, u),
            CopyVariant::Default | CopyVariant::CopySection | CopyVariant::Mipmap => {
                sample(local, 0, base_level)
            }
        };
        Some(color)
    }

    fn source_solid(&self, p: IVec2, base_size: IVec2) -> bool {
        if p.x < 0 || p.y < 0 || p.x >= base_size.x || p.y >= base_size.y {
            return false;
        }
        self.unit(0).is_some_and(|t| t.fetch(p).x > 0.5)
    }

    fn cell_solid(&self, q: IVec2, shift: u32, base_size: IVec2) -> bool {
        let s = 1_i32 << shift;
        let origin = q << shift as i32;
        (0..s).any(|j| (0..s).any(|i| self.source_solid(origin + IVec2::new(i, j), base_size)))
    }

    fn sdf_load(&self, pos: IVec2, u: &CopyUniforms) -> Vec4 {
        let shift = u.shift.max(0.0) as u32;
        let size = u.size.as_ivec2();
        let base_size = u.base_size.as_ivec2();
        let solid = self.cell_solid(pos, shift, base_size);
        let edge = [IVec2::NEG_X, IVec2::X, IVec2::NEG_Y, IVec2::Y]
            .into_iter()
            .map(|d| pos + d)
            .filter(|q| q.x >= 0 && q.y >= 0 && q.x < size.x && q.y < size.y)
            .any(|q| self.cell_solid(q, shift, base_size) != solid);
        if edge {
            Vec4::new(pos.x as f32, pos.y as f32, 0.0, 0.0)
        } else {
            Vec4::new(NO_SEED, NO_SEED, 0.0, 0.0)
        }
    }

    fn sdf_process(&self, pos: IVec2, u: &CopyUniforms) -> Vec4 {
        let Some(source) = self.unit(0) else {
            return Vec4::new(NO_SEED, NO_SEED, 0.0, 0.0);
        };
        let size = u.size.as_ivec2();
        let stride = u.stride.max(1.0) as i32;
        let mut best = source.fetch(pos);
        let mut best_distance = seed_distance(pos, best);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let q = pos + IVec2::new(dx, dy) * stride;
                if q.x < 0 || q.y < 0 || q.x >= size.x || q.y >= size.y {
                    continue;
                }
                let candidate = source.fetch(q);
                let d = seed_distance(pos, candidate);
                if d < best_distance {
                    best = candidate;
                    best_distance = d;
                }
            }
        }
        best
    }

    fn sdf_store(&self, pos: IVec2, u: &CopyUniforms) -> Vec4 {
        let shift = u.shift.max(0.0) as i32;
        let size = u.size.as_ivec2().max(IVec2::ONE);
        let p = (pos >> shift).clamp(IVec2::ZERO, size - 1);
        let seed = self.unit(0).map_or(Vec4::new(NO_SEED, NO_SEED, 0.0, 0.0), |t| t.fetch(p));
        let max_dim = u.base_size.x.max(u.base_size.y).max(1.0);
        let mut d = if seed.x > NO_SEED {
            p.as_vec2().distance(seed.xy()) * (1 << shift) as f32
        } else {
            max_dim
        };
        if self.unit(1).is_some_and(|t| t.fetch(pos).x > 0.5) {
            d = -d;
        }
        let encoded = (0.5 + d / (2.0 * max_dim)).clamp(0.0, 1.0);
        Vec4::new(encoded, encoded, encoded, 1.0)
    }
}

fn seed_distance(pos: IVec2, seed: Vec4) -> f32 {
    if seed.x <= NO_SEED {
        return f32::INFINITY;
    }
    pos.as_vec2().distance(seed.xy())
}

fn oct_to_dir(e: Vec2) -> Vec3 {
    let mut v = Vec3::new(e.x, e.y, 1.0 - e.x.abs() - e.y.abs());
    let t = (-v.z).max(0.0);
    v.x += if v.x >= 0.0 { -t } else { t };
    v.y += if v.y >= 0.0 { -t } else { t };
    v.normalize_or_zero()
}

fn gaussian(sample: impl Fn(Vec2) -> Vec4, uv: Vec2, px: Vec2) -> Vec4 {
    let at = |x: f32, y: f32| sample(uv + px * Vec2::new(x, y));
    let (a, b, c) = (at(-1.0, -1.0), at(0.0, -1.0), at(1.0, -1.0));
    let (d, e) = (at(-0.5, -0.5), at(0.5, -0.5));
    let (f, g, h) = (at(-1.0, 0.0), at(0.0, 0.0), at(1.0, 0.0));
    let (i, j) = (at(-0.5, 0.5), at(0.5, 0.5));
    let (k, l, m) = (at(-1.0, 1.0), at(0.0, 1.0), at(1.0, 1.0));
    let weight = 0.5 / 4.0;
    let lesser = 0.125 / 4.0;
    (d + e + i + j) * weight
        + (a + b + g + f) * lesser
        + (b + c + h + g) * lesser
        + (f + g + l + k) * lesser
        + (g + h + m + l) * lesser
}

impl GpuDevice for HeadlessDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> TexId {
        let id = TexId::new(self.next_name());
        let levels = desc.levels.max(1);
        let layers = (0..desc.layers.max(1))
            .map(|_| {
                (0..levels)
                    .map(|l| SoftLevel::new(desc.width >> l, desc.height >> l))
                    .collect()
            })
            .collect();
        let _ = self.textures.insert(
            id,
            SoftTexture {
                desc: *desc,
                sampler: SamplerState::default(),
                layers,
            },
        );
        id
    }

    fn delete_texture(&mut self, id: TexId) {
        if self.textures.remove(&id).is_none() {
            log::debug!("deleting unknown texture {id:?}");
        }
        self.units.retain(|_, bound| *bound != id);
    }

    fn upload(&mut self, id: TexId, upload: Upload, data: &[u8]) {
        let Some(texture) = self.textures.get_mut(&id) else {
            log::error!("upload to unknown texture {id:?}");
            return;
        };
        let Some(decoded) = Self::decode_upload(&texture.desc, upload, data) else {
            log::error!("cannot upload {:?} data", texture.desc.format);
            return;
        };
        match texture.level_mut(upload.layer, upload.level) {
            Some(level) => *level = decoded,
            None => log::error!(
                "upload to layer {} level {} outside texture {id:?}",
                upload.layer,
                upload.level
            ),
        }
    }

    fn set_sampler(&mut self, id: TexId, sampler: SamplerState) {
        if let Some(texture) = self.textures.get_mut(&id) {
            texture.sampler = sampler;
        }
    }

    fn read_texture(&mut self, id: TexId, layer: u32, level: u32) -> Option<Vec<u8>> {
        if !self.image_transfer {
            return None;
        }
        let texture = self.textures.get(&id)?;
        let soft = texture.level(layer, level)?;
        if let Some(blocks) = &soft.blocks {
            return Some(blocks.clone());
        }
        let layout = texture.desc.format.transfer_layout()?;
        let alpha = texture.desc.format.transfer == TransferFormat::Alpha;
        let mut out = Vec::new();
        for texel in &soft.texels {
            let value = if alpha {
                Vec4::new(texel.w, 0.0, 0.0, 1.0)
            } else {
                *texel
            };
            if !pixel::encode(layout, value, &mut out) {
                return None;
            }
        }
        Some(out)
    }

    fn create_framebuffer(&mut self) -> FboId {
        let id = FboId::new(self.next_name());
        let _ = self.framebuffers.insert(id, SoftFramebuffer::default());
        id
    }

    fn delete_framebuffer(&mut self, id: FboId) {
        let _ = self.framebuffers.remove(&id);
        if self.bound == Some(id) {
            self.bound = None;
        }
    }

    fn attach_color(&mut self, fbo: FboId, texture: Option<TexId>, level: u32) {
        match self.framebuffers.get_mut(&fbo) {
            Some(framebuffer) => framebuffer.color = texture.map(|id| (id, level)),
            None => log::error!("attaching colour to unknown framebuffer {fbo:?}"),
        }
    }

    fn attach_depth(&mut self, fbo: FboId, texture: Option<TexId>) {
        match self.framebuffers.get_mut(&fbo) {
            Some(framebuffer) => framebuffer.depth = texture,
            None => log::error!("attaching depth to unknown framebuffer {fbo:?}"),
        }
    }

    fn framebuffer_status(&self, fbo: FboId) -> FramebufferStatus {
        let Some(framebuffer) = self.framebuffers.get(&fbo) else {
            return FramebufferStatus::MissingAttachment;
        };
        if framebuffer.color.is_none() && framebuffer.depth.is_none() {
            return FramebufferStatus::MissingAttachment;
        }
        let mut extent = None;
        if let Some((id, level)) = framebuffer.color {
            let Some(texture) = self.textures.get(&id) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            let internal = texture.desc.format.internal;
            if matches!(internal, InternalFormat::Depth24 | InternalFormat::Compressed(_)) {
                return FramebufferStatus::IncompleteAttachment;
            }
            if self.unrenderable.contains(&internal) {
                return FramebufferStatus::Unsupported;
            }
            let Some(soft) = texture.level(0, level) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            extent = Some((soft.width, soft.height));
        }
        if let Some(id) = framebuffer.depth {
            let Some(texture) = self.textures.get(&id) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            if texture.desc.format.internal != InternalFormat::Depth24 {
                return FramebufferStatus::IncompleteAttachment;
            }
            if self.unrenderable.contains(&InternalFormat::Depth24) {
                return FramebufferStatus::Unsupported;
            }
            let depth_extent = (texture.desc.width.max(1), texture.desc.height.max(1));
            if extent.is_some_and(|e| e != depth_extent) {
                return FramebufferStatus::IncompleteDimensions;
            }
        }
        FramebufferStatus::Complete
    }

    fn bind_framebuffer(&mut self, fbo: Option<FboId>) {
        self.bound = fbo;
    }

    fn viewport(&mut self, rect: Rect2i) {
        self.viewport = rect;
    }

    fn scissor(&mut self, rect: Option<Rect2i>) {
        self.scissor = rect;
    }

    fn clear(&mut self, color: Vec4) {
        let Some(target) = self.target() else {
            log::error!("clear with no colour attachment bound");
            return;
        };
        let area = self.draw_area(target, false);
        if let Some(target) = self.target_mut() {
            for y in area.position.y..area.end().y {
                for x in area.position.x..area.end().x {
                    if let Some(i) = target.index(x, y) {
                        target.texels[i] = color;
                    }
                }
            }
            target.blocks = None;
        }
    }

    fn bind_texture(&mut self, unit: u32, id: Option<TexId>) {
        match id {
            Some(id) => {
                let _ = self.units.insert(unit, id);
            }
            None => {
                let _ = self.units.remove(&unit);
            }
        }
    }

    fn draw(&mut self, primitive: Primitive, program: &BoundProgram) {
        self.draws.push((program.variant, primitive));
        let Some(target) = self.target() else {
            log::error!("draw with no colour attachment bound");
            return;
        };
        let area = self.draw_area(target, true);
        let origin = self.viewport.position.as_vec2();
        let mut writes = Vec::new();
        for y in area.position.y..area.end().y {
            for x in area.position.x..area.end().x {
                let local_px = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - origin;
                if let (Some(i), Some(color)) = (
                    target.index(x, y),
                    self.shade(primitive, program, local_px),
                ) {
                    writes.push((i, color));
                }
            }
        }
        if let Some(target) = self.target_mut() {
            for (i, color) in writes {
                target.texels[i] = color;
            }
            target.blocks = None;
        }
    }

    fn read_pixels(&mut self, rect: Rect2i) -> Vec<u8> {
        let mut out = Vec::with_capacity((rect.size.x.max(0) * rect.size.y.max(0) * 4) as usize);
        let target = self.target();
        for y in rect.position.y..rect.end().y {
            for x in rect.position.x..rect.end().x {
                let texel = target
                    .and_then(|t| t.index(x, y).map(|i| t.texels[i]))
                    .unwrap_or(Vec4::ZERO);
                let _ = pixel::encode(ImageFormat::Rgba8, texel, &mut out);
            }
        }
        out
    }
}
