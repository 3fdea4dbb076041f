//! Render targets.
//!
//! A render target draws into one framebuffer whose colour and depth
//! attachments are either owned by the target or borrowed from textures
//! supplied through [`TextureStorage::render_target_set_override`]. Owned
//! colour storage is exposed to the rest of the store as the target's
//! texture record, which the target keeps in sync on every reallocation.
//!
//! Any change of size, transparency, HDR or MSAA clears the target and
//! reallocates. Allocation failures roll back to an unallocated target with
//! a warning, so a bad driver never leaves half-built framebuffers behind.

use std::collections::VecDeque;

use glam::{IVec2, Vec4};
use rustc_hash::FxHashMap;

use super::backbuffer::Backbuffer;
use super::sdf::SdfTextures;
use super::texture::{Texture, TextureKind};
use super::{RenderTargetRid, TextureRid, TextureStorage};
use crate::accounting::MemoryTracker;
use crate::error::StorageError;
use crate::gpu::{FboId, Filter, GpuDevice, GpuFormat, SamplerState, TexId, TextureDesc, TextureTarget};
use crate::image::ImageFormat;
use crate::rid::Rid;
use crate::util::hash::hash_pair;
use crate::util::rect::Rect2i;

/// Override framebuffers kept per render target.
const FBO_CACHE_LIMIT: usize = 16;

const LABEL_COLOR: &str = "Render target color texture";
const LABEL_DEPTH: &str = "Render target depth texture";

const COLOR_BYTES_PER_PIXEL: u64 = 4;
const DEPTH_BYTES_PER_PIXEL: u64 = 3;

const ATTACHMENT_SAMPLER: SamplerState = SamplerState {
    filter: Filter::Nearest,
    repeat: false,
    base_level: 0,
};

/// Multisampling requested for a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Msaa {
    /// Single sample.
    #[default]
    Disabled,
    /// Two samples.
    X2,
    /// Four samples.
    X4,
    /// Eight samples.
    X8,
}

/// How far the distance field extends past the render target's edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SdfOversize {
    /// Same size as the target.
    #[default]
    Percent100,
    /// 10% margin on each side.
    Percent120,
    /// 25% margin on each side.
    Percent150,
    /// 50% margin on each side.
    Percent200,
}

impl SdfOversize {
    /// Field size as a percentage of the target size.
    #[must_use]
    pub const fn percent(self) -> i32 {
        match self {
            Self::Percent100 => 100,
            Self::Percent120 => 120,
            Self::Percent150 => 150,
            Self::Percent200 => 200,
        }
    }
}

/// Resolution of the jump-flood passes relative to the distance field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SdfScale {
    /// Full resolution.
    #[default]
    Percent100,
    /// Half resolution.
    Percent50,
    /// Quarter resolution.
    Percent25,
}

impl SdfScale {
    /// Pass resolution as a percentage.
    #[must_use]
    pub const fn percent(self) -> i32 {
        match self {
            Self::Percent100 => 100,
            Self::Percent50 => 50,
            Self::Percent25 => 25,
        }
    }

    /// Log2 of the reduction.
    #[must_use]
    pub const fn shift(self) -> i32 {
        match self {
            Self::Percent100 => 0,
            Self::Percent50 => 1,
            Self::Percent25 => 2,
        }
    }
}

/// Framebuffer built for one override pair.
#[derive(Debug, Clone)]
struct FboCacheEntry {
    fbo: FboId,
    color: Option<TexId>,
    depth: Option<TexId>,
    size: IVec2,
    /// Attachments this entry created because the pair left them unset.
    allocated: Vec<TexId>,
}

/// Externally supplied attachments.
#[derive(Debug, Default)]
struct Overrides {
    color: Option<TextureRid>,
    depth: Option<TextureRid>,
    velocity: Option<TextureRid>,
    is_overridden: bool,
    fbo_cache: FxHashMap<u32, FboCacheEntry>,
    cache_order: VecDeque<u32>,
}

/// One render target.
#[derive(Debug)]
pub struct RenderTarget {
    pub(super) position: IVec2,
    pub(super) size: IVec2,
    pub(super) view_count: u32,
    pub(super) fbo: Option<FboId>,
    pub(super) color: Option<TexId>,
    pub(super) depth: Option<TexId>,
    pub(super) texture: TextureRid,
    pub(super) color_format: GpuFormat,
    pub(super) image_format: ImageFormat,
    pub(super) is_transparent: bool,
    pub(super) hdr: bool,
    pub(super) msaa: Msaa,
    pub(super) direct_to_screen: bool,
    pub(super) used_in_frame: bool,
    pub(super) reattach_textures: bool,
    pub(super) clear_requested: bool,
    pub(super) clear_color: Vec4,
    pub(super) backbuffer: Option<Backbuffer>,
    pub(super) backbuffer_failed: bool,
    pub(super) sdf: Option<SdfTextures>,
    pub(super) sdf_oversize: SdfOversize,
    pub(super) sdf_scale: SdfScale,
    pub(super) sdf_enabled: bool,
    overrides: Overrides,
}

impl RenderTarget {
    fn new(texture: TextureRid) -> Self {
        Self {
            position: IVec2::ZERO,
            size: IVec2::ZERO,
            view_count: 1,
            fbo: None,
            color: None,
            depth: None,
            texture,
            color_format: GpuFormat::RGBA8,
            image_format: ImageFormat::Rgba8,
            is_transparent: false,
            hdr: false,
            msaa: Msaa::Disabled,
            direct_to_screen: false,
            used_in_frame: false,
            reattach_textures: false,
            clear_requested: false,
            clear_color: Vec4::ZERO,
            backbuffer: None,
            backbuffer_failed: false,
            sdf: None,
            sdf_oversize: SdfOversize::Percent100,
            sdf_scale: SdfScale::Percent100,
            sdf_enabled: false,
            overrides: Overrides::default(),
        }
    }

    /// Size in pixels; zero while unallocated.
    #[must_use]
    pub const fn size(&self) -> IVec2 {
        self.size
    }

    /// Views rendered per frame.
    #[must_use]
    pub const fn view_count(&self) -> u32 {
        self.view_count
    }

    /// Mip levels of the blur backbuffer, if one exists.
    #[must_use]
    pub fn backbuffer_mipmaps(&self) -> Option<u32> {
        self.backbuffer.as_ref().map(|b| b.mipmap_count)
    }

    /// Whether the distance field textures are allocated.
    #[must_use]
    pub const fn has_sdf(&self) -> bool {
        self.sdf.is_some()
    }

    /// Whether attachments come from override textures.
    #[must_use]
    pub const fn is_overridden(&self) -> bool {
        self.overrides.is_overridden
    }

    /// Override framebuffers currently cached.
    #[must_use]
    pub fn cached_framebuffers(&self) -> usize {
        self.overrides.fbo_cache.len()
    }
}

impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    // ── Lifecycle ──

    /// Create an unallocated render target and the texture record that
    /// will expose its colour attachment.
    pub fn render_target_create(&mut self) -> Result<RenderTargetRid, StorageError> {
        let rid = self.render_targets.allocate();
        let texture = self.textures.insert(Texture {
            is_render_target: true,
            render_target: Some(rid),
            ..Texture::default()
        });
        self.render_targets.initialize(rid, RenderTarget::new(texture))?;
        Ok(rid)
    }

    /// Free a render target, its attachments and its texture record.
    pub fn render_target_free(&mut self, rid: RenderTargetRid) -> Result<(), StorageError> {
        self.clear_render_target(rid)?;
        let Some(rt) = self.render_targets.free(rid) else {
            return Err(StorageError::InvalidHandle(self.render_targets.label()));
        };
        if let Some(texture) = self.textures.get_mut(rt.texture) {
            texture.is_render_target = false;
            texture.render_target = None;
        }
        self.release_texture(rt.texture);
        Ok(())
    }

    /// The render target record behind `rid`.
    pub fn render_target(&self, rid: RenderTargetRid) -> Result<&RenderTarget, StorageError> {
        self.render_targets.try_get(rid)
    }

    /// Resize. Ignored while an override colour texture dictates the size.
    pub fn render_target_set_size(
        &mut self,
        rid: RenderTargetRid,
        width: i32,
        height: i32,
        view_count: u32,
    ) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        if rt.size == IVec2::new(width, height) && rt.view_count == view_count {
            return Ok(());
        }
        if rt.overrides.color.is_some() {
            log::debug!("render target {rid:?} is sized by its override texture");
            return Ok(());
        }
        self.clear_render_target(rid)?;
        let rt = self.render_targets.try_get_mut(rid)?;
        rt.size = IVec2::new(width, height);
        rt.view_count = view_count;
        self.update_render_target(rid)
    }

    /// Size in pixels.
    pub fn render_target_size(&self, rid: RenderTargetRid) -> Result<IVec2, StorageError> {
        Ok(self.render_targets.try_get(rid)?.size)
    }

    /// Set the on-screen position.
    pub fn render_target_set_position(&mut self, rid: RenderTargetRid, x: i32, y: i32) -> Result<(), StorageError> {
        self.render_targets.try_get_mut(rid)?.position = IVec2::new(x, y);
        Ok(())
    }

    /// On-screen position.
    pub fn render_target_position(&self, rid: RenderTargetRid) -> Result<IVec2, StorageError> {
        Ok(self.render_targets.try_get(rid)?.position)
    }

    /// Texture sampling this target's colour: the override colour texture
    /// when set, the target's own texture otherwise.
    pub fn render_target_texture(&self, rid: RenderTargetRid) -> Result<TextureRid, StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        Ok(rt.overrides.color.unwrap_or(rt.texture))
    }

    // ── Overrides ──

    /// Draw into caller-supplied textures instead of owned attachments.
    ///
    /// Passing `None` for both colour and depth returns to owned
    /// attachments. Framebuffers are cached per (colour, depth) pair, so
    /// switching back to a pair seen before allocates nothing.
    pub fn render_target_set_override(
        &mut self,
        rid: RenderTargetRid,
        color: Option<TextureRid>,
        depth: Option<TextureRid>,
        velocity: Option<TextureRid>,
    ) -> Result<(), StorageError> {
        for texture in [color, depth, velocity].into_iter().flatten() {
            let _ = self.textures.try_get(texture)?;
        }
        let rt = self.render_targets.try_get_mut(rid)?;
        if rt.direct_to_screen {
            return Err(StorageError::InvalidArgument(
                "direct-to-screen render targets cannot be overridden".to_owned(),
            ));
        }
        if rt.overrides.color == color && rt.overrides.depth == depth {
            rt.overrides.velocity = velocity;
            return Ok(());
        }
        let was_overridden = rt.overrides.is_overridden;

        if color.is_none() && depth.is_none() {
            self.clear_render_target(rid)?;
            self.update_render_target(rid)?;
            self.render_targets.try_get_mut(rid)?.overrides.velocity = velocity;
            return Ok(());
        }

        if !was_overridden {
            self.clear_render_target(rid)?;
        }
        let rt = self.render_targets.try_get_mut(rid)?;
        let previous = rt.overrides.color;
        rt.overrides.color = color;
        rt.overrides.depth = depth;
        rt.overrides.velocity = velocity;
        rt.overrides.is_overridden = true;
        if let Some(previous) = previous.filter(|p| Some(*p) != color) {
            self.unmark_override(previous, rid);
        }

        let key = hash_pair(color.map_or(0, Rid::to_bits), depth.map_or(0, Rid::to_bits));
        let rt = self.render_targets.try_get_mut(rid)?;
        if let Some(entry) = rt.overrides.fbo_cache.get(&key) {
            rt.fbo = Some(entry.fbo);
            rt.color = entry.color;
            rt.depth = entry.depth;
            rt.size = entry.size;
            return self.sync_color_texture(rid);
        }

        self.update_render_target(rid)?;
        let rt = self.render_targets.try_get_mut(rid)?;
        let Some(fbo) = rt.fbo else {
            return Ok(());
        };
        let mut allocated = Vec::new();
        if color.is_none() {
            allocated.extend(rt.color);
        }
        if depth.is_none() {
            allocated.extend(rt.depth);
        }
        let entry = FboCacheEntry {
            fbo,
            color: rt.color,
            depth: rt.depth,
            size: rt.size,
            allocated,
        };
        let _ = rt.overrides.fbo_cache.insert(key, entry);
        rt.overrides.cache_order.push_back(key);
        let evicted = if rt.overrides.cache_order.len() > FBO_CACHE_LIMIT {
            rt.overrides
                .cache_order
                .pop_front()
                .and_then(|oldest| rt.overrides.fbo_cache.remove(&oldest))
        } else {
            None
        };
        if let Some(entry) = evicted {
            log::debug!("render target {rid:?} evicting cached framebuffer {:?}", entry.fbo);
            self.release_cache_entry(entry);
        }
        Ok(())
    }

    /// Override colour texture.
    pub fn render_target_override_color(&self, rid: RenderTargetRid) -> Result<Option<TextureRid>, StorageError> {
        Ok(self.render_targets.try_get(rid)?.overrides.color)
    }

    /// Override depth texture.
    pub fn render_target_override_depth(&self, rid: RenderTargetRid) -> Result<Option<TextureRid>, StorageError> {
        Ok(self.render_targets.try_get(rid)?.overrides.depth)
    }

    /// Override velocity texture. Recorded only; nothing renders velocity.
    pub fn render_target_override_velocity(
        &self,
        rid: RenderTargetRid,
    ) -> Result<Option<TextureRid>, StorageError> {
        Ok(self.render_targets.try_get(rid)?.overrides.velocity)
    }

    // ── Flags ──

    /// Keep alpha in the colour attachment.
    pub fn render_target_set_transparent(&mut self, rid: RenderTargetRid, transparent: bool) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get_mut(rid)?;
        if rt.is_transparent == transparent {
            return Ok(());
        }
        rt.is_transparent = transparent;
        if rt.overrides.color.is_none() {
            self.clear_render_target(rid)?;
            self.update_render_target(rid)?;
        }
        Ok(())
    }

    /// Whether the colour attachment keeps alpha.
    pub fn render_target_is_transparent(&self, rid: RenderTargetRid) -> Result<bool, StorageError> {
        Ok(self.render_targets.try_get(rid)?.is_transparent)
    }

    /// Draw straight to the system framebuffer, dropping every attachment
    /// and override.
    pub fn render_target_set_direct_to_screen(&mut self, rid: RenderTargetRid, direct: bool) -> Result<(), StorageError> {
        if self.render_targets.try_get(rid)?.direct_to_screen == direct {
            return Ok(());
        }
        // Clear with the old mode, allocate with the new one.
        self.clear_render_target(rid)?;
        let rt = self.render_targets.try_get_mut(rid)?;
        rt.direct_to_screen = direct;
        if direct {
            rt.overrides.color = None;
            rt.overrides.depth = None;
            rt.overrides.velocity = None;
        }
        self.update_render_target(rid)
    }

    /// Whether the target draws to the system framebuffer.
    pub fn render_target_is_direct_to_screen(&self, rid: RenderTargetRid) -> Result<bool, StorageError> {
        Ok(self.render_targets.try_get(rid)?.direct_to_screen)
    }

    /// Record the MSAA mode. 2D rendering ignores it.
    pub fn render_target_set_msaa(&mut self, rid: RenderTargetRid, msaa: Msaa) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        if rt.direct_to_screen {
            return Err(StorageError::InvalidArgument(
                "MSAA cannot be set on a direct-to-screen render target".to_owned(),
            ));
        }
        if rt.msaa == msaa {
            return Ok(());
        }
        log::warn!("2D MSAA is not yet supported, render target {rid:?} renders single-sampled");
        self.clear_render_target(rid)?;
        self.render_targets.try_get_mut(rid)?.msaa = msaa;
        self.update_render_target(rid)
    }

    /// Recorded MSAA mode.
    pub fn render_target_msaa(&self, rid: RenderTargetRid) -> Result<Msaa, StorageError> {
        Ok(self.render_targets.try_get(rid)?.msaa)
    }

    /// Request HDR 2D rendering. Storage stays RGBA8.
    pub fn render_target_set_use_hdr(&mut self, rid: RenderTargetRid, hdr: bool) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        if rt.direct_to_screen {
            return Err(StorageError::InvalidArgument(
                "HDR cannot be set on a direct-to-screen render target".to_owned(),
            ));
        }
        if rt.hdr == hdr {
            return Ok(());
        }
        self.clear_render_target(rid)?;
        self.render_targets.try_get_mut(rid)?.hdr = hdr;
        self.update_render_target(rid)
    }

    /// Whether HDR 2D was requested.
    pub fn render_target_is_using_hdr(&self, rid: RenderTargetRid) -> Result<bool, StorageError> {
        Ok(self.render_targets.try_get(rid)?.hdr)
    }

    /// Whether the target was drawn this frame.
    pub fn render_target_was_used(&self, rid: RenderTargetRid) -> Result<bool, StorageError> {
        Ok(self.render_targets.try_get(rid)?.used_in_frame)
    }

    /// Mark the target as drawn this frame.
    pub fn render_target_mark_used(&mut self, rid: RenderTargetRid) -> Result<(), StorageError> {
        self.render_targets.try_get_mut(rid)?.used_in_frame = true;
        Ok(())
    }

    /// Reset the drawn-this-frame flag.
    pub fn render_target_clear_used(&mut self, rid: RenderTargetRid) -> Result<(), StorageError> {
        self.render_targets.try_get_mut(rid)?.used_in_frame = false;
        Ok(())
    }

    /// Ask the target to re-attach its textures before its next pass.
    pub fn render_target_set_reattach_textures(&mut self, rid: RenderTargetRid, reattach: bool) -> Result<(), StorageError> {
        self.render_targets.try_get_mut(rid)?.reattach_textures = reattach;
        Ok(())
    }

    /// Whether a re-attach was requested.
    pub fn render_target_is_reattach_textures(&self, rid: RenderTargetRid) -> Result<bool, StorageError> {
        Ok(self.render_targets.try_get(rid)?.reattach_textures)
    }

    // ── Clear requests ──

    /// Clear to `color` at the next [`render_target_do_clear_request`](Self::render_target_do_clear_request).
    pub fn render_target_request_clear(&mut self, rid: RenderTargetRid, color: Vec4) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get_mut(rid)?;
        rt.clear_requested = true;
        rt.clear_color = color;
        Ok(())
    }

    /// Whether a clear is pending.
    pub fn render_target_is_clear_requested(&self, rid: RenderTargetRid) -> Result<bool, StorageError> {
        Ok(self.render_targets.try_get(rid)?.clear_requested)
    }

    /// Colour of the pending clear.
    pub fn render_target_clear_request_color(&self, rid: RenderTargetRid) -> Result<Vec4, StorageError> {
        Ok(self.render_targets.try_get(rid)?.clear_color)
    }

    /// Drop a pending clear.
    pub fn render_target_disable_clear_request(&mut self, rid: RenderTargetRid) -> Result<(), StorageError> {
        self.render_targets.try_get_mut(rid)?.clear_requested = false;
        Ok(())
    }

    /// Perform a pending clear on the target's framebuffer.
    pub fn render_target_do_clear_request(&mut self, rid: RenderTargetRid) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get_mut(rid)?;
        if !rt.clear_requested {
            return Ok(());
        }
        rt.clear_requested = false;
        let (fbo, color) = (rt.fbo, rt.clear_color);
        self.device.bind_framebuffer(fbo);
        self.device.clear(color);
        self.device.bind_framebuffer(None);
        Ok(())
    }

    // ── Device handles ──

    /// Framebuffer; `None` for the system framebuffer or while unallocated.
    pub fn render_target_fbo(&self, rid: RenderTargetRid) -> Result<Option<FboId>, StorageError> {
        Ok(self.render_targets.try_get(rid)?.fbo)
    }

    /// Colour attachment, resolving the override texture.
    pub fn render_target_color(&self, rid: RenderTargetRid) -> Result<Option<TexId>, StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        match rt.overrides.color {
            Some(color) => Ok(self.resolved(color)?.tex_id),
            None => Ok(rt.color),
        }
    }

    /// Depth attachment, resolving the override texture.
    pub fn render_target_depth(&self, rid: RenderTargetRid) -> Result<Option<TexId>, StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        match rt.overrides.depth {
            Some(depth) => Ok(self.resolved(depth)?.tex_id),
            None => Ok(rt.depth),
        }
    }

    /// Device format of the colour attachment.
    pub fn render_target_color_format(&self, rid: RenderTargetRid) -> Result<GpuFormat, StorageError> {
        Ok(self.render_targets.try_get(rid)?.color_format)
    }

    // ── Allocation ──

    /// Allocate attachments for the current size and overrides.
    fn update_render_target(&mut self, rid: RenderTargetRid) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get_mut(rid)?;
        if rt.direct_to_screen {
            rt.fbo = None;
            return Ok(());
        }
        // HDR 2D has no float storage path yet.
        rt.color_format = GpuFormat::RGBA8;
        rt.image_format = ImageFormat::Rgba8;
        let (mut size, views) = (rt.size, rt.view_count.max(1));
        let (override_color, override_depth) = (rt.overrides.color, rt.overrides.depth);

        let color_storage = override_color
            .map(|color| {
                self.resolved(color)
                    .map(|t| (t.tex_id, IVec2::new(t.width as i32, t.height as i32)))
            })
            .transpose()?;
        let depth_storage = override_depth
            .map(|depth| self.resolved(depth).map(|t| t.tex_id))
            .transpose()?;
        if let Some((_, color_size)) = color_storage {
            size = color_size;
        }
        if size.x <= 0 || size.y <= 0 {
            return Ok(());
        }
        let pixels = (size.x as u64) * (size.y as u64) * u64::from(views);

        let fbo = self.device.create_framebuffer();
        let color = match color_storage {
            Some((id, _)) => id,
            None => Some(self.create_attachment(GpuFormat::RGBA8, size, pixels * COLOR_BYTES_PER_PIXEL, LABEL_COLOR)),
        };
        self.device.attach_color(fbo, color, 0);
        let depth = match depth_storage {
            Some(id) => id,
            None => Some(self.create_attachment(GpuFormat::DEPTH, size, pixels * DEPTH_BYTES_PER_PIXEL, LABEL_DEPTH)),
        };
        self.device.attach_depth(fbo, depth);

        let status = self.device.framebuffer_status(fbo);
        if !status.is_complete() {
            self.device.delete_framebuffer(fbo);
            let owned_color = color.filter(|_| override_color.is_none());
            let owned_depth = depth.filter(|_| override_depth.is_none());
            for id in [owned_color, owned_depth].into_iter().flatten() {
                self.delete_gpu_texture(id);
            }
            let rt = self.render_targets.try_get_mut(rid)?;
            rt.fbo = None;
            rt.size = IVec2::ZERO;
            rt.color = None;
            rt.depth = None;
            if override_color.is_none() {
                if let Some(texture) = self.textures.get_mut(rt.texture) {
                    detach(texture);
                }
            }
            log::warn!("Could not create render target, status: {status}");
            return Ok(());
        }

        let rt = self.render_targets.try_get_mut(rid)?;
        rt.fbo = Some(fbo);
        rt.color = color;
        rt.depth = depth;
        rt.size = size;
        self.sync_color_texture(rid)?;

        self.device.bind_framebuffer(Some(fbo));
        self.device.viewport(Rect2i::from_size(size));
        self.device.scissor(None);
        self.device.clear(Vec4::ZERO);
        self.device.bind_framebuffer(None);
        log::debug!("render target {rid:?} allocated at {}x{}", size.x, size.y);
        Ok(())
    }

    fn create_attachment(&mut self, format: GpuFormat, size: IVec2, bytes: u64, label: &'static str) -> TexId {
        let desc = TextureDesc::texture_2d(format, size.x as u32, size.y as u32, label);
        let id = self.create_gpu_texture(&desc, bytes);
        self.device.set_sampler(id, ATTACHMENT_SAMPLER);
        id
    }

    /// Point the texture record sampling this target at its current
    /// colour attachment.
    fn sync_color_texture(&mut self, rid: RenderTargetRid) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        let (size, views, color) = (rt.size, rt.view_count.max(1), rt.color);
        let image_format = rt.image_format;
        let gpu_format = rt.color_format;
        let owned = rt.overrides.color.is_none();
        let Some(texture) = self.textures.get_mut(rt.overrides.color.unwrap_or(rt.texture)) else {
            return Err(StorageError::InvalidHandle(self.textures.label()));
        };
        texture.is_render_target = true;
        texture.render_target = Some(rid);
        if !owned {
            return Ok(());
        }
        let (width, height) = (size.x.max(0) as u32, size.y.max(0) as u32);
        texture.format = image_format;
        texture.real_format = image_format;
        texture.gpu_format = gpu_format;
        texture.target = TextureTarget::Texture2D;
        texture.kind = TextureKind::Plain2D;
        texture.compressed = false;
        texture.layers = 1;
        texture.depth = 0;
        texture.mipmaps = 1;
        texture.width = width;
        texture.height = height;
        texture.alloc_width = width;
        texture.alloc_height = height;
        texture.total_data_size =
            u64::from(width) * u64::from(height) * u64::from(views) * COLOR_BYTES_PER_PIXEL;
        texture.tex_id = color;
        texture.sampler = ATTACHMENT_SAMPLER;
        texture.image_cache = None;
        texture.active = color.is_some();
        Ok(())
    }

    /// Release every attachment, cached framebuffer, backbuffer and SDF
    /// texture, leaving the target unallocated with no overrides.
    fn clear_render_target(&mut self, rid: RenderTargetRid) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get_mut(rid)?;
        let sdf = rt.sdf.take();
        if rt.direct_to_screen {
            if let Some(sdf) = sdf {
                self.release_sdf(sdf);
            }
            return Ok(());
        }

        let cache: Vec<FboCacheEntry> = rt.overrides.fbo_cache.drain().map(|(_, entry)| entry).collect();
        rt.overrides.cache_order.clear();
        let owned = !rt.overrides.is_overridden;
        let fbo = rt.fbo.take();
        let color = rt.color.take();
        let depth = rt.depth.take();
        let override_color = rt.overrides.color.take();
        rt.overrides.depth = None;
        rt.overrides.velocity = None;
        rt.overrides.is_overridden = false;
        let backbuffer = rt.backbuffer.take();
        rt.backbuffer_failed = false;
        let texture = rt.texture;

        for entry in cache {
            if Some(entry.fbo) == fbo {
                for id in entry.allocated {
                    self.delete_gpu_texture(id);
                }
            } else {
                self.release_cache_entry(entry);
            }
        }
        if let Some(fbo) = fbo {
            self.device.delete_framebuffer(fbo);
        }
        // While overridden, owned attachments belong to cache entries.
        if owned {
            for id in [color, depth].into_iter().flatten() {
                self.delete_gpu_texture(id);
            }
        }
        if let Some(texture) = self.textures.get_mut(texture) {
            detach(texture);
        }
        if let Some(previous) = override_color {
            self.unmark_override(previous, rid);
        }
        if let Some(backbuffer) = backbuffer {
            self.release_backbuffer(backbuffer);
        }
        if let Some(sdf) = sdf {
            self.release_sdf(sdf);
        }
        Ok(())
    }

    fn release_cache_entry(&mut self, entry: FboCacheEntry) {
        for id in entry.allocated {
            self.delete_gpu_texture(id);
        }
        self.device.delete_framebuffer(entry.fbo);
    }

    /// Hand an override colour texture back to its owner.
    fn unmark_override(&mut self, texture: TextureRid, rid: RenderTargetRid) {
        if let Some(texture) = self.textures.get_mut(texture) {
            if texture.render_target == Some(rid) {
                texture.is_render_target = false;
                texture.render_target = None;
            }
        }
    }

    /// Free every render target. Used when the store is dropped.
    pub(super) fn release_render_targets(&mut self) {
        for rid in self.render_targets.rids() {
            if let Err(e) = self.render_target_free(rid) {
                log::error!("failed to free render target {rid:?}: {e}");
            }
        }
    }
}

/// Zero a render target texture record that lost its storage.
fn detach(texture: &mut Texture) {
    texture.width = 0;
    texture.height = 0;
    texture.alloc_width = 0;
    texture.alloc_height = 0;
    texture.total_data_size = 0;
    texture.tex_id = None;
    texture.image_cache = None;
    texture.sampler = SamplerState::default();
    texture.active = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tier;
    use crate::gpu::InternalFormat;
    use crate::image::Image;
    use crate::storage::test_support::{storage, HeadlessStorage};

    fn color_texture(storage: &mut HeadlessStorage, size: u32) -> TextureRid {
        let image = Image::filled(size, size, false, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        let rid = storage.allocate();
        storage.initialize_2d(rid, &image).unwrap();
        rid
    }

    #[test]
    fn zero_size_allocates_nothing_until_resized() {
        let mut storage = storage(Tier::Full);
        let allocations = storage.memory().allocation_count();
        let rt = storage.render_target_create().unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations);
        assert_eq!(storage.render_target_fbo(rt).unwrap(), None);
        let texture = storage.render_target_texture(rt).unwrap();
        assert!(!storage.texture(texture).unwrap().is_active());

        storage.render_target_set_size(rt, 64, 64, 1).unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations + 2);
        assert_eq!(storage.memory().count_labelled(LABEL_COLOR), 1);
        assert_eq!(storage.memory().count_labelled(LABEL_DEPTH), 1);

        let texture = storage.texture(texture).unwrap();
        assert!(texture.is_active());
        assert!(texture.is_render_target());
        assert_eq!((texture.width(), texture.height()), (64, 64));
        assert_eq!(texture.tex_id(), storage.render_target_color(rt).unwrap());
        assert_eq!(storage.device().bound_framebuffer(), None);
    }

    #[test]
    fn resizing_reallocates_and_same_size_is_a_no_op() {
        let mut storage = storage(Tier::Full);
        let rt = storage.render_target_create().unwrap();
        storage.render_target_set_size(rt, 32, 32, 1).unwrap();
        let allocations = storage.memory().allocation_count();
        let live = storage.memory().live_count();

        storage.render_target_set_size(rt, 32, 32, 1).unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations);

        storage.render_target_set_size(rt, 48, 16, 1).unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations + 2);
        assert_eq!(storage.memory().live_count(), live);
        assert_eq!(storage.render_target_size(rt).unwrap(), IVec2::new(48, 16));
    }

    #[test]
    fn incomplete_framebuffer_rolls_back() {
        let mut storage = storage(Tier::Full);
        let live = storage.memory().live_count();
        let framebuffers = storage.device().live_framebuffers();
        let rt = storage.render_target_create().unwrap();
        storage
            .device_mut()
            .reject_attachment_format(InternalFormat::Rgba8);

        storage.render_target_set_size(rt, 32, 32, 1).unwrap();
        assert_eq!(storage.render_target_fbo(rt).unwrap(), None);
        assert_eq!(storage.render_target_color(rt).unwrap(), None);
        assert_eq!(storage.render_target_depth(rt).unwrap(), None);
        assert_eq!(storage.render_target_size(rt).unwrap(), IVec2::ZERO);
        assert_eq!(storage.memory().live_count(), live);
        assert_eq!(storage.device().live_framebuffers(), framebuffers);
        let texture = storage.render_target_texture(rt).unwrap();
        assert!(!storage.texture(texture).unwrap().is_active());

        storage.device_mut().accept_all_attachment_formats();
        storage.render_target_set_size(rt, 32, 32, 1).unwrap();
        assert!(storage.render_target_fbo(rt).unwrap().is_some());
    }

    #[test]
    fn override_pairs_are_cached() {
        let mut storage = storage(Tier::Full);
        let a = color_texture(&mut storage, 16);
        let b = color_texture(&mut storage, 16);
        let rt = storage.render_target_create().unwrap();
        storage.render_target_set_size(rt, 16, 16, 1).unwrap();
        let own = storage.render_target_texture(rt).unwrap();

        let allocations = storage.memory().allocation_count();
        storage.render_target_set_override(rt, Some(a), None, None).unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations + 1);
        let fbo_a = storage.render_target_fbo(rt).unwrap();
        assert_eq!(storage.render_target_texture(rt).unwrap(), a);
        assert_eq!(
            storage.render_target_color(rt).unwrap(),
            storage.texture(a).unwrap().tex_id()
        );
        assert!(storage.texture(a).unwrap().is_render_target());

        storage.render_target_set_override(rt, Some(b), None, None).unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations + 2);
        assert!(!storage.texture(a).unwrap().is_render_target());
        assert!(storage.texture(b).unwrap().is_render_target());

        storage.render_target_set_override(rt, Some(a), None, None).unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations + 2);
        assert_eq!(storage.render_target_fbo(rt).unwrap(), fbo_a);
        assert_eq!(storage.render_target(rt).unwrap().cached_framebuffers(), 2);

        // Returning to owned attachments releases the cache.
        let live_framebuffers = storage.device().live_framebuffers();
        storage.render_target_set_override(rt, None, None, None).unwrap();
        assert_eq!(storage.render_target_texture(rt).unwrap(), own);
        assert!(storage.texture(own).unwrap().is_active());
        assert!(!storage.texture(a).unwrap().is_render_target());
        assert_eq!(storage.render_target(rt).unwrap().cached_framebuffers(), 0);
        assert_eq!(storage.device().live_framebuffers(), live_framebuffers - 1);
        assert_eq!(storage.memory().count_labelled(LABEL_DEPTH), 1);
        assert_eq!(storage.memory().count_labelled(LABEL_COLOR), 1);
    }

    #[test]
    fn override_cache_is_bounded() {
        let mut storage = storage(Tier::Full);
        let rt = storage.render_target_create().unwrap();
        let colors: Vec<TextureRid> = (0..=FBO_CACHE_LIMIT)
            .map(|_| color_texture(&mut storage, 8))
            .collect();
        for &color in &colors {
            storage.render_target_set_override(rt, Some(color), None, None).unwrap();
        }
        assert_eq!(storage.render_target(rt).unwrap().cached_framebuffers(), FBO_CACHE_LIMIT);
        assert_eq!(storage.memory().count_labelled(LABEL_DEPTH), FBO_CACHE_LIMIT);

        let allocations = storage.memory().allocation_count();
        storage.render_target_set_override(rt, Some(colors[0]), None, None).unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations + 1);
    }

    #[test]
    fn render_target_texture_cannot_be_freed_directly() {
        let mut storage = storage(Tier::Full);
        let live = storage.memory().live_count();
        let framebuffers = storage.device().live_framebuffers();
        let rt = storage.render_target_create().unwrap();
        storage.render_target_set_size(rt, 16, 16, 1).unwrap();
        let texture = storage.render_target_texture(rt).unwrap();
        assert!(matches!(storage.free(texture), Err(StorageError::WrongKind(_))));

        storage.render_target_free(rt).unwrap();
        assert!(storage.texture(texture).is_err());
        assert!(storage.render_target_free(rt).is_err());
        assert_eq!(storage.memory().live_count(), live);
        assert_eq!(storage.device().live_framebuffers(), framebuffers);
    }

    #[test]
    fn direct_to_screen_skips_allocation() {
        let mut storage = storage(Tier::Full);
        let rt = storage.render_target_create().unwrap();
        storage.render_target_set_direct_to_screen(rt, true).unwrap();
        let allocations = storage.memory().allocation_count();
        storage.render_target_set_size(rt, 64, 64, 1).unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations);
        assert_eq!(storage.render_target_fbo(rt).unwrap(), None);

        let texture = color_texture(&mut storage, 16);
        assert!(storage.render_target_set_override(rt, Some(texture), None, None).is_err());
        assert!(storage.render_target_set_msaa(rt, Msaa::X4).is_err());
        assert!(storage.render_target_set_use_hdr(rt, true).is_err());

        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        storage.render_target_request_clear(rt, red).unwrap();
        assert!(storage.render_target_is_clear_requested(rt).unwrap());
        storage.render_target_do_clear_request(rt).unwrap();
        assert!(!storage.render_target_is_clear_requested(rt).unwrap());
        assert!(storage.device().screen_texels().iter().all(|t| *t == red));

        storage.render_target_set_direct_to_screen(rt, false).unwrap();
        assert!(storage.render_target_fbo(rt).unwrap().is_some());
    }

    #[test]
    fn clear_request_fills_the_color_attachment() {
        let mut storage = storage(Tier::Full);
        let rt = storage.render_target_create().unwrap();
        storage.render_target_set_size(rt, 8, 8, 1).unwrap();
        let green = Vec4::new(0.0, 1.0, 0.0, 1.0);
        storage.render_target_request_clear(rt, green).unwrap();
        assert_eq!(storage.render_target_clear_request_color(rt).unwrap(), green);
        storage.render_target_do_clear_request(rt).unwrap();

        let color = storage.render_target_color(rt).unwrap().unwrap();
        let texels = storage.device().texels(color, 0, 0).unwrap();
        assert!(texels.iter().all(|t| *t == green));
        assert_eq!(storage.device().bound_framebuffer(), None);
    }

    #[test]
    fn flag_changes_reallocate() {
        let mut storage = storage(Tier::Full);
        let rt = storage.render_target_create().unwrap();
        storage.render_target_set_size(rt, 16, 16, 1).unwrap();
        let frees = storage.memory().free_count();

        storage.render_target_set_transparent(rt, true).unwrap();
        assert!(storage.render_target_is_transparent(rt).unwrap());
        assert_eq!(storage.memory().free_count(), frees + 2);

        storage.render_target_set_msaa(rt, Msaa::X2).unwrap();
        assert_eq!(storage.render_target_msaa(rt).unwrap(), Msaa::X2);
        storage.render_target_set_use_hdr(rt, true).unwrap();
        assert!(storage.render_target_is_using_hdr(rt).unwrap());
        assert_eq!(storage.render_target_color_format(rt).unwrap(), GpuFormat::RGBA8);
        assert_eq!(storage.memory().free_count(), frees + 6);

        storage.render_target_mark_used(rt).unwrap();
        assert!(storage.render_target_was_used(rt).unwrap());
        storage.render_target_clear_used(rt).unwrap();
        assert!(!storage.render_target_was_used(rt).unwrap());
    }
}
