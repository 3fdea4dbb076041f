//! Texture lifecycle: allocation, upload, proxies, replace and free.

use std::borrow::Cow;

use glam::{IVec2, UVec3, Vec4};

use super::texture::{LayeredKind, Texture, TextureKind};
use super::{TextureRid, TextureStorage};
use crate::accounting::MemoryTracker;
use crate::config::Tier;
use crate::error::StorageError;
use crate::format::{self, FormatPlan};
use crate::gpu::{
    Filter, GpuDevice, GpuFormat, SamplerState, TexId, TextureDesc, TextureTarget, Upload,
};
use crate::image::{Image, ImageFormat};

const MAX_SIZE_OVERRIDE: u32 = 16384;
const PLACEHOLDER_SIZE: u32 = 4;
const PLACEHOLDER_COLOR: Vec4 = Vec4::new(1.0, 0.0, 1.0, 1.0);

const LABEL_2D: &str = "Texture 2D";
const LABEL_LAYERED: &str = "Texture Layered";
const LABEL_3D: &str = "Texture 3D";
const LABEL_DEFAULT_DEPTH: &str = "Default depth texture";

/// Built-in textures created with the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultTexture {
    /// Opaque white, mipmapped.
    White,
    /// Opaque black.
    Black,
    /// Transparent black.
    Transparent,
    /// Flat tangent-space normal (0.5, 0.5, 1).
    Normal,
    /// Neutral anisotropy direction (1, 0.5, 1).
    Anisotropy,
    /// Cleared depth attachment.
    Depth,
    /// White cubemap.
    CubeMapWhite,
    /// Black cubemap.
    CubeMapBlack,
    /// Single-layer white array. Full tier only.
    ArrayWhite,
}

/// One row of [`TextureStorage::debug_usage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureUsage {
    /// Texture handle.
    pub texture: TextureRid,
    /// Resource path, empty if unset.
    pub path: String,
    /// Logical format.
    pub format: ImageFormat,
    /// Allocated width.
    pub width: u32,
    /// Allocated height.
    pub height: u32,
    /// Volume depth, zero for 2D textures.
    pub depth: u32,
    /// Bytes held by the device.
    pub bytes: u64,
}

/// A device texture created outside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalTexture {
    /// Shape of the foreign texture.
    pub kind: TextureKind,
    /// Sub-kind when layered.
    pub layered_kind: LayeredKind,
    /// Logical format of its texels.
    pub format: ImageFormat,
    /// Foreign device name.
    pub tex_id: TexId,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
    /// Layer count when layered.
    pub layers: u32,
}

/// Images prepared for one device texture.
struct Prepared<'a> {
    plan: FormatPlan,
    images: Vec<Cow<'a, Image>>,
    resize_to_po2: bool,
}

impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    // ── Allocation ──

    /// Reserve a texture handle with no resource attached.
    pub fn allocate(&mut self) -> TextureRid {
        self.textures.allocate()
    }

    /// Initialize a reserved handle as a plain 2D texture holding `image`.
    ///
    /// Every mip level of the image is uploaded after format negotiation.
    pub fn initialize_2d(&mut self, rid: TextureRid, image: &Image) -> Result<(), StorageError> {
        self.ensure_reserved(rid)?;
        let texture = self.create_texture(
            std::slice::from_ref(image),
            TextureKind::Plain2D,
            LayeredKind::default(),
        )?;
        self.commit(rid, texture)
    }

    /// Initialize a reserved handle as an array or cubemap.
    ///
    /// All layers must share size, format and mipmap presence. Cubemaps need
    /// exactly six layers and cubemap arrays a multiple of six. Arrays are
    /// rejected on the reduced tier.
    pub fn initialize_layered(
        &mut self,
        rid: TextureRid,
        images: &[Image],
        kind: LayeredKind,
    ) -> Result<(), StorageError> {
        self.ensure_reserved(rid)?;
        check_same_shape(images)?;
        match kind {
            LayeredKind::CubeMap if images.len() != 6 => {
                return Err(StorageError::InvalidArgument(format!(
                    "cubemap needs 6 layers, got {}",
                    images.len()
                )));
            }
            LayeredKind::CubeMapArray if images.len() % 6 != 0 => {
                return Err(StorageError::InvalidArgument(format!(
                    "cubemap array needs a multiple of 6 layers, got {}",
                    images.len()
                )));
            }
            _ => {}
        }
        if self.config.tier == Tier::Reduced && kind != LayeredKind::CubeMap {
            return Err(StorageError::Unsupported(format!(
                "{kind:?} textures are not supported by the reduced tier"
            )));
        }
        let texture = self.create_texture(images, TextureKind::Layered, kind)?;
        self.commit(rid, texture)
    }

    /// Initialize a reserved handle as a volume texture of `slices`, one
    /// image per depth slice of `size`.
    ///
    /// Volume textures keep only the base level of each slice. On the
    /// reduced tier the handle becomes an active texture with no device
    /// storage.
    pub fn initialize_3d(
        &mut self,
        rid: TextureRid,
        format: ImageFormat,
        size: UVec3,
        slices: &[Image],
    ) -> Result<(), StorageError> {
        self.ensure_reserved(rid)?;
        let UVec3 {
            x: width,
            y: height,
            z: depth,
        } = size;
        if self.config.tier == Tier::Reduced {
            log::warn!("3D textures are not supported by the reduced tier, texture left empty");
            let inert = Texture {
                width,
                height,
                depth,
                format,
                real_format: format,
                kind: TextureKind::ThreeD,
                target: TextureTarget::Texture3D,
                active: true,
                ..Texture::default()
            };
            return self.commit(rid, inert);
        }
        let slices = volume_slices(format, width, height, depth, slices)?;
        let mut texture = self.create_texture(&slices, TextureKind::ThreeD, LayeredKind::default())?;
        texture.depth = depth;
        texture.layers = 1;
        self.commit(rid, texture)
    }

    /// Reserve and initialize a proxy forwarding to `base`.
    pub fn create_proxy(&mut self, base: TextureRid) -> Result<TextureRid, StorageError> {
        let rid = self.textures.allocate();
        if let Err(e) = self.proxy_initialize(rid, base) {
            let _ = self.textures.free(rid);
            return Err(e);
        }
        Ok(rid)
    }

    /// Initialize a reserved handle as a proxy of `base`.
    pub fn proxy_initialize(&mut self, rid: TextureRid, base: TextureRid) -> Result<(), StorageError> {
        self.ensure_reserved(rid)?;
        let base_texture = self.textures.try_get(base)?;
        if base_texture.is_proxy {
            return Err(StorageError::WrongKind(
                "a proxy cannot forward to another proxy".to_owned(),
            ));
        }
        let proxy = Texture::proxy_of(base_texture, base);
        self.textures.initialize(rid, proxy)?;
        self.textures.try_get_mut(base)?.proxies.push(rid);
        Ok(())
    }

    /// Wrap a device texture owned by someone else. It is never deleted by
    /// the store.
    pub fn create_external(&mut self, external: ExternalTexture) -> Result<TextureRid, StorageError> {
        let target = match external.kind {
            TextureKind::Plain2D => TextureTarget::Texture2D,
            TextureKind::Layered if self.config.tier == Tier::Reduced => {
                log::error!("layered external textures are not supported by the reduced tier, binding as 2D");
                TextureTarget::Texture2D
            }
            TextureKind::Layered => match external.layered_kind {
                LayeredKind::CubeMap => TextureTarget::CubeMap,
                LayeredKind::Array | LayeredKind::CubeMapArray => TextureTarget::Texture2DArray,
            },
            TextureKind::ThreeD => {
                return Err(StorageError::Unsupported(
                    "external 3D textures are not supported".to_owned(),
                ));
            }
        };
        let plan = format::plan(&self.config, external.format, false)?;
        let texture = Texture {
            width: external.width,
            height: external.height,
            layers: external.layers.max(1),
            alloc_width: external.width,
            alloc_height: external.height,
            format: external.format,
            real_format: external.format,
            gpu_format: plan.gpu,
            target,
            compressed: plan.compressed,
            kind: external.kind,
            layered_kind: external.layered_kind,
            is_external: true,
            active: true,
            tex_id: Some(external.tex_id),
            ..Texture::default()
        };
        Ok(self.textures.insert(texture))
    }

    // ── Placeholders ──

    /// Initialize a reserved handle as a 4×4 magenta texture.
    pub fn initialize_2d_placeholder(&mut self, rid: TextureRid) -> Result<(), StorageError> {
        let image = placeholder_image()?;
        self.initialize_2d(rid, &image)
    }

    /// Initialize a reserved handle as magenta layers: six for cubemap
    /// kinds, one for arrays.
    pub fn initialize_layered_placeholder(
        &mut self,
        rid: TextureRid,
        kind: LayeredKind,
    ) -> Result<(), StorageError> {
        let layers = match kind {
            LayeredKind::CubeMap | LayeredKind::CubeMapArray => 6,
            LayeredKind::Array => 1,
        };
        let images = vec![placeholder_image()?; layers];
        self.initialize_layered(rid, &images, kind)
    }

    /// Initialize a reserved handle as a 4×4×4 magenta volume.
    pub fn initialize_3d_placeholder(&mut self, rid: TextureRid) -> Result<(), StorageError> {
        let slices = vec![placeholder_image()?; PLACEHOLDER_SIZE as usize];
        self.initialize_3d(
            rid,
            ImageFormat::Rgba8,
            UVec3::splat(PLACEHOLDER_SIZE),
            &slices,
        )
    }

    // ── Updates ──

    /// Re-upload `layer` of a texture in place.
    ///
    /// The image must match the texture's size, format and mipmap presence.
    /// Any cached readback is dropped.
    pub fn update_2d(&mut self, rid: TextureRid, image: &Image, layer: u32) -> Result<(), StorageError> {
        let texture = self.textures.try_get(rid)?;
        if texture.is_proxy || texture.is_render_target || texture.kind == TextureKind::ThreeD {
            return Err(StorageError::WrongKind(
                "only concrete 2D and layered textures can be updated".to_owned(),
            ));
        }
        let Some(id) = texture.tex_id else {
            return Err(StorageError::InvalidArgument("texture has no device storage".to_owned()));
        };
        if layer >= texture.layers {
            return Err(StorageError::InvalidArgument(format!(
                "layer {layer} out of range for {} layers",
                texture.layers
            )));
        }
        if image.width() != texture.width
            || image.height() != texture.height
            || image.format() != texture.format
            || image.has_mipmaps() != (texture.mipmaps > 1)
        {
            return Err(StorageError::InvalidArgument(format!(
                "update image {}x{} {:?} does not match texture {}x{} {:?}",
                image.width(),
                image.height(),
                image.format(),
                texture.width,
                texture.height,
                texture.format
            )));
        }
        let kind = texture.kind;
        let cube = matches!(texture.target, TextureTarget::CubeMap);

        let prepared = self.prepare(std::slice::from_ref(image), kind)?;
        let Some(upload) = prepared.images.first() else {
            return Ok(());
        };
        upload_levels(&mut self.device, id, layer, upload);
        let bytes = upload.data_size() as u64;

        let texture = self.textures.try_get_mut(rid)?;
        if kind == TextureKind::Plain2D {
            texture.total_data_size = bytes;
        }
        if cube {
            texture.stored_cube_sides |= 1 << (layer % 6);
        }
        texture.image_cache = None;
        let total = texture.total_data_size;
        self.memory.note_resized(id, total);
        Ok(())
    }

    /// Re-upload every slice of a volume texture. A no-op on the reduced
    /// tier.
    pub fn update_3d(&mut self, rid: TextureRid, slices: &[Image]) -> Result<(), StorageError> {
        let texture = self.textures.try_get(rid)?;
        if texture.kind != TextureKind::ThreeD {
            return Err(StorageError::WrongKind("texture is not a volume".to_owned()));
        }
        if self.config.tier == Tier::Reduced {
            log::warn!("3D textures are not supported by the reduced tier, update ignored");
            return Ok(());
        }
        let Some(id) = texture.tex_id else {
            return Err(StorageError::InvalidArgument("texture has no device storage".to_owned()));
        };
        let slices = volume_slices(texture.format, texture.width, texture.height, texture.depth, slices)?;
        let prepared = self.prepare(&slices, TextureKind::ThreeD)?;
        for (layer, slice) in prepared.images.iter().enumerate() {
            upload_levels(&mut self.device, id, layer as u32, slice);
        }
        let texture = self.textures.try_get_mut(rid)?;
        texture.image_cache = None;
        let total = texture.total_data_size;
        self.memory.note_resized(id, total);
        Ok(())
    }

    /// Detach `proxy` from its base and forward it to `base` instead.
    pub fn repoint_proxy(&mut self, proxy: TextureRid, base: TextureRid) -> Result<(), StorageError> {
        let current = self.textures.try_get(proxy)?;
        if !current.is_proxy {
            return Err(StorageError::WrongKind("texture is not a proxy".to_owned()));
        }
        let old_base = current.proxy_to;
        let canvas = current.canvas_texture;
        let path = current.path.clone();
        let base_texture = self.textures.try_get(base)?;
        if base_texture.is_proxy {
            return Err(StorageError::WrongKind(
                "a proxy cannot forward to another proxy".to_owned(),
            ));
        }
        let repointed = Texture {
            canvas_texture: canvas,
            path,
            ..Texture::proxy_of(base_texture, base)
        };

        if let Some(old) = old_base.and_then(|old| self.textures.get_mut(old)) {
            old.proxies.retain(|p| *p != proxy);
        }
        *self.textures.try_get_mut(proxy)? = repointed;
        self.textures.try_get_mut(base)?.proxies.push(proxy);
        Ok(())
    }

    /// Move the resource of `from` into `to` and free `from`.
    ///
    /// `to` keeps its handle and its proxies; proxies of `from` are
    /// redirected to `to`. A no-op when both handles are the same.
    pub fn replace(&mut self, to: TextureRid, from: TextureRid) -> Result<(), StorageError> {
        if to == from {
            return Ok(());
        }
        for rid in [to, from] {
            let texture = self.textures.try_get(rid)?;
            if texture.is_proxy || texture.is_render_target {
                return Err(StorageError::WrongKind(
                    "proxies and render target textures cannot be replaced".to_owned(),
                ));
            }
        }
        let Some(source) = self.textures.free(from) else {
            return Err(StorageError::InvalidHandle(self.textures.label()));
        };
        let target = self.textures.try_get_mut(to)?;
        let old = std::mem::replace(target, source);
        target.proxies = old.proxies.iter().chain(&target.proxies).copied().collect();
        let proxies = target.proxies.clone();
        let canvas = target.canvas_texture;
        let adopted = target.clone();

        if let Some(old_canvas) = old.canvas_texture {
            let _ = self.canvas_textures.free(old_canvas);
        }
        if !old.is_external {
            if let Some(id) = old.tex_id {
                self.delete_gpu_texture(id);
            }
        }
        if let Some(canvas) = canvas.and_then(|c| self.canvas_textures.get_mut(c)) {
            canvas.set_diffuse(to);
        }
        for proxy in proxies {
            if let Some(record) = self.textures.get_mut(proxy) {
                *record = Texture {
                    canvas_texture: record.canvas_texture,
                    path: std::mem::take(&mut record.path),
                    ..Texture::proxy_of(&adopted, to)
                };
            }
        }
        self.atlas_mark_dirty_on(to);
        Ok(())
    }

    /// Set the logical size reported for a texture without touching its
    /// device storage. A proxy forwards the override to its base.
    pub fn set_size_override(&mut self, rid: TextureRid, width: u32, height: u32) -> Result<(), StorageError> {
        let range = 1..=MAX_SIZE_OVERRIDE;
        if !range.contains(&width) || !range.contains(&height) {
            return Err(StorageError::InvalidArgument(format!(
                "size override {width}x{height} outside 1..={MAX_SIZE_OVERRIDE}"
            )));
        }
        let base = self.resolve_rid(rid)?;
        let texture = self.textures.try_get_mut(base)?;
        if texture.is_render_target {
            return Err(StorageError::WrongKind(
                "render target textures are sized by their render target".to_owned(),
            ));
        }
        texture.width = width;
        texture.height = height;
        Ok(())
    }

    /// Set the resource path.
    pub fn set_path(&mut self, rid: TextureRid, path: impl Into<String>) -> Result<(), StorageError> {
        self.textures.try_get_mut(rid)?.path = path.into();
        Ok(())
    }

    /// Set min/mag filtering of the texture `rid` resolves to.
    pub fn set_filter(&mut self, rid: TextureRid, filter: Filter) -> Result<(), StorageError> {
        let base = self.resolve_rid(rid)?;
        let texture = self.textures.try_get_mut(base)?;
        texture.set_filter(&mut self.device, filter);
        Ok(())
    }

    /// Set repeat or clamp wrapping of the texture `rid` resolves to.
    pub fn set_repeat(&mut self, rid: TextureRid, repeat: bool) -> Result<(), StorageError> {
        let base = self.resolve_rid(rid)?;
        let texture = self.textures.try_get_mut(base)?;
        texture.set_repeat(&mut self.device, repeat);
        Ok(())
    }

    // ── Destruction ──

    /// Free a texture.
    ///
    /// Render target textures are freed with their render target. A proxy
    /// leaves its base's proxy list; a base leaves its proxies pointing at
    /// nothing.
    pub fn free(&mut self, rid: TextureRid) -> Result<(), StorageError> {
        let texture = self.textures.try_get(rid)?;
        if texture.is_render_target {
            return Err(StorageError::WrongKind(
                "render target textures are freed with their render target".to_owned(),
            ));
        }
        self.release_texture(rid);
        Ok(())
    }

    /// Drop a texture record and whatever it owns, without checks.
    pub(super) fn release_texture(&mut self, rid: TextureRid) {
        let Some(texture) = self.textures.free(rid) else {
            return;
        };
        if let Some(canvas) = texture.canvas_texture {
            let _ = self.canvas_textures.free(canvas);
        }
        match texture.proxy_to {
            Some(base) => {
                if let Some(base) = self.textures.get_mut(base) {
                    base.proxies.retain(|p| *p != rid);
                }
            }
            None if !texture.is_external => {
                if let Some(id) = texture.tex_id {
                    self.delete_gpu_texture(id);
                }
            }
            None => {}
        }
        for proxy in texture.proxies {
            if let Some(proxy) = self.textures.get_mut(proxy) {
                proxy.proxy_to = None;
                proxy.tex_id = None;
            }
        }
        self.atlas_forget(rid);
    }

    // ── Queries ──

    /// The texture record stored under `rid`, without resolving proxies.
    ///
    /// A proxy's record carries a copy of its base's metadata taken when it
    /// was last pointed at the base. Use [`Self::resolved`] for what reads
    /// see.
    pub fn texture(&self, rid: TextureRid) -> Result<&Texture, StorageError> {
        self.textures.try_get(rid)
    }

    /// The record reads resolve to: the base of a proxy, `rid` otherwise.
    pub fn resolved(&self, rid: TextureRid) -> Result<&Texture, StorageError> {
        let texture = self.textures.try_get(rid)?;
        match texture.proxy_to {
            Some(base) => self.textures.try_get(base),
            None => Ok(texture),
        }
    }

    pub(super) fn resolve_rid(&self, rid: TextureRid) -> Result<TextureRid, StorageError> {
        Ok(self.textures.try_get(rid)?.proxy_to.unwrap_or(rid))
    }

    /// Logical width.
    pub fn width(&self, rid: TextureRid) -> Result<u32, StorageError> {
        Ok(self.resolved(rid)?.width)
    }

    /// Logical height.
    pub fn height(&self, rid: TextureRid) -> Result<u32, StorageError> {
        Ok(self.resolved(rid)?.height)
    }

    /// Volume depth, zero for 2D textures.
    pub fn depth(&self, rid: TextureRid) -> Result<u32, StorageError> {
        Ok(self.resolved(rid)?.depth)
    }

    /// Logical format.
    pub fn format(&self, rid: TextureRid) -> Result<ImageFormat, StorageError> {
        Ok(self.resolved(rid)?.format)
    }

    /// Device texture reads go to, `None` while unallocated.
    pub fn gpu_handle(&self, rid: TextureRid) -> Result<Option<TexId>, StorageError> {
        Ok(self.resolved(rid)?.tex_id)
    }

    /// Size of the texture a proxy forwards to, or of `rid` itself.
    pub fn size_with_proxy(&self, rid: TextureRid) -> Result<IVec2, StorageError> {
        let texture = self.resolved(rid)?;
        Ok(IVec2::new(texture.width as i32, texture.height as i32))
    }

    /// Resource path, empty if unset.
    pub fn path(&self, rid: TextureRid) -> Result<&str, StorageError> {
        Ok(&self.textures.try_get(rid)?.path)
    }

    /// Built-in texture, `None` when the tier cannot create it.
    #[must_use]
    pub fn default_texture(&self, which: DefaultTexture) -> Option<TextureRid> {
        self.defaults.get(&which).copied()
    }

    /// Device memory held by every concrete texture.
    #[must_use]
    pub fn debug_usage(&self) -> Vec<TextureUsage> {
        self.textures
            .rids()
            .into_iter()
            .filter_map(|rid| {
                let texture = self.textures.get(rid)?;
                (!texture.is_proxy).then(|| TextureUsage {
                    texture: rid,
                    path: texture.path.clone(),
                    format: texture.format,
                    width: texture.alloc_width,
                    height: texture.alloc_height,
                    depth: texture.depth,
                    bytes: texture.total_data_size,
                })
            })
            .collect()
    }

    /// Bind the device texture `rid` resolves to on a sampling unit.
    pub fn bind(&mut self, rid: TextureRid, unit: u32) -> Result<(), StorageError> {
        if unit >= self.config.max_texture_image_units {
            return Err(StorageError::InvalidArgument(format!(
                "texture unit {unit} exceeds {} units",
                self.config.max_texture_image_units
            )));
        }
        let id = self.resolved(rid)?.tex_id;
        self.device.bind_texture(unit, id);
        Ok(())
    }

    // ── Defaults ──

    pub(super) fn create_default_textures(&mut self) -> Result<(), StorageError> {
        let flat = [
            (DefaultTexture::White, Vec4::ONE),
            (DefaultTexture::Black, Vec4::new(0.0, 0.0, 0.0, 1.0)),
            (DefaultTexture::Transparent, Vec4::ZERO),
            (DefaultTexture::Normal, Vec4::new(0.5, 0.5, 1.0, 1.0)),
            (DefaultTexture::Anisotropy, Vec4::new(1.0, 0.5, 1.0, 1.0)),
        ];
        for (which, color) in flat {
            let image = Image::filled(4, 4, true, ImageFormat::Rgba8, color)?;
            let rid = self.textures.allocate();
            self.initialize_2d(rid, &image)?;
            let _ = self.defaults.insert(which, rid);
        }

        let cubes = [
            (DefaultTexture::CubeMapWhite, Vec4::ONE),
            (DefaultTexture::CubeMapBlack, Vec4::new(0.0, 0.0, 0.0, 1.0)),
        ];
        for (which, color) in cubes {
            let faces = vec![Image::filled(4, 4, false, ImageFormat::Rgba8, color)?; 6];
            let rid = self.textures.allocate();
            self.initialize_layered(rid, &faces, LayeredKind::CubeMap)?;
            let _ = self.defaults.insert(which, rid);
        }

        if self.config.tier == Tier::Full {
            let layer = Image::filled(4, 4, false, ImageFormat::Rgba8, Vec4::ONE)?;
            let rid = self.textures.allocate();
            self.initialize_layered(rid, std::slice::from_ref(&layer), LayeredKind::Array)?;
            let _ = self.defaults.insert(DefaultTexture::ArrayWhite, rid);
        }

        let desc = TextureDesc::texture_2d(GpuFormat::DEPTH, 4, 4, LABEL_DEFAULT_DEPTH);
        let bytes = u64::from(4 * 4 * GpuFormat::DEPTH.internal.texel_bytes());
        let id = self.create_gpu_texture(&desc, bytes);
        let depth = Texture {
            width: 4,
            height: 4,
            alloc_width: 4,
            alloc_height: 4,
            format: ImageFormat::Rf,
            real_format: ImageFormat::Rf,
            gpu_format: GpuFormat::DEPTH,
            total_data_size: bytes,
            active: true,
            tex_id: Some(id),
            ..Texture::default()
        };
        let rid = self.textures.insert(depth);
        let _ = self.defaults.insert(DefaultTexture::Depth, rid);

        self.create_atlas_default_texture();
        Ok(())
    }

    // ── Device helpers ──

    /// Create a device texture and record it with the memory tracker.
    pub(super) fn create_gpu_texture(&mut self, desc: &TextureDesc, bytes: u64) -> TexId {
        let id = self.device.create_texture(desc);
        self.memory.note_allocated(id, bytes, desc.label);
        id
    }

    /// Delete a device texture and record the release.
    pub(super) fn delete_gpu_texture(&mut self, id: TexId) {
        self.device.delete_texture(id);
        self.memory.note_freed(id);
    }

    fn ensure_reserved(&self, rid: TextureRid) -> Result<(), StorageError> {
        if self.textures.is_reserved(rid) {
            Ok(())
        } else {
            Err(StorageError::InvalidHandle(self.textures.label()))
        }
    }

    /// Store `texture` in a reserved slot, releasing its device texture if
    /// the slot has gone away.
    fn commit(&mut self, rid: TextureRid, texture: Texture) -> Result<(), StorageError> {
        let id = texture.tex_id;
        if let Err(e) = self.textures.initialize(rid, texture) {
            if let Some(id) = id {
                self.delete_gpu_texture(id);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Negotiate the format of `images` and rewrite them for upload.
    fn prepare<'a>(&self, images: &'a [Image], kind: TextureKind) -> Result<Prepared<'a>, StorageError> {
        let Some(first) = images.first() else {
            return Err(StorageError::InvalidArgument("no image data".to_owned()));
        };
        let npot = !(first.width().is_power_of_two() && first.height().is_power_of_two());
        let resize_to_po2 = kind == TextureKind::Plain2D
            && self.config.tier == Tier::Reduced
            && !self.config.support_npot_repeat_mipmap
            && first.has_mipmaps()
            && npot;
        let plan = format::plan(&self.config, first.format(), resize_to_po2)?;
        let images = images
            .iter()
            .map(|image| {
                let converted = plan.apply(image)?;
                if !resize_to_po2 {
                    return Ok(converted);
                }
                let mut resized = converted.into_owned();
                resized.resize_to_po2()?;
                Ok(Cow::Owned(resized))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        Ok(Prepared {
            plan,
            images,
            resize_to_po2,
        })
    }

    /// Create and fill a device texture with one layer per image.
    fn create_texture(
        &mut self,
        images: &[Image],
        kind: TextureKind,
        layered_kind: LayeredKind,
    ) -> Result<Texture, StorageError> {
        let Some(source) = images.first() else {
            return Err(StorageError::InvalidArgument("no image data".to_owned()));
        };
        let prepared = self.prepare(images, kind)?;
        let Some(first) = prepared.images.first() else {
            return Err(StorageError::InvalidArgument("no image data".to_owned()));
        };
        let (target, label) = match (kind, layered_kind) {
            (TextureKind::Plain2D, _) => (TextureTarget::Texture2D, LABEL_2D),
            (TextureKind::Layered, LayeredKind::CubeMap) => (TextureTarget::CubeMap, LABEL_LAYERED),
            (TextureKind::Layered, _) => (TextureTarget::Texture2DArray, LABEL_LAYERED),
            (TextureKind::ThreeD, _) => (TextureTarget::Texture3D, LABEL_3D),
        };
        let levels = first.level_count();
        let desc = TextureDesc {
            target,
            format: prepared.plan.gpu,
            width: first.width(),
            height: first.height(),
            layers: prepared.images.len() as u32,
            levels,
            label,
        };
        let bytes: u64 = prepared.images.iter().map(|i| i.data_size() as u64).sum();
        let id = self.create_gpu_texture(&desc, bytes);

        let mut stored_cube_sides = 0;
        for (layer, image) in prepared.images.iter().enumerate() {
            upload_levels(&mut self.device, id, layer as u32, image);
            if target == TextureTarget::CubeMap {
                stored_cube_sides |= 1 << (layer % 6);
            }
        }
        let sampler = SamplerState {
            filter: if levels > 1 {
                Filter::NearestMipmap
            } else {
                Filter::Nearest
            },
            repeat: true,
            base_level: 0,
        };
        self.device.set_sampler(id, sampler);

        Ok(Texture {
            width: source.width(),
            height: source.height(),
            layers: desc.layers,
            alloc_width: desc.width,
            alloc_height: desc.height,
            format: source.format(),
            real_format: prepared.plan.real_format,
            gpu_format: prepared.plan.gpu,
            target,
            compressed: prepared.plan.compressed,
            mipmaps: levels,
            total_data_size: bytes,
            kind,
            layered_kind,
            active: true,
            resize_to_po2: prepared.resize_to_po2,
            tex_id: Some(id),
            sampler,
            stored_cube_sides,
            ..Texture::default()
        })
    }
}

/// Upload every level of `image` into `layer`.
fn upload_levels<D: GpuDevice>(device: &mut D, id: TexId, layer: u32, image: &Image) {
    for level in 0..image.level_count() {
        let (width, height) = image.mipmap_size(level);
        let upload = Upload {
            layer,
            level,
            width,
            height,
        };
        device.upload(id, upload, image.mipmap_data(level));
    }
}

fn check_same_shape(images: &[Image]) -> Result<(), StorageError> {
    let Some(first) = images.first() else {
        return Err(StorageError::InvalidArgument(
            "layered texture needs at least one layer".to_owned(),
        ));
    };
    for (i, image) in images.iter().enumerate().skip(1) {
        if image.width() != first.width()
            || image.height() != first.height()
            || image.format() != first.format()
            || image.has_mipmaps() != first.has_mipmaps()
        {
            return Err(StorageError::InvalidArgument(format!(
                "layer {i} differs from layer 0 in size, format or mipmaps"
            )));
        }
    }
    Ok(())
}

/// Validate volume slices and strip their mip chains.
fn volume_slices<'a>(
    format: ImageFormat,
    width: u32,
    height: u32,
    depth: u32,
    slices: &'a [Image],
) -> Result<Cow<'a, [Image]>, StorageError> {
    if slices.len() != depth as usize || depth == 0 {
        return Err(StorageError::InvalidArgument(format!(
            "volume of depth {depth} got {} slices",
            slices.len()
        )));
    }
    for slice in slices {
        if slice.width() != width || slice.height() != height || slice.format() != format {
            return Err(StorageError::InvalidArgument(format!(
                "slice {}x{} {:?} does not match volume {width}x{height} {format:?}",
                slice.width(),
                slice.height(),
                slice.format()
            )));
        }
    }
    if slices.iter().all(|s| !s.has_mipmaps()) {
        return Ok(Cow::Borrowed(slices));
    }
    let stripped: Vec<Image> = slices
        .iter()
        .map(|slice| {
            let mut slice = slice.duplicate();
            slice.clear_mipmaps();
            slice
        })
        .collect();
    Ok(Cow::Owned(stripped))
}

fn placeholder_image() -> Result<Image, StorageError> {
    Ok(Image::filled(
        PLACEHOLDER_SIZE,
        PLACEHOLDER_SIZE,
        false,
        ImageFormat::Rgba8,
        PLACEHOLDER_COLOR,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{storage, HeadlessStorage};

    fn solid(storage: &mut HeadlessStorage, width: u32, height: u32, color: Vec4) -> TextureRid {
        let image = Image::filled(width, height, false, ImageFormat::Rgba8, color).unwrap();
        let rid = storage.allocate();
        storage.initialize_2d(rid, &image).unwrap();
        rid
    }

    #[test]
    fn initialize_2d_uploads_every_level_and_accounts_bytes() {
        let mut storage = storage(Tier::Full);
        let image = Image::filled(8, 8, true, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        let rid = storage.allocate();
        storage.initialize_2d(rid, &image).unwrap();

        let texture = storage.texture(rid).unwrap();
        assert_eq!(texture.mipmaps(), 4);
        assert!(texture.is_active());
        let id = texture.tex_id().unwrap();
        assert_eq!(
            storage.memory().get(id).unwrap().bytes,
            image.data_size() as u64
        );
        let sampler = storage.device().sampler(id).unwrap();
        assert_eq!(sampler.filter, Filter::NearestMipmap);
        assert!(sampler.repeat);
        assert_eq!(storage.device().texels(id, 0, 3).unwrap(), &[Vec4::ONE]);
    }

    #[test]
    fn initialize_requires_a_reserved_handle() {
        let mut storage = storage(Tier::Full);
        let rid = solid(&mut storage, 4, 4, Vec4::ONE);
        let image = Image::filled(4, 4, false, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        assert!(matches!(
            storage.initialize_2d(rid, &image),
            Err(StorageError::InvalidHandle(_))
        ));
    }

    #[test]
    fn proxies_resolve_and_repoint() {
        let mut storage = storage(Tier::Full);
        let a = solid(&mut storage, 4, 4, Vec4::ONE);
        let b = solid(&mut storage, 8, 8, Vec4::ZERO);
        let proxy = storage.create_proxy(a).unwrap();

        assert_eq!(storage.width(proxy).unwrap(), 4);
        assert_eq!(storage.texture(proxy).unwrap().tex_id(), None);
        assert_eq!(
            storage.gpu_handle(proxy).unwrap(),
            storage.texture(a).unwrap().tex_id()
        );

        storage.repoint_proxy(proxy, b).unwrap();
        assert!(storage.texture(a).unwrap().proxies().is_empty());
        assert_eq!(storage.texture(b).unwrap().proxies(), &[proxy]);
        assert_eq!(storage.size_with_proxy(proxy).unwrap(), IVec2::splat(8));
    }

    #[test]
    fn proxy_of_proxy_is_rejected() {
        let mut storage = storage(Tier::Full);
        let a = solid(&mut storage, 4, 4, Vec4::ONE);
        let proxy = storage.create_proxy(a).unwrap();
        assert!(matches!(
            storage.create_proxy(proxy),
            Err(StorageError::WrongKind(_))
        ));
    }

    #[test]
    fn replace_adopts_source_and_redirects_all_proxies() {
        let mut storage = storage(Tier::Full);
        let a = solid(&mut storage, 4, 4, Vec4::ONE);
        let b = solid(&mut storage, 16, 8, Vec4::ZERO);
        let proxy_a = storage.create_proxy(a).unwrap();
        let proxy_b = storage.create_proxy(b).unwrap();
        let old_id = storage.texture(a).unwrap().tex_id().unwrap();
        let b_id = storage.texture(b).unwrap().tex_id();
        let live = storage.memory().live_count();

        storage.replace(a, b).unwrap();

        let adopted = storage.texture(a).unwrap();
        assert_eq!((adopted.width(), adopted.height()), (16, 8));
        assert_eq!(adopted.tex_id(), b_id);
        assert_eq!(adopted.proxies(), &[proxy_a, proxy_b]);
        assert!(matches!(storage.texture(b), Err(StorageError::InvalidHandle(_))));
        for proxy in [proxy_a, proxy_b] {
            assert_eq!(storage.texture(proxy).unwrap().proxy_to(), Some(a));
            assert_eq!(storage.width(proxy).unwrap(), 16);
        }
        assert!(storage.memory().get(old_id).is_none());
        assert_eq!(storage.memory().live_count(), live - 1);
    }

    #[test]
    fn replace_with_itself_is_a_no_op() {
        let mut storage = storage(Tier::Full);
        let a = solid(&mut storage, 4, 4, Vec4::ONE);
        let allocations = storage.memory().allocation_count();
        storage.replace(a, a).unwrap();
        assert!(storage.texture(a).is_ok());
        assert_eq!(storage.memory().allocation_count(), allocations);
    }

    #[test]
    fn free_detaches_proxies_and_releases_memory() {
        let mut storage = storage(Tier::Full);
        let a = solid(&mut storage, 4, 4, Vec4::ONE);
        let proxy = storage.create_proxy(a).unwrap();
        let frees = storage.memory().free_count();

        storage.free(a).unwrap();
        assert_eq!(storage.memory().free_count(), frees + 1);
        let orphan = storage.texture(proxy).unwrap();
        assert_eq!(orphan.proxy_to(), None);
        assert_eq!(orphan.tex_id(), None);

        storage.free(proxy).unwrap();
        assert_eq!(storage.memory().free_count(), frees + 1);
    }

    #[test]
    fn external_textures_are_never_deleted() {
        let mut storage = storage(Tier::Full);
        let foreign = storage
            .device_mut()
            .create_texture(&TextureDesc::texture_2d(GpuFormat::RGBA8, 2, 2, "foreign"));
        let rid = storage
            .create_external(ExternalTexture {
                kind: TextureKind::Plain2D,
                layered_kind: LayeredKind::Array,
                format: ImageFormat::Rgba8,
                tex_id: foreign,
                width: 2,
                height: 2,
                layers: 1,
            })
            .unwrap();
        storage.free(rid).unwrap();
        assert!(storage.device().texture_desc(foreign).is_some());
    }

    #[test]
    fn external_volumes_are_unsupported() {
        let mut storage = storage(Tier::Full);
        let result = storage.create_external(ExternalTexture {
            kind: TextureKind::ThreeD,
            layered_kind: LayeredKind::Array,
            format: ImageFormat::Rgba8,
            tex_id: TexId::from_raw(99).unwrap(),
            width: 2,
            height: 2,
            layers: 1,
        });
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
    }

    #[test]
    fn layered_validation() {
        let mut storage = storage(Tier::Reduced);
        let face = Image::filled(4, 4, false, ImageFormat::Rgba8, Vec4::ONE).unwrap();

        let rid = storage.allocate();
        let five = vec![face.clone(); 5];
        assert!(matches!(
            storage.initialize_layered(rid, &five, LayeredKind::CubeMap),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            storage.initialize_layered(rid, &five, LayeredKind::Array),
            Err(StorageError::Unsupported(_))
        ));

        let mut mixed = vec![face.clone(); 6];
        mixed[3] = Image::filled(8, 8, false, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        assert!(matches!(
            storage.initialize_layered(rid, &mixed, LayeredKind::CubeMap),
            Err(StorageError::InvalidArgument(_))
        ));

        storage
            .initialize_layered(rid, &vec![face; 6], LayeredKind::CubeMap)
            .unwrap();
        let cube = storage.texture(rid).unwrap();
        assert_eq!(cube.layers(), 6);
        assert_eq!(cube.stored_cube_sides(), 0b11_1111);
    }

    #[test]
    fn volumes_degrade_in_place_on_the_reduced_tier() {
        let mut storage = storage(Tier::Reduced);
        let rid = storage.allocate();
        storage.initialize_3d_placeholder(rid).unwrap();
        let texture = storage.texture(rid).unwrap();
        assert_eq!(texture.kind(), TextureKind::ThreeD);
        assert!(texture.is_active());
        assert_eq!(texture.tex_id(), None);
        assert_eq!(storage.depth(rid).unwrap(), 4);
        assert!(storage.get_3d(rid).unwrap().is_empty());
        storage.update_3d(rid, &[]).unwrap();
    }

    #[test]
    fn volumes_store_one_layer_per_slice_on_the_full_tier() {
        let mut storage = storage(Tier::Full);
        let rid = storage.allocate();
        storage.initialize_3d_placeholder(rid).unwrap();
        let id = storage.gpu_handle(rid).unwrap().unwrap();
        let desc = storage.device().texture_desc(id).unwrap();
        assert_eq!(desc.target, TextureTarget::Texture3D);
        assert_eq!(desc.layers, 4);
        assert_eq!(storage.get_3d(rid).unwrap().len(), 4);
    }

    #[test]
    fn size_override_is_bounded() {
        let mut storage = storage(Tier::Full);
        let rid = solid(&mut storage, 4, 4, Vec4::ONE);
        assert!(storage.set_size_override(rid, 0, 4).is_err());
        assert!(storage.set_size_override(rid, 4, MAX_SIZE_OVERRIDE + 1).is_err());
        storage.set_size_override(rid, 32, 16).unwrap();
        let texture = storage.texture(rid).unwrap();
        assert_eq!((texture.width(), texture.height()), (32, 16));
        assert_eq!(texture.alloc_size(), IVec2::splat(4));
    }

    #[test]
    fn size_override_through_a_proxy_lands_on_the_base() {
        let mut storage = storage(Tier::Full);
        let rid = solid(&mut storage, 4, 4, Vec4::ONE);
        let proxy = storage.create_proxy(rid).unwrap();
        storage.set_size_override(proxy, 32, 16).unwrap();
        assert_eq!(storage.size_with_proxy(proxy).unwrap(), IVec2::new(32, 16));
        assert_eq!((storage.width(rid).unwrap(), storage.height(rid).unwrap()), (32, 16));
        assert_eq!(storage.resolved(proxy).unwrap().alloc_size(), IVec2::splat(4));
    }

    #[test]
    fn mipmapped_npot_textures_are_resized_on_the_reduced_tier() {
        let mut storage = storage(Tier::Reduced);
        let image = Image::filled(6, 6, true, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        let rid = storage.allocate();
        storage.initialize_2d(rid, &image).unwrap();
        let texture = storage.texture(rid).unwrap();
        assert_eq!(texture.width(), 6);
        assert_eq!(texture.alloc_size(), IVec2::splat(8));
    }

    #[test]
    fn update_2d_rejects_shape_changes() {
        let mut storage = storage(Tier::Full);
        let rid = solid(&mut storage, 4, 4, Vec4::ONE);
        let bigger = Image::filled(8, 8, false, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        assert!(matches!(
            storage.update_2d(rid, &bigger, 0),
            Err(StorageError::InvalidArgument(_))
        ));

        let black = Image::filled(4, 4, false, ImageFormat::Rgba8, Vec4::W).unwrap();
        storage.update_2d(rid, &black, 0).unwrap();
        let id = storage.gpu_handle(rid).unwrap().unwrap();
        assert!(storage.device().texels(id, 0, 0).unwrap().iter().all(|t| *t == Vec4::W));
        assert_eq!(storage.memory().resize_count(), 1);
    }

    #[test]
    fn defaults_follow_the_tier() {
        let full = storage(Tier::Full);
        let reduced = storage(Tier::Reduced);
        assert!(full.default_texture(DefaultTexture::ArrayWhite).is_some());
        assert!(reduced.default_texture(DefaultTexture::ArrayWhite).is_none());

        let white = full.default_texture(DefaultTexture::White).unwrap();
        let id = full.gpu_handle(white).unwrap().unwrap();
        assert!(full.device().texels(id, 0, 0).unwrap().iter().all(|t| *t == Vec4::ONE));
        let depth = full.default_texture(DefaultTexture::Depth).unwrap();
        assert_eq!(full.texture(depth).unwrap().gpu_format(), GpuFormat::DEPTH);
    }

    #[test]
    fn debug_usage_lists_concrete_textures() {
        let mut storage = storage(Tier::Full);
        let rid = solid(&mut storage, 4, 4, Vec4::ONE);
        storage.set_path(rid, "res://icon.png").unwrap();
        let _ = storage.create_proxy(rid).unwrap();
        let usage = storage.debug_usage();
        let row = usage.iter().find(|u| u.texture == rid).unwrap();
        assert_eq!(row.path, "res://icon.png");
        assert_eq!(row.bytes, 64);
        assert_eq!(usage.len(), storage.textures.len() - 1);
    }

    #[test]
    fn bind_checks_the_unit_range() {
        let mut storage = storage(Tier::Full);
        let rid = solid(&mut storage, 4, 4, Vec4::ONE);
        let units = storage.config().max_texture_image_units;
        assert!(storage.bind(rid, units).is_err());
        storage.bind(rid, 1).unwrap();
        assert_eq!(storage.device().bound_texture(1), storage.gpu_handle(rid).unwrap());
    }
}
