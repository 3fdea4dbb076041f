//! Texture records held by the store.

use glam::IVec2;

use super::{CanvasTextureRid, RenderTargetRid, TextureRid};
use crate::gpu::{Filter, GpuDevice, GpuFormat, SamplerState, TexId, TextureTarget};
use crate::image::{Image, ImageFormat};

/// Shape of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureKind {
    /// One 2D image with optional mipmaps.
    #[default]
    Plain2D,
    /// Several same-sized 2D images (array, cubemap, cubemap array).
    Layered,
    /// Volume texture.
    ThreeD,
}

/// Sub-kind of a [`TextureKind::Layered`] texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayeredKind {
    /// Exactly six faces.
    CubeMap,
    /// Any number of layers.
    #[default]
    Array,
    /// A multiple of six faces.
    CubeMapArray,
}

/// One logical texture.
///
/// A texture is either a proxy, which owns no device texture and forwards
/// every read to `proxy_to`, or a concrete resource owning at most one
/// device texture that any number of proxies may point at.
#[derive(Debug, Clone)]
pub struct Texture {
    pub(super) width: u32,
    pub(super) height: u32,
    pub(super) depth: u32,
    pub(super) layers: u32,
    pub(super) alloc_width: u32,
    pub(super) alloc_height: u32,
    pub(super) format: ImageFormat,
    pub(super) real_format: ImageFormat,
    pub(super) gpu_format: GpuFormat,
    pub(super) target: TextureTarget,
    pub(super) compressed: bool,
    pub(super) mipmaps: u32,
    pub(super) total_data_size: u64,
    pub(super) kind: TextureKind,
    pub(super) layered_kind: LayeredKind,
    pub(super) is_proxy: bool,
    pub(super) is_external: bool,
    pub(super) is_render_target: bool,
    pub(super) active: bool,
    pub(super) resize_to_po2: bool,
    pub(super) render_target: Option<RenderTargetRid>,
    pub(super) canvas_texture: Option<CanvasTextureRid>,
    pub(super) proxy_to: Option<TextureRid>,
    pub(super) proxies: Vec<TextureRid>,
    pub(super) image_cache: Option<Image>,
    pub(super) path: String,
    pub(super) tex_id: Option<TexId>,
    pub(super) sampler: SamplerState,
    pub(super) stored_cube_sides: u32,
}

impl Default for Texture {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            depth: 0,
            layers: 1,
            alloc_width: 0,
            alloc_height: 0,
            format: ImageFormat::Rgba8,
            real_format: ImageFormat::Rgba8,
            gpu_format: GpuFormat::RGBA8,
            target: TextureTarget::Texture2D,
            compressed: false,
            mipmaps: 1,
            total_data_size: 0,
            kind: TextureKind::Plain2D,
            layered_kind: LayeredKind::Array,
            is_proxy: false,
            is_external: false,
            is_render_target: false,
            active: false,
            resize_to_po2: false,
            render_target: None,
            canvas_texture: None,
            proxy_to: None,
            proxies: Vec::new(),
            image_cache: None,
            path: String::new(),
            tex_id: None,
            sampler: SamplerState::default(),
            stored_cube_sides: 0,
        }
    }
}

impl Texture {
    /// Copy of `base` that forwards to it and owns nothing.
    pub(super) fn proxy_of(base: &Self, base_rid: TextureRid) -> Self {
        Self {
            proxy_to: Some(base_rid),
            is_proxy: true,
            is_render_target: false,
            render_target: None,
            proxies: Vec::new(),
            canvas_texture: None,
            image_cache: None,
            tex_id: None,
            ..base.clone()
        }
    }

    /// Set min/mag filtering and push it to the device.
    pub(super) fn set_filter(&mut self, device: &mut dyn GpuDevice, filter: Filter) {
        self.sampler.filter = filter;
        self.push_sampler(device);
    }

    /// Set repeat or clamp-to-edge wrapping and push it to the device.
    pub(super) fn set_repeat(&mut self, device: &mut dyn GpuDevice, repeat: bool) {
        self.sampler.repeat = repeat;
        self.push_sampler(device);
    }

    fn push_sampler(&self, device: &mut dyn GpuDevice) {
        if let Some(id) = self.tex_id {
            device.set_sampler(id, self.sampler);
        }
    }

    /// Logical width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Logical height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Depth of a volume texture, zero otherwise.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Layer count.
    #[must_use]
    pub const fn layers(&self) -> u32 {
        self.layers
    }

    /// Size of the device storage, which differs from the logical size
    /// after a size override or a power-of-two resize.
    #[must_use]
    pub fn alloc_size(&self) -> IVec2 {
        IVec2::new(self.alloc_width as i32, self.alloc_height as i32)
    }

    /// Logical pixel format.
    #[must_use]
    pub const fn format(&self) -> ImageFormat {
        self.format
    }

    /// Format of the bytes held by the device.
    #[must_use]
    pub const fn real_format(&self) -> ImageFormat {
        self.real_format
    }

    /// Device format triple.
    #[must_use]
    pub const fn gpu_format(&self) -> GpuFormat {
        self.gpu_format
    }

    /// Whether the device holds compressed blocks.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Mip levels, base included.
    #[must_use]
    pub const fn mipmaps(&self) -> u32 {
        self.mipmaps
    }

    /// Bytes uploaded to the device.
    #[must_use]
    pub const fn total_data_size(&self) -> u64 {
        self.total_data_size
    }

    /// Texture shape.
    #[must_use]
    pub const fn kind(&self) -> TextureKind {
        self.kind
    }

    /// Sub-kind when [`TextureKind::Layered`].
    #[must_use]
    pub const fn layered_kind(&self) -> LayeredKind {
        self.layered_kind
    }

    /// Whether reads are forwarded to another texture.
    #[must_use]
    pub const fn is_proxy(&self) -> bool {
        self.is_proxy
    }

    /// Whether the device texture belongs to someone else.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        self.is_external
    }

    /// Whether a render target currently owns this texture's metadata.
    #[must_use]
    pub const fn is_render_target(&self) -> bool {
        self.is_render_target
    }

    /// Whether the texture holds usable data.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Render target owning this texture, if still attached.
    #[must_use]
    pub const fn render_target(&self) -> Option<RenderTargetRid> {
        self.render_target
    }

    /// Texture this proxy forwards to.
    #[must_use]
    pub const fn proxy_to(&self) -> Option<TextureRid> {
        self.proxy_to
    }

    /// Proxies forwarding to this texture.
    #[must_use]
    pub fn proxies(&self) -> &[TextureRid] {
        &self.proxies
    }

    /// Device texture, `None` while unallocated.
    #[must_use]
    pub const fn tex_id(&self) -> Option<TexId> {
        self.tex_id
    }

    /// Current sampler state.
    #[must_use]
    pub const fn sampler(&self) -> SamplerState {
        self.sampler
    }

    /// Bitmask of cube faces that received data.
    #[must_use]
    pub const fn stored_cube_sides(&self) -> u32 {
        self.stored_cube_sides
    }

    /// Resource path, empty if unset.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rid::Owner;

    #[test]
    fn proxy_copies_metadata_but_owns_nothing() {
        let mut owner: Owner<Texture> = Owner::new("texture");
        let base = Texture {
            width: 16,
            height: 8,
            active: true,
            tex_id: TexId::from_raw(3),
            path: "res://icon.png".to_owned(),
            ..Texture::default()
        };
        let base_rid = owner.insert(base);
        let base = owner.get(base_rid).unwrap();
        let proxy = Texture::proxy_of(base, base_rid);
        assert!(proxy.is_proxy());
        assert_eq!(proxy.proxy_to(), Some(base_rid));
        assert_eq!((proxy.width(), proxy.height()), (16, 8));
        assert_eq!(proxy.path(), "res://icon.png");
        assert_eq!(proxy.tex_id(), None);
    }
}
