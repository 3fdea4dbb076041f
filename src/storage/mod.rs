//! Texture, render-target and atlas storage.
//!
//! [`TextureStorage`] is the single context object owning the GPU device,
//! the memory tracker, the copy effects and every handle table. It is built
//! once at backend start and driven through `&mut` by the scene renderer.
//! Operations are split across submodules by concern:
//!
//! - `textures`: allocation, initialization, proxies, replace, free
//! - `readback`: GPU to CPU image transfer, direct or emulated
//! - `canvas` / `decal`: canvas texture composites and decal stubs
//! - `atlas`: the shared texture atlas and its packer
//! - `render_target`, `backbuffer`, `sdf`: render targets and their
//!   blur chain and distance field

mod atlas;
mod backbuffer;
mod canvas;
mod decal;
mod readback;
mod render_target;
mod sdf;
mod texture;
mod textures;

pub use atlas::{pack_atlas, AtlasEntry, AtlasLayout, ATLAS_BORDER};
pub use canvas::{CanvasChannel, CanvasTexture};
pub use decal::{Aabb, Decal, DecalTexture};
pub use render_target::{Msaa, RenderTarget, SdfOversize, SdfScale};
pub use texture::{LayeredKind, Texture, TextureKind};
pub use textures::{DefaultTexture, ExternalTexture, TextureUsage};

use rustc_hash::FxHashMap;

use self::atlas::TextureAtlas;
use crate::accounting::{MemoryLedger, MemoryTracker};
use crate::config::Config;
use crate::effects::{CopyEffects, CopyShader};
use crate::error::StorageError;
use crate::gpu::GpuDevice;
use crate::rid::{Owner, Rid};

/// Handle to a [`Texture`].
pub type TextureRid = Rid<Texture>;
/// Handle to a [`RenderTarget`].
pub type RenderTargetRid = Rid<RenderTarget>;
/// Handle to a [`CanvasTexture`].
pub type CanvasTextureRid = Rid<CanvasTexture>;
/// Handle to a [`Decal`].
pub type DecalRid = Rid<Decal>;

/// Owner of every texture, canvas texture, decal and render target.
pub struct TextureStorage<D: GpuDevice, M: MemoryTracker = MemoryLedger> {
    device: D,
    memory: M,
    config: Config,
    copy: CopyEffects,
    textures: Owner<Texture>,
    canvas_textures: Owner<CanvasTexture>,
    decals: Owner<Decal>,
    render_targets: Owner<RenderTarget>,
    atlas: TextureAtlas,
    defaults: FxHashMap<DefaultTexture, TextureRid>,
}

impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    /// Storage using the built-in copy shader of the config's tier.
    ///
    /// Creates the default textures and the default atlas texture.
    pub fn new(device: D, memory: M, config: Config) -> Result<Self, StorageError> {
        let copy = CopyEffects::for_tier(config.tier);
        Self::with_copy_effects(device, memory, config, copy)
    }

    /// Storage using a caller-supplied copy shader capability.
    pub fn with_shader(
        device: D,
        memory: M,
        config: Config,
        shader: Box<dyn CopyShader>,
    ) -> Result<Self, StorageError> {
        Self::with_copy_effects(device, memory, config, CopyEffects::new(shader))
    }

    fn with_copy_effects(
        device: D,
        memory: M,
        config: Config,
        copy: CopyEffects,
    ) -> Result<Self, StorageError> {
        let mut storage = Self {
            device,
            memory,
            config,
            copy,
            textures: Owner::new("texture"),
            canvas_textures: Owner::new("canvas texture"),
            decals: Owner::new("decal"),
            render_targets: Owner::new("render target"),
            atlas: TextureAtlas::default(),
            defaults: FxHashMap::default(),
        };
        storage.create_default_textures()?;
        log::info!(
            "texture storage ready ({:?} tier, {} default textures)",
            storage.config.tier,
            storage.defaults.len()
        );
        Ok(storage)
    }

    /// The device.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The device, mutably. Callers must leave framebuffer and texture-unit
    /// bindings as they found them.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// The memory tracker.
    #[must_use]
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// The capability registry.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The copy effects dispatcher.
    #[must_use]
    pub fn copy_effects(&self) -> &CopyEffects {
        &self.copy
    }
}

impl<D: GpuDevice, M: MemoryTracker> Drop for TextureStorage<D, M> {
    fn drop(&mut self) {
        self.release_render_targets();
        self.release_atlas();
        let defaults: Vec<TextureRid> = self.defaults.drain().map(|(_, rid)| rid).collect();
        for rid in defaults {
            self.release_texture(rid);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::TextureStorage;
    use crate::accounting::MemoryLedger;
    use crate::config::{Config, Tier};
    use crate::gpu::headless::HeadlessDevice;

    pub(crate) type HeadlessStorage = TextureStorage<HeadlessDevice, MemoryLedger>;

    pub(crate) fn storage(tier: Tier) -> HeadlessStorage {
        let _ = env_logger::builder().is_test(true).try_init();
        let device = match tier {
            Tier::Full => HeadlessDevice::new(),
            Tier::Reduced => HeadlessDevice::new().without_image_transfer(),
        };
        TextureStorage::new(device, MemoryLedger::new(), Config::for_tier(tier)).unwrap()
    }
}
