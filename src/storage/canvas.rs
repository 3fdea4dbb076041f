//! Canvas textures: diffuse, normal and specular maps sampled together by
//! 2D drawing.

use glam::Vec4;

use super::{CanvasTextureRid, TextureRid, TextureStorage};
use crate::accounting::MemoryTracker;
use crate::error::StorageError;
use crate::gpu::{Filter, GpuDevice};

/// Map slot of a [`CanvasTexture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanvasChannel {
    /// Albedo.
    Diffuse,
    /// Tangent-space normal map.
    Normal,
    /// Specular map.
    Specular,
}

/// Up to three textures plus the shading parameters used with them.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasTexture {
    diffuse: Option<TextureRid>,
    normal: Option<TextureRid>,
    specular: Option<TextureRid>,
    specular_color: Vec4,
    shininess: f32,
    filter: Option<Filter>,
    repeat: Option<bool>,
}

impl Default for CanvasTexture {
    fn default() -> Self {
        Self {
            diffuse: None,
            normal: None,
            specular: None,
            specular_color: Vec4::ONE,
            shininess: 1.0,
            filter: None,
            repeat: None,
        }
    }
}

impl CanvasTexture {
    /// Texture in `channel`.
    #[must_use]
    pub const fn channel(&self, channel: CanvasChannel) -> Option<TextureRid> {
        match channel {
            CanvasChannel::Diffuse => self.diffuse,
            CanvasChannel::Normal => self.normal,
            CanvasChannel::Specular => self.specular,
        }
    }

    /// Specular tint.
    #[must_use]
    pub const fn specular_color(&self) -> Vec4 {
        self.specular_color
    }

    /// Specular shininess in `[0, 1]`.
    #[must_use]
    pub const fn shininess(&self) -> f32 {
        self.shininess
    }

    /// Filter override, `None` to inherit the canvas item's.
    #[must_use]
    pub const fn filter(&self) -> Option<Filter> {
        self.filter
    }

    /// Repeat override, `None` to inherit the canvas item's.
    #[must_use]
    pub const fn repeat(&self) -> Option<bool> {
        self.repeat
    }

    pub(super) fn set_diffuse(&mut self, texture: TextureRid) {
        self.diffuse = Some(texture);
    }
}

impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    /// Reserve a canvas texture handle.
    pub fn canvas_allocate(&mut self) -> CanvasTextureRid {
        self.canvas_textures.allocate()
    }

    /// Initialize a reserved canvas texture with empty channels.
    pub fn canvas_initialize(&mut self, rid: CanvasTextureRid) -> Result<(), StorageError> {
        self.canvas_textures.initialize(rid, CanvasTexture::default())
    }

    /// Free a canvas texture and detach it from any texture using it.
    pub fn canvas_free(&mut self, rid: CanvasTextureRid) -> Result<(), StorageError> {
        if !self.canvas_textures.owns(rid) {
            return Err(StorageError::InvalidHandle(self.canvas_textures.label()));
        }
        let _ = self.canvas_textures.free(rid);
        for texture in self.textures.rids() {
            if let Some(texture) = self.textures.get_mut(texture) {
                if texture.canvas_texture == Some(rid) {
                    texture.canvas_texture = None;
                }
            }
        }
        Ok(())
    }

    /// Put `texture` in `channel`, or empty the channel with `None`.
    pub fn canvas_set_channel(
        &mut self,
        rid: CanvasTextureRid,
        channel: CanvasChannel,
        texture: Option<TextureRid>,
    ) -> Result<(), StorageError> {
        if let Some(texture) = texture {
            let _ = self.textures.try_get(texture)?;
        }
        let canvas = self.canvas_textures.try_get_mut(rid)?;
        match channel {
            CanvasChannel::Diffuse => canvas.diffuse = texture,
            CanvasChannel::Normal => canvas.normal = texture,
            CanvasChannel::Specular => canvas.specular = texture,
        }
        Ok(())
    }

    /// Set the specular tint and shininess. Shininess is clamped to `[0, 1]`.
    pub fn canvas_set_shading_parameters(
        &mut self,
        rid: CanvasTextureRid,
        specular_color: Vec4,
        shininess: f32,
    ) -> Result<(), StorageError> {
        let canvas = self.canvas_textures.try_get_mut(rid)?;
        canvas.specular_color = specular_color;
        canvas.shininess = shininess.clamp(0.0, 1.0);
        Ok(())
    }

    /// Override filtering for every channel.
    pub fn canvas_set_filter(&mut self, rid: CanvasTextureRid, filter: Option<Filter>) -> Result<(), StorageError> {
        self.canvas_textures.try_get_mut(rid)?.filter = filter;
        Ok(())
    }

    /// Override wrapping for every channel.
    pub fn canvas_set_repeat(&mut self, rid: CanvasTextureRid, repeat: Option<bool>) -> Result<(), StorageError> {
        self.canvas_textures.try_get_mut(rid)?.repeat = repeat;
        Ok(())
    }

    /// The canvas texture behind `rid`.
    pub fn canvas_texture(&self, rid: CanvasTextureRid) -> Result<&CanvasTexture, StorageError> {
        self.canvas_textures.try_get(rid)
    }

    /// Canvas texture of a plain texture, created on first use with the
    /// texture as its diffuse channel.
    pub fn texture_canvas(&mut self, texture: TextureRid) -> Result<CanvasTextureRid, StorageError> {
        if let Some(existing) = self.textures.try_get(texture)?.canvas_texture {
            return Ok(existing);
        }
        let mut canvas = CanvasTexture::default();
        canvas.set_diffuse(texture);
        let rid = self.canvas_textures.insert(canvas);
        self.textures.try_get_mut(texture)?.canvas_texture = Some(rid);
        Ok(rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tier;
    use crate::image::{Image, ImageFormat};
    use crate::storage::test_support::storage;

    #[test]
    fn channels_and_parameters() {
        let mut storage = storage(Tier::Reduced);
        let image = Image::filled(4, 4, false, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        let normal = storage.allocate();
        storage.initialize_2d(normal, &image).unwrap();

        let rid = storage.canvas_allocate();
        storage.canvas_initialize(rid).unwrap();
        storage
            .canvas_set_channel(rid, CanvasChannel::Normal, Some(normal))
            .unwrap();
        storage
            .canvas_set_shading_parameters(rid, Vec4::new(1.0, 0.5, 0.5, 1.0), 3.0)
            .unwrap();
        storage.canvas_set_filter(rid, Some(Filter::Linear)).unwrap();
        storage.canvas_set_repeat(rid, Some(false)).unwrap();

        let canvas = storage.canvas_texture(rid).unwrap();
        assert_eq!(canvas.channel(CanvasChannel::Normal), Some(normal));
        assert_eq!(canvas.channel(CanvasChannel::Diffuse), None);
        assert!((canvas.shininess() - 1.0).abs() < f32::EPSILON);
        assert_eq!(canvas.filter(), Some(Filter::Linear));
        assert_eq!(canvas.repeat(), Some(false));
    }

    #[test]
    fn texture_canvas_is_created_once_and_freed_with_the_texture() {
        let mut storage = storage(Tier::Reduced);
        let image = Image::filled(4, 4, false, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        let texture = storage.allocate();
        storage.initialize_2d(texture, &image).unwrap();

        let canvas = storage.texture_canvas(texture).unwrap();
        assert_eq!(storage.texture_canvas(texture).unwrap(), canvas);
        assert_eq!(
            storage.canvas_texture(canvas).unwrap().channel(CanvasChannel::Diffuse),
            Some(texture)
        );

        storage.free(texture).unwrap();
        assert!(storage.canvas_texture(canvas).is_err());
    }

    #[test]
    fn freeing_a_canvas_detaches_it() {
        let mut storage = storage(Tier::Reduced);
        let image = Image::filled(4, 4, false, ImageFormat::Rgba8, Vec4::ONE).unwrap();
        let texture = storage.allocate();
        storage.initialize_2d(texture, &image).unwrap();
        let canvas = storage.texture_canvas(texture).unwrap();

        storage.canvas_free(canvas).unwrap();
        assert!(storage.canvas_free(canvas).is_err());
        assert_ne!(storage.texture_canvas(texture).unwrap(), canvas);
    }
}
