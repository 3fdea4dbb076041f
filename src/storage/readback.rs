//! Device to CPU image transfer.
//!
//! Devices with image transfer hand back each level in the texture's
//! transfer layout. Without it, the texture is drawn into a scratch RGBA8
//! framebuffer and read back as pixels, then converted to the logical format
//! with mipmaps regenerated on the CPU.

use glam::Vec4;

use super::texture::TextureKind;
use super::{TextureRid, TextureStorage};
use crate::accounting::MemoryTracker;
use crate::config::Tier;
use crate::error::StorageError;
use crate::gpu::{GpuDevice, GpuFormat, TexId, TextureDesc};
use crate::image::{Image, ImageFormat};
use crate::util::rect::{Rect2, Rect2i};

const LABEL_READBACK: &str = "Readback texture";

/// Shape of the device storage being read.
///
/// `alloc_width`×`alloc_height` is what the device holds, which the reduced
/// tier may have padded up to a power of two. The returned image always has
/// the logical `width`×`height`.
#[derive(Debug, Clone, Copy)]
struct Source {
    id: TexId,
    width: u32,
    height: u32,
    alloc_width: u32,
    alloc_height: u32,
    levels: u32,
    real_format: ImageFormat,
    format: ImageFormat,
}

impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    /// Copy a 2D texture's data back into an image of its logical format.
    ///
    /// The result is cached on the texture until the next update, except
    /// for render target textures whose contents change every frame.
    pub fn read_back(&mut self, rid: TextureRid) -> Result<Image, StorageError> {
        let base = self.resolve_rid(rid)?;
        let texture = self.textures.try_get(base)?;
        if !texture.active {
            return Err(StorageError::InvalidArgument("texture is not active".to_owned()));
        }
        if texture.kind != TextureKind::Plain2D {
            return Err(StorageError::WrongKind(
                "read_back reads 2D textures, use read_back_layer".to_owned(),
            ));
        }
        let Some(id) = texture.tex_id else {
            return Err(StorageError::InvalidArgument("texture has no device storage".to_owned()));
        };
        if !texture.is_render_target {
            if let Some(cached) = &texture.image_cache {
                return Ok(cached.clone());
            }
        }
        let is_render_target = texture.is_render_target;
        let source = Source {
            id,
            width: texture.width,
            height: texture.height,
            alloc_width: texture.alloc_width,
            alloc_height: texture.alloc_height,
            levels: texture.mipmaps,
            real_format: texture.real_format,
            format: texture.format,
        };

        let direct = if self.config.has_image_transfer() {
            self.read_layer_direct(source, 0)?
        } else {
            None
        };
        let image = match direct {
            Some(image) => image,
            None => self.read_emulated(source)?,
        };

        if !is_render_target {
            self.textures.try_get_mut(base)?.image_cache = Some(image.clone());
        }
        Ok(image)
    }

    /// Copy one layer of an array or cubemap back into an image.
    pub fn read_back_layer(&mut self, rid: TextureRid, layer: u32) -> Result<Image, StorageError> {
        let texture = self.resolved(rid)?;
        if texture.kind != TextureKind::Layered {
            return Err(StorageError::WrongKind("texture is not layered".to_owned()));
        }
        if self.config.tier == Tier::Reduced {
            return Err(StorageError::Unsupported(
                "layered readback is not supported by the reduced tier".to_owned(),
            ));
        }
        if layer >= texture.layers {
            return Err(StorageError::InvalidArgument(format!(
                "layer {layer} out of range for {} layers",
                texture.layers
            )));
        }
        let Some(id) = texture.tex_id else {
            return Err(StorageError::InvalidArgument("texture has no device storage".to_owned()));
        };
        let source = Source {
            id,
            width: texture.width,
            height: texture.height,
            alloc_width: texture.alloc_width,
            alloc_height: texture.alloc_height,
            levels: texture.mipmaps,
            real_format: texture.real_format,
            format: texture.format,
        };
        self.read_layer_direct(source, layer)?
            .ok_or_else(|| StorageError::Unsupported("device cannot transfer images".to_owned()))
    }

    /// Copy every slice of a volume texture back. Empty when the texture
    /// has no device storage.
    pub fn get_3d(&mut self, rid: TextureRid) -> Result<Vec<Image>, StorageError> {
        let texture = self.resolved(rid)?;
        if texture.kind != TextureKind::ThreeD {
            return Err(StorageError::WrongKind("texture is not a volume".to_owned()));
        }
        let tex_id = texture.tex_id.filter(|_| self.config.tier == Tier::Full);
        let Some(id) = tex_id else {
            log::error!("3D texture readback is not available for this texture");
            return Ok(Vec::new());
        };
        let depth = texture.depth;
        let source = Source {
            id,
            width: texture.width,
            height: texture.height,
            alloc_width: texture.alloc_width,
            alloc_height: texture.alloc_height,
            levels: 1,
            real_format: texture.real_format,
            format: texture.format,
        };
        let mut slices = Vec::with_capacity(depth as usize);
        for slice in 0..depth {
            let Some(image) = self.read_layer_direct(source, slice)? else {
                log::error!("device cannot transfer 3D texture data");
                return Ok(Vec::new());
            };
            slices.push(image);
        }
        Ok(slices)
    }

    /// Read every level of `layer`. `None` when the device has no image
    /// transfer.
    fn read_layer_direct(&mut self, source: Source, layer: u32) -> Result<Option<Image>, StorageError> {
        let mut data = Vec::new();
        for level in 0..source.levels {
            let Some(bytes) = self.device.read_texture(source.id, layer, level) else {
                log::debug!("direct readback unavailable, falling back to a draw");
                return Ok(None);
            };
            data.extend_from_slice(&bytes);
        }
        let mut image = Image::new(
            source.alloc_width,
            source.alloc_height,
            source.levels > 1,
            source.real_format,
            data,
        )?;
        if let Err(e) = image.resize(source.width, source.height) {
            log::warn!(
                "read back kept at {}x{}: {e}",
                source.alloc_width,
                source.alloc_height
            );
        }
        if source.format != source.real_format {
            if let Err(e) = image.convert(source.format) {
                log::warn!(
                    "read back {:?} kept as {:?}: {e}",
                    source.format,
                    source.real_format
                );
            }
        }
        Ok(Some(image))
    }

    /// Draw the texture into a scratch RGBA8 framebuffer and read pixels.
    fn read_emulated(&mut self, source: Source) -> Result<Image, StorageError> {
        let (width, height) = (source.alloc_width, source.alloc_height);
        let desc = TextureDesc::texture_2d(GpuFormat::RGBA8, width, height, LABEL_READBACK);
        let scratch = self.create_gpu_texture(&desc, u64::from(width * height * 4));
        let fbo = self.device.create_framebuffer();
        self.device.attach_color(fbo, Some(scratch), 0);

        let status = self.device.framebuffer_status(fbo);
        let pixels = if status.is_complete() {
            let rect = Rect2i::new(0, 0, width as i32, height as i32);
            self.device.bind_framebuffer(Some(fbo));
            self.device.viewport(rect);
            self.device.scissor(None);
            self.device.clear(Vec4::ZERO);
            self.device.bind_texture(0, Some(source.id));
            self.copy.copy_to_rect(&mut self.device, Rect2::UNIT);
            let pixels = self.device.read_pixels(rect);
            self.device.bind_texture(0, None);
            self.device.bind_framebuffer(None);
            Some(pixels)
        } else {
            None
        };
        self.device.delete_framebuffer(fbo);
        self.delete_gpu_texture(scratch);

        let Some(pixels) = pixels else {
            return Err(StorageError::FramebufferIncomplete(status.to_string()));
        };
        let mut image = Image::new(width, height, false, ImageFormat::Rgba8, pixels)?;
        image.resize(source.width, source.height)?;
        if source.format != ImageFormat::Rgba8 {
            if let Err(e) = image.convert(source.format) {
                log::warn!("read back {:?} kept as Rgba8: {e}", source.format);
            }
        }
        if source.levels > 1 {
            image.generate_mipmaps()?;
        }
        Ok(image)
    }
}
