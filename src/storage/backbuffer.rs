//! Render target backbuffers: a mipmapped copy of the colour attachment
//! that screen-reading canvas shaders sample, blurred level by level.

use glam::{IVec2, Vec4};

use super::{RenderTargetRid, TextureStorage};
use crate::accounting::MemoryTracker;
use crate::error::StorageError;
use crate::gpu::{FboId, Filter, GpuDevice, SamplerState, TexId, TextureDesc};
use crate::image::required_mipmaps;
use crate::util::rect::Rect2i;

const LABEL_BACKBUFFER: &str = "Render target backbuffer color texture";

/// Targets this small get no backbuffer.
const MIN_BACKBUFFER_SIZE: i32 = 40;

/// Levels dropped from the bottom of the chain, keeping the smallest level
/// around 32×32.
const SKIPPED_MIPMAPS: u32 = 4;

/// Mip chain and framebuffer of a render target's backbuffer.
#[derive(Debug, Clone, Copy)]
pub(super) struct Backbuffer {
    pub(super) texture: TexId,
    pub(super) fbo: FboId,
    pub(super) mipmap_count: u32,
}

/// A backbuffer region ready to draw.
struct Target {
    backbuffer: Backbuffer,
    size: IVec2,
    region: Rect2i,
}

impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    /// Copy `region` of the colour attachment into the backbuffer,
    /// optionally blurring it down the mip chain.
    ///
    /// An empty `region` means the whole target. Regions are clipped to the
    /// target; a region outside it does nothing.
    pub fn render_target_copy_to_back_buffer(
        &mut self,
        rid: RenderTargetRid,
        region: Rect2i,
        gen_mipmaps: bool,
    ) -> Result<(), StorageError> {
        let Some(target) = self.back_buffer_target(rid, region)? else {
            return Ok(());
        };
        let Some(color) = self.render_targets.try_get(rid)?.color else {
            log::warn!("render target {rid:?} has no colour attachment to copy");
            return Ok(());
        };
        let Target {
            backbuffer,
            size,
            region,
        } = target;

        self.device.bind_framebuffer(Some(backbuffer.fbo));
        self.device.viewport(Rect2i::from_size(size));
        self.device.scissor(None);
        self.device.bind_texture(0, Some(color));
        self.copy
            .copy_to_and_from_rect(&mut self.device, region.normalized(size));
        self.device.bind_texture(0, None);

        if gen_mipmaps {
            self.copy.gaussian_blur(
                &mut self.device,
                backbuffer.texture,
                backbuffer.mipmap_count,
                region,
                size,
            );
        }
        self.device.bind_framebuffer(None);
        Ok(())
    }

    /// Fill `region` of the backbuffer's base level with `color`. An empty
    /// `region` clears the whole level.
    pub fn render_target_clear_back_buffer(
        &mut self,
        rid: RenderTargetRid,
        region: Rect2i,
        color: Vec4,
    ) -> Result<(), StorageError> {
        let full = region == Rect2i::default();
        let Some(Target {
            backbuffer,
            size,
            region,
        }) = self.back_buffer_target(rid, region)?
        else {
            return Ok(());
        };

        self.device.bind_framebuffer(Some(backbuffer.fbo));
        self.device.viewport(Rect2i::from_size(size));
        self.device.scissor(None);
        if full {
            self.device.clear(color);
        } else {
            self.copy
                .set_color(&mut self.device, color, region.normalized(size));
        }
        self.device.bind_framebuffer(None);
        Ok(())
    }

    /// Blur `region` of the backbuffer's base level into its mip chain.
    pub fn render_target_gen_back_buffer_mipmaps(
        &mut self,
        rid: RenderTargetRid,
        region: Rect2i,
    ) -> Result<(), StorageError> {
        let Some(Target {
            backbuffer,
            size,
            region,
        }) = self.back_buffer_target(rid, region)?
        else {
            return Ok(());
        };
        self.copy.gaussian_blur(
            &mut self.device,
            backbuffer.texture,
            backbuffer.mipmap_count,
            region,
            size,
        );
        Ok(())
    }

    /// Backbuffer and clipped region for a drawing operation, creating the
    /// backbuffer on first use. `None` when there is nothing to draw.
    fn back_buffer_target(
        &mut self,
        rid: RenderTargetRid,
        region: Rect2i,
    ) -> Result<Option<Target>, StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        if rt.direct_to_screen {
            return Err(StorageError::InvalidArgument(
                "direct-to-screen render targets have no backbuffer".to_owned(),
            ));
        }
        let size = rt.size;
        let region = if region == Rect2i::default() {
            Rect2i::from_size(size)
        } else {
            Rect2i::from_size(size).intersection(&region)
        };
        if !region.has_area() {
            return Ok(None);
        }
        let Some(backbuffer) = self.ensure_back_buffer(rid)? else {
            return Ok(None);
        };
        Ok(Some(Target {
            backbuffer,
            size,
            region,
        }))
    }

    /// The render target's backbuffer, created on first call.
    ///
    /// `None` for targets too small to blur and after a creation failure,
    /// which is reported once and not retried until the target is
    /// reallocated.
    fn ensure_back_buffer(&mut self, rid: RenderTargetRid) -> Result<Option<Backbuffer>, StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        if let Some(backbuffer) = rt.backbuffer {
            return Ok(Some(backbuffer));
        }
        if rt.backbuffer_failed {
            return Ok(None);
        }
        let size = rt.size;
        if size.x <= MIN_BACKBUFFER_SIZE || size.y <= MIN_BACKBUFFER_SIZE {
            log::debug!("render target {rid:?} is too small for a backbuffer");
            return Ok(None);
        }
        let (width, height) = (size.x as u32, size.y as u32);
        let count = required_mipmaps(width, height)
            .saturating_sub(SKIPPED_MIPMAPS)
            .max(1);

        let bytes: u64 = (0..count)
            .map(|level| {
                let w = u64::from((width >> level).max(1));
                let h = u64::from((height >> level).max(1));
                w * h * 4
            })
            .sum();
        let desc = TextureDesc::texture_2d(rt.color_format, width, height, LABEL_BACKBUFFER).with_levels(count);
        let texture = self.create_gpu_texture(&desc, bytes);
        let fbo = self.device.create_framebuffer();
        self.device.attach_color(fbo, Some(texture), 0);

        let status = self.device.framebuffer_status(fbo);
        if !status.is_complete() {
            log::warn!("Cannot allocate mipmaps for canvas screen blur, status: {status}");
            self.device.delete_framebuffer(fbo);
            self.delete_gpu_texture(texture);
            self.render_targets.try_get_mut(rid)?.backbuffer_failed = true;
            return Ok(None);
        }

        // Start every level from transparent black.
        self.device.bind_framebuffer(Some(fbo));
        self.device.scissor(None);
        for level in 0..count {
            self.device.attach_color(fbo, Some(texture), level);
            self.device.clear(Vec4::ZERO);
        }
        self.device.attach_color(fbo, Some(texture), 0);
        self.device.bind_framebuffer(None);
        self.device.set_sampler(
            texture,
            SamplerState {
                filter: Filter::LinearMipmap,
                repeat: false,
                base_level: 0,
            },
        );

        let backbuffer = Backbuffer {
            texture,
            fbo,
            mipmap_count: count,
        };
        self.render_targets.try_get_mut(rid)?.backbuffer = Some(backbuffer);
        log::debug!("render target {rid:?} backbuffer created with {count} levels");
        Ok(Some(backbuffer))
    }

    pub(super) fn release_backbuffer(&mut self, backbuffer: Backbuffer) {
        self.device.delete_framebuffer(backbuffer.fbo);
        self.delete_gpu_texture(backbuffer.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tier;
    use crate::gpu::InternalFormat;
    use crate::storage::test_support::{storage, HeadlessStorage};

    fn target(storage: &mut HeadlessStorage, size: i32) -> RenderTargetRid {
        let rt = storage.render_target_create().unwrap();
        storage.render_target_set_size(rt, size, size, 1).unwrap();
        rt
    }

    #[test]
    fn backbuffer_is_created_lazily_with_a_trimmed_chain() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 128);
        assert_eq!(storage.memory().count_labelled(LABEL_BACKBUFFER), 0);

        storage
            .render_target_copy_to_back_buffer(rt, Rect2i::default(), false)
            .unwrap();
        assert_eq!(storage.memory().count_labelled(LABEL_BACKBUFFER), 1);
        // 128×128 has 7 levels below the base; 4 are skipped.
        assert_eq!(storage.render_target(rt).unwrap().backbuffer_mipmaps(), Some(3));
        assert_eq!(storage.device().bound_framebuffer(), None);

        storage
            .render_target_copy_to_back_buffer(rt, Rect2i::default(), true)
            .unwrap();
        assert_eq!(storage.memory().count_labelled(LABEL_BACKBUFFER), 1);
    }

    #[test]
    fn small_targets_get_no_backbuffer() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 40);
        storage
            .render_target_gen_back_buffer_mipmaps(rt, Rect2i::default())
            .unwrap();
        assert_eq!(storage.render_target(rt).unwrap().backbuffer_mipmaps(), None);
        assert_eq!(storage.memory().count_labelled(LABEL_BACKBUFFER), 0);
    }

    #[test]
    fn copy_and_blur_fill_the_chain() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 64);
        let white = Vec4::ONE;
        storage.render_target_request_clear(rt, white).unwrap();
        storage.render_target_do_clear_request(rt).unwrap();

        storage
            .render_target_copy_to_back_buffer(rt, Rect2i::default(), true)
            .unwrap();
        let texture = storage
            .render_target(rt)
            .unwrap()
            .backbuffer
            .map(|b| b.texture)
            .unwrap();
        for level in 0..2 {
            let texels = storage.device().texels(texture, 0, level).unwrap();
            assert!(texels.iter().all(|t| (*t - white).abs().max_element() < 1e-3));
        }
        assert_eq!(storage.device().bound_framebuffer(), None);
    }

    #[test]
    fn clear_back_buffer_respects_the_region() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 64);
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        storage
            .render_target_clear_back_buffer(rt, Rect2i::new(0, 0, 32, 64), red)
            .unwrap();
        let texture = storage
            .render_target(rt)
            .unwrap()
            .backbuffer
            .map(|b| b.texture)
            .unwrap();
        let texels = storage.device().texels(texture, 0, 0).unwrap();
        assert_eq!(texels[0], red);
        assert_eq!(texels[63], Vec4::ZERO);

        // Outside the target: nothing to do.
        storage
            .render_target_clear_back_buffer(rt, Rect2i::new(100, 100, 8, 8), Vec4::ONE)
            .unwrap();
        assert_eq!(storage.device().texels(texture, 0, 0).unwrap()[0], red);
    }

    #[test]
    fn creation_failure_is_not_retried() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 64);
        let allocations = storage.memory().allocation_count();
        storage
            .device_mut()
            .reject_attachment_format(InternalFormat::Rgba8);

        storage
            .render_target_gen_back_buffer_mipmaps(rt, Rect2i::default())
            .unwrap();
        storage
            .render_target_gen_back_buffer_mipmaps(rt, Rect2i::default())
            .unwrap();
        assert_eq!(storage.memory().allocation_count(), allocations + 1);
        assert_eq!(storage.memory().count_labelled(LABEL_BACKBUFFER), 0);
    }

    #[test]
    fn direct_to_screen_targets_are_rejected() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 64);
        storage.render_target_set_direct_to_screen(rt, true).unwrap();
        assert!(storage
            .render_target_copy_to_back_buffer(rt, Rect2i::default(), false)
            .is_err());
    }

    #[test]
    fn resizing_releases_the_backbuffer() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 64);
        storage
            .render_target_gen_back_buffer_mipmaps(rt, Rect2i::default())
            .unwrap();
        assert_eq!(storage.memory().count_labelled(LABEL_BACKBUFFER), 1);
        storage.render_target_set_size(rt, 80, 80, 1).unwrap();
        assert_eq!(storage.memory().count_labelled(LABEL_BACKBUFFER), 0);
    }
}
