//! Signed distance fields of render targets.
//!
//! Canvas occluders are drawn into an R8 write texture through
//! [`render_target_sdf_framebuffer`](TextureStorage::render_target_sdf_framebuffer);
//! [`render_target_sdf_process`](TextureStorage::render_target_sdf_process)
//! then runs a jump flood over it and stores the signed distance in the read
//! texture that shaders sample.

use glam::IVec2;

use super::{DefaultTexture, RenderTargetRid, SdfOversize, SdfScale, TextureStorage};
use crate::accounting::MemoryTracker;
use crate::effects::{CopyVariant, SdfPass};
use crate::error::StorageError;
use crate::gpu::{
    FboId, Filter, GpuDevice, GpuFormat, InternalFormat, PixelType, SamplerState, TexId, TextureDesc,
    TransferFormat,
};
use crate::util::rect::Rect2i;

const WRITE_FORMAT: GpuFormat = GpuFormat::new(InternalFormat::R8, TransferFormat::Red, PixelType::UnsignedByte);
const PROCESS_FORMAT: GpuFormat = GpuFormat::new(InternalFormat::Rg16I, TransferFormat::RgInteger, PixelType::Short);

const READ_SAMPLER: SamplerState = SamplerState {
    filter: Filter::Linear,
    repeat: false,
    base_level: 0,
};

/// Textures of one distance field. Allocated and released together.
#[derive(Debug, Clone, Copy)]
pub(super) struct SdfTextures {
    pub(super) write: TexId,
    pub(super) write_fbo: FboId,
    pub(super) process: [TexId; 2],
    pub(super) read: TexId,
    pub(super) process_size: IVec2,
}

impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    /// Change the field's oversize and pass scale. Existing field textures
    /// are released when either changes.
    pub fn render_target_set_sdf_size_and_scale(
        &mut self,
        rid: RenderTargetRid,
        oversize: SdfOversize,
        scale: SdfScale,
    ) -> Result<(), StorageError> {
        let rt = self.render_targets.try_get_mut(rid)?;
        if rt.sdf_oversize == oversize && rt.sdf_scale == scale {
            return Ok(());
        }
        rt.sdf_oversize = oversize;
        rt.sdf_scale = scale;
        if let Some(sdf) = rt.sdf.take() {
            self.release_sdf(sdf);
        }
        Ok(())
    }

    /// Area covered by the field, in target pixels. Oversized fields extend
    /// past every edge by the same margin.
    pub fn render_target_sdf_rect(&self, rid: RenderTargetRid) -> Result<Rect2i, StorageError> {
        let rt = self.render_targets.try_get(rid)?;
        let margin = rt.size * rt.sdf_oversize.percent() / 100 - rt.size;
        Ok(Rect2i {
            position: -margin,
            size: rt.size + margin * 2,
        })
    }

    /// Record whether the canvas renderer uses the field this frame.
    pub fn render_target_mark_sdf_enabled(&mut self, rid: RenderTargetRid, enabled: bool) -> Result<(), StorageError> {
        self.render_targets.try_get_mut(rid)?.sdf_enabled = enabled;
        Ok(())
    }

    /// Whether the field is in use.
    pub fn render_target_is_sdf_enabled(&self, rid: RenderTargetRid) -> Result<bool, StorageError> {
        Ok(self.render_targets.try_get(rid)?.sdf_enabled)
    }

    /// Texture holding the processed field, or the default black texture
    /// while none is allocated.
    pub fn render_target_sdf_texture(&self, rid: RenderTargetRid) -> Result<Option<TexId>, StorageError> {
        if let Some(sdf) = &self.render_targets.try_get(rid)?.sdf {
            return Ok(Some(sdf.read));
        }
        Ok(self
            .default_texture(DefaultTexture::Black)
            .and_then(|black| self.textures.get(black))
            .and_then(|texture| texture.tex_id))
    }

    /// Framebuffer occluders are drawn into, allocating the field on first
    /// use.
    pub fn render_target_sdf_framebuffer(&mut self, rid: RenderTargetRid) -> Result<FboId, StorageError> {
        if let Some(sdf) = &self.render_targets.try_get(rid)?.sdf {
            return Ok(sdf.write_fbo);
        }
        let sdf = self.allocate_sdf(rid)?;
        let fbo = sdf.write_fbo;
        self.render_targets.try_get_mut(rid)?.sdf = Some(sdf);
        Ok(fbo)
    }

    /// Run the jump flood over the write texture and store signed distances
    /// in the read texture.
    ///
    /// Tiers without the distance field passes skip processing with a
    /// warning; the read texture keeps its previous contents.
    pub fn render_target_sdf_process(&mut self, rid: RenderTargetRid) -> Result<(), StorageError> {
        let rect = self.render_target_sdf_rect(rid)?;
        let rt = self.render_targets.try_get(rid)?;
        let Some(sdf) = &rt.sdf else {
            return Err(StorageError::InvalidArgument(format!(
                "render target {rid:?} has no distance field allocated"
            )));
        };
        let sdf = *sdf;
        let shift = rt.sdf_scale.shift();

        let fbo = self.device.create_framebuffer();
        self.device.bind_framebuffer(Some(fbo));
        let completed = self.run_jump_flood(fbo, sdf, rect.size, shift);
        if !completed {
            log::warn!("distance field passes unavailable, skipping processing of render target {rid:?}");
        }

        self.device.bind_texture(0, None);
        self.device.bind_texture(1, None);
        self.device.bind_framebuffer(None);
        self.device.scissor(None);
        self.device.delete_framebuffer(fbo);
        Ok(())
    }

    /// Load, process and store passes. `false` as soon as a pass cannot
    /// run.
    fn run_jump_flood(&mut self, fbo: FboId, sdf: SdfTextures, base_size: IVec2, shift: i32) -> bool {
        let SdfTextures {
            write, process, read, ..
        } = sdf;
        let size = base_size >> shift;
        let shrink = shift > 0;
        let pass = |stride| SdfPass {
            base_size,
            size,
            stride,
            shift,
        };

        // Seed edges.
        self.device.bind_texture(0, Some(write));
        self.device.attach_color(fbo, Some(process[0]), 0);
        self.device.viewport(Rect2i::from_size(size));
        self.device.scissor(Some(Rect2i::from_size(size)));
        let load = if shrink {
            CopyVariant::SdfLoadShrink
        } else {
            CopyVariant::SdfLoad
        };
        if !self.copy.sdf_pass(&mut self.device, load, pass(0)) {
            return false;
        }

        // Flood with halving strides, ping-ponging between the process
        // textures.
        let mut stride = first_stride(size);
        let mut current = 0;
        while stride > 0 {
            self.device.bind_texture(0, None);
            self.device.attach_color(fbo, Some(process[1 - current]), 0);
            self.device.bind_texture(0, Some(process[current]));
            if !self.copy.sdf_pass(&mut self.device, CopyVariant::SdfProcess, pass(stride)) {
                return false;
            }
            stride /= 2;
            current = 1 - current;
        }

        // Store signed distances at full field resolution.
        self.device.bind_texture(0, None);
        self.device.attach_color(fbo, Some(read), 0);
        self.device.bind_texture(0, Some(process[current]));
        self.device.bind_texture(1, Some(write));
        self.device.viewport(Rect2i::from_size(base_size));
        self.device.scissor(None);
        let store = if shrink {
            CopyVariant::SdfStoreShrink
        } else {
            CopyVariant::SdfStore
        };
        self.copy.sdf_pass(&mut self.device, store, pass(0))
    }

    fn allocate_sdf(&mut self, rid: RenderTargetRid) -> Result<SdfTextures, StorageError> {
        let rect = self.render_target_sdf_rect(rid)?;
        if !rect.has_area() {
            return Err(StorageError::InvalidArgument(format!(
                "render target {rid:?} has no area for a distance field"
            )));
        }
        let scale = self.render_targets.try_get(rid)?.sdf_scale;
        let (width, height) = (rect.size.x as u32, rect.size.y as u32);
        let process_size = (rect.size * scale.percent() / 100).max(IVec2::ONE);
        let (pw, ph) = (process_size.x as u32, process_size.y as u32);

        let write = self.create_gpu_texture(
            &TextureDesc::texture_2d(WRITE_FORMAT, width, height, "SDF texture"),
            u64::from(width) * u64::from(height),
        );
        let write_fbo = self.device.create_framebuffer();
        self.device.attach_color(write_fbo, Some(write), 0);

        let process_bytes = u64::from(pw) * u64::from(ph) * 4;
        let process = [
            self.create_gpu_texture(
                &TextureDesc::texture_2d(PROCESS_FORMAT, pw, ph, "SDF process texture[0]"),
                process_bytes,
            ),
            self.create_gpu_texture(
                &TextureDesc::texture_2d(PROCESS_FORMAT, pw, ph, "SDF process texture[1]"),
                process_bytes,
            ),
        ];
        let read = self.create_gpu_texture(
            &TextureDesc::texture_2d(GpuFormat::RGBA8, width, height, "SDF texture (read)"),
            u64::from(width) * u64::from(height) * 4,
        );
        self.device.set_sampler(read, READ_SAMPLER);

        let sdf = SdfTextures {
            write,
            write_fbo,
            process,
            read,
            process_size,
        };
        let status = self.device.framebuffer_status(write_fbo);
        if !status.is_complete() {
            self.release_sdf(sdf);
            return Err(StorageError::FramebufferIncomplete(status.to_string()));
        }
        log::debug!(
            "render target {rid:?} distance field allocated at {width}x{height}, passes at {pw}x{ph}"
        );
        Ok(sdf)
    }

    pub(super) fn release_sdf(&mut self, sdf: SdfTextures) {
        self.device.delete_framebuffer(sdf.write_fbo);
        for id in [sdf.read, sdf.write, sdf.process[0], sdf.process[1]] {
            self.delete_gpu_texture(id);
        }
    }
}

/// Largest power of two not above half the longest pass dimension, or 0
/// for fields a single texel wide.
fn first_stride(size: IVec2) -> i32 {
    let half = size.x.max(size.y) / 2;
    if half <= 0 {
        return 0;
    }
    1 << (31 - half.leading_zeros())
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;
    use crate::config::Tier;
    use crate::storage::test_support::{storage, HeadlessStorage};

    fn target(storage: &mut HeadlessStorage, size: i32) -> RenderTargetRid {
        let rt = storage.render_target_create().unwrap();
        storage.render_target_set_size(rt, size, size, 1).unwrap();
        rt
    }

    /// Fill `solid` of the write texture with white.
    fn draw_occluder(storage: &mut HeadlessStorage, rt: RenderTargetRid, solid: Rect2i) {
        let fbo = storage.render_target_sdf_framebuffer(rt).unwrap();
        let device = storage.device_mut();
        device.bind_framebuffer(Some(fbo));
        device.scissor(Some(solid));
        device.clear(Vec4::ONE);
        device.scissor(None);
        device.bind_framebuffer(None);
    }

    #[test]
    fn stride_starts_at_half_the_longest_side() {
        assert_eq!(first_stride(IVec2::new(32, 8)), 16);
        assert_eq!(first_stride(IVec2::new(40, 40)), 16);
        assert_eq!(first_stride(IVec2::new(3, 1)), 1);
        assert_eq!(first_stride(IVec2::ONE), 0);
    }

    #[test]
    fn oversize_grows_the_rect_on_every_side() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 100);
        assert_eq!(storage.render_target_sdf_rect(rt).unwrap(), Rect2i::new(0, 0, 100, 100));

        storage
            .render_target_set_sdf_size_and_scale(rt, SdfOversize::Percent120, SdfScale::Percent100)
            .unwrap();
        assert_eq!(storage.render_target_sdf_rect(rt).unwrap(), Rect2i::new(-20, -20, 140, 140));
    }

    #[test]
    fn field_is_allocated_on_demand_and_cleared_on_rescale() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 64);
        let black = storage
            .default_texture(DefaultTexture::Black)
            .and_then(|rid| storage.resolved(rid).ok())
            .and_then(|texture| texture.tex_id());
        assert_eq!(storage.render_target_sdf_texture(rt).unwrap(), black);

        let fbo = storage.render_target_sdf_framebuffer(rt).unwrap();
        assert_eq!(storage.render_target_sdf_framebuffer(rt).unwrap(), fbo);
        assert!(storage.render_target(rt).unwrap().has_sdf());
        assert_ne!(storage.render_target_sdf_texture(rt).unwrap(), black);
        assert_eq!(storage.memory().count_labelled("SDF process texture[1]"), 1);

        storage
            .render_target_set_sdf_size_and_scale(rt, SdfOversize::Percent100, SdfScale::Percent50)
            .unwrap();
        assert!(!storage.render_target(rt).unwrap().has_sdf());
        assert_eq!(storage.memory().count_labelled("SDF texture"), 0);

        let _ = storage.render_target_sdf_framebuffer(rt).unwrap();
        let sdf = storage.render_target(rt).unwrap().sdf.as_ref().map(|s| s.process_size);
        assert_eq!(sdf, Some(IVec2::new(32, 32)));
    }

    #[test]
    fn processing_requires_an_allocated_field() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 64);
        assert!(storage.render_target_sdf_process(rt).is_err());
    }

    #[test]
    fn empty_targets_cannot_allocate_a_field() {
        let mut storage = storage(Tier::Full);
        let rt = storage.render_target_create().unwrap();
        assert!(storage.render_target_sdf_framebuffer(rt).is_err());
    }

    #[test]
    fn jump_flood_signs_distances_around_an_occluder() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 32);
        draw_occluder(&mut storage, rt, Rect2i::new(8, 8, 16, 16));
        storage.render_target_sdf_process(rt).unwrap();

        let read = storage.render_target_sdf_texture(rt).unwrap().unwrap();
        let texels = storage.device().texels(read, 0, 0).unwrap();
        let at = |x: usize, y: usize| texels[y * 32 + x].x;
        assert!(at(16, 16) < 0.5, "inside is negative");
        assert!(at(0, 0) > 0.5, "outside is positive");
        assert!(at(0, 0) > at(4, 4), "distance grows away from the edge");
        assert_eq!(storage.device().bound_framebuffer(), None);
        assert_eq!(storage.device().bound_texture(1), None);
    }

    #[test]
    fn shrunk_passes_still_cover_the_full_field() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 32);
        storage
            .render_target_set_sdf_size_and_scale(rt, SdfOversize::Percent100, SdfScale::Percent50)
            .unwrap();
        draw_occluder(&mut storage, rt, Rect2i::new(8, 8, 16, 16));
        storage.render_target_sdf_process(rt).unwrap();

        let read = storage.render_target_sdf_texture(rt).unwrap().unwrap();
        let texels = storage.device().texels(read, 0, 0).unwrap();
        assert!(texels[16 * 32 + 16].x < 0.5);
        assert!(texels[31 * 32 + 31].x > 0.5);
        assert!(storage
            .device()
            .draw_log()
            .iter()
            .any(|(variant, _)| *variant == CopyVariant::SdfStoreShrink));
    }

    #[test]
    fn reduced_tier_skips_processing() {
        let mut storage = storage(Tier::Reduced);
        let rt = target(&mut storage, 32);
        draw_occluder(&mut storage, rt, Rect2i::new(8, 8, 16, 16));
        let framebuffers = storage.device().live_framebuffers();

        storage.render_target_sdf_process(rt).unwrap();
        let read = storage.render_target_sdf_texture(rt).unwrap().unwrap();
        assert!(storage
            .device()
            .texels(read, 0, 0)
            .unwrap()
            .iter()
            .all(|t| *t == Vec4::ZERO));
        assert_eq!(storage.device().live_framebuffers(), framebuffers);
        assert_eq!(storage.device().bound_framebuffer(), None);
    }

    #[test]
    fn freeing_the_target_releases_the_field() {
        let mut storage = storage(Tier::Full);
        let rt = target(&mut storage, 32);
        let _ = storage.render_target_sdf_framebuffer(rt).unwrap();
        storage.render_target_free(rt).unwrap();
        for label in [
            "SDF texture",
            "SDF process texture[0]",
            "SDF process texture[1]",
            "SDF texture (read)",
        ] {
            assert_eq!(storage.memory().count_labelled(label), 0, "{label}");
        }
    }
}
