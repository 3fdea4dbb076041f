//! Texture atlas: small textures packed into one shared texture.
//!
//! Membership is reference counted. Adding a texture that is not yet a
//! member marks the atlas dirty; removing one never does, since the packed
//! copy keeps working until the next rebuild drops it. [`pack_atlas`] is the
//! placement routine on its own, usable without a device.

use std::collections::BTreeMap;

use glam::{IVec2, Vec4};

use super::{TextureRid, TextureStorage};
use crate::accounting::MemoryTracker;
use crate::error::StorageError;
use crate::gpu::{Filter, FboId, GpuDevice, GpuFormat, SamplerState, TexId, TextureDesc, Upload};
use crate::util::rect::{Rect2, Rect2i};

/// Pixels per packing cell. Leaves a half-texel gutter around each entry.
pub const ATLAS_BORDER: i32 = 2;

const MIN_BIN_WIDTH: i32 = 8;
const LABEL_ATLAS: &str = "Texture atlas";
const LABEL_ATLAS_DEFAULT: &str = "Texture atlas (Default)";

/// Placement of one atlas member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasEntry {
    uv_rect: Rect2,
    users: u32,
}

impl AtlasEntry {
    /// Normalized rect inside the atlas texture.
    #[must_use]
    pub const fn uv_rect(&self) -> Rect2 {
        self.uv_rect
    }

    /// Outstanding `atlas_add` calls.
    #[must_use]
    pub const fn users(&self) -> u32 {
        self.users
    }
}

/// Result of [`pack_atlas`].
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasLayout {
    /// Atlas texture size in pixels.
    pub size: IVec2,
    /// Normalized rect of each input, in input order.
    pub uv_rects: Vec<Rect2>,
}

/// Pack textures of the given pixel sizes.
///
/// Each texture takes a cell of `size / ATLAS_BORDER + 1`. Cells are placed
/// tallest first on a skyline, each at the column offset giving the lowest
/// top. The bin starts at the smallest power of two that is at least 8 and
/// fits the widest cell, and doubles while the packing is more than twice
/// as tall as it is wide.
#[must_use]
pub fn pack_atlas(pixel_sizes: &[IVec2]) -> AtlasLayout {
    if pixel_sizes.is_empty() {
        return AtlasLayout {
            size: IVec2::splat(4),
            uv_rects: Vec::new(),
        };
    }
    let cells: Vec<IVec2> = pixel_sizes
        .iter()
        .map(|s| s.max(IVec2::ZERO) / ATLAS_BORDER + 1)
        .collect();
    let mut order: Vec<usize> = (0..cells.len()).collect();
    order.sort_by(|&a, &b| {
        cells[b]
            .y
            .cmp(&cells[a].y)
            .then(cells[b].x.cmp(&cells[a].x))
            .then(a.cmp(&b))
    });

    let widest = cells.iter().map(|c| c.x).max().unwrap_or(1);
    let mut bin_width = MIN_BIN_WIDTH;
    if bin_width < widest {
        bin_width = next_power_of_two(widest);
    }

    let mut positions = vec![IVec2::ZERO; cells.len()];
    let height = loop {
        let mut skyline = vec![0; bin_width as usize];
        let mut max_height = 0;
        for &i in &order {
            let cell = cells[i];
            let width = cell.x as usize;
            let mut best = (0, i32::MAX);
            for offset in 0..=(skyline.len() - width) {
                let top = skyline[offset..offset + width].iter().copied().max().unwrap_or(0);
                if top < best.1 {
                    best = (offset, top);
                }
            }
            let (offset, top) = best;
            for column in &mut skyline[offset..offset + width] {
                *column = top + cell.y;
            }
            positions[i] = IVec2::new(offset as i32, top);
            max_height = max_height.max(top + cell.y);
        }
        if max_height <= bin_width * 2 {
            break max_height;
        }
        bin_width *= 2;
    };

    let size = IVec2::new(
        bin_width * ATLAS_BORDER,
        next_power_of_two(height * ATLAS_BORDER),
    );
    let extent = size.as_vec2();
    let uv_rects = positions
        .iter()
        .zip(pixel_sizes)
        .map(|(position, pixel_size)| {
            let origin = (*position * ATLAS_BORDER + ATLAS_BORDER / 2).as_vec2();
            Rect2 {
                position: origin / extent,
                size: pixel_size.as_vec2() / extent,
            }
        })
        .collect();
    AtlasLayout { size, uv_rects }
}

fn next_power_of_two(value: i32) -> i32 {
    (value.max(1) as u32).next_power_of_two() as i32
}

/// Shared atlas texture and its members.
#[derive(Debug, Default)]
pub(super) struct TextureAtlas {
    entries: BTreeMap<TextureRid, AtlasEntry>,
    size: IVec2,
    texture: Option<TexId>,
    framebuffer: Option<FboId>,
    dirty: bool,
}

impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    /// Register one more use of `rid` in the atlas.
    pub fn atlas_add(&mut self, rid: TextureRid) -> Result<(), StorageError> {
        let _ = self.textures.try_get(rid)?;
        match self.atlas.entries.get_mut(&rid) {
            Some(entry) => entry.users += 1,
            None => {
                let entry = AtlasEntry {
                    uv_rect: Rect2::default(),
                    users: 1,
                };
                let _ = self.atlas.entries.insert(rid, entry);
                self.atlas.dirty = true;
            }
        }
        Ok(())
    }

    /// Drop one use of `rid`. The entry goes away at zero uses.
    pub fn atlas_remove(&mut self, rid: TextureRid) -> Result<(), StorageError> {
        let Some(entry) = self.atlas.entries.get_mut(&rid) else {
            return Err(StorageError::InvalidArgument(
                "texture is not in the atlas".to_owned(),
            ));
        };
        entry.users -= 1;
        if entry.users == 0 {
            let _ = self.atlas.entries.remove(&rid);
        }
        Ok(())
    }

    /// Request a rebuild if `rid` is a member whose contents changed.
    pub fn atlas_mark_dirty_on(&mut self, rid: TextureRid) {
        if self.atlas.entries.contains_key(&rid) {
            self.atlas.dirty = true;
        }
    }

    /// Drop `rid` regardless of its use count.
    pub fn atlas_forget(&mut self, rid: TextureRid) {
        let _ = self.atlas.entries.remove(&rid);
    }

    /// The atlas texture, `None` after a failed rebuild.
    #[must_use]
    pub fn atlas_texture(&self) -> Option<TexId> {
        self.atlas.texture
    }

    /// Placement of a member.
    #[must_use]
    pub fn atlas_entry(&self, rid: TextureRid) -> Option<AtlasEntry> {
        self.atlas.entries.get(&rid).copied()
    }

    /// Atlas texture size in pixels.
    #[must_use]
    pub fn atlas_size(&self) -> IVec2 {
        self.atlas.size
    }

    /// Repack and redraw the atlas if membership or contents changed.
    ///
    /// Members whose texture has been freed are dropped. An incomplete
    /// framebuffer aborts the rebuild and leaves no atlas texture.
    pub fn update_atlas(&mut self) {
        if !self.atlas.dirty {
            return;
        }
        self.atlas.dirty = false;
        self.release_atlas();

        let mut members = Vec::with_capacity(self.atlas.entries.len());
        let mut stale = Vec::new();
        for &rid in self.atlas.entries.keys() {
            match self.resolved(rid) {
                Ok(texture) => members.push((
                    rid,
                    texture.tex_id,
                    IVec2::new(texture.width as i32, texture.height as i32),
                )),
                Err(_) => stale.push(rid),
            }
        }
        for rid in stale {
            let _ = self.atlas.entries.remove(&rid);
        }

        let sizes: Vec<IVec2> = members.iter().map(|(_, _, size)| *size).collect();
        let layout = pack_atlas(&sizes);
        self.atlas.size = layout.size;
        for ((rid, _, _), uv_rect) in members.iter().zip(&layout.uv_rects) {
            if let Some(entry) = self.atlas.entries.get_mut(rid) {
                entry.uv_rect = *uv_rect;
            }
        }

        let (width, height) = (layout.size.x as u32, layout.size.y as u32);
        let desc = TextureDesc::texture_2d(GpuFormat::RGBA8, width, height, LABEL_ATLAS);
        let texture = self.create_gpu_texture(&desc, u64::from(width * height * 4));
        self.device.set_sampler(
            texture,
            SamplerState {
                filter: Filter::Linear,
                repeat: false,
                base_level: 0,
            },
        );
        let fbo = self.device.create_framebuffer();
        self.device.attach_color(fbo, Some(texture), 0);
        let status = self.device.framebuffer_status(fbo);
        if !status.is_complete() {
            self.device.delete_framebuffer(fbo);
            self.delete_gpu_texture(texture);
            log::warn!("Could not create texture atlas, status: {status}");
            return;
        }
        self.atlas.texture = Some(texture);
        self.atlas.framebuffer = Some(fbo);

        self.device.bind_framebuffer(Some(fbo));
        self.device.viewport(Rect2i::from_size(layout.size));
        self.device.scissor(None);
        self.device.clear(Vec4::ZERO);
        for ((_, tex_id, _), uv_rect) in members.iter().zip(&layout.uv_rects) {
            if tex_id.is_none() {
                continue;
            }
            self.device.bind_texture(0, *tex_id);
            self.copy.copy_to_rect(&mut self.device, *uv_rect);
        }
        self.device.bind_texture(0, None);
        self.device.bind_framebuffer(None);
        log::debug!(
            "texture atlas rebuilt: {} entries in {}x{}",
            members.len(),
            width,
            height
        );
    }

    /// Delete the atlas texture and framebuffer.
    pub(super) fn release_atlas(&mut self) {
        if let Some(texture) = self.atlas.texture.take() {
            self.delete_gpu_texture(texture);
        }
        if let Some(fbo) = self.atlas.framebuffer.take() {
            self.device.delete_framebuffer(fbo);
        }
    }

    /// Opaque black 4×4 texture standing in until the first rebuild.
    pub(super) fn create_atlas_default_texture(&mut self) {
        let desc = TextureDesc::texture_2d(GpuFormat::RGBA8, 4, 4, LABEL_ATLAS_DEFAULT);
        let texture = self.create_gpu_texture(&desc, 4 * 4 * 4);
        let pixels: Vec<u8> = [0, 0, 0, 255].repeat(16);
        let upload = Upload {
            layer: 0,
            level: 0,
            width: 4,
            height: 4,
        };
        self.device.upload(texture, upload, &pixels);
        self.atlas.texture = Some(texture);
        self.atlas.size = IVec2::splat(4);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::config::Tier;
    use crate::gpu::InternalFormat;
    use crate::image::{Image, ImageFormat};
    use crate::storage::test_support::{storage, HeadlessStorage};

    /// Just under half a texel, so rects sharing a gutter edge still pass.
    fn gutter(size: IVec2) -> Vec2 {
        Vec2::splat(0.49) / size.as_vec2()
    }

    fn assert_packed(layout: &AtlasLayout) {
        for rect in &layout.uv_rects {
            assert!(rect.position.cmpge(Vec2::ZERO).all(), "{rect:?}");
            assert!(rect.end().cmple(Vec2::ONE).all(), "{rect:?}");
        }
        let margin = gutter(layout.size);
        for (i, a) in layout.uv_rects.iter().enumerate() {
            for b in &layout.uv_rects[i + 1..] {
                assert!(!a.grow(margin).overlaps(&b.grow(margin)), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn three_squares_pack_into_a_power_of_two() {
        let layout = pack_atlas(&[IVec2::splat(8), IVec2::splat(16), IVec2::splat(32)]);
        assert_eq!(layout.size, IVec2::splat(64));
        assert!(layout.size.cmpge(IVec2::splat(32 + ATLAS_BORDER)).all());
        assert_packed(&layout);
    }

    #[test]
    fn empty_atlas_is_four_pixels() {
        let layout = pack_atlas(&[]);
        assert_eq!(layout.size, IVec2::splat(4));
        assert!(layout.uv_rects.is_empty());
    }

    #[test]
    fn tall_packings_widen_the_bin() {
        let layout = pack_atlas(&vec![IVec2::new(2, 62); 4]);
        assert!(layout.size.y <= layout.size.x * 2);
        assert_packed(&layout);
    }

    #[test]
    fn random_packings_stay_in_bounds_and_disjoint() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            let count = rng.random_range(1..24);
            let sizes: Vec<IVec2> = (0..count)
                .map(|_| IVec2::new(rng.random_range(1..96), rng.random_range(1..96)))
                .collect();
            let layout = pack_atlas(&sizes);
            assert_eq!(layout.uv_rects.len(), sizes.len());
            assert!(layout.size.x.count_ones() == 1 && layout.size.y.count_ones() == 1);
            assert_packed(&layout);
        }
    }

    fn texture(storage: &mut HeadlessStorage, size: u32, color: Vec4) -> TextureRid {
        let image = Image::filled(size, size, false, ImageFormat::Rgba8, color).unwrap();
        let rid = storage.allocate();
        storage.initialize_2d(rid, &image).unwrap();
        rid
    }

    #[test]
    fn membership_is_reference_counted() {
        let mut storage = storage(Tier::Reduced);
        let rid = texture(&mut storage, 8, Vec4::ONE);
        storage.atlas_add(rid).unwrap();
        storage.atlas_add(rid).unwrap();
        assert_eq!(storage.atlas_entry(rid).unwrap().users(), 2);
        storage.update_atlas();
        assert!(!storage.atlas.dirty);

        storage.atlas_remove(rid).unwrap();
        storage.atlas_remove(rid).unwrap();
        assert!(storage.atlas_entry(rid).is_none());
        assert!(!storage.atlas.dirty);
        assert!(storage.atlas_remove(rid).is_err());
    }

    #[test]
    fn rebuild_draws_members_into_their_rects() {
        let mut storage = storage(Tier::Reduced);
        let red = texture(&mut storage, 8, Vec4::new(1.0, 0.0, 0.0, 1.0));
        let green = texture(&mut storage, 16, Vec4::new(0.0, 1.0, 0.0, 1.0));
        let default = storage.atlas_texture().unwrap();
        storage.atlas_add(red).unwrap();
        storage.atlas_add(green).unwrap();
        storage.update_atlas();

        assert!(storage.device().texture_desc(default).is_none());
        let atlas = storage.atlas_texture().unwrap();
        let size = storage.atlas_size();
        let texels = storage.device().texels(atlas, 0, 0).unwrap();
        for (rid, color) in [(red, Vec4::new(1.0, 0.0, 0.0, 1.0)), (green, Vec4::new(0.0, 1.0, 0.0, 1.0))] {
            let rect = storage.atlas_entry(rid).unwrap().uv_rect();
            let centre = ((rect.position + rect.size * 0.5) * size.as_vec2()).as_ivec2();
            assert_eq!(texels[(centre.y * size.x + centre.x) as usize], color);
        }
        assert_eq!(storage.device().bound_framebuffer(), None);
    }

    #[test]
    fn stale_members_are_dropped_on_rebuild() {
        let mut storage = storage(Tier::Reduced);
        let rid = texture(&mut storage, 8, Vec4::ONE);
        storage.atlas_add(rid).unwrap();
        storage.release_texture(rid);
        storage.atlas.dirty = true;
        let _ = storage.atlas.entries.insert(
            rid,
            AtlasEntry {
                uv_rect: Rect2::default(),
                users: 1,
            },
        );
        storage.update_atlas();
        assert!(storage.atlas_entry(rid).is_none());
        assert_eq!(storage.atlas_size(), IVec2::splat(4));
    }

    #[test]
    fn incomplete_framebuffer_leaves_no_atlas() {
        let mut storage = storage(Tier::Reduced);
        let rid = texture(&mut storage, 8, Vec4::ONE);
        storage.atlas_add(rid).unwrap();
        storage
            .device_mut()
            .reject_attachment_format(InternalFormat::Rgba8);
        let live = storage.memory().live_count();
        storage.update_atlas();
        assert_eq!(storage.atlas_texture(), None);
        assert_eq!(storage.memory().live_count(), live - 1);
    }
}
