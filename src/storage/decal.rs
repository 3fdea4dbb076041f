//! Decals.
//!
//! The 2D renderer never draws decals, so their handles exist to satisfy
//! callers and every setter is a pass-through.

use glam::{Vec3, Vec4};

use super::{DecalRid, TextureRid, TextureStorage};
use crate::accounting::MemoryTracker;
use crate::error::StorageError;
use crate::gpu::GpuDevice;

/// Decal record. Holds no state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decal;

/// Texture slot of a decal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DecalTexture {
    Albedo,
    Normal,
    Orm,
    Emission,
}

/// Axis-aligned box.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub position: Vec3,
    /// Extent along each axis.
    pub size: Vec3,
}

impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    /// Reserve a decal handle.
    pub fn decal_allocate(&mut self) -> DecalRid {
        self.decals.allocate()
    }

    /// Initialize a reserved decal.
    pub fn decal_initialize(&mut self, rid: DecalRid) -> Result<(), StorageError> {
        self.decals.initialize(rid, Decal)
    }

    /// Free a decal.
    pub fn decal_free(&mut self, rid: DecalRid) -> Result<(), StorageError> {
        if !self.decals.owns(rid) {
            return Err(StorageError::InvalidHandle(self.decals.label()));
        }
        let _ = self.decals.free(rid);
        Ok(())
    }

    /// Bounds of a decal. Always empty.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn decal_aabb(&self, _rid: DecalRid) -> Aabb {
        Aabb::default()
    }
}

#[allow(clippy::unused_self, missing_docs)]
impl<D: GpuDevice, M: MemoryTracker> TextureStorage<D, M> {
    pub fn decal_set_size(&mut self, _rid: DecalRid, _size: Vec3) {}

    pub fn decal_set_texture(&mut self, _rid: DecalRid, _slot: DecalTexture, _texture: Option<TextureRid>) {}

    pub fn decal_set_emission_energy(&mut self, _rid: DecalRid, _energy: f32) {}

    pub fn decal_set_albedo_mix(&mut self, _rid: DecalRid, _mix: f32) {}

    pub fn decal_set_modulate(&mut self, _rid: DecalRid, _modulate: Vec4) {}

    pub fn decal_set_cull_mask(&mut self, _rid: DecalRid, _layers: u32) {}

    pub fn decal_set_distance_fade(&mut self, _rid: DecalRid, _enabled: bool, _begin: f32, _length: f32) {}

    pub fn decal_set_fade(&mut self, _rid: DecalRid, _above: f32, _below: f32) {}

    pub fn decal_set_normal_fade(&mut self, _rid: DecalRid, _fade: f32) {}
}
