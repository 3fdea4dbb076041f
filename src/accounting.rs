//! GPU memory bookkeeping.
//!
//! The storage layer reports every texture allocation, resize and release to
//! a [`MemoryTracker`]. The tracker is diagnostic only and never changes
//! storage behaviour.

use rustc_hash::FxHashMap;

use crate::gpu::TexId;

/// Receives GPU memory events.
pub trait MemoryTracker {
    /// A texture of `bytes` bytes was created.
    fn note_allocated(&mut self, id: TexId, bytes: u64, label: &str);
    /// A texture was released.
    fn note_freed(&mut self, id: TexId);
    /// A texture's storage changed size.
    fn note_resized(&mut self, id: TexId, bytes: u64);
}

/// One tracked allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// Current byte size.
    pub bytes: u64,
    /// Label supplied at allocation time.
    pub label: String,
}

/// Counting tracker that keeps a per-texture table.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    live: FxHashMap<TexId, Allocation>,
    allocations: u64,
    frees: u64,
    resizes: u64,
}

impl MemoryLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently held by live textures.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.live.values().map(|a| a.bytes).sum()
    }

    /// Number of `note_allocated` calls seen.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.allocations
    }

    /// Number of `note_freed` calls seen.
    #[must_use]
    pub fn free_count(&self) -> u64 {
        self.frees
    }

    /// Number of `note_resized` calls seen.
    #[must_use]
    pub fn resize_count(&self) -> u64 {
        self.resizes
    }

    /// Textures currently tracked.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Allocation record for `id`.
    #[must_use]
    pub fn get(&self, id: TexId) -> Option<&Allocation> {
        self.live.get(&id)
    }

    /// Number of live allocations carrying `label`.
    #[must_use]
    pub fn count_labelled(&self, label: &str) -> usize {
        self.live.values().filter(|a| a.label == label).count()
    }
}

impl MemoryTracker for MemoryLedger {
    fn note_allocated(&mut self, id: TexId, bytes: u64, label: &str) {
        self.allocations += 1;
        let previous = self.live.insert(
            id,
            Allocation {
                bytes,
                label: label.to_owned(),
            },
        );
        if let Some(previous) = previous {
            log::warn!(
                "texture {id:?} allocated twice (was '{}', now '{label}')",
                previous.label
            );
        }
    }

    fn note_freed(&mut self, id: TexId) {
        self.frees += 1;
        if self.live.remove(&id).is_none() {
            log::warn!("freeing untracked texture {id:?}");
        }
    }

    fn note_resized(&mut self, id: TexId, bytes: u64) {
        self.resizes += 1;
        match self.live.get_mut(&id) {
            Some(allocation) => allocation.bytes = bytes,
            None => log::warn!("resizing untracked texture {id:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_tracks_bytes_and_counts() {
        let mut ledger = MemoryLedger::new();
        let a = TexId::from_raw(1).unwrap();
        let b = TexId::from_raw(2).unwrap();
        ledger.note_allocated(a, 64, "Texture 2D");
        ledger.note_allocated(b, 16, "Texture atlas");
        ledger.note_resized(a, 128);
        assert_eq!(ledger.total_bytes(), 144);
        assert_eq!(ledger.count_labelled("Texture 2D"), 1);

        ledger.note_freed(a);
        assert_eq!(ledger.total_bytes(), 16);
        assert_eq!(ledger.allocation_count(), 2);
        assert_eq!(ledger.free_count(), 1);
        assert_eq!(ledger.resize_count(), 1);
        assert_eq!(ledger.live_count(), 1);
    }
}
