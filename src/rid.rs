//! Generation-checked resource handles and the arena that owns them.
//!
//! A [`Rid`] is an index into an [`Owner`] slot plus the generation the slot
//! had when the handle was issued. Freeing a slot bumps its generation, so
//! stale handles resolve to `None` instead of aliasing a newer resource.
//!
//! A slot is in one of three states: free, reserved (handed out by
//! [`Owner::allocate`] but not yet initialized), or live.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::StorageError;

/// Opaque handle to a `T` stored in an [`Owner<T>`].
pub struct Rid<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Rid<T> {
    const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when this handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packed identity, never zero for an issued handle.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
}

impl<T> Clone for Rid<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Rid<T> {}

impl<T> PartialEq for Rid<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Rid<T> {}

impl<T> Hash for Rid<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bits().hash(state);
    }
}

impl<T> PartialOrd for Rid<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Rid<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_bits().cmp(&other.to_bits())
    }
}

impl<T> fmt::Debug for Rid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rid({}v{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Free,
    Reserved,
    Live(T),
}

struct Entry<T> {
    generation: u32,
    slot: Slot<T>,
}

/// Arena of `T` values addressed by [`Rid<T>`].
pub struct Owner<T> {
    entries: Vec<Entry<T>>,
    free_list: Vec<u32>,
    label: &'static str,
}

impl<T> Owner<T> {
    /// Empty arena; `label` names the resource kind in diagnostics.
    #[must_use]
    pub const fn new(label: &'static str) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            label,
        }
    }

    /// Resource kind named in diagnostics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Reserve a slot without a value.
    pub fn allocate(&mut self) -> Rid<T> {
        if let Some(index) = self.free_list.pop() {
            let entry = &mut self.entries[index as usize];
            entry.slot = Slot::Reserved;
            return Rid::new(index, entry.generation);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 1,
            slot: Slot::Reserved,
        });
        Rid::new(index, 1)
    }

    /// Attach `value` to a reserved slot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidHandle`] if `rid` is stale or the slot
    /// is not in the reserved state.
    pub fn initialize(&mut self, rid: Rid<T>, value: T) -> Result<(), StorageError> {
        let label = self.label;
        let entry = self
            .entry_mut(rid)
            .ok_or(StorageError::InvalidHandle(label))?;
        if !matches!(entry.slot, Slot::Reserved) {
            return Err(StorageError::InvalidHandle(label));
        }
        entry.slot = Slot::Live(value);
        Ok(())
    }

    /// Allocate and initialize in one step.
    pub fn insert(&mut self, value: T) -> Rid<T> {
        let rid = self.allocate();
        if let Some(entry) = self.entry_mut(rid) {
            entry.slot = Slot::Live(value);
        }
        rid
    }

    /// Whether `rid` refers to a reserved or live slot.
    #[must_use]
    pub fn owns(&self, rid: Rid<T>) -> bool {
        self.entry(rid)
            .is_some_and(|e| !matches!(e.slot, Slot::Free))
    }

    /// Whether `rid` was allocated but never initialized.
    #[must_use]
    pub fn is_reserved(&self, rid: Rid<T>) -> bool {
        self.entry(rid)
            .is_some_and(|e| matches!(e.slot, Slot::Reserved))
    }

    /// Live value behind `rid`.
    #[must_use]
    pub fn get(&self, rid: Rid<T>) -> Option<&T> {
        match &self.entry(rid)?.slot {
            Slot::Live(value) => Some(value),
            _ => None,
        }
    }

    /// Mutable live value behind `rid`.
    pub fn get_mut(&mut self, rid: Rid<T>) -> Option<&mut T> {
        match &mut self.entry_mut(rid)?.slot {
            Slot::Live(value) => Some(value),
            _ => None,
        }
    }

    /// Live value behind `rid`, or [`StorageError::InvalidHandle`].
    ///
    /// # Errors
    ///
    /// Fails when the handle is stale, free or only reserved.
    pub fn try_get(&self, rid: Rid<T>) -> Result<&T, StorageError> {
        self.get(rid).ok_or(StorageError::InvalidHandle(self.label))
    }

    /// Mutable live value behind `rid`, or [`StorageError::InvalidHandle`].
    ///
    /// # Errors
    ///
    /// Fails when the handle is stale, free or only reserved.
    pub fn try_get_mut(&mut self, rid: Rid<T>) -> Result<&mut T, StorageError> {
        let label = self.label;
        self.get_mut(rid).ok_or(StorageError::InvalidHandle(label))
    }

    /// Release the slot, returning its value if it was live.
    ///
    /// Freeing a reserved slot is allowed and returns `None`.
    pub fn free(&mut self, rid: Rid<T>) -> Option<T> {
        let entry = self.entry_mut(rid)?;
        let slot = std::mem::replace(&mut entry.slot, Slot::Free);
        if matches!(slot, Slot::Free) {
            return None;
        }
        entry.generation = entry.generation.wrapping_add(1).max(1);
        self.free_list.push(rid.index);
        match slot {
            Slot::Live(value) => Some(value),
            _ => None,
        }
    }

    /// Handles of every live value.
    #[must_use]
    pub fn rids(&self) -> Vec<Rid<T>> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e.slot, Slot::Live(_)))
            .map(|(i, e)| Rid::new(i as u32, e.generation))
            .collect()
    }

    /// Number of live values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.slot, Slot::Live(_)))
            .count()
    }

    /// Whether no value is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, rid: Rid<T>) -> Option<&Entry<T>> {
        self.entries
            .get(rid.index as usize)
            .filter(|e| e.generation == rid.generation)
    }

    fn entry_mut(&mut self, rid: Rid<T>) -> Option<&mut Entry<T>> {
        self.entries
            .get_mut(rid.index as usize)
            .filter(|e| e.generation == rid.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_slot_is_owned_but_not_readable() {
        let mut owner: Owner<u32> = Owner::new("value");
        let rid = owner.allocate();
        assert!(owner.owns(rid));
        assert!(owner.is_reserved(rid));
        assert!(owner.get(rid).is_none());

        owner.initialize(rid, 7).unwrap();
        assert_eq!(owner.get(rid), Some(&7));
        assert!(owner.initialize(rid, 8).is_err());
    }

    #[test]
    fn stale_handle_does_not_alias_reused_slot() {
        let mut owner = Owner::new("value");
        let first = owner.insert(1_u32);
        assert_eq!(owner.free(first), Some(1));

        let second = owner.insert(2_u32);
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(owner.get(first).is_none());
        assert!(!owner.owns(first));
        assert_eq!(owner.get(second), Some(&2));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut owner = Owner::new("value");
        let rid = owner.insert(3_u8);
        assert!(owner.free(rid).is_some());
        assert!(owner.free(rid).is_none());
        assert_eq!(owner.len(), 0);
    }

    #[test]
    fn rids_lists_only_live_values() {
        let mut owner = Owner::new("value");
        let a = owner.insert('a');
        let _reserved = owner.allocate();
        let b = owner.insert('b');
        let _ = owner.free(a);
        assert_eq!(owner.rids(), vec![b]);
    }

    #[test]
    fn try_get_reports_label() {
        let mut owner: Owner<i32> = Owner::new("render target");
        let rid = owner.allocate();
        let err = owner.try_get(rid).unwrap_err();
        assert_eq!(err.to_string(), "invalid render target handle");
    }
}
