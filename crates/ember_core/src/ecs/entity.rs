//! # Entity Management
//!
//! Entities are lightweight handles consisting of:
//! - An index into the entity table (and every component repository)
//! - A generation counter for safe reuse
//!
//! The [`EntityTable`] owns one [`EntityRecord`] per slot. Dead slots are
//! recycled LIFO; the generation is bumped when a slot is reused, not when
//! it dies, so a destroyed-but-unrecycled slot still reports its old
//! generation.

use std::fmt;

use super::component::ComponentTypeId;
use super::instancing::BatchId;

/// Number of distinct layers an entity can be placed on.
pub const LAYER_COUNT: u8 = 32;

/// Generational handle to an entity.
///
/// The handle is split into two parts:
/// - Lower 32 bits: slot index
/// - Upper 32 bits: generation counter for detecting stale references
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityHandle(u64);

impl EntityHandle {
    /// Creates a handle from index and generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Handle that never refers to a live entity.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this is the null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }

    /// Returns the packed `u64` representation.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuilds a handle from [`to_bits`](Self::to_bits).
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl Default for EntityHandle {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{}v{}", self.index(), self.generation())
        }
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityHandle({self})")
    }
}

/// Where an entity came from when it was instantiated from a prefab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Provenance {
    /// Identifier of the prefab asset.
    pub prefab: u64,
    /// Identifier of the object inside that prefab.
    pub local_id: u64,
}

/// Per-slot bookkeeping.
#[derive(Clone, Debug)]
pub struct EntityRecord {
    pub(crate) alive: bool,
    pub(crate) generation: u32,
    pub(crate) name: String,
    pub(crate) layer: u8,
    pub(crate) enabled: bool,
    pub(crate) components: Vec<ComponentTypeId>,
    pub(crate) pending_removal: Vec<ComponentTypeId>,
    pub(crate) provenance: Option<Provenance>,
    pub(crate) batch: Option<BatchId>,
    pub(crate) destroying: bool,
}

impl EntityRecord {
    fn fresh(generation: u32) -> Self {
        Self {
            alive: true,
            generation,
            name: String::new(),
            layer: 0,
            enabled: true,
            components: Vec::new(),
            pending_removal: Vec::new(),
            provenance: None,
            batch: None,
            destroying: false,
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layer id (`0..LAYER_COUNT`).
    #[must_use]
    pub fn layer(&self) -> u8 {
        self.layer
    }

    /// Single-bit mask for this entity's layer.
    #[must_use]
    pub fn layer_mask(&self) -> u32 {
        1u32 << self.layer
    }

    /// The entity's own enabled flag (ancestors not considered).
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Component types attached to this entity, in attach order.
    #[must_use]
    pub fn components(&self) -> &[ComponentTypeId] {
        &self.components
    }

    /// Prefab provenance, if any.
    #[must_use]
    pub fn provenance(&self) -> Option<Provenance> {
        self.provenance
    }

    /// Checks if a component type is attached.
    #[inline]
    #[must_use]
    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        self.components.contains(&id)
    }

    pub(crate) fn attach(&mut self, id: ComponentTypeId) {
        if !self.has_component(id) {
            self.components.push(id);
        }
    }

    pub(crate) fn detach(&mut self, id: ComponentTypeId) {
        self.components.retain(|&c| c != id);
        self.pending_removal.retain(|&c| c != id);
    }
}

/// Allocates and recycles entity slots.
#[derive(Debug, Default)]
pub struct EntityTable {
    records: Vec<EntityRecord>,
    /// Free list of dead slot indices for reuse.
    free_indices: Vec<u32>,
    alive_count: usize,
}

impl EntityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table with room for `capacity` slots.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            free_indices: Vec::new(),
            alive_count: 0,
        }
    }

    /// Allocates an entity, reusing a dead slot when one exists.
    pub fn create(&mut self) -> EntityHandle {
        self.alive_count += 1;

        if let Some(index) = self.free_indices.pop() {
            let record = &mut self.records[index as usize];
            // Bump on reuse to invalidate handles issued for the previous occupant
            let generation = record.generation.wrapping_add(1);
            *record = EntityRecord::fresh(generation);
            return EntityHandle::new(index, generation);
        }

        let index = u32::try_from(self.records.len()).unwrap_or(u32::MAX);
        debug_assert!(index < u32::MAX, "entity table exhausted");
        self.records.push(EntityRecord::fresh(0));
        EntityHandle::new(index, 0)
    }

    /// Checks that the handle is in range, alive, and of the current generation.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, handle: EntityHandle) -> bool {
        if handle.is_null() {
            return false;
        }
        self.records
            .get(handle.index() as usize)
            .is_some_and(|r| r.alive && r.generation == handle.generation())
    }

    /// Record for a valid handle.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: EntityHandle) -> Option<&EntityRecord> {
        if !self.is_valid(handle) {
            return None;
        }
        self.records.get(handle.index() as usize)
    }

    /// Mutable record for a valid handle.
    #[inline]
    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut EntityRecord> {
        if !self.is_valid(handle) {
            return None;
        }
        self.records.get_mut(handle.index() as usize)
    }

    /// Live handle stored in a slot, if that slot is alive.
    #[inline]
    #[must_use]
    pub fn handle_at(&self, index: usize) -> Option<EntityHandle> {
        let record = self.records.get(index)?;
        if !record.alive {
            return None;
        }
        u32::try_from(index)
            .ok()
            .map(|i| EntityHandle::new(i, record.generation))
    }

    /// Live handle in a slot that queries may visit.
    ///
    /// Entities still inside an unfinished instancing batch are skipped.
    #[inline]
    pub(crate) fn queryable_at(&self, index: usize) -> Option<EntityHandle> {
        let record = self.records.get(index)?;
        if record.batch.is_some() {
            return None;
        }
        self.handle_at(index)
    }

    /// Record stored in a slot, alive or not.
    #[inline]
    #[must_use]
    pub fn record_at(&self, index: usize) -> Option<&EntityRecord> {
        self.records.get(index)
    }

    /// Marks a slot dead and returns it to the free list.
    ///
    /// The generation is left untouched until the slot is reused.
    pub(crate) fn release(&mut self, handle: EntityHandle) -> bool {
        let Some(record) = self.get_mut(handle) else {
            return false;
        };
        record.alive = false;
        record.destroying = false;
        record.components.clear();
        record.pending_removal.clear();
        record.name.clear();
        record.provenance = None;
        record.batch = None;
        self.alive_count -= 1;
        self.free_indices.push(handle.index());
        true
    }

    /// Number of slots ever allocated (alive or dead).
    #[inline]
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.records.len()
    }

    /// Number of currently alive entities.
    #[inline]
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Iterates over all live handles in slot order.
    pub fn iter(&self) -> impl Iterator<Item = EntityHandle> + '_ {
        (0..self.records.len()).filter_map(|i| self.handle_at(i))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn released_handles_never_validate(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let mut table = EntityTable::new();
            let mut live = Vec::new();
            let mut dead = Vec::new();

            for create in ops {
                if create || live.is_empty() {
                    live.push(table.create());
                } else {
                    let handle = live.swap_remove(0);
                    prop_assert!(table.release(handle));
                    dead.push(handle);
                }
            }

            for handle in &live {
                prop_assert!(table.is_valid(*handle));
            }
            for handle in &dead {
                prop_assert!(!table.is_valid(*handle));
            }
            prop_assert_eq!(table.alive_count(), live.len());
        }
    }
}
