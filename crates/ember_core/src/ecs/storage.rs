//! # Component Storage
//!
//! Dense, per-type component storage parallel to the entity table.
//!
//! The storage uses a dense array strategy:
//! - One slot per entity slot, grown in lock-step with the entity table
//! - Access is O(1) via entity index
//! - Removal resets the slot but never shrinks the array, since slots are reused

use std::any::Any;

use super::component::Component;
use super::entity::EntityHandle;
use crate::error::CallbackError;

/// Storage for a single component type.
///
/// # Type Parameters
///
/// * `C` - The component type to store
pub struct ComponentRepository<C: Component> {
    /// The dense array of components, one per entity slot.
    data: Vec<C>,
    /// Which slots currently have the component attached.
    present: Vec<bool>,
    /// Number of attached instances.
    attached: usize,
}

impl<C: Component> Default for ComponentRepository<C> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<C: Component> ComponentRepository<C> {
    /// Creates a repository backfilled to `slot_count` default values.
    #[must_use]
    pub fn new(slot_count: usize) -> Self {
        let mut repository = Self {
            data: Vec::new(),
            present: Vec::new(),
            attached: 0,
        };
        repository.ensure_capacity(slot_count);
        repository
    }

    /// Grows the dense array to at least `slot_count` entries.
    pub fn ensure_capacity(&mut self, slot_count: usize) {
        if self.data.len() < slot_count {
            self.data.resize_with(slot_count, C::default);
            self.present.resize(slot_count, false);
        }
    }

    /// Length of the dense array.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of entities with this component attached.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.attached
    }

    /// Checks if no entity has this component.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attached == 0
    }

    /// Checks if the slot has the component attached.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.present.get(index).copied().unwrap_or(false)
    }

    /// Gets the component in a slot, if attached.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&C> {
        if self.contains(index) {
            self.data.get(index)
        } else {
            None
        }
    }

    /// Gets a mutable component in a slot, if attached.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut C> {
        if self.contains(index) {
            self.data.get_mut(index)
        } else {
            None
        }
    }

    /// Overwrites an attached component in place.
    ///
    /// # Returns
    ///
    /// `true` if the component was set, `false` if the slot has none attached.
    pub fn set(&mut self, index: usize, mut value: C, owner: EntityHandle) -> bool {
        match self.get_mut(index) {
            Some(slot) => {
                value.bind_owner(owner);
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Attaches a fresh default instance to a slot.
    pub(crate) fn insert_default(&mut self, index: usize, owner: EntityHandle) -> &mut C {
        self.ensure_capacity(index + 1);
        if !self.present[index] {
            self.present[index] = true;
            self.attached += 1;
        }
        let slot = &mut self.data[index];
        *slot = C::default();
        slot.bind_owner(owner);
        slot
    }

    /// Runs the teardown hook of an attached component.
    pub(crate) fn destroy_hook(
        &mut self,
        index: usize,
        owner: EntityHandle,
    ) -> Result<(), CallbackError> {
        match self.get_mut(index) {
            Some(component) => component.on_destroy(owner),
            None => Ok(()),
        }
    }

    /// Detaches a slot and resets it to the default value.
    pub(crate) fn reset(&mut self, index: usize) {
        if self.contains(index) {
            self.present[index] = false;
            self.attached -= 1;
            self.data[index] = C::default();
        }
    }

    /// Iterates over attached components with their slot indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &C)> {
        self.data
            .iter()
            .zip(self.present.iter())
            .enumerate()
            .filter_map(|(i, (c, &present))| present.then_some((i, c)))
    }

    /// Iterates mutably over attached components with their slot indices.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut C)> {
        self.data
            .iter_mut()
            .zip(self.present.iter())
            .enumerate()
            .filter_map(|(i, (c, &present))| present.then_some((i, c)))
    }

    /// Detaches every slot, keeping the dense array allocated.
    pub fn clear(&mut self) {
        for (slot, present) in self.data.iter_mut().zip(self.present.iter_mut()) {
            *slot = C::default();
            *present = false;
        }
        self.attached = 0;
    }
}

/// Type-erased view of a [`ComponentRepository`], used by the world for
/// operations that only know a [`ComponentTypeId`](super::ComponentTypeId).
pub(crate) trait ErasedRepository: Any + Send + Sync {
    fn type_name(&self) -> &'static str;
    fn disallow_multiple(&self) -> bool;
    fn ensure_capacity(&mut self, slot_count: usize);
    fn contains(&self, index: usize) -> bool;
    fn insert_default(&mut self, index: usize, owner: EntityHandle);
    fn destroy_hook(&mut self, index: usize, owner: EntityHandle) -> Result<(), CallbackError>;
    fn reset(&mut self, index: usize);
    /// Runs the teardown hook of every attached component, then clears.
    fn teardown(&mut self, owners: &dyn Fn(usize) -> EntityHandle);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<C: Component> ErasedRepository for ComponentRepository<C> {
    fn type_name(&self) -> &'static str {
        C::type_name()
    }

    fn disallow_multiple(&self) -> bool {
        C::DISALLOW_MULTIPLE
    }

    fn ensure_capacity(&mut self, slot_count: usize) {
        ComponentRepository::ensure_capacity(self, slot_count);
    }

    fn contains(&self, index: usize) -> bool {
        ComponentRepository::contains(self, index)
    }

    fn insert_default(&mut self, index: usize, owner: EntityHandle) {
        ComponentRepository::insert_default(self, index, owner);
    }

    fn destroy_hook(&mut self, index: usize, owner: EntityHandle) -> Result<(), CallbackError> {
        ComponentRepository::destroy_hook(self, index, owner)
    }

    fn reset(&mut self, index: usize) {
        ComponentRepository::reset(self, index);
    }

    fn teardown(&mut self, owners: &dyn Fn(usize) -> EntityHandle) {
        for (index, component) in self.iter_mut() {
            let owner = owners(index);
            if let Err(err) = component.on_destroy(owner) {
                tracing::error!(
                    "on_destroy hook of {} on {} failed during teardown: {}",
                    C::type_name(),
                    owner,
                    err
                );
            }
        }
        self.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Position {
        owner: EntityHandle,
        x: f32,
    }

    impl Component for Position {
        fn bind_owner(&mut self, owner: EntityHandle) {
            self.owner = owner;
        }
    }

    #[test]
    fn test_repository_backfills() {
        let repository: ComponentRepository<Position> = ComponentRepository::new(10);
        assert_eq!(repository.capacity(), 10);
        assert!(repository.is_empty());
        assert!(repository.get(3).is_none());
    }

    #[test]
    fn test_insert_get_set() {
        let mut repository: ComponentRepository<Position> = ComponentRepository::new(4);
        let owner = EntityHandle::new(2, 0);

        repository.insert_default(2, owner).x = 5.0;
        assert_eq!(repository.get(2).unwrap().x, 5.0);
        assert_eq!(repository.get(2).unwrap().owner, owner);

        assert!(repository.set(2, Position { owner: EntityHandle::NULL, x: 9.0 }, owner));
        let stored = repository.get(2).unwrap();
        assert_eq!(stored.x, 9.0);
        assert_eq!(stored.owner, owner, "set re-binds the owner");

        assert!(!repository.set(1, Position::default(), owner));
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut repository: ComponentRepository<Position> = ComponentRepository::new(4);
        repository.insert_default(1, EntityHandle::new(1, 0)).x = 3.0;
        assert_eq!(repository.len(), 1);

        repository.reset(1);
        assert!(repository.get(1).is_none());
        assert_eq!(repository.len(), 0);
        assert_eq!(repository.capacity(), 4);

        // Re-adding yields a fresh default, not the old value
        assert_eq!(repository.insert_default(1, EntityHandle::new(1, 1)).x, 0.0);
    }

    #[test]
    fn test_insert_beyond_capacity_grows() {
        let mut repository: ComponentRepository<Position> = ComponentRepository::new(0);
        repository.insert_default(7, EntityHandle::new(7, 0));
        assert_eq!(repository.capacity(), 8);
        assert!(repository.contains(7));
    }

    #[test]
    fn test_iter_only_attached() {
        let mut repository: ComponentRepository<Position> = ComponentRepository::new(5);
        repository.insert_default(0, EntityHandle::new(0, 0));
        repository.insert_default(3, EntityHandle::new(3, 0));
        let indices: Vec<_> = repository.iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 3]);

        repository.clear();
        assert_eq!(repository.iter().count(), 0);
        assert_eq!(repository.capacity(), 5);
    }
}
