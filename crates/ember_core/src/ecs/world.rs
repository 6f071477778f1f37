//! # ECS World
//!
//! The central container for all entities and components.
//!
//! Every operation is handle-checked: a stale, dead, or out-of-range handle
//! turns the call into a no-op that returns `None`/`false`, with a
//! diagnostic at `trace` level (or `warn`, see
//! [`WorldConfig::warn_on_stale_handles`]).

use super::callback::{CallbackRegistry, ComponentCallback, ComponentEvent, SubscriptionId};
use super::component::{Component, ComponentTypeId, Implements};
use super::entity::{EntityHandle, EntityRecord, EntityTable, Provenance, LAYER_COUNT};
use super::instancing::{BatchId, InstancingBatch};
use super::query::Query;
use super::registry::ComponentRegistry;
use super::transform::{Hierarchy, Transform};
use crate::config::WorldConfig;
use crate::error::{CallbackError, WorldError, WorldResult};

use std::sync::Arc;

/// The ECS World - container for all simulation state.
///
/// # Example
///
/// ```rust
/// use ember_core::{Component, World};
///
/// #[derive(Default)]
/// struct Health(u32);
/// impl Component for Health {}
///
/// let mut world = World::new();
/// let entity = world.create_entity();
/// world.add_component::<Health>(entity).unwrap().0 = 5;
/// assert_eq!(world.get_component::<Health>(entity).unwrap().0, 5);
/// ```
pub struct World {
    pub(crate) entities: EntityTable,
    pub(crate) registry: ComponentRegistry,
    pub(crate) hierarchy: Hierarchy,
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) config: WorldConfig,
    pub(crate) transform_id: ComponentTypeId,
    /// Bumped every time a transform's world cache is recomputed.
    pub(crate) transform_epoch: u64,
    next_batch: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates a world with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Creates a world from a configuration.
    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        let mut registry = ComponentRegistry::default();
        let transform_id = registry.register::<Transform>(0);
        tracing::debug!("world '{}' created", config.label);

        Self {
            entities: EntityTable::with_capacity(config.initial_capacity),
            registry,
            hierarchy: Hierarchy::default(),
            callbacks: CallbackRegistry::default(),
            config,
            transform_id,
            transform_epoch: 0,
            next_batch: 0,
        }
    }

    /// The configuration this world was built with.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub(crate) fn stale(&self, operation: &str, entity: EntityHandle) {
        if self.config.warn_on_stale_handles {
            tracing::warn!("[{}] {} ignored: invalid handle {}", self.config.label, operation, entity);
        } else {
            tracing::trace!("[{}] {} ignored: invalid handle {}", self.config.label, operation, entity);
        }
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Creates an entity, reusing a dead slot when one exists.
    pub fn create_entity(&mut self) -> EntityHandle {
        let entity = self.entities.create();
        self.registry.ensure_capacity(self.entities.slot_count());
        tracing::debug!("[{}] created entity {}", self.config.label, entity);
        entity
    }

    /// Creates an entity with a display name.
    pub fn create_named(&mut self, name: impl Into<String>) -> EntityHandle {
        let entity = self.create_entity();
        self.set_name(entity, name);
        entity
    }

    /// Checks if a handle refers to a live entity.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, entity: EntityHandle) -> bool {
        self.entities.is_valid(entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Number of entity slots, alive or dead.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.entities.slot_count()
    }

    /// Iterates over live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = EntityHandle> + '_ {
        self.entities.iter()
    }

    /// Destroys an entity and, recursively, its transform children.
    ///
    /// Order: detach from the parent, destroy children depth-first, remove
    /// every component (hooks and remove callbacks fire), then free the slot.
    ///
    /// # Returns
    ///
    /// `false` if the handle was invalid or the entity is already being
    /// destroyed.
    pub fn destroy_entity(&mut self, entity: EntityHandle) -> bool {
        let Some(record) = self.entities.get_mut(entity) else {
            self.stale("destroy_entity", entity);
            return false;
        };
        if record.destroying {
            return false;
        }
        record.destroying = true;

        let children = self.children(entity).to_vec();
        self.detach_from_parent(entity);
        for child in children {
            self.destroy_entity(child);
        }

        let index = entity.index() as usize;
        let attached = self
            .entities
            .get(entity)
            .map(|r| r.components.clone())
            .unwrap_or_default();
        for id in attached.into_iter().rev() {
            let in_progress = self
                .entities
                .get(entity)
                .map_or(true, |r| r.pending_removal.contains(&id) || !r.has_component(id));
            if !in_progress {
                // Errors here only mean a callback already detached it
                let _ = self.detach_component(entity, id);
            }
        }

        // Anything added during teardown, or mid-removal further up the stack
        let leftovers = self
            .entities
            .get(entity)
            .map(|r| r.components.clone())
            .unwrap_or_default();
        for id in leftovers {
            if let Some(repository) = self.registry.erased_mut(id) {
                repository.reset(index);
            }
        }

        self.hierarchy.clear_slot(index);
        self.entities.release(entity);
        tracing::debug!("[{}] destroyed entity {}", self.config.label, entity);
        true
    }

    /// Destroys every entity and resets every repository.
    pub fn clear(&mut self) {
        let live: Vec<_> = self.entities.iter().collect();
        for entity in live {
            if self.is_valid(entity) {
                self.destroy_entity(entity);
            }
        }
        tracing::debug!("[{}] cleared", self.config.label);
    }

    /// Bookkeeping record of a live entity.
    #[must_use]
    pub fn record(&self, entity: EntityHandle) -> Option<&EntityRecord> {
        self.entities.get(entity)
    }

    /// Display name of an entity.
    #[must_use]
    pub fn name(&self, entity: EntityHandle) -> Option<&str> {
        self.entities.get(entity).map(|r| r.name())
    }

    /// Renames an entity. Returns `false` on an invalid handle.
    pub fn set_name(&mut self, entity: EntityHandle, name: impl Into<String>) -> bool {
        match self.entities.get_mut(entity) {
            Some(record) => {
                record.name = name.into();
                true
            }
            None => {
                self.stale("set_name", entity);
                false
            }
        }
    }

    /// Layer id of an entity.
    #[must_use]
    pub fn layer(&self, entity: EntityHandle) -> Option<u8> {
        self.entities.get(entity).map(|r| r.layer())
    }

    /// Moves an entity to a layer (`0..LAYER_COUNT`).
    pub fn set_layer(&mut self, entity: EntityHandle, layer: u8) -> bool {
        if layer >= LAYER_COUNT {
            tracing::warn!("[{}] layer {} out of range for {}", self.config.label, layer, entity);
            return false;
        }
        match self.entities.get_mut(entity) {
            Some(record) => {
                record.layer = layer;
                true
            }
            None => {
                self.stale("set_layer", entity);
                false
            }
        }
    }

    /// Sets an entity's own enabled flag.
    pub fn set_enabled(&mut self, entity: EntityHandle, enabled: bool) -> bool {
        match self.entities.get_mut(entity) {
            Some(record) => {
                record.enabled = enabled;
                true
            }
            None => {
                self.stale("set_enabled", entity);
                false
            }
        }
    }

    /// Checks if an entity is enabled.
    ///
    /// With `check_ancestors`, every transform ancestor must be enabled too.
    /// Invalid handles are never enabled.
    #[must_use]
    pub fn is_enabled(&self, entity: EntityHandle, check_ancestors: bool) -> bool {
        if !self.entities.get(entity).is_some_and(|r| r.enabled()) {
            return false;
        }
        if !check_ancestors {
            return true;
        }

        let mut current = self.parent(entity);
        let mut depth = 0;
        while let Some(ancestor) = current {
            if !self.entities.get(ancestor).is_some_and(|r| r.enabled()) {
                return false;
            }
            depth += 1;
            if depth > self.config.max_hierarchy_depth {
                break;
            }
            current = self.parent(ancestor);
        }
        true
    }

    /// Prefab provenance of an entity.
    #[must_use]
    pub fn provenance(&self, entity: EntityHandle) -> Option<Provenance> {
        self.entities.get(entity).and_then(|r| r.provenance())
    }

    /// Records which prefab an entity was instantiated from.
    pub fn set_provenance(&mut self, entity: EntityHandle, provenance: Provenance) -> bool {
        match self.entities.get_mut(entity) {
            Some(record) => {
                record.provenance = Some(provenance);
                true
            }
            None => {
                self.stale("set_provenance", entity);
                false
            }
        }
    }

    // =========================================================================
    // Component types
    // =========================================================================

    /// Registers a component type up front (it otherwise registers on first use).
    pub fn register_component<T: Component>(&mut self) -> ComponentTypeId {
        self.registry.register::<T>(self.entities.slot_count())
    }

    /// Id of a registered component type.
    #[must_use]
    pub fn component_type_id<T: Component>(&self) -> Option<ComponentTypeId> {
        self.registry.id_of::<T>()
    }

    /// Looks up a component type by full or short type name.
    #[must_use]
    pub fn component_type_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.registry.id_by_name(name)
    }

    /// Full type name of a registered component type.
    #[must_use]
    pub fn component_name(&self, id: ComponentTypeId) -> Option<&'static str> {
        self.registry.name_of(id)
    }

    /// Number of registered component types.
    #[must_use]
    pub fn component_type_count(&self) -> usize {
        self.registry.len()
    }

    /// Components attached to an entity, in attach order.
    #[must_use]
    pub fn component_types(&self, entity: EntityHandle) -> Vec<(ComponentTypeId, &'static str)> {
        self.entities
            .get(entity)
            .map(|r| {
                r.components()
                    .iter()
                    .filter_map(|&id| self.registry.name_of(id).map(|name| (id, name)))
                    .collect()
            })
            .unwrap_or_default()
    }

    // =========================================================================
    // Component CRUD
    // =========================================================================

    fn attach_erased(
        &mut self,
        entity: EntityHandle,
        id: ComponentTypeId,
        batch: Option<&mut InstancingBatch>,
    ) -> WorldResult<()> {
        if !self.entities.is_valid(entity) {
            self.stale("add_component", entity);
            return Err(WorldError::InvalidHandle(entity));
        }

        let index = entity.index() as usize;
        let slot_count = self.entities.slot_count();
        let Some(repository) = self.registry.erased_mut(id) else {
            return Err(WorldError::UnknownComponentName(id.to_string()));
        };
        repository.ensure_capacity(slot_count);

        let removing = self
            .entities
            .get(entity)
            .is_some_and(|r| r.pending_removal.contains(&id));
        if removing {
            let component = repository.type_name();
            tracing::warn!(
                "[{}] {} is removing its {} component; add refused",
                self.config.label,
                entity,
                component
            );
            return Err(WorldError::RemovalInProgress { entity, component });
        }

        if repository.contains(index) {
            if repository.disallow_multiple() {
                let component = repository.type_name();
                tracing::warn!(
                    "[{}] {} already has a {} component; second add refused",
                    self.config.label,
                    entity,
                    component
                );
                return Err(WorldError::DuplicateComponent { entity, component });
            }
            return Ok(());
        }

        repository.insert_default(index, entity);
        if let Some(record) = self.entities.get_mut(entity) {
            record.attach(id);
        }

        match batch {
            Some(batch) => batch.defer(entity, id),
            None => self.dispatch(ComponentEvent::Added, id, entity),
        }
        Ok(())
    }

    fn attached_mut<T: Component>(&mut self, entity: EntityHandle) -> WorldResult<&mut T> {
        self.get_component_mut::<T>(entity)
            .ok_or(WorldError::MissingComponent {
                entity,
                component: T::type_name(),
            })
    }

    /// Adds a component, returning the attached instance.
    ///
    /// Adding a type the entity already has returns the existing instance,
    /// except for [`Component::DISALLOW_MULTIPLE`] types, where the second
    /// add is refused.
    ///
    /// # Errors
    ///
    /// [`WorldError::InvalidHandle`], [`WorldError::DuplicateComponent`],
    /// [`WorldError::RemovalInProgress`] when called from a remove callback
    /// of the same type, or [`WorldError::MissingComponent`] if an add
    /// callback removed it again.
    pub fn try_add_component<T: Component>(&mut self, entity: EntityHandle) -> WorldResult<&mut T> {
        let id = self.registry.register::<T>(self.entities.slot_count());
        self.attach_erased(entity, id, None)?;
        self.attached_mut::<T>(entity)
    }

    /// Adds a component; `None` on an invalid handle or refused duplicate.
    pub fn add_component<T: Component>(&mut self, entity: EntityHandle) -> Option<&mut T> {
        self.try_add_component::<T>(entity).ok()
    }

    /// Adds a component by its registered full or short type name.
    ///
    /// # Errors
    ///
    /// [`WorldError::UnknownComponentName`] if no type has that name, plus
    /// the errors of [`try_add_component`](Self::try_add_component).
    pub fn add_component_by_name(
        &mut self,
        entity: EntityHandle,
        name: &str,
    ) -> WorldResult<ComponentTypeId> {
        let Some(id) = self.registry.id_by_name(name) else {
            tracing::warn!("[{}] unknown component type '{}'", self.config.label, name);
            return Err(WorldError::UnknownComponentName(name.to_owned()));
        };
        self.attach_erased(entity, id, None)?;
        Ok(id)
    }

    pub(crate) fn detach_component(
        &mut self,
        entity: EntityHandle,
        id: ComponentTypeId,
    ) -> WorldResult<()> {
        if !self.entities.is_valid(entity) {
            self.stale("remove_component", entity);
            return Err(WorldError::InvalidHandle(entity));
        }

        let index = entity.index() as usize;
        let component = self.registry.name_of(id).unwrap_or("<unregistered>");
        let Some(repository) = self.registry.erased_mut(id) else {
            return Err(WorldError::MissingComponent { entity, component });
        };
        if !repository.contains(index) {
            return Err(WorldError::MissingComponent { entity, component });
        }

        match self.entities.get_mut(entity) {
            // Already being removed further up the stack
            Some(record) if record.pending_removal.contains(&id) => {
                return Err(WorldError::MissingComponent { entity, component });
            }
            Some(record) => record.pending_removal.push(id),
            None => return Err(WorldError::InvalidHandle(entity)),
        }

        let mut scope = RemovalScope {
            world: self,
            entity,
            id,
        };
        scope.world.run_removal(entity, id, component);
        Ok(())
    }

    fn run_removal(&mut self, entity: EntityHandle, id: ComponentTypeId, component: &'static str) {
        let index = entity.index() as usize;
        if let Some(Err(err)) = self
            .registry
            .erased_mut(id)
            .map(|repository| repository.destroy_hook(index, entity))
        {
            tracing::error!(
                "[{}] on_destroy hook of {} on {} failed: {}",
                self.config.label,
                component,
                entity,
                err
            );
        }

        // Entities of an unfinished batch never announced their components
        let announced = self.entities.get(entity).is_some_and(|r| r.batch.is_none());
        if announced {
            self.dispatch(ComponentEvent::Removed, id, entity);
        }

        // A remove callback may have destroyed the entity; destruction already reset the slot
        if !self.entities.is_valid(entity) {
            return;
        }

        if id == self.transform_id {
            self.detach_hierarchy(entity);
        }
        if let Some(repository) = self.registry.erased_mut(id) {
            repository.reset(index);
        }
        if let Some(record) = self.entities.get_mut(entity) {
            record.detach(id);
        }
    }

    /// Removes a component.
    ///
    /// The type's `on_destroy` hook runs first, then remove callbacks (which
    /// can still read the component), then the slot is reset.
    ///
    /// # Errors
    ///
    /// [`WorldError::InvalidHandle`] or [`WorldError::MissingComponent`].
    pub fn try_remove_component<T: Component>(&mut self, entity: EntityHandle) -> WorldResult<()> {
        let Some(id) = self.registry.id_of::<T>() else {
            return Err(WorldError::MissingComponent {
                entity,
                component: T::type_name(),
            });
        };
        self.detach_component(entity, id)
    }

    /// Removes a component; `false` if nothing was removed.
    pub fn remove_component<T: Component>(&mut self, entity: EntityHandle) -> bool {
        self.try_remove_component::<T>(entity).is_ok()
    }

    /// Removes a component by type id; `false` if nothing was removed.
    pub fn remove_component_by_id(&mut self, entity: EntityHandle, id: ComponentTypeId) -> bool {
        self.detach_component(entity, id).is_ok()
    }

    /// Gets a component.
    #[must_use]
    pub fn get_component<T: Component>(&self, entity: EntityHandle) -> Option<&T> {
        if !self.entities.is_valid(entity) {
            self.stale("get_component", entity);
            return None;
        }
        self.registry
            .repository::<T>()?
            .get(entity.index() as usize)
    }

    /// Gets a component mutably.
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityHandle) -> Option<&mut T> {
        if !self.entities.is_valid(entity) {
            self.stale("get_component_mut", entity);
            return None;
        }
        self.registry
            .repository_mut::<T>()?
            .get_mut(entity.index() as usize)
    }

    /// Gets a copy of a component.
    #[must_use]
    pub fn try_get_component<T: Component + Clone>(&self, entity: EntityHandle) -> Option<T> {
        self.get_component::<T>(entity).cloned()
    }

    /// Checks if an entity has a component.
    #[must_use]
    pub fn has_component<T: Component>(&self, entity: EntityHandle) -> bool {
        self.get_component::<T>(entity).is_some()
    }

    /// Checks if an entity has a component, by type id.
    #[must_use]
    pub fn has_component_id(&self, entity: EntityHandle, id: ComponentTypeId) -> bool {
        self.entities.is_valid(entity)
            && self
                .registry
                .erased(id)
                .is_some_and(|r| r.contains(entity.index() as usize))
    }

    /// Overwrites an attached component in place.
    ///
    /// Returns `false` if the handle is invalid or the component is not
    /// attached. Overwriting a [`Transform`] keeps the entity's place in the
    /// hierarchy.
    pub fn set_component<T: Component>(&mut self, entity: EntityHandle, value: T) -> bool {
        if !self.entities.is_valid(entity) {
            self.stale("set_component", entity);
            return false;
        }
        self.registry
            .repository_mut::<T>()
            .is_some_and(|r| r.set(entity.index() as usize, value, entity))
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    fn subscribe<T, F>(&mut self, event: ComponentEvent, callback: F) -> SubscriptionId
    where
        T: Component,
        F: Fn(&mut World, EntityHandle) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let id = self.registry.register::<T>(self.entities.slot_count());
        let callback: ComponentCallback = Arc::new(callback);
        self.callbacks.subscribe(event, id, callback)
    }

    /// Subscribes to `T` being added to any entity.
    pub fn on_component_added<T, F>(&mut self, callback: F) -> SubscriptionId
    where
        T: Component,
        F: Fn(&mut World, EntityHandle) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.subscribe::<T, F>(ComponentEvent::Added, callback)
    }

    /// Subscribes to `T` being removed from any entity.
    pub fn on_component_removed<T, F>(&mut self, callback: F) -> SubscriptionId
    where
        T: Component,
        F: Fn(&mut World, EntityHandle) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.subscribe::<T, F>(ComponentEvent::Removed, callback)
    }

    /// Cancels a subscription. Safe to call from inside a callback.
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        self.callbacks.unsubscribe(subscription)
    }

    /// Number of live subscribers for an event on a component type.
    #[must_use]
    pub fn subscriber_count<T: Component>(&self, event: ComponentEvent) -> usize {
        self.registry
            .id_of::<T>()
            .map_or(0, |id| self.callbacks.subscriber_count(event, id))
    }

    pub(crate) fn dispatch(&mut self, event: ComponentEvent, id: ComponentTypeId, entity: EntityHandle) {
        let subscribers = self.callbacks.snapshot(event, id);
        if subscribers.is_empty() {
            return;
        }

        let mut scope = DispatchScope::begin(self);
        for (subscription, callback) in subscribers {
            // Unsubscribed by an earlier callback in this dispatch
            if !scope.world.callbacks.is_live(subscription) {
                continue;
            }
            if let Err(err) = callback(&mut *scope.world, entity) {
                tracing::error!(
                    "[{}] component {} callback for {} on {} failed: {}",
                    scope.world.config.label,
                    event,
                    scope.world.registry.name_of(id).unwrap_or("<unregistered>"),
                    entity,
                    err
                );
            }
        }
    }

    // =========================================================================
    // Interfaces
    // =========================================================================

    /// Declares that component `C` can be viewed as interface `I`.
    pub fn register_interface<C, I>(&mut self) -> ComponentTypeId
    where
        C: Implements<I>,
        I: ?Sized + 'static,
    {
        self.registry
            .register_interface::<C, I>(self.entities.slot_count())
    }

    /// Every component on `entity` implementing `I`, in registration order.
    #[must_use]
    pub fn get_interfaces<I: ?Sized + 'static>(&self, entity: EntityHandle) -> Vec<&I> {
        if !self.entities.is_valid(entity) {
            self.stale("get_interfaces", entity);
            return Vec::new();
        }
        let index = entity.index() as usize;
        self.registry
            .interface_entries::<I>()
            .into_iter()
            .filter_map(|entry| (entry.view)(self.registry.erased(entry.component)?, index))
            .collect()
    }

    /// Visits every component implementing `I`, in slot order.
    ///
    /// An entity carrying several implementing components is visited once
    /// per component.
    pub fn for_each_interface<I: ?Sized + 'static>(
        &mut self,
        mut f: impl FnMut(EntityHandle, &mut I),
    ) {
        let entries = self.registry.interface_entries::<I>();
        if entries.is_empty() {
            return;
        }
        for index in 0..self.entities.slot_count() {
            let Some(entity) = self.entities.queryable_at(index) else {
                continue;
            };
            for entry in &entries {
                let Some(repository) = self.registry.erased_mut(entry.component) else {
                    continue;
                };
                if let Some(view) = (entry.view_mut)(repository, index) {
                    f(entity, view);
                }
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Visits every entity carrying all components of `Q`, in slot order.
    ///
    /// `Q` is a tuple of one to five component types.
    ///
    /// ```rust
    /// use ember_core::{Component, World};
    ///
    /// #[derive(Default)]
    /// struct Position(f32);
    /// impl Component for Position {}
    ///
    /// #[derive(Default)]
    /// struct Velocity(f32);
    /// impl Component for Velocity {}
    ///
    /// let mut world = World::new();
    /// let e = world.create_entity();
    /// world.add_component::<Position>(e);
    /// world.add_component::<Velocity>(e).unwrap().0 = 2.0;
    ///
    /// world.for_each::<(Position, Velocity)>(|_, (p, v)| p.0 += v.0);
    /// assert_eq!(world.get_component::<Position>(e).unwrap().0, 2.0);
    /// ```
    pub fn for_each<Q: Query>(&mut self, f: impl FnMut(EntityHandle, Q::Item<'_>)) {
        Q::for_each(self, f);
    }

    // =========================================================================
    // Instancing
    // =========================================================================

    /// Opens an instancing batch.
    pub fn begin_instancing(&mut self) -> InstancingBatch {
        self.next_batch += 1;
        let batch = InstancingBatch::new(BatchId(self.next_batch));
        tracing::debug!("[{}] instancing batch {:?} opened", self.config.label, batch.id);
        batch
    }

    /// Creates an entity that stays hidden from queries until the batch finishes.
    pub fn create_entity_in(&mut self, batch: &mut InstancingBatch) -> EntityHandle {
        let entity = self.create_entity();
        if let Some(record) = self.entities.get_mut(entity) {
            record.batch = Some(batch.id);
        }
        batch.entities.push(entity);
        entity
    }

    /// Adds a component, deferring its add callbacks to the end of the batch.
    pub fn add_component_in<T: Component>(
        &mut self,
        batch: &mut InstancingBatch,
        entity: EntityHandle,
    ) -> Option<&mut T> {
        let id = self.registry.register::<T>(self.entities.slot_count());
        self.attach_erased(entity, id, Some(batch)).ok()?;
        self.get_component_mut::<T>(entity)
    }

    /// Adds a component by name inside a batch.
    ///
    /// # Errors
    ///
    /// Same as [`add_component_by_name`](Self::add_component_by_name).
    pub fn add_component_by_name_in(
        &mut self,
        batch: &mut InstancingBatch,
        entity: EntityHandle,
        name: &str,
    ) -> WorldResult<ComponentTypeId> {
        let Some(id) = self.registry.id_by_name(name) else {
            tracing::warn!("[{}] unknown component type '{}'", self.config.label, name);
            return Err(WorldError::UnknownComponentName(name.to_owned()));
        };
        self.attach_erased(entity, id, Some(batch))?;
        Ok(id)
    }

    /// Closes a batch: its entities become visible to queries, then the
    /// deferred add callbacks fire in add order.
    ///
    /// Entries whose entity or component no longer exists are skipped.
    pub fn finish_instancing(&mut self, mut batch: InstancingBatch) {
        batch.closed = true;
        let entities = std::mem::take(&mut batch.entities);
        let pending = std::mem::take(&mut batch.pending);

        for entity in &entities {
            if let Some(record) = self.entities.get_mut(*entity) {
                if record.batch == Some(batch.id) {
                    record.batch = None;
                }
            }
        }

        tracing::debug!(
            "[{}] instancing batch {:?} finished: {} entities, {} activations",
            self.config.label,
            batch.id,
            entities.len(),
            pending.len()
        );

        for (entity, id) in pending {
            if self.has_component_id(entity, id) {
                self.dispatch(ComponentEvent::Added, id, entity);
            }
        }
    }

    /// Abandons a batch, destroying the entities it created.
    ///
    /// Neither the deferred add callbacks nor remove callbacks fire for
    /// those entities; lifecycle hooks still run.
    pub fn cancel_instancing(&mut self, mut batch: InstancingBatch) {
        batch.closed = true;
        batch.pending.clear();
        let entities = std::mem::take(&mut batch.entities);
        tracing::debug!(
            "[{}] instancing batch {:?} cancelled: destroying {} entities",
            self.config.label,
            batch.id,
            entities.len()
        );
        for entity in entities {
            self.destroy_entity(entity);
        }
    }
}

/// An open callback dispatch, closed when dropped so the deferred
/// unsubscribe sweep still runs after a panicking callback.
struct DispatchScope<'w> {
    world: &'w mut World,
}

impl<'w> DispatchScope<'w> {
    fn begin(world: &'w mut World) -> Self {
        world.callbacks.begin_dispatch();
        Self { world }
    }
}

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        self.world.callbacks.end_dispatch();
    }
}

/// A component removal in flight. Dropping it clears the pending mark, so a
/// removal cut short by a panic can be retried.
struct RemovalScope<'w> {
    world: &'w mut World,
    entity: EntityHandle,
    id: ComponentTypeId,
}

impl Drop for RemovalScope<'_> {
    fn drop(&mut self) {
        let id = self.id;
        if let Some(record) = self.world.entities.get_mut(self.entity) {
            record.pending_removal.retain(|&c| c != id);
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        let entities = &self.entities;
        self.registry.teardown(&|index| {
            entities.handle_at(index).unwrap_or(EntityHandle::NULL)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Health {
        owner: EntityHandle,
        hp: u32,
    }

    impl Component for Health {
        fn bind_owner(&mut self, owner: EntityHandle) {
            self.owner = owner;
        }
    }

    #[derive(Debug, Default)]
    struct Singleton;

    impl Component for Singleton {
        const DISALLOW_MULTIPLE: bool = true;
    }

    #[derive(Default)]
    struct Resource {
        released: Option<Arc<AtomicUsize>>,
    }

    impl Component for Resource {
        fn on_destroy(&mut self, _owner: EntityHandle) -> Result<(), CallbackError> {
            if let Some(counter) = &self.released {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Faulty {
        attempts: Option<Arc<AtomicUsize>>,
    }

    impl Component for Faulty {
        fn on_destroy(&mut self, _owner: EntityHandle) -> Result<(), CallbackError> {
            if let Some(counter) = &self.attempts {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Err("release failed".into())
        }
    }

    #[test]
    fn test_world_creation() {
        let world = World::new();
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.component_type_count(), 1, "Transform is pre-registered");
    }

    #[test]
    fn test_create_destroy() {
        let mut world = World::new();

        let a = world.create_entity();
        assert!(world.is_valid(a));
        assert_eq!(world.entity_count(), 1);

        assert!(world.destroy_entity(a));
        assert!(!world.is_valid(a));
        assert!(!world.destroy_entity(a));

        // Create again - should reuse the slot
        let b = world.create_entity();
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), a.generation());
    }

    #[test]
    fn test_add_binds_owner() {
        let mut world = World::new();
        let e = world.create_entity();
        let health = world.add_component::<Health>(e).unwrap();
        assert_eq!(health.owner, e);
    }

    #[test]
    fn test_add_twice_returns_existing() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<Health>(e).unwrap().hp = 10;
        assert_eq!(world.add_component::<Health>(e).unwrap().hp, 10);
        assert_eq!(world.component_types(e).len(), 1);
    }

    #[test]
    fn test_disallow_multiple_refuses_second_add() {
        let mut world = World::new();
        let e = world.create_entity();
        assert!(world.add_component::<Singleton>(e).is_some());
        let err = world.try_add_component::<Singleton>(e).unwrap_err();
        assert!(matches!(err, WorldError::DuplicateComponent { .. }));
        assert!(world.has_component::<Singleton>(e));
    }

    #[test]
    fn test_invalid_handle_is_noop() {
        let mut world = World::new();
        let e = world.create_entity();
        world.destroy_entity(e);

        assert!(world.add_component::<Health>(e).is_none());
        assert!(world.get_component::<Health>(e).is_none());
        assert!(!world.remove_component::<Health>(e));
        assert!(!world.set_component(e, Health::default()));
        assert!(!world.set_name(e, "ghost"));
        assert!(world.name(e).is_none());
        assert!(!world.is_enabled(e, false));
    }

    #[test]
    fn test_set_component_overwrites() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<Health>(e);
        assert!(world.set_component(e, Health { owner: EntityHandle::NULL, hp: 42 }));
        let stored = world.try_get_component::<Health>(e).unwrap();
        assert_eq!(stored.hp, 42);
        assert_eq!(stored.owner, e);
    }

    #[test]
    fn test_set_component_requires_attached() {
        let mut world = World::new();
        let e = world.create_entity();
        assert!(!world.set_component(e, Health::default()));
    }

    #[test]
    fn test_remove_runs_hook() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<Resource>(e).unwrap().released = Some(Arc::clone(&counter));

        assert!(world.remove_component::<Resource>(e));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!world.remove_component::<Resource>(e));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_runs_hooks() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let mut world = World::new();
            for _ in 0..3 {
                let e = world.create_entity();
                world.add_component::<Resource>(e).unwrap().released = Some(Arc::clone(&counter));
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_add_by_name() {
        let mut world = World::new();
        world.register_component::<Health>();
        let e = world.create_entity();

        let id = world.add_component_by_name(e, "Health").unwrap();
        assert_eq!(Some(id), world.component_type_id::<Health>());
        assert_eq!(world.get_component::<Health>(e).unwrap().owner, e);

        let err = world.add_component_by_name(e, "Mana").unwrap_err();
        assert_eq!(err, WorldError::UnknownComponentName("Mana".to_owned()));
    }

    #[test]
    fn test_layers_and_enabled() {
        let mut world = World::new();
        let e = world.create_named("player");
        assert_eq!(world.name(e), Some("player"));
        assert_eq!(world.layer(e), Some(0));

        assert!(world.set_layer(e, 5));
        assert!(!world.set_layer(e, LAYER_COUNT));
        assert_eq!(world.layer(e), Some(5));

        assert!(world.is_enabled(e, true));
        world.set_enabled(e, false);
        assert!(!world.is_enabled(e, false));
    }

    #[test]
    fn test_provenance() {
        let mut world = World::new();
        let e = world.create_entity();
        assert!(world.provenance(e).is_none());
        let origin = Provenance { prefab: 9, local_id: 2 };
        world.set_provenance(e, origin);
        assert_eq!(world.provenance(e), Some(origin));
    }

    #[test]
    fn test_callback_failure_does_not_stop_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();
        world.on_component_added::<Health, _>(|_, _| Err("first subscriber fails".into()));
        let seen = Arc::clone(&calls);
        world.on_component_added::<Health, _>(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let e = world.create_entity();
        assert!(world.add_component::<Health>(e).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_callback_sees_component() {
        let mut world = World::new();
        let observed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&observed);
        world.on_component_removed::<Health, _>(move |world, entity| {
            let hp = world.get_component::<Health>(entity).map_or(0, |h| h.hp);
            seen.store(hp as usize, Ordering::SeqCst);
            Ok(())
        });

        let e = world.create_entity();
        world.add_component::<Health>(e).unwrap().hp = 77;
        world.remove_component::<Health>(e);
        assert_eq!(observed.load(Ordering::SeqCst), 77);
    }

    #[test]
    fn test_destroy_from_remove_callback() {
        let mut world = World::new();
        world.on_component_removed::<Health, _>(|world, entity| {
            world.destroy_entity(entity);
            Ok(())
        });

        let e = world.create_entity();
        world.add_component::<Health>(e);
        world.add_component::<Singleton>(e);
        assert!(world.remove_component::<Health>(e));
        assert!(!world.is_valid(e));

        let next = world.create_entity();
        assert_eq!(next.index(), e.index());
        assert!(!world.has_component::<Health>(next));
        assert!(!world.has_component::<Singleton>(next));
    }

    #[test]
    fn test_clear() {
        let mut world = World::new();
        for _ in 0..5 {
            let e = world.create_entity();
            world.add_component::<Health>(e);
        }
        world.clear();
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.registry.repository::<Health>().unwrap().len(), 0);
    }

    #[test]
    fn test_failing_hook_still_detaches() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<Faulty>(e).unwrap().attempts = Some(Arc::clone(&attempts));

        assert!(world.remove_component::<Faulty>(e));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!world.has_component::<Faulty>(e));
        assert!(world.record(e).unwrap().components().is_empty());
    }

    #[test]
    fn test_failing_hook_does_not_block_destroy() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component::<Faulty>(e);
        world.add_component::<Resource>(e).unwrap().released = Some(Arc::clone(&released));

        assert!(world.destroy_entity(e));
        assert!(!world.is_valid(e));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let next = world.create_entity();
        assert_eq!(next.index(), e.index());
        assert!(!world.has_component::<Faulty>(next));
    }

    #[test]
    fn test_failing_hook_does_not_block_drop() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        {
            let mut world = World::new();
            let a = world.create_entity();
            world.add_component::<Faulty>(a).unwrap().attempts = Some(Arc::clone(&attempts));
            world.add_component::<Resource>(a).unwrap().released = Some(Arc::clone(&released));
            let b = world.create_entity();
            world.add_component::<Resource>(b).unwrap().released = Some(Arc::clone(&released));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_remove_callback_during_cascade() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();
        let seen = Arc::clone(&calls);
        world.on_component_removed::<Health, _>(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err("subscriber fails".into())
        });

        let parent = world.create_entity();
        let child = world.create_entity();
        let grandchild = world.create_entity();
        for e in [parent, child, grandchild] {
            world.add_component::<Health>(e);
        }
        world.set_parent(child, Some(parent));
        world.set_parent(grandchild, Some(child));

        assert!(world.destroy_entity(parent));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        for e in [parent, child, grandchild] {
            assert!(!world.is_valid(e));
        }
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.registry.repository::<Health>().unwrap().len(), 0);
    }

    #[test]
    fn test_nested_remove_of_same_component_reports_false() {
        let nested = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();
        let result = Arc::clone(&nested);
        world.on_component_removed::<Health, _>(move |world, entity| {
            let removed = world.remove_component::<Health>(entity);
            result.store(if removed { 2 } else { 1 }, Ordering::SeqCst);
            Ok(())
        });

        let e = world.create_entity();
        world.add_component::<Health>(e);
        assert!(world.remove_component::<Health>(e));
        assert_eq!(nested.load(Ordering::SeqCst), 1);
        assert!(!world.has_component::<Health>(e));
    }

    #[test]
    fn test_readd_during_removal_is_refused() {
        let refused = Arc::new(AtomicUsize::new(0));
        let mut world = World::new();
        let seen = Arc::clone(&refused);
        world.on_component_removed::<Health, _>(move |world, entity| {
            if matches!(
                world.try_add_component::<Health>(entity),
                Err(WorldError::RemovalInProgress { .. })
            ) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        let e = world.create_entity();
        world.add_component::<Health>(e).unwrap().hp = 5;
        assert!(world.remove_component::<Health>(e));
        assert_eq!(refused.load(Ordering::SeqCst), 1);
        assert!(!world.has_component::<Health>(e));

        // Once the removal completes the type can be added again
        assert_eq!(world.add_component::<Health>(e).map(|h| h.hp), Some(0));
    }

    #[test]
    fn test_panicking_remove_callback_leaves_world_consistent() {
        use std::panic::{catch_unwind, AssertUnwindSafe};
        use std::sync::atomic::AtomicBool;

        let armed = Arc::new(AtomicBool::new(true));
        let mut world = World::new();
        let trigger = Arc::clone(&armed);
        world.on_component_removed::<Health, _>(move |_, _| {
            if trigger.swap(false, Ordering::SeqCst) {
                panic!("callback failed");
            }
            Ok(())
        });
        let extra = world.on_component_removed::<Health, _>(|_, _| Ok(()));

        let e = world.create_entity();
        world.add_component::<Health>(e);
        let outcome = catch_unwind(AssertUnwindSafe(|| world.remove_component::<Health>(e)));
        assert!(outcome.is_err());

        // Removal was cut short: still attached, nothing left pending
        assert!(world.has_component::<Health>(e));
        assert!(world.record(e).unwrap().pending_removal.is_empty());

        // Dispatch depth unwound, so unsubscribing compacts immediately
        assert!(world.unsubscribe(extra));
        assert_eq!(world.callbacks.stored_count(), 1);

        assert!(world.remove_component::<Health>(e));
        assert!(!world.has_component::<Health>(e));
    }
}
