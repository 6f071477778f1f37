//! # Component Registry
//!
//! Maps Rust types to dense [`ComponentTypeId`]s and owns one repository per
//! registered type. Types register lazily the first time any entity (or
//! callback subscription) references them; the new repository is backfilled
//! to the current slot count.
//!
//! Interface lookups are resolved here too: `register_interface` records,
//! per interface, which component types implement it and how to view them,
//! so a lookup by interface never has to inspect types at query time.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use super::component::{short_type_name, Component, ComponentTypeId, Implements};
use super::entity::EntityHandle;
use super::storage::{ComponentRepository, ErasedRepository};

/// One component type implementing interface `I`.
pub(crate) struct InterfaceEntry<I: ?Sized + 'static> {
    pub(crate) component: ComponentTypeId,
    pub(crate) view: fn(&dyn ErasedRepository, usize) -> Option<&I>,
    pub(crate) view_mut: fn(&mut dyn ErasedRepository, usize) -> Option<&mut I>,
}

impl<I: ?Sized + 'static> Clone for InterfaceEntry<I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I: ?Sized + 'static> Copy for InterfaceEntry<I> {}

struct InterfaceTable<I: ?Sized + 'static> {
    entries: Vec<InterfaceEntry<I>>,
}

fn view_as<C, I>(repository: &dyn ErasedRepository, index: usize) -> Option<&I>
where
    C: Implements<I>,
    I: ?Sized + 'static,
{
    repository
        .as_any()
        .downcast_ref::<ComponentRepository<C>>()?
        .get(index)
        .map(<C as Implements<I>>::as_interface)
}

fn view_as_mut<C, I>(repository: &mut dyn ErasedRepository, index: usize) -> Option<&mut I>
where
    C: Implements<I>,
    I: ?Sized + 'static,
{
    repository
        .as_any_mut()
        .downcast_mut::<ComponentRepository<C>>()?
        .get_mut(index)
        .map(<C as Implements<I>>::as_interface_mut)
}

/// Registry of component types and their repositories.
#[derive(Default)]
pub(crate) struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    by_name: HashMap<&'static str, ComponentTypeId>,
    names: Vec<&'static str>,
    /// `None` only while a query has the repository checked out.
    repositories: Vec<Option<Box<dyn ErasedRepository>>>,
    interfaces: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ComponentRegistry {
    /// Returns the id for `C`, registering it on first use.
    pub(crate) fn register<C: Component>(&mut self, slot_count: usize) -> ComponentTypeId {
        if let Some(&id) = self.by_type.get(&TypeId::of::<C>()) {
            return id;
        }

        let id = ComponentTypeId(u32::try_from(self.repositories.len()).unwrap_or(u32::MAX));
        let full = C::type_name();
        self.by_type.insert(TypeId::of::<C>(), id);
        self.by_name.entry(full).or_insert(id);
        self.by_name.entry(short_type_name(full)).or_insert(id);
        self.names.push(full);
        self.repositories
            .push(Some(Box::new(ComponentRepository::<C>::new(slot_count))));

        tracing::debug!("registered component type {} as {}", full, id);
        id
    }

    pub(crate) fn id_of<C: Component>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<C>()).copied()
    }

    pub(crate) fn id_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn name_of(&self, id: ComponentTypeId) -> Option<&'static str> {
        self.names.get(id.index()).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    pub(crate) fn repository<C: Component>(&self) -> Option<&ComponentRepository<C>> {
        let id = self.id_of::<C>()?;
        self.erased(id)?
            .as_any()
            .downcast_ref::<ComponentRepository<C>>()
    }

    pub(crate) fn repository_mut<C: Component>(&mut self) -> Option<&mut ComponentRepository<C>> {
        let id = self.id_of::<C>()?;
        self.erased_mut(id)?
            .as_any_mut()
            .downcast_mut::<ComponentRepository<C>>()
    }

    pub(crate) fn erased(&self, id: ComponentTypeId) -> Option<&(dyn ErasedRepository + 'static)> {
        self.repositories.get(id.index())?.as_deref()
    }

    pub(crate) fn erased_mut(
        &mut self,
        id: ComponentTypeId,
    ) -> Option<&mut (dyn ErasedRepository + 'static)> {
        self.repositories.get_mut(id.index())?.as_deref_mut()
    }

    /// Grows every repository in lock-step with the entity table.
    pub(crate) fn ensure_capacity(&mut self, slot_count: usize) {
        for repository in self.repositories.iter_mut().flatten() {
            repository.ensure_capacity(slot_count);
        }
    }

    /// Checks a repository out so a query can borrow several at once.
    pub(crate) fn take<C: Component>(&mut self) -> Option<Box<ComponentRepository<C>>> {
        let id = self.id_of::<C>()?;
        let repository = self.repositories.get_mut(id.index())?.take()?;
        match repository.into_any().downcast::<ComponentRepository<C>>() {
            Ok(typed) => Some(typed),
            Err(_) => {
                // Unreachable: ids are keyed by TypeId
                tracing::error!("repository {} has the wrong type", id);
                None
            }
        }
    }

    /// Returns a repository checked out with [`take`](Self::take).
    pub(crate) fn restore<C: Component>(&mut self, repository: Box<ComponentRepository<C>>) {
        if let Some(id) = self.id_of::<C>() {
            if let Some(slot) = self.repositories.get_mut(id.index()) {
                *slot = Some(repository);
            }
        }
    }

    pub(crate) fn register_interface<C, I>(&mut self, slot_count: usize) -> ComponentTypeId
    where
        C: Implements<I>,
        I: ?Sized + 'static,
    {
        let id = self.register::<C>(slot_count);
        let table = self
            .interfaces
            .entry(TypeId::of::<I>())
            .or_insert_with(|| Box::new(InterfaceTable::<I> { entries: Vec::new() }));

        if let Some(table) = table.downcast_mut::<InterfaceTable<I>>() {
            if table.entries.iter().all(|e| e.component != id) {
                table.entries.push(InterfaceEntry {
                    component: id,
                    view: view_as::<C, I>,
                    view_mut: view_as_mut::<C, I>,
                });
                tracing::debug!(
                    "{} registered as {}",
                    C::type_name(),
                    std::any::type_name::<I>()
                );
            }
        }
        id
    }

    /// Every component type implementing `I`, in registration order.
    pub(crate) fn interface_entries<I: ?Sized + 'static>(&self) -> Vec<InterfaceEntry<I>> {
        self.interfaces
            .get(&TypeId::of::<I>())
            .and_then(|table| table.downcast_ref::<InterfaceTable<I>>())
            .map(|table| table.entries.clone())
            .unwrap_or_default()
    }

    /// Runs teardown hooks and clears every repository.
    pub(crate) fn teardown(&mut self, owners: &dyn Fn(usize) -> EntityHandle) {
        for repository in self.repositories.iter_mut().flatten() {
            repository.teardown(owners);
        }
    }
}
