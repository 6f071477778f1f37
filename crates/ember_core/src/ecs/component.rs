//! # Component System
//!
//! Components are plain Rust types registered with the world on first use.
//! They must have a default value so a repository can backfill every entity
//! slot, and they can opt into two lifecycle contracts:
//! - `bind_owner`: receive the owning entity handle when attached
//! - `on_destroy`: release resources deterministically when detached

use std::fmt;

use super::entity::EntityHandle;
use crate::error::CallbackError;

/// Trait for ECS components.
///
/// # Example
///
/// ```rust
/// use ember_core::{Component, EntityHandle};
///
/// #[derive(Default)]
/// struct Health {
///     owner: EntityHandle,
///     hp: u32,
/// }
///
/// impl Component for Health {
///     fn bind_owner(&mut self, owner: EntityHandle) {
///         self.owner = owner;
///     }
/// }
/// ```
pub trait Component: Default + Send + Sync + 'static {
    /// Refuse a second add instead of handing back the existing instance.
    const DISALLOW_MULTIPLE: bool = false;

    /// Name used in diagnostics and for name-based adds.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called whenever the instance is (re)attached to an entity.
    fn bind_owner(&mut self, _owner: EntityHandle) {}

    /// Teardown hook, run before the instance is detached.
    ///
    /// # Errors
    ///
    /// Errors are logged by the world; removal proceeds regardless.
    fn on_destroy(&mut self, _owner: EntityHandle) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Dense identifier assigned to a component type at registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// Index of the type's repository.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Declares that a component can be viewed as the interface `I`
/// (usually a `dyn Trait`).
///
/// Implementations are wired up with
/// [`World::register_interface`](crate::World::register_interface), after
/// which lookups by interface match every implementing component on an
/// entity.
///
/// The interface is `'static`, so the returned trait objects must spell out
/// the bound: a bare `&dyn Trait` in the signature borrows the lifetime of
/// `self` and does not match.
///
/// ```
/// use ember_core::{Component, Implements, World};
///
/// trait Describe {
///     fn describe(&self) -> String;
/// }
///
/// #[derive(Default)]
/// struct Health(u32);
/// impl Component for Health {}
///
/// impl Describe for Health {
///     fn describe(&self) -> String {
///         format!("hp {}", self.0)
///     }
/// }
///
/// impl Implements<dyn Describe> for Health {
///     fn as_interface(&self) -> &(dyn Describe + 'static) {
///         self
///     }
///     fn as_interface_mut(&mut self) -> &mut (dyn Describe + 'static) {
///         self
///     }
/// }
///
/// let mut world = World::new();
/// world.register_interface::<Health, dyn Describe>();
/// let entity = world.create_entity();
/// world.add_component::<Health>(entity).unwrap().0 = 7;
///
/// let described: Vec<String> = world
///     .get_interfaces::<dyn Describe>(entity)
///     .iter()
///     .map(|d| d.describe())
///     .collect();
/// assert_eq!(described, vec!["hp 7".to_string()]);
/// ```
pub trait Implements<I: ?Sized + 'static>: Component {
    /// Borrows the component as the interface.
    fn as_interface(&self) -> &I;
    /// Mutably borrows the component as the interface.
    fn as_interface_mut(&mut self) -> &mut I;
}

/// Last path segment of a type name, ignoring generic arguments.
///
/// `my_game::physics::Body<f32>` becomes `Body`.
#[must_use]
pub fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
