//! # World Error Types
//!
//! Everything that can go wrong inside the world. Public CRUD calls swallow
//! these into `None`/`false` plus a diagnostic; the `try_*` variants hand
//! them back to the caller.

use thiserror::Error;

use crate::ecs::EntityHandle;

/// Errors that can occur while operating on a [`World`](crate::World).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// The handle is stale, out of range, or refers to a dead slot.
    #[error("invalid entity handle: {0}")]
    InvalidHandle(EntityHandle),

    /// The entity does not carry the requested component.
    #[error("entity {entity} has no {component} component")]
    MissingComponent {
        /// The entity that was queried.
        entity: EntityHandle,
        /// The component type name.
        component: &'static str,
    },

    /// A non-duplicable component was added a second time.
    #[error("entity {entity} already has a {component} component")]
    DuplicateComponent {
        /// The entity the add targeted.
        entity: EntityHandle,
        /// The component type name.
        component: &'static str,
    },

    /// The component is being removed from the entity; adding it again
    /// before the removal completes is refused.
    #[error("entity {entity} is mid-removal of its {component} component")]
    RemovalInProgress {
        /// The entity the add targeted.
        entity: EntityHandle,
        /// The component type name.
        component: &'static str,
    },

    /// No component type has been registered under this name.
    #[error("unknown component type name: {0}")]
    UnknownComponentName(String),

    /// Reparenting would make an entity its own ancestor.
    #[error("cannot parent {child} under {parent}: would create a cycle")]
    HierarchyCycle {
        /// The entity being reparented.
        child: EntityHandle,
        /// The requested parent.
        parent: EntityHandle,
    },

    /// Reparenting would exceed the configured hierarchy depth.
    #[error("hierarchy under {parent} would exceed max depth {max_depth}")]
    HierarchyTooDeep {
        /// The requested parent.
        parent: EntityHandle,
        /// The configured limit.
        max_depth: usize,
    },

    /// Configuration file could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type for world operations.
pub type WorldResult<T> = Result<T, WorldError>;

/// Error returned by user callbacks and component lifecycle hooks.
///
/// Failures are logged at the dispatch site and never interrupt the
/// remaining subscribers.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;
