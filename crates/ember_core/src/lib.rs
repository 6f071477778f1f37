//! # Ember Core
//!
//! Entity Component System at the heart of the Ember engine:
//! - Generational entity handles that reject stale references
//! - Dense per-type component repositories with owner binding and teardown hooks
//! - Added/removed component callbacks that are safe to mutate from inside a dispatch
//! - A transform hierarchy with cascade destruction and lazily cached world poses
//!
//! ## Example
//!
//! ```rust
//! use ember_core::{Component, Transform, Vec3, World};
//!
//! #[derive(Default)]
//! struct Velocity(Vec3);
//! impl Component for Velocity {}
//!
//! let mut world = World::new();
//! let ship = world.create_named("ship");
//! world.add_component::<Transform>(ship);
//! world.add_component::<Velocity>(ship).unwrap().0 = Vec3::X;
//!
//! world.for_each::<(Transform, Velocity)>(|_, (transform, velocity)| {
//!     transform.set_local_position(transform.local_position() + velocity.0);
//! });
//! assert_eq!(world.world_position(ship), Some(Vec3::X));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod sync;

pub use config::WorldConfig;
pub use ecs::{
    BatchId, Component, ComponentEvent, ComponentTypeId, EntityHandle, Implements,
    InstancingBatch, Provenance, Query, SubscriptionId, Transform, World, LAYER_COUNT,
};
pub use error::{CallbackError, WorldError, WorldResult};
pub use glam::{Mat4, Quat, Vec3};
pub use sync::SharedWorld;
