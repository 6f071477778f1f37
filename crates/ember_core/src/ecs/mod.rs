//! # Entity Component System
//!
//! Entities are generational handles into a slot table; components live in
//! one dense repository per type, indexed by slot.
//!
//! ## Layout
//!
//! - [`entity`]: handles, per-slot records, slot recycling
//! - [`component`]: the [`Component`] trait and interface views
//! - `storage` / `registry`: typed repositories behind type-erased lookup
//! - `callback`: added/removed subscriber lists
//! - [`world`]: the facade tying it together
//! - [`query`]: multi-component iteration
//! - [`transform`]: the parent/child hierarchy with cached world poses

mod callback;
pub mod component;
pub mod entity;
mod instancing;
pub mod query;
mod registry;
mod storage;
pub mod transform;
pub mod world;

pub use callback::{ComponentCallback, ComponentEvent, SubscriptionId};
pub use component::{Component, ComponentTypeId, Implements};
pub use entity::{EntityHandle, EntityRecord, EntityTable, Provenance, LAYER_COUNT};
pub use instancing::{BatchId, InstancingBatch};
pub use query::Query;
pub use storage::ComponentRepository;
pub use transform::Transform;
pub use world::World;
