//! # Sharing a World Between Threads
//!
//! A [`World`](crate::World) is mutated through `&mut self` and is not
//! internally synchronized. Hosts that drive it from several threads wrap it
//! in a [`SharedWorld`], which serializes every access behind one mutex.
//!
//! Callbacks receive `&mut World` directly, so they never need to take the
//! lock again while a dispatch is running.

mod shared;

pub use shared::SharedWorld;
