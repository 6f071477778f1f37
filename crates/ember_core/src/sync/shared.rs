use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::config::WorldConfig;
use crate::ecs::World;

/// Cloneable, thread-safe handle to a [`World`].
///
/// # Example
///
/// ```rust
/// use ember_core::{SharedWorld, World};
///
/// let shared = SharedWorld::new(World::new());
/// let worker = shared.clone();
/// std::thread::spawn(move || {
///     worker.with(|world| world.create_entity());
/// })
/// .join()
/// .unwrap();
/// assert_eq!(shared.lock().entity_count(), 1);
/// ```
#[derive(Clone)]
pub struct SharedWorld {
    inner: Arc<Mutex<World>>,
}

impl Default for SharedWorld {
    fn default() -> Self {
        Self::new(World::new())
    }
}

impl SharedWorld {
    /// Wraps a world for shared access.
    #[must_use]
    pub fn new(world: World) -> Self {
        Self {
            inner: Arc::new(Mutex::new(world)),
        }
    }

    /// Builds a fresh world from a configuration and wraps it.
    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        Self::new(World::with_config(config))
    }

    /// Blocks until the world is free and returns a guard over it.
    pub fn lock(&self) -> MutexGuard<'_, World> {
        self.inner.lock()
    }

    /// Runs `f` with exclusive access to the world.
    pub fn with<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        let mut world = self.inner.lock();
        f(&mut world)
    }

    /// Runs `f` if the world can be locked within `timeout`.
    ///
    /// # Returns
    ///
    /// `None` if another thread held the lock for the whole timeout.
    pub fn try_with<R>(&self, timeout: Duration, f: impl FnOnce(&mut World) -> R) -> Option<R> {
        let Some(mut world) = self.inner.try_lock_for(timeout) else {
            tracing::debug!("shared world busy for {:?}", timeout);
            return None;
        };
        Some(f(&mut world))
    }

    /// Number of live handles to this world.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Unwraps the world if this is the last handle.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged while other handles exist.
    pub fn into_inner(self) -> Result<World, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}
