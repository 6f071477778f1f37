//! # Component Callbacks
//!
//! Subscribers are kept per (event, component type) in subscription order.
//! The world dispatches from a snapshot, so a callback may subscribe or
//! unsubscribe freely (including itself). Unsubscribed entries are
//! tombstoned, skipped for the remainder of the dispatch, and swept once the
//! outermost dispatch finishes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::component::ComponentTypeId;
use super::entity::EntityHandle;
use super::world::World;
use crate::error::CallbackError;

/// Callback invoked when a component is added to or removed from an entity.
///
/// Removal callbacks run while the component is still readable.
pub type ComponentCallback =
    Arc<dyn Fn(&mut World, EntityHandle) -> Result<(), CallbackError> + Send + Sync>;

/// Which lifecycle event a callback listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentEvent {
    /// A component was attached.
    Added,
    /// A component is being detached.
    Removed,
}

impl fmt::Display for ComponentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => f.write_str("added"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// Token returned by a subscription, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    /// `None` once unsubscribed, until the next sweep.
    callback: Option<ComponentCallback>,
}

type ListKey = (ComponentEvent, ComponentTypeId);

/// Subscriber lists for component added/removed events.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    next_id: u64,
    lists: HashMap<ListKey, Vec<Subscriber>>,
    live: HashMap<SubscriptionId, ListKey>,
    dispatch_depth: usize,
    needs_sweep: bool,
}

impl CallbackRegistry {
    pub(crate) fn subscribe(
        &mut self,
        event: ComponentEvent,
        component: ComponentTypeId,
        callback: ComponentCallback,
    ) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.lists
            .entry((event, component))
            .or_default()
            .push(Subscriber {
                id,
                callback: Some(callback),
            });
        self.live.insert(id, (event, component));
        id
    }

    /// Tombstones a subscription. Returns `false` if it was not live.
    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(key) = self.live.remove(&id) else {
            return false;
        };
        if let Some(subscriber) = self
            .lists
            .get_mut(&key)
            .and_then(|list| list.iter_mut().find(|s| s.id == id))
        {
            subscriber.callback = None;
        }
        self.needs_sweep = true;
        if self.dispatch_depth == 0 {
            self.sweep();
        }
        true
    }

    pub(crate) fn is_live(&self, id: SubscriptionId) -> bool {
        self.live.contains_key(&id)
    }

    /// Live subscribers for a key, in subscription order.
    pub(crate) fn snapshot(
        &self,
        event: ComponentEvent,
        component: ComponentTypeId,
    ) -> Vec<(SubscriptionId, ComponentCallback)> {
        self.lists
            .get(&(event, component))
            .map(|list| {
                list.iter()
                    .filter_map(|s| s.callback.as_ref().map(|cb| (s.id, Arc::clone(cb))))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn begin_dispatch(&mut self) {
        self.dispatch_depth += 1;
    }

    pub(crate) fn end_dispatch(&mut self) {
        self.dispatch_depth = self.dispatch_depth.saturating_sub(1);
        if self.dispatch_depth == 0 && self.needs_sweep {
            self.sweep();
        }
    }

    /// Number of live subscribers for a key.
    pub(crate) fn subscriber_count(&self, event: ComponentEvent, component: ComponentTypeId) -> usize {
        self.lists
            .get(&(event, component))
            .map_or(0, |list| list.iter().filter(|s| s.callback.is_some()).count())
    }

    /// Number of entries physically stored, tombstones included.
    #[cfg(test)]
    pub(crate) fn stored_count(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    fn sweep(&mut self) {
        for list in self.lists.values_mut() {
            list.retain(|s| s.callback.is_some());
        }
        self.lists.retain(|_, list| !list.is_empty());
        self.needs_sweep = false;
    }
}
