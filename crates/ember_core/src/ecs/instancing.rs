//! # Instancing Batches
//!
//! While an object graph is being built (e.g. a scene being deserialized),
//! component-added callbacks must not observe half-wired entities. A batch
//! token collects the adds made through it; finishing the batch fires one
//! consolidated activation pass in add order.
//!
//! Each batch is an explicit value, so independent batches can be open at
//! the same time without sharing a suppression flag.

use super::component::ComponentTypeId;
use super::entity::EntityHandle;

/// Identifier of an instancing batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchId(pub(crate) u64);

/// Token for a pending instancing batch.
///
/// Obtain one from [`World::begin_instancing`](crate::World::begin_instancing)
/// and hand it back to
/// [`World::finish_instancing`](crate::World::finish_instancing) or
/// [`World::cancel_instancing`](crate::World::cancel_instancing).
#[must_use = "an unfinished batch never fires its add callbacks"]
#[derive(Debug)]
pub struct InstancingBatch {
    pub(crate) id: BatchId,
    pub(crate) pending: Vec<(EntityHandle, ComponentTypeId)>,
    pub(crate) entities: Vec<EntityHandle>,
    pub(crate) closed: bool,
}

impl InstancingBatch {
    pub(crate) fn new(id: BatchId) -> Self {
        Self {
            id,
            pending: Vec::new(),
            entities: Vec::new(),
            closed: false,
        }
    }

    /// The batch identifier.
    #[must_use]
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Entities created through this batch.
    #[must_use]
    pub fn entities(&self) -> &[EntityHandle] {
        &self.entities
    }

    /// Number of add callbacks waiting for the batch to finish.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn defer(&mut self, entity: EntityHandle, component: ComponentTypeId) {
        self.pending.push((entity, component));
    }
}

impl Drop for InstancingBatch {
    fn drop(&mut self) {
        if !self.closed && (!self.pending.is_empty() || !self.entities.is_empty()) {
            tracing::warn!(
                "instancing batch {:?} dropped unfinished: {} entities stay hidden from queries, {} add callbacks never fire",
                self.id,
                self.entities.len(),
                self.pending.len()
            );
        }
    }
}
