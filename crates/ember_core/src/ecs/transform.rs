//! # Transform Hierarchy
//!
//! [`Transform`] is the one component the world knows about. It carries a
//! lazily computed world-space pose; the parent/child links used for cascade
//! destruction live in a world-owned [`Hierarchy`] indexed by entity slot, so
//! overwriting or swapping a `Transform` value never rewires the tree.
//!
//! ## Cache invalidation
//!
//! Local setters only mark their own transform dirty. Each recomputation
//! draws a fresh stamp from the world's transform epoch, and a child records
//! the stamp of the parent pose it was computed from. A read resolves the
//! chain root-first and recomputes any link that is dirty or whose parent
//! stamp moved, so changes to an ancestor reach descendants on their next
//! read without walking the subtree eagerly. A transform whose recorded owner
//! or parent stamp does not match its position in the tree is treated as
//! dirty, which covers values moved in from another entity.

use glam::{Mat4, Quat, Vec3};

use super::component::Component;
use super::entity::EntityHandle;
use super::world::World;
use crate::error::{WorldError, WorldResult};

/// World-space pose of a resolved parent.
#[derive(Clone, Copy)]
struct ParentPose {
    stamp: u64,
    matrix: Mat4,
    rotation: Quat,
    scale: Vec3,
}

#[derive(Debug, Default)]
struct HierarchyNode {
    parent: Option<EntityHandle>,
    children: Vec<EntityHandle>,
}

/// Parent/child links of every transform, indexed by entity slot.
#[derive(Debug, Default)]
pub(crate) struct Hierarchy {
    nodes: Vec<HierarchyNode>,
}

impl Hierarchy {
    fn parent(&self, index: usize) -> Option<EntityHandle> {
        self.nodes.get(index)?.parent
    }

    fn children(&self, index: usize) -> &[EntityHandle] {
        self.nodes
            .get(index)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    fn node_mut(&mut self, index: usize) -> &mut HierarchyNode {
        if index >= self.nodes.len() {
            self.nodes.resize_with(index + 1, HierarchyNode::default);
        }
        &mut self.nodes[index]
    }

    /// Forgets the links of a slot being freed.
    pub(crate) fn clear_slot(&mut self, index: usize) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.parent = None;
            node.children.clear();
        }
    }
}

/// Position, rotation and scale of an entity, relative to its parent.
///
/// The value can be copied between entities freely; the hierarchy stays with
/// the entity, and the copy recomputes its world pose on the next read.
#[derive(Clone, Debug)]
pub struct Transform {
    owner: EntityHandle,

    local_position: Vec3,
    local_rotation: Quat,
    local_scale: Vec3,

    dirty: bool,
    stamp: u64,
    parent_stamp: u64,

    world_position: Vec3,
    world_rotation: Quat,
    world_scale: Vec3,
    world_matrix: Mat4,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            owner: EntityHandle::NULL,
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            local_scale: Vec3::ONE,
            dirty: true,
            stamp: 0,
            parent_stamp: 0,
            world_position: Vec3::ZERO,
            world_rotation: Quat::IDENTITY,
            world_scale: Vec3::ONE,
            world_matrix: Mat4::IDENTITY,
        }
    }
}

impl Component for Transform {
    const DISALLOW_MULTIPLE: bool = true;

    fn bind_owner(&mut self, owner: EntityHandle) {
        self.owner = owner;
        self.dirty = true;
    }
}

impl Transform {
    /// Entity this transform is attached to.
    #[must_use]
    pub fn owner(&self) -> EntityHandle {
        self.owner
    }

    /// Position relative to the parent.
    #[must_use]
    pub fn local_position(&self) -> Vec3 {
        self.local_position
    }

    /// Rotation relative to the parent.
    #[must_use]
    pub fn local_rotation(&self) -> Quat {
        self.local_rotation
    }

    /// Scale relative to the parent.
    #[must_use]
    pub fn local_scale(&self) -> Vec3 {
        self.local_scale
    }

    /// Local TRS matrix.
    #[must_use]
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.local_scale, self.local_rotation, self.local_position)
    }

    /// Checks if this transform's own local values changed since the last
    /// resolve. Ancestor changes are not reflected here.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Sets the local position, marking the transform dirty if it changed.
    pub fn set_local_position(&mut self, position: Vec3) {
        if self.local_position != position {
            self.local_position = position;
            self.dirty = true;
        }
    }

    /// Sets the local rotation, marking the transform dirty if it changed.
    pub fn set_local_rotation(&mut self, rotation: Quat) {
        if self.local_rotation != rotation {
            self.local_rotation = rotation;
            self.dirty = true;
        }
    }

    /// Sets the local scale, marking the transform dirty if it changed.
    pub fn set_local_scale(&mut self, scale: Vec3) {
        if self.local_scale != scale {
            self.local_scale = scale;
            self.dirty = true;
        }
    }

    /// World position from the last resolve; may be stale.
    #[must_use]
    pub fn last_world_position(&self) -> Vec3 {
        self.world_position
    }

    /// World rotation from the last resolve; may be stale.
    #[must_use]
    pub fn last_world_rotation(&self) -> Quat {
        self.world_rotation
    }

    /// World scale from the last resolve; may be stale.
    #[must_use]
    pub fn last_world_scale(&self) -> Vec3 {
        self.world_scale
    }

    /// World matrix from the last resolve; may be stale.
    #[must_use]
    pub fn last_world_matrix(&self) -> Mat4 {
        self.world_matrix
    }

    fn recompute(&mut self, parent: Option<ParentPose>, stamp: u64) {
        let local = self.local_matrix();
        match parent {
            Some(pose) => {
                self.world_matrix = pose.matrix * local;
                self.world_position = pose.matrix.transform_point3(self.local_position);
                self.world_rotation = pose.rotation * self.local_rotation;
                // Lossy under non-uniform scale combined with rotation
                self.world_scale = pose.scale * self.local_scale;
                self.parent_stamp = pose.stamp;
            }
            None => {
                self.world_matrix = local;
                self.world_position = self.local_position;
                self.world_rotation = self.local_rotation;
                self.world_scale = self.local_scale;
                self.parent_stamp = 0;
            }
        }
        self.stamp = stamp;
        self.dirty = false;
    }

    fn pose(&self) -> ParentPose {
        ParentPose {
            stamp: self.stamp,
            matrix: self.world_matrix,
            rotation: self.world_rotation,
            scale: self.world_scale,
        }
    }
}

impl World {
    fn transform_mut(&mut self, entity: EntityHandle) -> Option<&mut Transform> {
        self.get_component_mut::<Transform>(entity)
    }

    fn ensure_transform(&mut self, entity: EntityHandle) -> WorldResult<()> {
        if self.has_component::<Transform>(entity) {
            return Ok(());
        }
        self.try_add_component::<Transform>(entity).map(|_| ())
    }

    fn mark_dirty(&mut self, entity: EntityHandle) {
        if let Some(transform) = self.transform_mut(entity) {
            transform.dirty = true;
        }
    }

    /// Parent of an entity's transform.
    #[must_use]
    pub fn parent(&self, entity: EntityHandle) -> Option<EntityHandle> {
        if !self.has_component::<Transform>(entity) {
            return None;
        }
        self.hierarchy
            .parent(entity.index() as usize)
            .filter(|&parent| self.entities.is_valid(parent))
    }

    /// Children of an entity's transform, in sibling order.
    #[must_use]
    pub fn children(&self, entity: EntityHandle) -> &[EntityHandle] {
        if !self.has_component::<Transform>(entity) {
            return &[];
        }
        self.hierarchy.children(entity.index() as usize)
    }

    /// Child at a sibling index.
    #[must_use]
    pub fn child(&self, parent: EntityHandle, index: usize) -> Option<EntityHandle> {
        self.children(parent).get(index).copied()
    }

    /// Number of direct children.
    #[must_use]
    pub fn child_count(&self, parent: EntityHandle) -> usize {
        self.children(parent).len()
    }

    /// Topmost ancestor, or the entity itself when it has no parent.
    #[must_use]
    pub fn root(&self, entity: EntityHandle) -> Option<EntityHandle> {
        if !self.is_valid(entity) {
            return None;
        }
        let mut current = entity;
        for _ in 0..=self.config.max_hierarchy_depth {
            match self.parent(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Some(current)
    }

    /// Position of an entity in its parent's child list; `None` for roots.
    #[must_use]
    pub fn sibling_index(&self, entity: EntityHandle) -> Option<usize> {
        let parent = self.parent(entity)?;
        self.children(parent).iter().position(|&c| c == entity)
    }

    /// Moves an entity within its parent's child list.
    ///
    /// The index is clamped to the last position. Returns `false` for roots
    /// and invalid handles.
    pub fn set_sibling_index(&mut self, entity: EntityHandle, index: usize) -> bool {
        let Some(parent) = self.parent(entity) else {
            return false;
        };
        let siblings = &mut self.hierarchy.node_mut(parent.index() as usize).children;
        let Some(current) = siblings.iter().position(|&c| c == entity) else {
            return false;
        };
        siblings.remove(current);
        let index = index.min(siblings.len());
        siblings.insert(index, entity);
        true
    }

    /// Searches the descendants of `parent` for an entity by name.
    ///
    /// A plain name is searched depth-first. A `/`-separated path resolves
    /// one direct child per segment.
    #[must_use]
    pub fn search_child(&self, parent: EntityHandle, name: &str) -> Option<EntityHandle> {
        if name.contains('/') {
            let mut current = parent;
            for segment in name.split('/').filter(|s| !s.is_empty()) {
                current = self
                    .children(current)
                    .iter()
                    .copied()
                    .find(|&c| self.name(c) == Some(segment))?;
            }
            return (current != parent).then_some(current);
        }

        let mut stack: Vec<EntityHandle> = self.children(parent).iter().rev().copied().collect();
        while let Some(candidate) = stack.pop() {
            if self.name(candidate) == Some(name) {
                return Some(candidate);
            }
            stack.extend(self.children(candidate).iter().rev().copied());
        }
        None
    }

    fn depth_of(&self, entity: EntityHandle) -> usize {
        let mut depth = 1;
        let mut current = self.parent(entity);
        while let Some(ancestor) = current {
            depth += 1;
            if depth > self.config.max_hierarchy_depth {
                break;
            }
            current = self.parent(ancestor);
        }
        depth
    }

    fn subtree_height(&self, entity: EntityHandle) -> usize {
        1 + self
            .children(entity)
            .iter()
            .map(|&c| self.subtree_height(c))
            .max()
            .unwrap_or(0)
    }

    fn is_ancestor(&self, ancestor: EntityHandle, of: EntityHandle) -> bool {
        let mut current = Some(of);
        for _ in 0..=self.config.max_hierarchy_depth {
            match current {
                Some(entity) if entity == ancestor => return true,
                Some(entity) => current = self.parent(entity),
                None => return false,
            }
        }
        false
    }

    /// Reparents `child` under `parent`, or makes it a root with `None`.
    ///
    /// Missing transforms are added to both entities first. The child is
    /// appended as the last sibling and its world pose recomputes on the
    /// next read.
    ///
    /// # Errors
    ///
    /// [`WorldError::InvalidHandle`], [`WorldError::HierarchyCycle`] if
    /// `parent` is `child` or one of its descendants, or
    /// [`WorldError::HierarchyTooDeep`].
    pub fn try_set_parent(
        &mut self,
        child: EntityHandle,
        parent: Option<EntityHandle>,
    ) -> WorldResult<()> {
        if !self.is_valid(child) {
            self.stale("set_parent", child);
            return Err(WorldError::InvalidHandle(child));
        }

        if let Some(parent) = parent {
            if !self.is_valid(parent) {
                self.stale("set_parent", parent);
                return Err(WorldError::InvalidHandle(parent));
            }
            if self.is_ancestor(child, parent) {
                tracing::warn!(
                    "[{}] refusing to parent {} under {}: cycle",
                    self.config.label,
                    child,
                    parent
                );
                return Err(WorldError::HierarchyCycle { child, parent });
            }
            let max_depth = self.config.max_hierarchy_depth;
            if self.depth_of(parent) + self.subtree_height(child) > max_depth {
                tracing::warn!(
                    "[{}] refusing to parent {} under {}: deeper than {}",
                    self.config.label,
                    child,
                    parent,
                    max_depth
                );
                return Err(WorldError::HierarchyTooDeep { parent, max_depth });
            }
            self.ensure_transform(parent)?;
        }
        self.ensure_transform(child)?;

        if self.parent(child) == parent {
            return Ok(());
        }

        self.detach_from_parent(child);
        if let Some(parent) = parent {
            self.hierarchy
                .node_mut(parent.index() as usize)
                .children
                .push(child);
        }
        self.hierarchy.node_mut(child.index() as usize).parent = parent;
        self.mark_dirty(child);
        Ok(())
    }

    /// Reparents an entity; `false` if refused.
    pub fn set_parent(&mut self, child: EntityHandle, parent: Option<EntityHandle>) -> bool {
        self.try_set_parent(child, parent).is_ok()
    }

    /// Unlinks an entity from its parent's child list, making it a root.
    pub(crate) fn detach_from_parent(&mut self, entity: EntityHandle) {
        let index = entity.index() as usize;
        let Some(parent) = self.hierarchy.parent(index) else {
            return;
        };
        self.hierarchy
            .node_mut(parent.index() as usize)
            .children
            .retain(|&c| c != entity);
        self.hierarchy.node_mut(index).parent = None;
        self.mark_dirty(entity);
    }

    /// Unlinks a transform from both its parent and its children, ahead of
    /// the transform being removed. The children become roots.
    pub(crate) fn detach_hierarchy(&mut self, entity: EntityHandle) {
        self.detach_from_parent(entity);
        let children = std::mem::take(&mut self.hierarchy.node_mut(entity.index() as usize).children);
        for child in children {
            self.hierarchy.node_mut(child.index() as usize).parent = None;
            self.mark_dirty(child);
        }
    }

    /// Sets the local position; no-op if unchanged.
    pub fn set_local_position(&mut self, entity: EntityHandle, position: Vec3) -> bool {
        match self.transform_mut(entity) {
            Some(transform) => {
                transform.set_local_position(position);
                true
            }
            None => false,
        }
    }

    /// Sets the local rotation; no-op if unchanged.
    pub fn set_local_rotation(&mut self, entity: EntityHandle, rotation: Quat) -> bool {
        match self.transform_mut(entity) {
            Some(transform) => {
                transform.set_local_rotation(rotation);
                true
            }
            None => false,
        }
    }

    /// Sets the local scale; no-op if unchanged.
    pub fn set_local_scale(&mut self, entity: EntityHandle, scale: Vec3) -> bool {
        match self.transform_mut(entity) {
            Some(transform) => {
                transform.set_local_scale(scale);
                true
            }
            None => false,
        }
    }

    /// Position relative to the parent.
    #[must_use]
    pub fn local_position(&self, entity: EntityHandle) -> Option<Vec3> {
        self.get_component::<Transform>(entity).map(Transform::local_position)
    }

    /// Rotation relative to the parent.
    #[must_use]
    pub fn local_rotation(&self, entity: EntityHandle) -> Option<Quat> {
        self.get_component::<Transform>(entity).map(Transform::local_rotation)
    }

    /// Scale relative to the parent.
    #[must_use]
    pub fn local_scale(&self, entity: EntityHandle) -> Option<Vec3> {
        self.get_component::<Transform>(entity).map(Transform::local_scale)
    }

    /// Brings the world pose of `entity` and its ancestors up to date.
    fn resolve_transform(&mut self, entity: EntityHandle) -> Option<&Transform> {
        if !self.is_valid(entity) {
            self.stale("resolve_transform", entity);
            return None;
        }

        let limit = self.config.max_hierarchy_depth;
        let repository = self.registry.repository_mut::<Transform>()?;

        let mut chain = Vec::new();
        let mut current = Some(entity);
        while let Some(handle) = current {
            let index = handle.index() as usize;
            if !repository.contains(index) {
                break;
            }
            chain.push(handle);
            if chain.len() >= limit {
                break;
            }
            current = self
                .hierarchy
                .parent(index)
                .filter(|&parent| self.entities.is_valid(parent));
        }

        let mut parent: Option<ParentPose> = None;
        for &handle in chain.iter().rev() {
            let Some(transform) = repository.get_mut(handle.index() as usize) else {
                break;
            };
            let expected = parent.map_or(0, |p| p.stamp);
            let stale = transform.dirty || transform.owner != handle || transform.parent_stamp != expected;
            if stale {
                self.transform_epoch += 1;
                transform.owner = handle;
                transform.recompute(parent, self.transform_epoch);
            }
            parent = Some(transform.pose());
        }

        repository.get(entity.index() as usize)
    }

    /// World-space position, recomputed if stale.
    pub fn world_position(&mut self, entity: EntityHandle) -> Option<Vec3> {
        self.resolve_transform(entity).map(|t| t.world_position)
    }

    /// World-space rotation, recomputed if stale.
    pub fn world_rotation(&mut self, entity: EntityHandle) -> Option<Quat> {
        self.resolve_transform(entity).map(|t| t.world_rotation)
    }

    /// World-space scale, recomputed if stale.
    pub fn world_scale(&mut self, entity: EntityHandle) -> Option<Vec3> {
        self.resolve_transform(entity).map(|t| t.world_scale)
    }

    /// World-space matrix, recomputed if stale.
    pub fn world_matrix(&mut self, entity: EntityHandle) -> Option<Mat4> {
        self.resolve_transform(entity).map(|t| t.world_matrix)
    }

    /// Resolves every stale transform, e.g. before handing poses to a renderer.
    ///
    /// # Returns
    ///
    /// Number of transforms recomputed.
    pub fn update_transforms(&mut self) -> usize {
        let Some(repository) = self.registry.repository::<Transform>() else {
            return 0;
        };
        let attached: Vec<_> = repository
            .iter()
            .filter_map(|(index, _)| self.entities.handle_at(index))
            .collect();

        let before = self.transform_epoch;
        for entity in attached {
            self.resolve_transform(entity);
        }
        usize::try_from(self.transform_epoch - before).unwrap_or(usize::MAX)
    }
}
