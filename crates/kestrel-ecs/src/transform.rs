//! Local TRS, the parent/child graph, and the lazily cached world TRS.
//!
//! A [`Transform`] is shared as `Arc<Transform>`: the owning entity holds one
//! handle, the scene's cached view holds another, and children refer to their
//! parent through a `Weak`. All mutation goes through `&self`.
//!
//! World values compose additively for position and rotation and
//! componentwise for scale. Rotation is Euler degrees, so this is exact only
//! for axis-aligned hierarchies.
//!
//! # Locking
//!
//! Each transform has three locks: its TRS state, its parent link and its
//! child list. Marking dirty walks down holding child-list locks in
//! ancestor-to-descendant order; computing the world value walks up without
//! holding any lock across the recursion. Neither path can deadlock against
//! the other.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use kestrel_ecs::math::Vector3;
//! use kestrel_ecs::transform::Transform;
//!
//! let parent = Arc::new(Transform::at(Vector3::new(1.0, 0.0, 0.0)));
//! let child = Arc::new(Transform::at(Vector3::new(0.0, 2.0, 0.0)));
//! child.set_parent(Some(&parent));
//! assert_eq!(child.world_position(), Vector3::new(1.0, 2.0, 0.0));
//!
//! parent.translate(Vector3::new(0.0, 0.0, 3.0));
//! assert_eq!(child.world_position(), Vector3::new(1.0, 2.0, 3.0));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::component::{Component, ComponentCore};
use crate::math::{euler_to_direction, Vector3};

// ---------------------------------------------------------------------------
// Trs
// ---------------------------------------------------------------------------

/// Position, rotation (Euler degrees) and scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trs {
    pub position: Vector3,
    pub rotation: Vector3,
    pub scale: Vector3,
}

impl Trs {
    pub const IDENTITY: Self = Self {
        position: Vector3::ZERO,
        rotation: Vector3::ZERO,
        scale: Vector3::ONE,
    };

    /// Compose `local` under `parent`.
    fn under(parent: &Trs, local: &Trs) -> Trs {
        Trs {
            position: parent.position + local.position,
            rotation: parent.rotation + local.rotation,
            scale: parent.scale.scale_by(local.scale),
        }
    }
}

impl Default for Trs {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug)]
struct TrsState {
    local: Trs,
    world: Trs,
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Transform {
    core: ComponentCore,
    state: Mutex<TrsState>,
    world_dirty: AtomicBool,
    parent: Mutex<Weak<Transform>>,
    children: Mutex<Vec<Weak<Transform>>>,
    /// Created by an object pool; only such transforms are recycled.
    pooled: bool,
}

impl Transform {
    /// Identity transform with no parent.
    pub fn new() -> Self {
        Self::from_trs(Trs::IDENTITY)
    }

    pub fn at(position: Vector3) -> Self {
        Self::from_trs(Trs {
            position,
            ..Trs::IDENTITY
        })
    }

    pub fn with_trs(position: Vector3, rotation: Vector3, scale: Vector3) -> Self {
        Self::from_trs(Trs {
            position,
            rotation,
            scale,
        })
    }

    pub(crate) fn pooled() -> Self {
        let mut t = Self::new();
        t.pooled = true;
        t
    }

    fn from_trs(local: Trs) -> Self {
        Self {
            core: ComponentCore::new(),
            state: Mutex::new(TrsState { local, world: local }),
            world_dirty: AtomicBool::new(true),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            pooled: false,
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    // -- local TRS ----------------------------------------------------------

    pub fn local(&self) -> Trs {
        self.state.lock().local
    }

    pub fn position(&self) -> Vector3 {
        self.state.lock().local.position
    }

    pub fn rotation(&self) -> Vector3 {
        self.state.lock().local.rotation
    }

    pub fn scale(&self) -> Vector3 {
        self.state.lock().local.scale
    }

    pub fn set_position(&self, position: Vector3) {
        self.modify_local(|trs| trs.position = position);
    }

    pub fn set_rotation(&self, rotation: Vector3) {
        self.modify_local(|trs| trs.rotation = rotation);
    }

    pub fn set_scale(&self, scale: Vector3) {
        self.modify_local(|trs| trs.scale = scale);
    }

    pub fn set_uniform_scale(&self, scale: f32) {
        self.set_scale(Vector3::splat(scale));
    }

    pub fn translate(&self, delta: Vector3) {
        self.modify_local(|trs| trs.position += delta);
    }

    /// Add `delta` degrees to the local rotation.
    pub fn rotate(&self, delta: Vector3) {
        self.modify_local(|trs| trs.rotation += delta);
    }

    /// Multiply the local scale componentwise by `factor`.
    pub fn scale_by(&self, factor: Vector3) {
        self.modify_local(|trs| trs.scale = trs.scale.scale_by(factor));
    }

    pub fn set_local(&self, local: Trs) {
        self.modify_local(|trs| *trs = local);
    }

    fn modify_local(&self, f: impl FnOnce(&mut Trs)) {
        f(&mut self.state.lock().local);
        self.mark_world_dirty();
    }

    // -- world TRS ----------------------------------------------------------

    /// World TRS, recomputed if any ancestor or this node changed.
    pub fn world(&self) -> Trs {
        if !self.world_dirty.load(Ordering::Acquire) {
            return self.state.lock().world;
        }
        let parent = self.parent.lock().upgrade();
        let parent_world = parent.map(|p| p.world());

        let mut state = self.state.lock();
        state.world = match parent_world {
            Some(pw) => Trs::under(&pw, &state.local),
            None => state.local,
        };
        self.world_dirty.store(false, Ordering::Release);
        state.world
    }

    pub fn world_position(&self) -> Vector3 {
        self.world().position
    }

    pub fn world_rotation(&self) -> Vector3 {
        self.world().rotation
    }

    pub fn world_scale(&self) -> Vector3 {
        self.world().scale
    }

    /// `true` until the world TRS is next queried after a change.
    pub fn is_world_dirty(&self) -> bool {
        self.world_dirty.load(Ordering::Acquire)
    }

    /// Mark this node and its whole subtree dirty.
    pub fn mark_world_dirty(&self) {
        self.world_dirty.store(true, Ordering::Release);
        let children = self.children.lock();
        for child in children.iter().filter_map(Weak::upgrade) {
            child.mark_world_dirty();
        }
    }

    // -- directions ---------------------------------------------------------

    /// Forward axis from the local rotation (yaw = `y`, pitch = `x`).
    pub fn forward(&self) -> Vector3 {
        euler_to_direction(self.rotation())
    }

    pub fn right(&self) -> Vector3 {
        self.forward().cross(Vector3::UP).normalized()
    }

    pub fn up(&self) -> Vector3 {
        let forward = self.forward();
        let right = forward.cross(Vector3::UP).normalized();
        right.cross(forward).normalized()
    }

    pub fn distance_to(&self, other: &Transform) -> f32 {
        self.world_position().distance(other.world_position())
    }

    /// Unit vector towards `other`, or zero when there is no target.
    pub fn direction_to(&self, other: Option<&Transform>) -> Vector3 {
        match other {
            Some(other) => (other.world_position() - self.world_position()).normalized(),
            None => Vector3::ZERO,
        }
    }

    // -- hierarchy ----------------------------------------------------------

    pub fn parent(&self) -> Option<Arc<Transform>> {
        self.parent.lock().upgrade()
    }

    /// Live children in attachment order.
    pub fn children(&self) -> Vec<Arc<Transform>> {
        self.children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn child_count(&self) -> usize {
        self.children
            .lock()
            .iter()
            .filter(|c| c.strong_count() > 0)
            .count()
    }

    /// Re-parent this node, keeping `parent.children` symmetric.
    ///
    /// Returns `false` without changing anything when `new_parent` is this
    /// node or one of its descendants.
    pub fn set_parent(self: &Arc<Self>, new_parent: Option<&Arc<Transform>>) -> bool {
        let current = self.parent();
        let unchanged = match (&current, new_parent) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return true;
        }
        if let Some(candidate) = new_parent {
            if self.is_self_or_ancestor_of(candidate) {
                warn!("rejected transform re-parent that would create a cycle");
                return false;
            }
        }

        if let Some(old) = current {
            old.remove_child(self);
        }
        *self.parent.lock() = new_parent.map(Arc::downgrade).unwrap_or_default();
        if let Some(parent) = new_parent {
            parent.children.lock().push(Arc::downgrade(self));
        }
        self.mark_world_dirty();
        true
    }

    fn is_self_or_ancestor_of(&self, node: &Arc<Transform>) -> bool {
        let mut cursor = Some(Arc::clone(node));
        while let Some(n) = cursor {
            if std::ptr::eq(Arc::as_ptr(&n), self) {
                return true;
            }
            cursor = n.parent();
        }
        false
    }

    fn remove_child(&self, child: &Transform) {
        self.children
            .lock()
            .retain(|w| !std::ptr::eq(w.as_ptr(), child) && w.strong_count() > 0);
    }

    /// Unlink from the parent and orphan every child. Children keep their
    /// local TRS, which now is also their world TRS.
    pub fn detach(&self) {
        if let Some(parent) = self.parent() {
            parent.remove_child(self);
        }
        *self.parent.lock() = Weak::new();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            *child.parent.lock() = Weak::new();
            child.mark_world_dirty();
        }
        self.mark_world_dirty();
    }

    /// Return to a fresh identity state for reuse from a pool.
    pub fn recycle(&self) {
        self.detach();
        self.core.reset();
        self.set_local(Trs::IDENTITY);
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for Transform {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn on_destroy(&self) {
        self.detach();
    }

    fn type_name(&self) -> &'static str {
        "Transform"
    }
}

impl Drop for Transform {
    fn drop(&mut self) {
        for child in self.children.get_mut().iter().filter_map(Weak::upgrade) {
            *child.parent.lock() = Weak::new();
            child.mark_world_dirty();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
