//! The component contract shared by every unit attached to an [`Entity`].
//!
//! Components are stored as `Arc<dyn Component>` so that the scene can hand
//! out typed views to worker threads without copying. All hooks therefore take
//! `&self`; components that carry mutable state use interior mutability (the
//! built-in [`Transform`] uses `parking_lot` locks and atomics, behaviors wrap
//! user scripts in a mutex via [`BehaviorComponent`]).
//!
//! The state every component shares, its owner link and its `active` flag,
//! lives in a [`ComponentCore`] that implementors embed and expose through
//! [`Component::core`].
//!
//! [`Entity`]: crate::entity::Entity
//! [`Transform`]: crate::transform::Transform
//! [`BehaviorComponent`]: crate::behavior::BehaviorComponent
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use kestrel_ecs::prelude::*;
//!
//! #[derive(Default)]
//! struct Ticks {
//!     core: ComponentCore,
//!     count: AtomicU32,
//! }
//!
//! impl Component for Ticks {
//!     fn core(&self) -> &ComponentCore {
//!         &self.core
//!     }
//!
//!     fn update(&self, _ctx: &UpdateContext) {
//!         self.count.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! let mut entity = Entity::new("counter");
//! let ticks = entity.add_component(Ticks::default());
//! entity.update(&UpdateContext::detached(FrameTime::from_delta(0.016)));
//! assert_eq!(ticks.count.load(Ordering::Relaxed), 1);
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::behavior::DynBehavior;
use crate::command::CommandSender;
use crate::entity::EntityId;
use crate::transform::Transform;

// ---------------------------------------------------------------------------
// FrameTime
// ---------------------------------------------------------------------------

/// Timing for one phase invocation: the step length and time since start.
///
/// Computed by the host each frame and passed explicitly to every update, so
/// no process-wide clock is needed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTime {
    /// Seconds covered by this step.
    pub delta: f32,
    /// Seconds since the host started running.
    pub elapsed: f64,
}

impl FrameTime {
    pub fn new(delta: f32, elapsed: f64) -> Self {
        Self { delta, elapsed }
    }

    /// A step of `delta` seconds with no elapsed-time information.
    pub fn from_delta(delta: f32) -> Self {
        Self {
            delta,
            elapsed: 0.0,
        }
    }

    /// Same elapsed time, different step length.
    pub fn with_delta(self, delta: f32) -> Self {
        Self { delta, ..self }
    }
}

// ---------------------------------------------------------------------------
// UpdateContext
// ---------------------------------------------------------------------------

/// Everything a component sees while a phase runs.
///
/// Cheap to clone: the command sender is a channel handle. Worker tasks each
/// carry their own clone.
#[derive(Debug, Clone)]
pub struct UpdateContext {
    pub time: FrameTime,
    pub commands: CommandSender,
}

impl UpdateContext {
    pub fn new(time: FrameTime, commands: CommandSender) -> Self {
        Self { time, commands }
    }

    /// A context whose queued commands go nowhere. Useful when driving
    /// components outside of a scene.
    pub fn detached(time: FrameTime) -> Self {
        Self {
            time,
            commands: CommandSender::disconnected(),
        }
    }

    /// Same command sink, different step length.
    pub fn with_delta(&self, delta: f32) -> Self {
        Self {
            time: self.time.with_delta(delta),
            commands: self.commands.clone(),
        }
    }

    #[inline]
    pub fn delta(&self) -> f32 {
        self.time.delta
    }
}

// ---------------------------------------------------------------------------
// OwnerLink / ComponentCore
// ---------------------------------------------------------------------------

/// Back reference from a component to the entity that owns it.
///
/// Also carries a weak handle to the owner's transform so behaviors can cache
/// it without looking the entity up.
#[derive(Debug, Clone)]
pub struct OwnerLink {
    pub entity: EntityId,
    pub transform: Weak<Transform>,
}

/// State shared by all components: owner back-reference and `active` flag.
#[derive(Debug)]
pub struct ComponentCore {
    active: AtomicBool,
    owner: Mutex<Option<OwnerLink>>,
}

impl ComponentCore {
    /// A detached, active core.
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            owner: Mutex::new(None),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Store the flag. Returns `true` when the value actually changed.
    pub fn set_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::AcqRel) != active
    }

    pub fn owner(&self) -> Option<EntityId> {
        self.owner.lock().as_ref().map(|link| link.entity)
    }

    pub fn owner_link(&self) -> Option<OwnerLink> {
        self.owner.lock().clone()
    }

    pub fn set_owner(&self, link: Option<OwnerLink>) {
        *self.owner.lock() = link;
    }

    /// The owner's transform, if the owner has one and it is still alive.
    pub fn owner_transform(&self) -> Option<Arc<Transform>> {
        self.owner
            .lock()
            .as_ref()
            .and_then(|link| link.transform.upgrade())
    }

    /// Return to the pooled state: detached and active.
    pub fn reset(&self) {
        self.set_owner(None);
        self.active.store(true, Ordering::Release);
    }
}

impl Default for ComponentCore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// AsAny
// ---------------------------------------------------------------------------

/// Upcasting support so `dyn Component` values can be downcast to their
/// concrete type. Implemented for every `'static + Send + Sync` type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn full_type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn full_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Strip module paths from a `std::any::type_name` string, keeping generic
/// arguments: `a::b::Outer<c::Inner>` becomes `Outer<c::Inner>`.
pub fn short_type_name(full: &'static str) -> &'static str {
    let head_end = full.find('<').unwrap_or(full.len());
    match full[..head_end].rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// The capability set of every component.
///
/// Only [`core`](Self::core) is required; all hooks default to no-ops.
pub trait Component: AsAny {
    /// Owner link and `active` flag.
    fn core(&self) -> &ComponentCore;

    /// Per-frame update. Called by the entity fan-out and by the scheduler's
    /// transform and behavior views.
    fn update(&self, _ctx: &UpdateContext) {}

    fn on_enable(&self) {}

    fn on_disable(&self) {}

    /// Last hook before the component is dropped by its entity.
    fn on_destroy(&self) {}

    /// Display name used for logging and [`Entity::component_type_names`].
    ///
    /// [`Entity::component_type_names`]: crate::entity::Entity::component_type_names
    fn type_name(&self) -> &'static str {
        short_type_name(self.full_type_name())
    }

    /// `Some` when this component identifies as a behavior.
    fn into_behavior(self: Arc<Self>) -> Option<Arc<dyn DynBehavior>> {
        None
    }

    fn is_behavior(&self) -> bool {
        false
    }

    fn is_active(&self) -> bool {
        self.core().is_active()
    }

    /// Flip the `active` flag, firing `on_enable`/`on_disable` on a real edge.
    fn set_active(&self, active: bool) {
        if self.core().set_active(active) {
            if active {
                self.on_enable();
            } else {
                self.on_disable();
            }
        }
    }

    fn owner(&self) -> Option<EntityId> {
        self.core().owner()
    }
}

impl std::fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("type", &self.type_name())
            .field("active", &self.is_active())
            .field("owner", &self.owner())
            .finish()
    }
}

/// `true` when `component` is exactly a `T`.
#[inline]
pub fn is_component<T: Component>(component: &dyn Component) -> bool {
    component.as_any().is::<T>()
}

/// Downcast a shared component handle to its concrete type.
pub fn downcast_component<T: Component>(component: &Arc<dyn Component>) -> Option<Arc<T>> {
    if !is_component::<T>(component.as_ref()) {
        return None;
    }
    Arc::clone(component).into_any_arc().downcast::<T>().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
