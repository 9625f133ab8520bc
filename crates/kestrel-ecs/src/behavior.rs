//! User scripts attached to entities.
//!
//! A script implements [`Behavior`] with plain `&mut self` hooks. Wrapping it
//! in a [`BehaviorComponent`] makes it a [`Component`]: the wrapper owns the
//! `started` flag and the cached owner transform, and serializes access to the
//! script behind a mutex so the scene can dispatch behaviors from worker
//! threads.
//!
//! Per `update`:
//!
//! 1. the owner's transform is cached if it is not cached yet;
//! 2. `start` runs once, on the first update in which the component is active;
//! 3. `on_update` runs if the component is active.
//!
//! `on_late_update` and `on_fixed_update` are only called by the phase
//! drivers through [`DynBehavior`].
//!
//! # Example
//!
//! ```
//! use kestrel_ecs::prelude::*;
//!
//! #[derive(Default)]
//! struct Spin { frames: u32 }
//!
//! impl Behavior for Spin {
//!     fn on_update(&mut self, ctx: &mut BehaviorContext<'_>) {
//!         self.frames += 1;
//!         if let Some(t) = ctx.transform() {
//!             t.rotate(Vector3::new(0.0, 90.0 * ctx.delta_time(), 0.0));
//!         }
//!     }
//! }
//!
//! let mut entity = Entity::new("spinner");
//! entity.add_component(Transform::new());
//! let spin = entity.add_behavior(Spin::default());
//! entity.update(&UpdateContext::detached(FrameTime::from_delta(1.0)));
//! assert_eq!(spin.script().frames, 1);
//! ```

use std::sync::{Arc, Weak};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::command::CommandSender;
use crate::component::{short_type_name, Component, ComponentCore, FrameTime, UpdateContext};
use crate::entity::EntityId;
use crate::transform::Transform;

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

/// The script contract. Every hook has a no-op default.
pub trait Behavior: Send + 'static {
    /// Runs once, before the first `on_update`.
    fn start(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    fn on_update(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    fn on_late_update(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    /// Runs with `ctx.delta_time()` equal to the fixed interval.
    fn on_fixed_update(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    fn on_enable(&mut self) {}

    fn on_disable(&mut self) {}

    fn on_destroy(&mut self) {}

    fn on_collision_enter(&mut self, _other: EntityId) {}

    fn on_collision_stay(&mut self, _other: EntityId) {}

    fn on_collision_exit(&mut self, _other: EntityId) {}
}

// ---------------------------------------------------------------------------
// BehaviorContext
// ---------------------------------------------------------------------------

/// What a script can reach while one of its phase hooks runs.
pub struct BehaviorContext<'a> {
    owner: Option<EntityId>,
    transform: Option<Arc<Transform>>,
    frame: &'a UpdateContext,
    script: &'static str,
}

impl<'a> BehaviorContext<'a> {
    pub fn owner(&self) -> Option<EntityId> {
        self.owner
    }

    /// The owner's transform, if it has one.
    pub fn transform(&self) -> Option<&Arc<Transform>> {
        self.transform.as_ref()
    }

    /// Seconds covered by the current step.
    pub fn delta_time(&self) -> f32 {
        self.frame.time.delta
    }

    /// Seconds since the host started running.
    pub fn time(&self) -> f64 {
        self.frame.time.elapsed
    }

    pub fn frame_time(&self) -> FrameTime {
        self.frame.time
    }

    /// Structural scene changes are queued here and applied between phases.
    pub fn commands(&self) -> &CommandSender {
        &self.frame.commands
    }

    pub fn log_info(&self, message: &str) {
        info!(script = self.script, owner = ?self.owner, "{message}");
    }

    pub fn log_warn(&self, message: &str) {
        warn!(script = self.script, owner = ?self.owner, "{message}");
    }

    pub fn log_error(&self, message: &str) {
        error!(script = self.script, owner = ?self.owner, "{message}");
    }
}

// ---------------------------------------------------------------------------
// DynBehavior
// ---------------------------------------------------------------------------

/// Object-safe view of a behavior component, as held by the scene's cache.
pub trait DynBehavior: Component {
    fn late_update(&self, ctx: &UpdateContext);

    fn fixed_update(&self, ctx: &UpdateContext);

    fn is_started(&self) -> bool;

    fn collision_enter(&self, other: EntityId);

    fn collision_stay(&self, other: EntityId);

    fn collision_exit(&self, other: EntityId);
}

// ---------------------------------------------------------------------------
// BehaviorComponent
// ---------------------------------------------------------------------------

struct BehaviorState<B> {
    script: B,
    started: bool,
    transform: Option<Weak<Transform>>,
}

/// Component wrapper that drives a [`Behavior`].
pub struct BehaviorComponent<B: Behavior> {
    core: ComponentCore,
    state: Mutex<BehaviorState<B>>,
}

impl<B: Behavior> BehaviorComponent<B> {
    pub fn new(script: B) -> Self {
        Self {
            core: ComponentCore::new(),
            state: Mutex::new(BehaviorState {
                script,
                started: false,
                transform: None,
            }),
        }
    }

    /// Lock the script for direct access.
    ///
    /// Do not hold the guard across a phase: the drivers lock the same mutex.
    pub fn script(&self) -> MappedMutexGuard<'_, B> {
        MutexGuard::map(self.state.lock(), |state| &mut state.script)
    }

    /// The cached transform, if it has been populated and is still alive.
    pub fn cached_transform(&self) -> Option<Arc<Transform>> {
        self.state
            .lock()
            .transform
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn script_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<B>())
    }

    fn cache_transform(&self, state: &mut BehaviorState<B>) {
        if state.transform.is_none() {
            if let Some(link) = self.core.owner_link() {
                if link.transform.strong_count() > 0 {
                    state.transform = Some(link.transform);
                }
            }
        }
    }

    fn run_phase(
        &self,
        ctx: &UpdateContext,
        hook: impl FnOnce(&mut B, &mut BehaviorContext<'_>),
    ) {
        if !self.core.is_active() {
            return;
        }
        let mut state = self.state.lock();
        let mut bctx = self.context(&state, ctx);
        hook(&mut state.script, &mut bctx);
    }

    fn context<'a>(&self, state: &BehaviorState<B>, frame: &'a UpdateContext) -> BehaviorContext<'a> {
        BehaviorContext {
            owner: self.core.owner(),
            transform: state.transform.as_ref().and_then(Weak::upgrade),
            frame,
            script: self.script_name(),
        }
    }
}

impl<B: Behavior + Default> Default for BehaviorComponent<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: Behavior> Component for BehaviorComponent<B> {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn update(&self, ctx: &UpdateContext) {
        let mut state = self.state.lock();
        self.cache_transform(&mut state);
        if !self.core.is_active() {
            return;
        }
        let mut bctx = self.context(&state, ctx);
        if !state.started {
            state.started = true;
            state.script.start(&mut bctx);
        }
        state.script.on_update(&mut bctx);
    }

    fn on_enable(&self) {
        let mut state = self.state.lock();
        if !state.started {
            self.cache_transform(&mut state);
        }
        state.script.on_enable();
    }

    fn on_disable(&self) {
        self.state.lock().script.on_disable();
    }

    fn on_destroy(&self) {
        let mut state = self.state.lock();
        state.script.on_destroy();
        state.transform = None;
        state.started = false;
    }

    fn type_name(&self) -> &'static str {
        self.script_name()
    }

    fn into_behavior(self: Arc<Self>) -> Option<Arc<dyn DynBehavior>> {
        Some(self)
    }

    fn is_behavior(&self) -> bool {
        true
    }
}

impl<B: Behavior> DynBehavior for BehaviorComponent<B> {
    fn late_update(&self, ctx: &UpdateContext) {
        self.run_phase(ctx, |script, bctx| script.on_late_update(bctx));
    }

    fn fixed_update(&self, ctx: &UpdateContext) {
        self.run_phase(ctx, |script, bctx| script.on_fixed_update(bctx));
    }

    fn is_started(&self) -> bool {
        self.state.lock().started
    }

    fn collision_enter(&self, other: EntityId) {
        if self.core.is_active() {
            self.state.lock().script.on_collision_enter(other);
        }
    }

    fn collision_stay(&self, other: EntityId) {
        if self.core.is_active() {
            self.state.lock().script.on_collision_stay(other);
        }
    }

    fn collision_exit(&self, other: EntityId) {
        if self.core.is_active() {
            self.state.lock().script.on_collision_exit(other);
        }
    }
}

impl<B: Behavior> std::fmt::Debug for BehaviorComponent<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorComponent")
            .field("script", &self.script_name())
            .field("active", &self.core.is_active())
            .field("started", &self.is_started())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::OwnerLink;
    use crate::math::Vector3;

    #[derive(Default)]
    struct Recorder {
        starts: u32,
        updates: u32,
        late: u32,
        fixed: u32,
        last_fixed_dt: f32,
        enables: u32,
        destroys: u32,
        saw_transform: bool,
        collisions: Vec<EntityId>,
    }

    impl Behavior for Recorder {
        fn start(&mut self, _ctx: &mut BehaviorContext<'_>) {
            self.starts += 1;
        }

        fn on_update(&mut self, ctx: &mut BehaviorContext<'_>) {
            self.updates += 1;
            self.saw_transform = ctx.transform().is_some();
        }

        fn on_late_update(&mut self, _ctx: &mut BehaviorContext<'_>) {
            self.late += 1;
        }

        fn on_fixed_update(&mut self, ctx: &mut BehaviorContext<'_>) {
            self.fixed += 1;
            self.last_fixed_dt = ctx.delta_time();
        }

        fn on_enable(&mut self) {
            self.enables += 1;
        }

        fn on_destroy(&mut self) {
            self.destroys += 1;
        }

        fn on_collision_enter(&mut self, other: EntityId) {
            self.collisions.push(other);
        }
    }

    fn ctx(dt: f32) -> UpdateContext {
        UpdateContext::detached(FrameTime::from_delta(dt))
    }

    fn attach(component: &BehaviorComponent<Recorder>, transform: &Arc<Transform>) {
        component.core().set_owner(Some(OwnerLink {
            entity: EntityId::from_raw(1),
            transform: Arc::downgrade(transform),
        }));
    }

    // -- 1. Start/update ordering ---------------------------------------------

    #[test]
    fn start_fires_once_on_first_active_update() {
        let b = BehaviorComponent::new(Recorder::default());
        for _ in 0..5 {
            b.update(&ctx(0.016));
        }
        assert_eq!(b.script().starts, 1);
        assert_eq!(b.script().updates, 5);
        assert!(b.is_started());
    }

    #[test]
    fn inactive_behavior_neither_starts_nor_updates() {
        let b = BehaviorComponent::new(Recorder::default());
        b.core().set_active(false);
        b.update(&ctx(0.016));
        b.late_update(&ctx(0.016));
        b.fixed_update(&ctx(0.02));
        assert_eq!(b.script().starts, 0);
        assert_eq!(b.script().updates, 0);
        assert_eq!(b.script().late, 0);
        assert_eq!(b.script().fixed, 0);
        assert!(!b.is_started());
    }

    #[test]
    fn reenable_does_not_restart() {
        let b = BehaviorComponent::new(Recorder::default());
        b.update(&ctx(0.016));
        b.set_active(false);
        b.set_active(true);
        b.update(&ctx(0.016));
        assert_eq!(b.script().starts, 1);
        assert_eq!(b.script().enables, 1);
    }

    #[test]
    fn destroy_resets_started_and_cache() {
        let t = Arc::new(Transform::new());
        let b = BehaviorComponent::new(Recorder::default());
        attach(&b, &t);
        b.update(&ctx(0.016));
        assert!(b.cached_transform().is_some());

        b.on_destroy();
        assert!(!b.is_started());
        assert!(b.cached_transform().is_none());
        assert_eq!(b.script().destroys, 1);

        b.update(&ctx(0.016));
        assert_eq!(b.script().starts, 2);
    }

    // -- 2. Transform caching -------------------------------------------------

    #[test]
    fn caches_owner_transform_lazily() {
        let t = Arc::new(Transform::at(Vector3::ONE));
        let b = BehaviorComponent::new(Recorder::default());
        assert!(b.cached_transform().is_none());
        attach(&b, &t);
        assert!(b.cached_transform().is_none());
        b.update(&ctx(0.016));
        assert!(Arc::ptr_eq(&b.cached_transform().unwrap(), &t));
        assert!(b.script().saw_transform);
    }

    #[test]
    fn enable_before_start_populates_cache() {
        let t = Arc::new(Transform::new());
        let b = BehaviorComponent::new(Recorder::default());
        attach(&b, &t);
        b.set_active(false);
        b.set_active(true);
        assert!(b.cached_transform().is_some());
    }

    // -- 3. Phase hooks -------------------------------------------------------

    #[test]
    fn fixed_update_sees_supplied_delta() {
        let b = BehaviorComponent::new(Recorder::default());
        b.fixed_update(&ctx(0.02));
        assert_eq!(b.script().fixed, 1);
        assert_eq!(b.script().last_fixed_dt, 0.02);
    }

    #[test]
    fn collision_hooks_forward_other_entity() {
        let b = BehaviorComponent::new(Recorder::default());
        b.collision_enter(EntityId::from_raw(42));
        assert_eq!(b.script().collisions, vec![EntityId::from_raw(42)]);
    }

    #[test]
    fn identifies_as_behavior_with_script_name() {
        let b: Arc<dyn Component> = Arc::new(BehaviorComponent::new(Recorder::default()));
        assert!(b.is_behavior());
        assert_eq!(b.type_name(), "Recorder");
        assert!(b.into_behavior().is_some());

        let t: Arc<dyn Component> = Arc::new(Transform::new());
        assert!(!t.is_behavior());
        assert!(t.into_behavior().is_none());
    }
}
