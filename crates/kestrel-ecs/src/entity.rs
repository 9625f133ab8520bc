//! Entities: identified, tagged containers of components.
//!
//! An [`Entity`] owns an ordered list of components, at most one per exact
//! type. Ids come from a process-wide monotonic counter, so they are unique
//! across scenes and never reused.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::behavior::{Behavior, BehaviorComponent, DynBehavior};
use crate::component::{downcast_component, is_component, Component, OwnerLink, UpdateContext};
use crate::transform::Transform;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Globally unique, monotonically increasing entity identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Take the next id from the process-wide counter.
    pub fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An identified container of components.
pub struct Entity {
    id: EntityId,
    tag: String,
    name: String,
    active: bool,
    components: Vec<Arc<dyn Component>>,
    transform: Option<Arc<Transform>>,
}

impl Entity {
    /// A new active entity with a fresh id and an empty name.
    pub fn new(tag: impl Into<String>) -> Self {
        Self::named(tag, "")
    }

    pub fn named(tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: EntityId::next(),
            tag: tag.into(),
            name: name.into(),
            active: true,
            components: Vec::new(),
            transform: None,
        }
    }

    // -- accessors ----------------------------------------------------------

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Retag. Scenes index by tag, so entities owned by a scene are retagged
    /// through [`Scene::set_entity_tag`](crate::scene::Scene::set_entity_tag).
    pub(crate) fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The entity's transform, if it has one.
    pub fn transform(&self) -> Option<&Arc<Transform>> {
        self.transform.as_ref()
    }

    pub fn components(&self) -> &[Arc<dyn Component>] {
        &self.components
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn component_type_names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.type_name()).collect()
    }

    // -- component management -----------------------------------------------

    /// Add `component`, or return the existing component of the same exact
    /// type and drop `component` unused.
    pub fn add_component<T: Component>(&mut self, component: T) -> Arc<T> {
        if let Some(existing) = self.get_component::<T>() {
            return existing;
        }
        self.attach_component(Arc::new(component))
    }

    /// Add an already shared component (for example one drawn from a pool).
    /// Same duplicate rule as [`add_component`](Self::add_component).
    pub fn attach_component<T: Component>(&mut self, component: Arc<T>) -> Arc<T> {
        if let Some(existing) = self.get_component::<T>() {
            return existing;
        }
        let erased: Arc<dyn Component> = component.clone();
        if let Some(transform) = downcast_component::<Transform>(&erased) {
            self.transform = Some(transform);
            self.relink_owners();
        } else {
            erased.core().set_owner(Some(self.owner_link()));
        }
        self.components.push(erased);
        component
    }

    pub fn add_behavior<B: Behavior>(&mut self, script: B) -> Arc<BehaviorComponent<B>> {
        self.add_component(BehaviorComponent::new(script))
    }

    /// First component of exact type `T`.
    pub fn get_component<T: Component>(&self) -> Option<Arc<T>> {
        self.components.iter().find_map(downcast_component::<T>)
    }

    /// Every component of exact type `T`. With the one-per-type rule this
    /// has at most one element.
    pub fn get_components<T: Component>(&self) -> Vec<Arc<T>> {
        self.components
            .iter()
            .filter_map(downcast_component::<T>)
            .collect()
    }

    /// The script of behavior type `B`, if attached.
    pub fn get_behavior<B: Behavior>(&self) -> Option<Arc<BehaviorComponent<B>>> {
        self.get_component::<BehaviorComponent<B>>()
    }

    /// Every component that identifies as a behavior, in insertion order.
    pub fn behaviors(&self) -> Vec<Arc<dyn DynBehavior>> {
        self.components
            .iter()
            .filter(|c| c.is_behavior())
            .filter_map(|c| Arc::clone(c).into_behavior())
            .collect()
    }

    pub fn has_component<T: Component>(&self) -> bool {
        self.components.iter().any(|c| is_component::<T>(c.as_ref()))
    }

    /// Remove the component of exact type `T`, running `on_disable` then
    /// `on_destroy`. Returns `false` if there was none.
    pub fn remove_component<T: Component>(&mut self) -> bool {
        match self
            .components
            .iter()
            .position(|c| is_component::<T>(c.as_ref()))
        {
            Some(index) => {
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    /// Remove every component of exact type `T`; returns how many went.
    pub fn remove_components<T: Component>(&mut self) -> usize {
        let mut removed = 0;
        while self.remove_component::<T>() {
            removed += 1;
        }
        removed
    }

    fn remove_at(&mut self, index: usize) {
        let component = self.components.remove(index);
        destroy_component(component.as_ref());
        if is_component::<Transform>(component.as_ref()) {
            self.transform = None;
            self.relink_owners();
        }
    }

    fn owner_link(&self) -> OwnerLink {
        OwnerLink {
            entity: self.id,
            transform: self
                .transform
                .as_ref()
                .map(Arc::downgrade)
                .unwrap_or_else(Weak::new),
        }
    }

    fn relink_owners(&self) {
        let link = self.owner_link();
        for component in &self.components {
            component.core().set_owner(Some(link.clone()));
        }
        if let Some(transform) = &self.transform {
            transform.core().set_owner(Some(link));
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Update every active component in insertion order. Does nothing while
    /// the entity is inactive.
    pub fn update(&self, ctx: &UpdateContext) {
        if !self.active {
            return;
        }
        for component in &self.components {
            if component.is_active() {
                component.update(ctx);
            }
        }
    }

    /// Toggle the entity. On a real edge, `on_enable`/`on_disable` go to
    /// exactly the components active at that moment; their own flags are
    /// left alone.
    pub fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        for component in &self.components {
            if component.is_active() {
                if active {
                    component.on_enable();
                } else {
                    component.on_disable();
                }
            }
        }
    }

    pub fn enable_all_components(&self) {
        for component in &self.components {
            component.set_active(true);
        }
    }

    pub fn disable_all_components(&self) {
        for component in &self.components {
            component.set_active(false);
        }
    }

    /// Destroy every component in reverse insertion order.
    pub fn destroy_components(&mut self) {
        while let Some(component) = self.components.pop() {
            destroy_component(component.as_ref());
        }
        self.transform = None;
    }

    /// Give a recycled entity a fresh identity.
    pub(crate) fn reassign(&mut self, tag: impl Into<String>, name: impl Into<String>) {
        self.id = EntityId::next();
        self.tag = tag.into();
        self.name = name.into();
        self.active = true;
    }

    /// Clear back to an empty, active state for reuse from a pool.
    pub(crate) fn recycle(&mut self) {
        self.destroy_components();
        self.tag.clear();
        self.name.clear();
        self.active = true;
    }
}

fn destroy_component(component: &dyn Component) {
    component.on_disable();
    component.on_destroy();
    component.core().set_owner(None);
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("name", &self.name)
            .field("active", &self.active)
            .field("components", &self.component_type_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorContext;
    use crate::component::{ComponentCore, FrameTime};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Counter {
        core: ComponentCore,
        updates: AtomicU32,
        enables: AtomicU32,
        disables: AtomicU32,
    }

    impl Component for Counter {
        fn core(&self) -> &ComponentCore {
            &self.core
        }

        fn update(&self, _ctx: &UpdateContext) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }

        fn on_enable(&self) {
            self.enables.fetch_add(1, Ordering::Relaxed);
        }

        fn on_disable(&self) {
            self.disables.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records the order of destroy hooks across components.
    struct Named {
        core: ComponentCore,
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Component for Named {
        fn core(&self) -> &ComponentCore {
            &self.core
        }

        fn on_disable(&self) {
            self.log.lock().push(format!("{}:disable", self.label));
        }

        fn on_destroy(&self) {
            self.log.lock().push(format!("{}:destroy", self.label));
        }
    }

    struct OtherNamed(Named);

    impl Component for OtherNamed {
        fn core(&self) -> &ComponentCore {
            self.0.core()
        }

        fn on_destroy(&self) {
            self.0.on_destroy();
        }
    }

    #[derive(Default)]
    struct Script {
        updates: u32,
    }

    impl Behavior for Script {
        fn on_update(&mut self, _ctx: &mut BehaviorContext<'_>) {
            self.updates += 1;
        }
    }

    fn ctx() -> UpdateContext {
        UpdateContext::detached(FrameTime::from_delta(0.016))
    }

    // -- 1. Identity ----------------------------------------------------------

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = Entity::new("a");
        let b = Entity::new("b");
        assert!(b.id() > a.id());
        assert_eq!(EntityId::from_raw(a.id().to_raw()), a.id());
    }

    // -- 2. Component management ----------------------------------------------

    #[test]
    fn duplicate_add_returns_existing_instance() {
        let mut e = Entity::new("t");
        let first = e.add_component(Counter::default());
        let second = e.add_component(Counter::default());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(e.get_components::<Counter>().len(), 1);
        assert_eq!(e.component_count(), 1);
    }

    #[test]
    fn added_components_point_back_at_owner() {
        let mut e = Entity::new("t");
        let counter = e.add_component(Counter::default());
        let transform = e.add_component(Transform::new());
        assert_eq!(counter.owner(), Some(e.id()));
        assert_eq!(transform.owner(), Some(e.id()));
        assert!(Arc::ptr_eq(
            &counter.core().owner_transform().unwrap(),
            &transform
        ));
    }

    #[test]
    fn get_has_and_remove() {
        let mut e = Entity::new("t");
        assert!(!e.has_component::<Counter>());
        assert!(e.get_component::<Counter>().is_none());
        let c = e.add_component(Counter::default());
        assert!(e.has_component::<Counter>());
        assert!(e.remove_component::<Counter>());
        assert!(!e.remove_component::<Counter>());
        assert_eq!(c.disables.load(Ordering::Relaxed), 1);
        assert_eq!(c.owner(), None);
        assert_eq!(e.remove_components::<Counter>(), 0);
    }

    #[test]
    fn removing_transform_clears_owner_links() {
        let mut e = Entity::new("t");
        let c = e.add_component(Counter::default());
        e.add_component(Transform::new());
        assert!(e.transform().is_some());
        e.remove_component::<Transform>();
        assert!(e.transform().is_none());
        assert!(c.core().owner_transform().is_none());
    }

    #[test]
    fn behaviors_are_listed_and_typed() {
        let mut e = Entity::new("t");
        e.add_component(Counter::default());
        let script = e.add_behavior(Script::default());
        assert_eq!(e.behaviors().len(), 1);
        assert!(Arc::ptr_eq(&e.get_behavior::<Script>().unwrap(), &script));
        assert_eq!(e.component_type_names(), vec!["Counter", "Script"]);
    }

    // -- 3. Update and activation ---------------------------------------------

    #[test]
    fn update_skips_inactive_entity_and_components() {
        let mut e = Entity::new("t");
        let c = e.add_component(Counter::default());
        let script = e.add_behavior(Script::default());
        e.update(&ctx());
        c.set_active(false);
        e.update(&ctx());
        assert_eq!(c.updates.load(Ordering::Relaxed), 1);
        assert_eq!(script.script().updates, 2);

        e.set_active(false);
        e.update(&ctx());
        assert_eq!(script.script().updates, 2);
    }

    #[test]
    fn set_active_notifies_only_active_components_once_per_edge() {
        let mut e = Entity::new("t");
        let on = e.add_component(Counter::default());
        let off = e.add_component(Transform::new());
        off.core().set_active(false);

        e.set_active(true);
        assert_eq!(on.enables.load(Ordering::Relaxed), 0);

        e.set_active(false);
        e.set_active(false);
        assert_eq!(on.disables.load(Ordering::Relaxed), 1);
        assert!(on.is_active());
        assert!(!off.is_active());

        e.set_active(true);
        assert_eq!(on.enables.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn enable_and_disable_all_flip_component_flags() {
        let mut e = Entity::new("t");
        let c = e.add_component(Counter::default());
        e.disable_all_components();
        assert!(!c.is_active());
        assert_eq!(c.disables.load(Ordering::Relaxed), 1);
        e.enable_all_components();
        assert!(c.is_active());
        assert_eq!(c.enables.load(Ordering::Relaxed), 1);
    }

    // -- 4. Destruction -------------------------------------------------------

    #[test]
    fn destroy_runs_in_reverse_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut e = Entity::new("t");
        e.add_component(Named {
            core: ComponentCore::new(),
            label: "first",
            log: Arc::clone(&log),
        });
        e.add_component(OtherNamed(Named {
            core: ComponentCore::new(),
            label: "second",
            log: Arc::clone(&log),
        }));
        e.destroy_components();
        assert_eq!(
            *log.lock(),
            vec!["second:destroy", "first:disable", "first:destroy"]
        );
        assert_eq!(e.component_count(), 0);
    }
}
