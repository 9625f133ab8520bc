//! Scenes: the owned entity set, its indices, and the cached typed views.
//!
//! A [`Scene`] owns its entities and keeps two indices over them, id → entity
//! and tag → ids (in insertion order). It also caches two typed views built
//! from active entities: every entity's [`Transform`] and every component that
//! identifies as a behavior. The views are rebuilt lazily after any
//! structural change and are what the frame scheduler dispatches to workers.
//!
//! Structural changes requested while a phase runs go through the scene's
//! command queue (see [`crate::command`]) and are applied between phases.
//!
//! # Example
//!
//! ```
//! use kestrel_ecs::prelude::*;
//!
//! let mut scene = Scene::new("level-1");
//! let player = scene.create_entity("player", "hero");
//! scene.create_entity("enemy", "grunt");
//! scene.create_entity("enemy", "archer");
//!
//! assert_eq!(scene.find_entities_with_tag("enemy").len(), 2);
//! assert_eq!(scene.find_entity_with_tag("player").unwrap().id(), player);
//!
//! scene.entity_mut(player).unwrap().add_component(Transform::new());
//! assert_eq!(scene.cached_transforms().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::allocator::Allocator;
use crate::behavior::DynBehavior;
use crate::command::{ApplyReport, CommandQueue, CommandSender, SceneCommand};
use crate::component::{Component, FrameTime, UpdateContext};
use crate::entity::{Entity, EntityId};
use crate::math::Vector3;
use crate::transform::Transform;

/// Listener for entity created/destroyed events.
pub type EntityListener = Box<dyn FnMut(&Entity) + Send>;

/// Cached view of every active entity's transform.
pub type TransformView = Arc<Vec<Arc<Transform>>>;

/// Cached view of every behavior on an active entity.
pub type BehaviorView = Arc<Vec<Arc<dyn DynBehavior>>>;

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

pub struct Scene {
    name: String,
    active: bool,
    entities: Vec<Box<Entity>>,
    by_id: HashMap<EntityId, usize>,
    by_tag: HashMap<String, Vec<EntityId>>,
    cache_dirty: bool,
    transforms: TransformView,
    behaviors: BehaviorView,
    commands: CommandQueue,
    allocator: Option<Arc<Allocator>>,
    on_created: Vec<EntityListener>,
    on_destroyed: Vec<EntityListener>,
}

impl Scene {
    /// An empty, active scene.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            entities: Vec::new(),
            by_id: HashMap::new(),
            by_tag: HashMap::new(),
            cache_dirty: true,
            transforms: Arc::new(Vec::new()),
            behaviors: Arc::new(Vec::new()),
            commands: CommandQueue::new(),
            allocator: None,
            on_created: Vec::new(),
            on_destroyed: Vec::new(),
        }
    }

    /// A scene that draws entities and transforms from `allocator`'s pools
    /// and returns them there on destruction.
    pub fn with_allocator(name: impl Into<String>, allocator: Arc<Allocator>) -> Self {
        let mut scene = Self::new(name);
        scene.allocator = Some(allocator);
        scene
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn allocator(&self) -> Option<&Arc<Allocator>> {
        self.allocator.as_ref()
    }

    // -- events ---------------------------------------------------------------

    pub fn on_entity_created(&mut self, listener: impl FnMut(&Entity) + Send + 'static) {
        self.on_created.push(Box::new(listener));
    }

    pub fn on_entity_destroyed(&mut self, listener: impl FnMut(&Entity) + Send + 'static) {
        self.on_destroyed.push(Box::new(listener));
    }

    // -- creation -------------------------------------------------------------

    /// Create and register an entity; returns its id.
    pub fn create_entity(&mut self, tag: &str, name: &str) -> EntityId {
        let entity = match &self.allocator {
            Some(alloc) => {
                let mut entity = alloc.acquire_from_pool::<Box<Entity>>();
                entity.reassign(tag, name);
                entity
            }
            None => Box::new(Entity::named(tag, name)),
        };
        self.insert(entity)
    }

    /// Create an entity with a transform at `position`. The transform comes
    /// from the allocator's pool when the scene has one.
    pub fn create_entity_at(&mut self, tag: &str, name: &str, position: Vector3) -> EntityId {
        let id = self.create_entity(tag, name);
        self.add_transform(id, position);
        id
    }

    /// Attach a transform to an existing entity. Returns the existing one if
    /// the entity already has a transform.
    pub fn add_transform(&mut self, id: EntityId, position: Vector3) -> Option<Arc<Transform>> {
        let transform = match &self.allocator {
            Some(alloc) => {
                let t = alloc.acquire_from_pool::<Arc<Transform>>();
                t.set_position(position);
                t
            }
            None => Arc::new(Transform::at(position)),
        };
        let entity = self.entity_mut(id)?;
        Some(entity.attach_component(transform))
    }

    /// Take ownership of an externally built entity. Returns `false` and
    /// drops nothing if an entity with the same id is already registered.
    pub fn add_entity(&mut self, entity: Box<Entity>) -> bool {
        if self.by_id.contains_key(&entity.id()) {
            return false;
        }
        self.insert(entity);
        true
    }

    fn insert(&mut self, entity: Box<Entity>) -> EntityId {
        let id = entity.id();
        self.by_id.insert(id, self.entities.len());
        self.by_tag
            .entry(entity.tag().to_owned())
            .or_default()
            .push(id);
        for listener in &mut self.on_created {
            listener(&entity);
        }
        trace!(scene = %self.name, entity = %id, tag = entity.tag(), "entity created");
        self.entities.push(entity);
        self.mark_dirty();
        id
    }

    // -- destruction ----------------------------------------------------------

    /// Destroy the entity with `id`. Returns `false` if this scene does not
    /// own it.
    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        let Some(&index) = self.by_id.get(&id) else {
            return false;
        };
        for listener in &mut self.on_destroyed {
            listener(&self.entities[index]);
        }
        self.unindex(index);
        let entity = self.entities.remove(index);
        for (i, e) in self.entities.iter().enumerate().skip(index) {
            self.by_id.insert(e.id(), i);
        }
        self.mark_dirty();
        self.dispose(entity);
        true
    }

    /// Destroy every entity carrying `tag`; returns how many went.
    pub fn destroy_entities_with_tag(&mut self, tag: &str) -> usize {
        let ids = self.by_tag.get(tag).cloned().unwrap_or_default();
        ids.into_iter().filter(|id| self.destroy_entity(*id)).count()
    }

    pub fn destroy_all(&mut self) {
        let entities = std::mem::take(&mut self.entities);
        for entity in &entities {
            for listener in &mut self.on_destroyed {
                listener(entity);
            }
        }
        self.by_id.clear();
        self.by_tag.clear();
        self.mark_dirty();
        for entity in entities {
            self.dispose(entity);
        }
    }

    fn unindex(&mut self, index: usize) {
        let entity = &self.entities[index];
        let id = entity.id();
        self.by_id.remove(&id);
        if let Some(bucket) = self.by_tag.get_mut(entity.tag()) {
            bucket.retain(|e| *e != id);
            if bucket.is_empty() {
                self.by_tag.remove(entity.tag());
            }
        }
    }

    fn dispose(&self, mut entity: Box<Entity>) {
        let transform = entity.transform().cloned();
        entity.destroy_components();
        let Some(alloc) = &self.allocator else {
            return;
        };
        if let Some(t) = transform.filter(|t| t.is_pooled()) {
            // Still referenced elsewhere: let the holder drop it.
            if Arc::strong_count(&t) == 1 {
                alloc.release_to_pool(t);
            } else {
                alloc.forget_pooled::<Arc<Transform>>();
            }
        }
        alloc.release_to_pool(entity);
    }

    // -- lookup ---------------------------------------------------------------

    /// First entity in the `tag` bucket.
    pub fn find_entity_with_tag(&self, tag: &str) -> Option<&Entity> {
        self.by_tag
            .get(tag)
            .and_then(|ids| ids.first())
            .and_then(|id| self.find_entity_by_id(*id))
    }

    /// Every entity with `tag`, in insertion order.
    pub fn find_entities_with_tag(&self, tag: &str) -> Vec<&Entity> {
        self.entity_ids_with_tag(tag)
            .iter()
            .filter_map(|id| self.find_entity_by_id(*id))
            .collect()
    }

    pub fn entity_ids_with_tag(&self, tag: &str) -> &[EntityId] {
        self.by_tag.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find_entity_by_id(&self, id: EntityId) -> Option<&Entity> {
        self.by_id.get(&id).map(|&i| self.entities[i].as_ref())
    }

    /// Mutable access to an entity. Invalidates the cached views, since the
    /// caller may add or remove components or toggle the entity.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let index = *self.by_id.get(&id)?;
        self.mark_dirty();
        Some(self.entities[index].as_mut())
    }

    pub fn find_entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .map(AsRef::as_ref)
            .find(|e| e.name() == name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().map(AsRef::as_ref)
    }

    /// First component of type `T` on an active entity.
    pub fn find_component<T: Component>(&self) -> Option<Arc<T>> {
        self.entities
            .iter()
            .filter(|e| e.is_active())
            .find_map(|e| e.get_component::<T>())
    }

    /// Every component of type `T` on active entities.
    pub fn find_components<T: Component>(&self) -> Vec<Arc<T>> {
        self.entities
            .iter()
            .filter(|e| e.is_active())
            .flat_map(|e| e.get_components::<T>())
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn active_entity_count(&self) -> usize {
        self.entities.iter().filter(|e| e.is_active()).count()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.by_id.contains_key(&id)
    }

    // -- mutation -------------------------------------------------------------

    /// Retag an entity and move it between tag buckets.
    pub fn set_entity_tag(&mut self, id: EntityId, tag: &str) -> bool {
        let Some(&index) = self.by_id.get(&id) else {
            return false;
        };
        self.unindex(index);
        let entity = &mut self.entities[index];
        entity.set_tag(tag);
        self.by_id.insert(id, index);
        self.by_tag.entry(tag.to_owned()).or_default().push(id);
        self.mark_dirty();
        true
    }

    pub fn set_entity_active(&mut self, id: EntityId, active: bool) -> bool {
        match self.entity_mut(id) {
            Some(entity) => {
                entity.set_active(active);
                true
            }
            None => false,
        }
    }

    /// Parent `child`'s transform under `parent`'s (or detach it).
    pub fn set_entity_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> bool {
        let Some(child_t) = self
            .find_entity_by_id(child)
            .and_then(|e| e.transform().cloned())
        else {
            return false;
        };
        match parent {
            Some(pid) => match self
                .find_entity_by_id(pid)
                .and_then(|e| e.transform().cloned())
            {
                Some(parent_t) => child_t.set_parent(Some(&parent_t)),
                None => false,
            },
            None => child_t.set_parent(None),
        }
    }

    // -- cached views ---------------------------------------------------------

    /// Invalidate the cached views. They are released immediately so the
    /// scene does not keep destroyed components alive.
    pub fn mark_dirty(&mut self) {
        if !self.cache_dirty {
            self.transforms = Arc::new(Vec::new());
            self.behaviors = Arc::new(Vec::new());
            self.cache_dirty = true;
        }
    }

    pub fn is_cache_dirty(&self) -> bool {
        self.cache_dirty
    }

    /// Transforms of active entities, rebuilt if stale.
    pub fn cached_transforms(&mut self) -> TransformView {
        self.refresh_caches();
        Arc::clone(&self.transforms)
    }

    /// Behaviors of active entities, rebuilt if stale.
    pub fn cached_behaviors(&mut self) -> BehaviorView {
        self.refresh_caches();
        Arc::clone(&self.behaviors)
    }

    fn refresh_caches(&mut self) {
        if !self.cache_dirty {
            return;
        }
        let mut transforms = Vec::with_capacity(self.entities.len());
        let mut behaviors = Vec::new();
        for entity in self.entities.iter().filter(|e| e.is_active()) {
            if let Some(t) = entity.transform() {
                transforms.push(Arc::clone(t));
            }
            behaviors.extend(
                entity
                    .components()
                    .iter()
                    .filter(|c| c.is_behavior())
                    .filter_map(|c| Arc::clone(c).into_behavior()),
            );
        }
        debug!(
            scene = %self.name,
            transforms = transforms.len(),
            behaviors = behaviors.len(),
            "rebuilt component caches"
        );
        self.transforms = Arc::new(transforms);
        self.behaviors = Arc::new(behaviors);
        self.cache_dirty = false;
    }

    // -- commands -------------------------------------------------------------

    /// Handle for queuing structural changes from inside a phase.
    pub fn command_sender(&self) -> CommandSender {
        self.commands.sender()
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Context for one phase of this scene.
    pub fn update_context(&self, time: FrameTime) -> UpdateContext {
        UpdateContext::new(time, self.command_sender())
    }

    /// Apply every queued command in FIFO order.
    pub fn apply_commands(&mut self) -> ApplyReport {
        let mut report = ApplyReport::default();
        for command in self.commands.drain() {
            match command {
                SceneCommand::Spawn { tag, name, build } => {
                    let id = self.create_entity(&tag, &name);
                    if let Some(build) = build {
                        if let Some(entity) = self.entity_mut(id) {
                            build(entity);
                        }
                    }
                    report.spawned += 1;
                    report.record(true);
                }
                SceneCommand::Destroy(id) => report.record(self.destroy_entity(id)),
                SceneCommand::DestroyWithTag(tag) => {
                    report.record(self.destroy_entities_with_tag(&tag) > 0)
                }
                SceneCommand::SetTag { entity, tag } => {
                    report.record(self.set_entity_tag(entity, &tag))
                }
                SceneCommand::SetActive { entity, active } => {
                    report.record(self.set_entity_active(entity, active))
                }
                SceneCommand::SetParent { child, parent } => {
                    report.record(self.set_entity_parent(child, parent))
                }
            }
        }
        if report.total() > 0 {
            debug!(
                scene = %self.name,
                applied = report.applied,
                failed = report.failed,
                "applied scene commands"
            );
        }
        report
    }

    // -- phase drivers --------------------------------------------------------

    /// Update every entity (all of its active components), then apply
    /// queued commands.
    pub fn update(&mut self, time: FrameTime) {
        if !self.active {
            return;
        }
        let ctx = self.update_context(time);
        for entity in &self.entities {
            entity.update(&ctx);
        }
        self.apply_commands();
    }

    /// Late-update every cached behavior, then apply queued commands.
    pub fn late_update(&mut self, time: FrameTime) {
        if !self.active {
            return;
        }
        let ctx = self.update_context(time);
        for behavior in self.cached_behaviors().iter() {
            behavior.late_update(&ctx);
        }
        self.apply_commands();
    }

    /// Fixed-update every cached behavior with `time.delta` as the step,
    /// then apply queued commands.
    pub fn fixed_update(&mut self, time: FrameTime) {
        if !self.active {
            return;
        }
        let ctx = self.update_context(time);
        for behavior in self.cached_behaviors().iter() {
            behavior.fixed_update(&ctx);
        }
        self.apply_commands();
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.mark_dirty();
        for entity in std::mem::take(&mut self.entities) {
            self.dispose(entity);
        }
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("active", &self.active)
            .field("entities", &self.entities.len())
            .field("tags", &self.by_tag.len())
            .field("cache_dirty", &self.cache_dirty)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocatorConfig;
    use crate::behavior::{Behavior, BehaviorContext};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Counter {
        updates: u32,
        late: u32,
        fixed: u32,
    }

    impl Behavior for Counter {
        fn on_update(&mut self, _ctx: &mut BehaviorContext<'_>) {
            self.updates += 1;
        }

        fn on_late_update(&mut self, _ctx: &mut BehaviorContext<'_>) {
            self.late += 1;
        }

        fn on_fixed_update(&mut self, _ctx: &mut BehaviorContext<'_>) {
            self.fixed += 1;
        }
    }

    /// Destroys every entity tagged "doomed" from inside its update.
    struct Reaper;

    impl Behavior for Reaper {
        fn on_update(&mut self, ctx: &mut BehaviorContext<'_>) {
            ctx.commands().destroy_with_tag("doomed");
        }
    }

    fn time() -> FrameTime {
        FrameTime::from_delta(0.016)
    }

    // -- 1. Creation and indices ----------------------------------------------

    #[test]
    fn tag_lookup_preserves_insertion_order() {
        let mut scene = Scene::new("s");
        let ids: Vec<_> = ["a", "a", "b", ""]
            .iter()
            .map(|tag| scene.create_entity(tag, ""))
            .collect();

        let a = scene.find_entities_with_tag("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].id(), ids[0]);
        assert_eq!(a[1].id(), ids[1]);
        assert_eq!(scene.find_entity_with_tag("b").unwrap().id(), ids[2]);
        assert!(scene.find_entity_with_tag("c").is_none());
        assert!(scene.find_entities_with_tag("c").is_empty());
        assert_eq!(scene.find_entity_with_tag("").unwrap().id(), ids[3]);
    }

    #[test]
    fn add_entity_takes_ownership() {
        let mut scene = Scene::new("s");
        let entity = Box::new(Entity::named("t", "n"));
        let id = entity.id();
        assert!(scene.add_entity(entity));
        assert!(scene.contains(id));
        assert_eq!(scene.entity_ids_with_tag("t"), &[id]);
        assert_eq!(scene.find_entity_by_name("n").unwrap().id(), id);
    }

    #[test]
    fn created_listener_fires_per_entity() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new("s");
        let sink = Arc::clone(&seen);
        scene.on_entity_created(move |e| sink.lock().push(e.id()));
        let a = scene.create_entity("x", "");
        let b = scene.create_entity("y", "");
        assert_eq!(*seen.lock(), vec![a, b]);
    }

    // -- 2. Destruction -------------------------------------------------------

    #[test]
    fn destroy_removes_from_both_indices() {
        let mut scene = Scene::new("s");
        let a = scene.create_entity("t", "");
        let b = scene.create_entity("t", "");
        let c = scene.create_entity("u", "");
        assert!(scene.destroy_entity(a));
        assert!(!scene.destroy_entity(a));
        assert!(scene.find_entity_by_id(a).is_none());
        assert_eq!(scene.find_entity_by_id(b).unwrap().id(), b);
        assert_eq!(scene.find_entity_by_id(c).unwrap().id(), c);
        assert_eq!(scene.entity_ids_with_tag("t"), &[b]);
    }

    #[test]
    fn destroy_unknown_entity_has_no_side_effects() {
        let mut scene = Scene::new("s");
        scene.create_entity("t", "");
        scene.cached_transforms();
        assert!(!scene.destroy_entity(EntityId::from_raw(u64::MAX)));
        assert!(!scene.is_cache_dirty());
        assert_eq!(scene.entity_count(), 1);
    }

    #[test]
    fn destroyed_listener_sees_entity_before_removal() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new("s");
        let sink = Arc::clone(&seen);
        scene.on_entity_destroyed(move |e| sink.lock().push(e.tag().to_owned()));
        scene.create_entity("a", "");
        scene.create_entity("b", "");
        scene.create_entity("a", "");
        assert_eq!(scene.destroy_entities_with_tag("a"), 2);
        scene.destroy_all();
        assert_eq!(*seen.lock(), vec!["a", "a", "b"]);
        assert_eq!(scene.entity_count(), 0);
    }

    // -- 3. Caches ------------------------------------------------------------

    #[test]
    fn caches_follow_active_entities() {
        let mut scene = Scene::new("s");
        let a = scene.create_entity_at("t", "", Vector3::ZERO);
        let b = scene.create_entity_at("t", "", Vector3::ONE);
        scene.entity_mut(b).unwrap().add_behavior(Counter::default());
        assert_eq!(scene.cached_transforms().len(), 2);
        assert_eq!(scene.cached_behaviors().len(), 1);
        assert!(!scene.is_cache_dirty());

        scene.set_entity_active(b, false);
        assert!(scene.is_cache_dirty());
        assert_eq!(scene.cached_transforms().len(), 1);
        assert_eq!(scene.cached_behaviors().len(), 0);

        scene.destroy_entity(a);
        assert_eq!(scene.cached_transforms().len(), 0);
    }

    #[test]
    fn retag_moves_between_buckets() {
        let mut scene = Scene::new("s");
        let id = scene.create_entity("old", "");
        assert!(scene.set_entity_tag(id, "new"));
        assert!(scene.find_entity_with_tag("old").is_none());
        assert_eq!(scene.find_entity_with_tag("new").unwrap().tag(), "new");
        assert!(scene.is_cache_dirty());
    }

    #[test]
    fn find_component_skips_inactive_entities() {
        let mut scene = Scene::new("s");
        let a = scene.create_entity_at("t", "", Vector3::ONE);
        scene.create_entity_at("t", "", Vector3::ZERO);
        scene.set_entity_active(a, false);
        let found = scene.find_component::<Transform>().unwrap();
        assert_eq!(found.position(), Vector3::ZERO);
        assert_eq!(scene.find_components::<Transform>().len(), 1);
    }

    // -- 4. Phases ------------------------------------------------------------

    #[test]
    fn phases_reach_behaviors() {
        let mut scene = Scene::new("s");
        let id = scene.create_entity("t", "");
        let counter = scene.entity_mut(id).unwrap().add_behavior(Counter::default());
        for _ in 0..3 {
            scene.update(time());
            scene.late_update(time());
            scene.fixed_update(time());
        }
        let c = counter.script();
        assert_eq!((c.updates, c.late, c.fixed), (3, 3, 3));
    }

    #[test]
    fn inactive_scene_runs_nothing() {
        let mut scene = Scene::new("s");
        let id = scene.create_entity("t", "");
        let counter = scene.entity_mut(id).unwrap().add_behavior(Counter::default());
        scene.set_active(false);
        scene.update(time());
        scene.late_update(time());
        assert_eq!(counter.script().updates, 0);
        assert_eq!(counter.script().late, 0);
    }

    #[test]
    fn commands_queued_during_update_apply_after_it() {
        let mut scene = Scene::new("s");
        let reaper = scene.create_entity("reaper", "");
        scene.entity_mut(reaper).unwrap().add_behavior(Reaper);
        scene.create_entity("doomed", "");
        scene.create_entity("doomed", "");
        scene.update(time());
        assert!(scene.find_entities_with_tag("doomed").is_empty());
        assert_eq!(scene.entity_count(), 1);
    }

    #[test]
    fn spawn_command_runs_builder() {
        let mut scene = Scene::new("s");
        scene
            .command_sender()
            .spawn_with("built", "b", |e| {
                e.add_component(Transform::at(Vector3::UP));
            });
        let report = scene.apply_commands();
        assert_eq!(report.spawned, 1);
        let e = scene.find_entity_with_tag("built").unwrap();
        assert_eq!(e.transform().unwrap().position(), Vector3::UP);
    }

    #[test]
    fn parent_command_links_transforms() {
        let mut scene = Scene::new("s");
        let p = scene.create_entity_at("p", "", Vector3::new(1.0, 0.0, 0.0));
        let c = scene.create_entity_at("c", "", Vector3::new(0.0, 2.0, 0.0));
        let bare = scene.create_entity("bare", "");
        let sender = scene.command_sender();
        sender.set_parent(c, Some(p));
        sender.set_parent(bare, Some(p));
        let report = scene.apply_commands();
        assert_eq!((report.applied, report.failed), (1, 1));
        let child = scene.find_entity_by_id(c).unwrap().transform().unwrap();
        assert_eq!(child.world_position(), Vector3::new(1.0, 2.0, 0.0));
    }

    // -- 5. Pooled storage ----------------------------------------------------

    #[test]
    fn pooled_scene_recycles_entities_and_transforms() {
        let alloc = Arc::new(Allocator::new(AllocatorConfig {
            default_pool_capacity: 4,
            ..Default::default()
        }));
        alloc.initialize_pools();
        let mut scene = Scene::with_allocator("pooled", Arc::clone(&alloc));

        let ids: Vec<_> = (0..2)
            .map(|_| scene.create_entity_at("t", "", Vector3::ONE))
            .collect();
        assert_eq!(alloc.pool::<Box<Entity>>().in_use(), 2);
        assert_eq!(alloc.pool::<Arc<Transform>>().in_use(), 2);

        for id in ids {
            scene.destroy_entity(id);
        }
        assert_eq!(alloc.pool::<Box<Entity>>().in_use(), 0);
        assert_eq!(alloc.pool::<Arc<Transform>>().in_use(), 0);
        assert_eq!(alloc.pool::<Box<Entity>>().total_created(), 2);
        assert_eq!(alloc.pool::<Arc<Transform>>().total_created(), 4);
    }

    #[test]
    fn shared_pooled_transform_is_written_off_not_recycled() {
        let alloc = Arc::new(Allocator::default());
        let mut scene = Scene::with_allocator("pooled", Arc::clone(&alloc));
        let id = scene.create_entity_at("t", "", Vector3::ONE);
        let held = Arc::clone(scene.find_entity_by_id(id).unwrap().transform().unwrap());
        let before = alloc.pool::<Arc<Transform>>().total_created();
        scene.destroy_entity(id);
        let pool = alloc.pool::<Arc<Transform>>();
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.total_created(), before - 1);
        assert_eq!(held.position(), Vector3::ONE);
    }
}
