//! Named scene storage with a single current scene and deferred transitions.
//!
//! The registry owns every [`Scene`] by name. At most one is current; the
//! phase drivers ([`update`](SceneRegistry::update) and friends) delegate to
//! it. A transition is either immediate ([`load`](SceneRegistry::load)) or
//! deferred ([`load_deferred`](SceneRegistry::load_deferred)), in which case
//! it resolves at the top of the next `update`. Only one deferred transition
//! can be pending at a time.
//!
//! # Example
//!
//! ```
//! use kestrel_ecs::prelude::*;
//!
//! let mut scenes = SceneRegistry::new();
//! scenes.create("menu").unwrap();
//! scenes.create("level").unwrap();
//! scenes.load("menu").unwrap();
//!
//! scenes.load_deferred("level", || {}).unwrap();
//! assert!(scenes.is_transitioning());
//! scenes.update(FrameTime::from_delta(0.016));
//! assert_eq!(scenes.current_name(), Some("level"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::behavior::DynBehavior;
use crate::component::{Component, FrameTime};
use crate::entity::{Entity, EntityId};
use crate::scene::Scene;
use crate::transform::Transform;
use crate::EcsError;

/// Callback run once a deferred transition completes.
pub type TransitionCallback = Box<dyn FnOnce() + Send>;

/// Listener for `(old, new)` scene changes.
pub type SceneChangedListener = Box<dyn FnMut(Option<&str>, &str) + Send>;

enum Transition {
    Idle,
    Pending {
        target: String,
        callback: Option<TransitionCallback>,
    },
}

// ---------------------------------------------------------------------------
// SceneRegistry
// ---------------------------------------------------------------------------

pub struct SceneRegistry {
    scenes: HashMap<String, Scene>,
    current: Option<String>,
    transition: Transition,
    listeners: Vec<SceneChangedListener>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self {
            scenes: HashMap::new(),
            current: None,
            transition: Transition::Idle,
            listeners: Vec::new(),
        }
    }

    // -- storage --------------------------------------------------------------

    /// Create and register an empty scene.
    pub fn create(&mut self, name: &str) -> Result<&mut Scene, EcsError> {
        self.add(Scene::new(name))
    }

    /// Register an already populated scene under its own name.
    pub fn add(&mut self, scene: Scene) -> Result<&mut Scene, EcsError> {
        let name = scene.name().to_owned();
        if name.trim().is_empty() {
            warn!(name = %name, "rejected blank scene name");
            return Err(EcsError::InvalidSceneName { name });
        }
        if self.scenes.contains_key(&name) {
            warn!(scene = %name, "scene already registered, keeping the first");
            return Err(EcsError::DuplicateScene { name });
        }
        info!(scene = %name, entities = scene.entity_count(), "scene registered");
        Ok(self.scenes.entry(name).or_insert(scene))
    }

    /// Unregister and return a scene. Unloads it first if it is current and
    /// cancels a pending transition that targets it.
    pub fn remove(&mut self, name: &str) -> Option<Scene> {
        if !self.scenes.contains_key(name) {
            return None;
        }
        if self.current.as_deref() == Some(name) {
            self.unload_current();
        }
        if matches!(&self.transition, Transition::Pending { target, .. } if target == name) {
            warn!(scene = name, "pending transition cancelled, target removed");
            self.transition = Transition::Idle;
        }
        info!(scene = name, "scene removed");
        self.scenes.remove(name)
    }

    pub fn remove_all(&mut self) {
        self.unload_current();
        self.transition = Transition::Idle;
        self.scenes.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }

    pub fn scene(&self, name: &str) -> Option<&Scene> {
        self.scenes.get(name)
    }

    pub fn scene_mut(&mut self, name: &str) -> Option<&mut Scene> {
        self.scenes.get_mut(name)
    }

    /// Registered scene names, sorted.
    pub fn scene_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scenes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    // -- current scene --------------------------------------------------------

    pub fn current(&self) -> Option<&Scene> {
        self.current.as_deref().and_then(|n| self.scenes.get(n))
    }

    pub fn current_mut(&mut self) -> Option<&mut Scene> {
        let name = self.current.as_deref()?;
        self.scenes.get_mut(name)
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn on_scene_changed(&mut self, listener: impl FnMut(Option<&str>, &str) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // -- transitions ----------------------------------------------------------

    /// Make `name` current immediately.
    pub fn load(&mut self, name: &str) -> Result<(), EcsError> {
        if let Transition::Pending { target, .. } = &self.transition {
            warn!(scene = name, pending = %target, "load rejected, transition in progress");
            return Err(EcsError::TransitionInProgress {
                pending: target.clone(),
            });
        }
        if !self.scenes.contains_key(name) {
            warn!(scene = name, "scene not found");
            return Err(EcsError::SceneNotFound {
                name: name.to_owned(),
            });
        }
        let old = self.switch_to(name);
        self.fire_changed(old.as_deref(), name);
        Ok(())
    }

    /// Queue a switch to `name`, resolved at the start of the next
    /// [`update`](Self::update). `callback` runs once, after the switch and
    /// before the scene-changed listeners.
    pub fn load_deferred(
        &mut self,
        name: &str,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<(), EcsError> {
        if !self.scenes.contains_key(name) {
            warn!(scene = name, "scene not found for deferred load");
            return Err(EcsError::SceneNotFound {
                name: name.to_owned(),
            });
        }
        if let Transition::Pending { target, .. } = &self.transition {
            warn!(scene = name, pending = %target, "already transitioning");
            return Err(EcsError::TransitionInProgress {
                pending: target.clone(),
            });
        }
        info!(from = ?self.current, to = name, "scene transition started");
        self.transition = Transition::Pending {
            target: name.to_owned(),
            callback: Some(Box::new(callback)),
        };
        Ok(())
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self.transition, Transition::Pending { .. })
    }

    /// Target of the pending transition, if any.
    pub fn pending_scene(&self) -> Option<&str> {
        match &self.transition {
            Transition::Pending { target, .. } => Some(target),
            Transition::Idle => None,
        }
    }

    /// Resolve a pending transition now. Returns `false` if none was pending
    /// or its target has disappeared.
    pub fn complete_transition(&mut self) -> bool {
        let Transition::Pending { target, callback } =
            std::mem::replace(&mut self.transition, Transition::Idle)
        else {
            return false;
        };
        if !self.scenes.contains_key(&target) {
            warn!(scene = %target, "transition target vanished");
            return false;
        }
        let old = self.switch_to(&target);
        if let Some(callback) = callback {
            callback();
        }
        self.fire_changed(old.as_deref(), &target);
        info!(from = ?old, to = %target, "scene transition completed");
        true
    }

    /// Deactivate the current scene and leave none current.
    pub fn unload_current(&mut self) {
        if let Some(name) = self.current.take() {
            if let Some(scene) = self.scenes.get_mut(&name) {
                scene.set_active(false);
            }
            info!(scene = %name, "scene unloaded");
        }
    }

    fn switch_to(&mut self, name: &str) -> Option<String> {
        let old = self.current.take();
        if let Some(scene) = old.as_deref().and_then(|n| self.scenes.get_mut(n)) {
            scene.set_active(false);
        }
        if let Some(scene) = self.scenes.get_mut(name) {
            scene.set_active(true);
        }
        self.current = Some(name.to_owned());
        debug!(scene = name, "switched scene");
        old
    }

    fn fire_changed(&mut self, old: Option<&str>, new: &str) {
        for listener in &mut self.listeners {
            listener(old, new);
        }
    }

    // -- phase delegation -----------------------------------------------------

    /// Complete any pending transition, then update the current scene.
    pub fn update(&mut self, time: FrameTime) {
        if self.is_transitioning() {
            self.complete_transition();
        }
        if let Some(scene) = self.current_mut() {
            scene.update(time);
        }
    }

    pub fn late_update(&mut self, time: FrameTime) {
        if let Some(scene) = self.current_mut() {
            scene.late_update(time);
        }
    }

    pub fn fixed_update(&mut self, time: FrameTime) {
        if let Some(scene) = self.current_mut() {
            scene.fixed_update(time);
        }
    }

    // -- current-scene helpers ------------------------------------------------

    /// Create an entity in the current scene.
    pub fn create_entity(&mut self, tag: &str, name: &str) -> Option<EntityId> {
        match self.current_mut() {
            Some(scene) => Some(scene.create_entity(tag, name)),
            None => {
                warn!(tag, "cannot create entity, no current scene");
                None
            }
        }
    }

    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        self.current_mut()
            .map(|scene| scene.destroy_entity(id))
            .unwrap_or(false)
    }

    pub fn find_entity_with_tag(&self, tag: &str) -> Option<&Entity> {
        self.current()?.find_entity_with_tag(tag)
    }

    pub fn find_entities_with_tag(&self, tag: &str) -> Vec<&Entity> {
        self.current()
            .map(|scene| scene.find_entities_with_tag(tag))
            .unwrap_or_default()
    }

    pub fn find_component<T: Component>(&self) -> Option<Arc<T>> {
        self.current()?.find_component::<T>()
    }

    pub fn find_components<T: Component>(&self) -> Vec<Arc<T>> {
        self.current()
            .map(|scene| scene.find_components::<T>())
            .unwrap_or_default()
    }

    pub fn cached_transforms(&mut self) -> Arc<Vec<Arc<Transform>>> {
        self.current_mut()
            .map(Scene::cached_transforms)
            .unwrap_or_default()
    }

    pub fn cached_behaviors(&mut self) -> Arc<Vec<Arc<dyn DynBehavior>>> {
        self.current_mut()
            .map(Scene::cached_behaviors)
            .unwrap_or_default()
    }
}

impl Default for SceneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SceneRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneRegistry")
            .field("scenes", &self.scene_names())
            .field("current", &self.current)
            .field("pending", &self.pending_scene())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
