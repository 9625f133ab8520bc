//! Kestrel ECS -- entities, components, scenes and pooled storage.
//!
//! This crate holds the data side of the Kestrel engine runtime. An
//! [`Entity`](entity::Entity) is a tagged container of shared components
//! (`Arc<dyn Component>`), at most one per exact type. A
//! [`Scene`](scene::Scene) owns entities, indexes them by id and tag, and
//! keeps cached typed views (every active [`Transform`](transform::Transform)
//! and every behavior) that the frame scheduler hands to worker threads.
//! Scenes live in a [`SceneRegistry`](registry::SceneRegistry) that tracks
//! the current scene and deferred transitions.
//!
//! User scripts implement [`Behavior`](behavior::Behavior) and receive the
//! frame clock and a command sender through their context. Structural
//! changes made during a phase go through the scene's command queue and are
//! applied between phases.
//!
//! # Quick Start
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
//! let mut scene = Scene::new("demo");
//! let id = scene.create_entity_at("spinner", "top", Vector3::ZERO);
//! let spin = scene.entity_mut(id).unwrap().add_behavior(Spin::default());
//!
//! for _ in 0..4 {
//!     scene.update(FrameTime::from_delta(0.25));
//! }
//!
//! assert_eq!(spin.script().frames, 4);
//! let t = scene.find_entity_by_id(id).unwrap().transform().unwrap();
//! assert!((t.rotation().y - 90.0).abs() < 1e-4);
//! ```

#![deny(unsafe_code)]

pub mod allocator;
pub mod behavior;
pub mod command;
pub mod component;
pub mod entity;
pub mod math;
pub mod pool;
pub mod registry;
pub mod scene;
pub mod transform;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by scene, registry and allocator operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A scene with this name is already registered.
    #[error("scene '{name}' already exists")]
    DuplicateScene { name: String },

    /// No scene with this name is registered.
    #[error("scene '{name}' not found")]
    SceneNotFound { name: String },

    /// Scene names must contain a non-whitespace character.
    #[error("invalid scene name '{name}'")]
    InvalidSceneName { name: String },

    /// A deferred transition has not resolved yet.
    #[error("scene transition to '{pending}' already in progress")]
    TransitionInProgress { pending: String },

    /// A tracked allocation could not be satisfied.
    #[error("failed to allocate {size} bytes for {type_name}")]
    AllocFailure {
        type_name: &'static str,
        size: usize,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::allocator::{Allocator, AllocatorConfig, LeakReport, MemoryStats, Tracked};
    pub use crate::behavior::{Behavior, BehaviorComponent, BehaviorContext, DynBehavior};
    pub use crate::command::{ApplyReport, CommandSender, SceneCommand};
    pub use crate::component::{
        downcast_component, is_component, Component, ComponentCore, FrameTime, UpdateContext,
    };
    pub use crate::entity::{Entity, EntityId};
    pub use crate::math::{euler_to_direction, Vector3};
    pub use crate::pool::{ObjectPool, Poolable};
    pub use crate::registry::SceneRegistry;
    pub use crate::scene::Scene;
    pub use crate::transform::{Transform, Trs};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::sync::Arc;

    // -- test behaviors -----------------------------------------------------

    #[derive(Default)]
    struct Lifecycle {
        starts: u32,
        updates: u32,
        enables: u32,
        disables: u32,
        destroys: u32,
    }

    impl Behavior for Lifecycle {
        fn start(&mut self, _ctx: &mut BehaviorContext<'_>) {
            self.starts += 1;
        }

        fn on_update(&mut self, _ctx: &mut BehaviorContext<'_>) {
            self.updates += 1;
        }

        fn on_enable(&mut self) {
            self.enables += 1;
        }

        fn on_disable(&mut self) {
            self.disables += 1;
        }

        fn on_destroy(&mut self) {
            self.destroys += 1;
        }
    }

    /// Moves its transform along +x at one unit per second.
    struct Mover;

    impl Behavior for Mover {
        fn on_update(&mut self, ctx: &mut BehaviorContext<'_>) {
            let step = ctx.delta_time();
            if let Some(t) = ctx.transform() {
                t.translate(Vector3::new(step, 0.0, 0.0));
            }
        }
    }

    /// Spawns one "bullet" per update through the command queue.
    struct Gun;

    impl Behavior for Gun {
        fn on_update(&mut self, ctx: &mut BehaviorContext<'_>) {
            let origin = ctx.transform().map(|t| t.world_position()).unwrap_or_default();
            ctx.commands().spawn_with("bullet", "", move |e| {
                e.add_component(Transform::at(origin));
            });
        }
    }

    fn frame() -> FrameTime {
        FrameTime::from_delta(0.5)
    }

    // -- scene / behavior integration --------------------------------------

    #[test]
    fn behavior_drives_its_entity_transform() {
        let mut scene = Scene::new("s");
        let id = scene.create_entity_at("mover", "", Vector3::ZERO);
        scene.entity_mut(id).unwrap().add_behavior(Mover);
        scene.update(frame());
        scene.update(frame());
        let t = scene.find_component::<Transform>().unwrap();
        assert!(t.position().approx_eq(Vector3::new(1.0, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn start_runs_once_across_toggles() {
        let mut scene = Scene::new("s");
        let id = scene.create_entity("t", "");
        let script = scene.entity_mut(id).unwrap().add_behavior(Lifecycle::default());
        scene.update(frame());
        scene.set_entity_active(id, false);
        scene.update(frame());
        scene.set_entity_active(id, true);
        scene.update(frame());

        let s = script.script();
        assert_eq!(s.starts, 1);
        assert_eq!(s.updates, 2);
        assert_eq!((s.enables, s.disables), (1, 1));
    }

    #[test]
    fn destroying_entity_runs_behavior_destroy_and_resets_start() {
        let mut scene = Scene::new("s");
        let id = scene.create_entity("t", "");
        let script = scene.entity_mut(id).unwrap().add_behavior(Lifecycle::default());
        scene.update(frame());
        assert!(script.is_started());
        scene.destroy_entity(id);
        assert_eq!(script.script().destroys, 1);
        assert!(!script.is_started());
    }

    #[test]
    fn spawns_from_update_join_scene_after_phase() {
        let mut scene = Scene::new("s");
        let id = scene.create_entity_at("gun", "", Vector3::new(0.0, 1.0, 0.0));
        scene.entity_mut(id).unwrap().add_behavior(Gun);
        scene.update(frame());
        scene.update(frame());

        let bullets = scene.find_entities_with_tag("bullet");
        assert_eq!(bullets.len(), 2);
        assert_eq!(
            bullets[0].transform().unwrap().position(),
            Vector3::new(0.0, 1.0, 0.0)
        );
        assert_eq!(scene.cached_transforms().len(), 3);
    }

    #[test]
    fn registry_runs_only_current_scene() {
        let mut scenes = SceneRegistry::new();
        let mut a = Scene::new("a");
        let a_id = a.create_entity("t", "");
        let a_script = a.entity_mut(a_id).unwrap().add_behavior(Lifecycle::default());
        scenes.add(a).unwrap();

        let b = scenes.create("b").unwrap();
        let b_id = b.create_entity("t", "");
        let b_script = b.entity_mut(b_id).unwrap().add_behavior(Lifecycle::default());

        scenes.load("a").unwrap();
        scenes.update(frame());
        scenes.load("b").unwrap();
        scenes.update(frame());
        scenes.update(frame());

        assert_eq!(a_script.script().updates, 1);
        assert_eq!(b_script.script().updates, 2);
    }

    #[test]
    fn pooled_scene_reuses_storage_across_waves() {
        let alloc = Arc::new(Allocator::new(AllocatorConfig {
            default_pool_capacity: 8,
            ..Default::default()
        }));
        alloc.initialize_pools();
        let mut scene = Scene::with_allocator("waves", Arc::clone(&alloc));

        for _ in 0..3 {
            for i in 0..4 {
                scene.create_entity_at("enemy", &format!("e{i}"), Vector3::ZERO);
            }
            assert_eq!(scene.destroy_entities_with_tag("enemy"), 4);
        }

        let entities = alloc.pool::<Box<Entity>>();
        assert_eq!(entities.total_created(), 4);
        assert_eq!(entities.in_use(), 0);
        assert_eq!(alloc.pool::<Arc<Transform>>().total_created(), 8);
    }
}
