//! Kestrel Engine -- host, frame scheduler and worker pool.
//!
//! This crate builds on [`kestrel_ecs`] to provide the runtime driver. The
//! [`EngineHost`](host::EngineHost) owns the scene registry, allocator and
//! worker pool and runs the main loop. Each frame the
//! [`FrameScheduler`](scheduler::FrameScheduler) drives the current scene
//! through update, late update and a fixed-step phase. Behaviors and
//! transforms are split into batches on the
//! [`WorkerPool`](worker::WorkerPool) when parallel mode is on.
//!
//! # Quick Start
//!
//! ```
//! use kestrel_engine::prelude::*;
//!
//! #[derive(Default)]
//! struct Counter { ticks: u32 }
//!
//! impl Behavior for Counter {
//!     fn on_update(&mut self, _ctx: &mut BehaviorContext<'_>) {
//!         self.ticks += 1;
//!     }
//! }
//!
//! let config = EngineConfig { worker_count: 2, ..Default::default() };
//! let mut host = EngineHost::quick_start(config, "main").unwrap();
//!
//! let id = host.create_entity("counter").unwrap();
//! let counter = host
//!     .current_scene_mut()
//!     .unwrap()
//!     .entity_mut(id)
//!     .unwrap()
//!     .add_behavior(Counter::default());
//!
//! host.run_frames(30).unwrap();
//! assert_eq!(counter.script().ticks, 30);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod host;
pub mod scheduler;
pub mod templates;
pub mod worker;

/// Re-export the ECS crate for convenience.
pub use kestrel_ecs;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the engine host and its subsystems.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request is not legal in the host's current state.
    #[error("cannot {operation} while engine is {from}")]
    InvalidState {
        from: host::EngineState,
        operation: &'static str,
    },

    /// The operation needs a loaded scene.
    #[error("no scene is loaded")]
    NoCurrentScene,

    #[error(transparent)]
    Pool(#[from] worker::PoolError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Template(#[from] templates::TemplateError),

    #[error(transparent)]
    Ecs(#[from] kestrel_ecs::EcsError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use kestrel_ecs::prelude::*;

    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::host::{EngineHost, EngineState, EngineStats, HostHandle};
    pub use crate::scheduler::{FrameScheduler, SchedulerConfig, SchedulerStats};
    pub use crate::templates::{
        ComponentDescriptor, ComponentFactory, CreationReport, EntityTemplate, TemplateError,
        TemplateRegistry,
    };
    pub use crate::worker::{BatchHandle, PoolError, TaskHandle, WorkerPool};
    pub use crate::EngineError;
}
