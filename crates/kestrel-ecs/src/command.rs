//! Deferred structural changes to a [`Scene`](crate::scene::Scene).
//!
//! While a phase runs, the scene's entity list and caches must not change:
//! worker threads are reading them. Behaviors instead queue [`SceneCommand`]s
//! through a [`CommandSender`], and the scene applies the queue in FIFO order
//! between phases via [`Scene::apply_commands`](crate::scene::Scene::apply_commands).
//!
//! The sender is a `crossbeam-channel` handle, so any number of workers can
//! queue concurrently without a shared lock.
//!
//! # Example
//!
//! ```
//! use kestrel_ecs::prelude::*;
//!
//! let mut scene = Scene::new("level");
//! let doomed = scene.create_entity("enemy", "grunt");
//!
//! let sender = scene.command_sender();
//! sender.destroy(doomed);
//! sender.spawn("pickup", "coin");
//!
//! let report = scene.apply_commands();
//! assert_eq!(report.applied, 2);
//! assert!(scene.find_entity_by_id(doomed).is_none());
//! assert!(scene.find_entity_with_tag("pickup").is_some());
//! ```

use std::fmt;

use crossbeam_channel::{Receiver, Sender};
use tracing::trace;

use crate::entity::{Entity, EntityId};

/// Callback run on a freshly spawned entity before it joins the scene.
pub type SpawnFn = Box<dyn FnOnce(&mut Entity) + Send>;

// ---------------------------------------------------------------------------
// SceneCommand
// ---------------------------------------------------------------------------

/// One queued structural change.
pub enum SceneCommand {
    /// Create an entity, optionally configuring it first.
    Spawn {
        tag: String,
        name: String,
        build: Option<SpawnFn>,
    },
    Destroy(EntityId),
    DestroyWithTag(String),
    SetTag {
        entity: EntityId,
        tag: String,
    },
    SetActive {
        entity: EntityId,
        active: bool,
    },
    /// Re-parent `child`'s transform under `parent`'s, or make it a root.
    SetParent {
        child: EntityId,
        parent: Option<EntityId>,
    },
}

impl fmt::Debug for SceneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { tag, name, build } => f
                .debug_struct("Spawn")
                .field("tag", tag)
                .field("name", name)
                .field("build", &build.is_some())
                .finish(),
            Self::Destroy(id) => f.debug_tuple("Destroy").field(id).finish(),
            Self::DestroyWithTag(tag) => f.debug_tuple("DestroyWithTag").field(tag).finish(),
            Self::SetTag { entity, tag } => f
                .debug_struct("SetTag")
                .field("entity", entity)
                .field("tag", tag)
                .finish(),
            Self::SetActive { entity, active } => f
                .debug_struct("SetActive")
                .field("entity", entity)
                .field("active", active)
                .finish(),
            Self::SetParent { child, parent } => f
                .debug_struct("SetParent")
                .field("child", child)
                .field("parent", parent)
                .finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

/// Outcome of draining a command queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Commands that changed the scene.
    pub applied: usize,
    /// Commands whose target no longer existed.
    pub failed: usize,
    /// Entities created by `Spawn` commands.
    pub spawned: usize,
}

impl ApplyReport {
    pub fn total(&self) -> usize {
        self.applied + self.failed
    }

    pub(crate) fn record(&mut self, ok: bool) {
        if ok {
            self.applied += 1;
        } else {
            self.failed += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// CommandSender
// ---------------------------------------------------------------------------

/// Cloneable, thread-safe handle for queuing [`SceneCommand`]s.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<SceneCommand>,
}

impl CommandSender {
    /// A sender whose commands are discarded.
    pub fn disconnected() -> Self {
        let (tx, _rx) = crossbeam_channel::unbounded();
        Self { tx }
    }

    pub fn send(&self, command: SceneCommand) {
        if let Err(err) = self.tx.send(command) {
            trace!(command = ?err.0, "scene command dropped, queue is gone");
        }
    }

    pub fn spawn(&self, tag: impl Into<String>, name: impl Into<String>) {
        self.send(SceneCommand::Spawn {
            tag: tag.into(),
            name: name.into(),
            build: None,
        });
    }

    pub fn spawn_with(
        &self,
        tag: impl Into<String>,
        name: impl Into<String>,
        build: impl FnOnce(&mut Entity) + Send + 'static,
    ) {
        self.send(SceneCommand::Spawn {
            tag: tag.into(),
            name: name.into(),
            build: Some(Box::new(build)),
        });
    }

    pub fn destroy(&self, entity: EntityId) {
        self.send(SceneCommand::Destroy(entity));
    }

    pub fn destroy_with_tag(&self, tag: impl Into<String>) {
        self.send(SceneCommand::DestroyWithTag(tag.into()));
    }

    pub fn set_tag(&self, entity: EntityId, tag: impl Into<String>) {
        self.send(SceneCommand::SetTag {
            entity,
            tag: tag.into(),
        });
    }

    pub fn set_active(&self, entity: EntityId, active: bool) {
        self.send(SceneCommand::SetActive { entity, active });
    }

    pub fn set_parent(&self, child: EntityId, parent: Option<EntityId>) {
        self.send(SceneCommand::SetParent { child, parent });
    }
}

impl fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSender")
            .field("pending", &self.tx.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// Receiving end owned by a scene.
#[derive(Debug)]
pub(crate) struct CommandQueue {
    tx: Sender<SceneCommand>,
    rx: Receiver<SceneCommand>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    /// Take everything queued so far, in FIFO order.
    pub(crate) fn drain(&self) -> Vec<SceneCommand> {
        self.rx.try_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
