//! The engine host: lifecycle, main loop and engine-wide statistics.
//!
//! [`EngineHost`] owns every subsystem: the scene registry, the template
//! registry, the allocator, the worker pool and the frame scheduler. Nothing
//! is process-global; the frame clock lives on the host and reaches behaviors
//! through [`FrameTime`].
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --initialize--> Initializing --> Stopped      (or Error)
//! Stopped --run--> Running <--pause/resume--> Paused
//! Running | Paused --stop--> Stopping --(end of frame)--> Stopped
//! any --shutdown--> Uninitialized
//! ```
//!
//! Any other request is rejected with [`EngineError::InvalidState`] and
//! logged at `error`. [`HostHandle`] carries the stop, pause and resume
//! requests to other threads or into behaviors.
//!
//! # Driving frames
//!
//! [`EngineHost::run`] blocks on a real-time loop with optional frame pacing.
//! [`EngineHost::run_frames`] runs a fixed number of frames at the target
//! frame time without sleeping, and [`EngineHost::step_frame`] runs a single
//! frame with an explicit delta; both are deterministic.
//!
//! ```
//! use kestrel_engine::prelude::*;
//!
//! let config = EngineConfig { use_parallel: false, ..Default::default() };
//! let mut host = EngineHost::quick_start(config, "main").unwrap();
//! host.create_entity("thing").unwrap();
//!
//! assert_eq!(host.run_frames(10).unwrap(), 10);
//! assert_eq!(host.stats().total_frames, 10);
//! assert_eq!(host.state(), EngineState::Stopped);
//! host.shutdown();
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kestrel_ecs::allocator::{Allocator, AllocatorConfig, LeakReport};
use kestrel_ecs::component::FrameTime;
use kestrel_ecs::entity::{Entity, EntityId};
use kestrel_ecs::registry::SceneRegistry;
use kestrel_ecs::scene::Scene;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::scheduler::{FrameScheduler, SchedulerConfig};
use crate::templates::{CreationReport, TemplateRegistry};
use crate::worker::WorkerPool;
use crate::EngineError;

/// Frames in the rolling frame-time window.
pub const FRAME_WINDOW: usize = 60;

/// Frames between perf log lines.
pub const PERF_LOG_INTERVAL: u64 = 60;

/// Frames between memory log lines.
pub const MEM_LOG_INTERVAL: u64 = 300;

const PAUSE_POLL: Duration = Duration::from_millis(16);

type HostListener = Box<dyn FnMut() + Send>;

// ---------------------------------------------------------------------------
// EngineState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Initializing = 1,
    Stopped = 2,
    Running = 3,
    Paused = 4,
    Stopping = 5,
    Error = 6,
}

impl EngineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Stopped,
            3 => Self::Running,
            4 => Self::Paused,
            5 => Self::Stopping,
            _ => Self::Error,
        }
    }

    /// `true` while the main loop owns the host.
    pub fn is_looping(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free host state.
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new(state: EngineState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: EngineState) {
        let old = EngineState::from_u8(self.0.swap(state as u8, Ordering::AcqRel));
        if old != state {
            debug!(from = %old, to = %state, "host state changed");
        }
    }

    /// Move to `to` if the current state is one of `from`.
    fn transition(
        &self,
        from: &[EngineState],
        to: EngineState,
        operation: &'static str,
    ) -> Result<EngineState, EngineError> {
        let mut current = self.get();
        loop {
            if !from.contains(&current) {
                error!(state = %current, operation, "operation rejected in current state");
                return Err(EngineError::InvalidState {
                    from: current,
                    operation,
                });
            }
            match self.0.compare_exchange(
                current as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    info!(from = %current, to = %to, operation, "host state changed");
                    return Ok(current);
                }
                Err(raw) => current = EngineState::from_u8(raw),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// HostHandle
// ---------------------------------------------------------------------------

/// Cloneable remote control for a host's main loop.
///
/// Requests take effect at the next frame boundary. Each returns `false`
/// (and logs) when the host is in a state that does not allow it.
#[derive(Debug, Clone)]
pub struct HostHandle {
    state: StateCell,
    pause_when_unfocused: Arc<AtomicBool>,
}

impl HostHandle {
    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// Request the loop to stop after the current frame.
    pub fn stop(&self) -> bool {
        self.state
            .transition(
                &[EngineState::Running, EngineState::Paused],
                EngineState::Stopping,
                "stop",
            )
            .is_ok()
    }

    pub fn pause(&self) -> bool {
        self.state
            .transition(&[EngineState::Running], EngineState::Paused, "pause")
            .is_ok()
    }

    pub fn resume(&self) -> bool {
        self.state
            .transition(&[EngineState::Paused], EngineState::Running, "resume")
            .is_ok()
    }

    /// Report a window focus change. Pauses on focus loss and resumes on
    /// focus gain when `pauseWhenUnfocused` is set; otherwise does nothing.
    pub fn focus_changed(&self, focused: bool) {
        if !self.pause_when_unfocused.load(Ordering::Relaxed) {
            return;
        }
        let state = self.state.get();
        if focused && state == EngineState::Paused {
            self.resume();
        } else if !focused && state == EngineState::Running {
            self.pause();
        }
    }
}

// ---------------------------------------------------------------------------
// EngineStats
// ---------------------------------------------------------------------------

/// Engine-wide statistics, refreshed once per frame. Times are in
/// milliseconds unless noted.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub current_fps: f32,
    /// Derived from the rolling frame-time average.
    pub average_fps: f32,
    pub frame_time: f32,
    /// Mean over the last [`FRAME_WINDOW`] frames.
    pub average_frame_time: f32,
    pub update_time: f32,
    pub late_update_time: f32,
    pub fixed_update_time: f32,
    pub total_frames: u64,
    /// Seconds of simulated time since the host started.
    pub total_run_time: f64,
    pub entity_count: usize,
    pub active_entity_count: usize,
    pub memory_usage: usize,
    pub peak_memory_usage: usize,
    pub worker_count: usize,
    pub active_tasks: usize,
}

fn millis(d: Duration) -> f32 {
    d.as_secs_f32() * 1000.0
}

// ---------------------------------------------------------------------------
// EngineHost
// ---------------------------------------------------------------------------

pub struct EngineHost {
    config: EngineConfig,
    state: StateCell,
    pause_when_unfocused: Arc<AtomicBool>,
    scenes: SceneRegistry,
    templates: TemplateRegistry,
    allocator: Option<Arc<Allocator>>,
    pool: Option<Arc<WorkerPool>>,
    scheduler: Option<FrameScheduler>,
    time: FrameTime,
    stats: EngineStats,
    frame_window: VecDeque<f32>,
    start_listeners: Vec<HostListener>,
    stop_listeners: Vec<HostListener>,
    scene_listeners: Vec<HostListener>,
}

impl EngineHost {
    /// An uninitialized host.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            pause_when_unfocused: Arc::new(AtomicBool::new(config.pause_when_unfocused)),
            config,
            state: StateCell::new(EngineState::Uninitialized),
            scenes: SceneRegistry::new(),
            templates: TemplateRegistry::with_builtins(),
            allocator: None,
            pool: None,
            scheduler: None,
            time: FrameTime::default(),
            stats: EngineStats::default(),
            frame_window: VecDeque::with_capacity(FRAME_WINDOW),
            start_listeners: Vec::new(),
            stop_listeners: Vec::new(),
            scene_listeners: Vec::new(),
        }
    }

    /// Initialize, then create and load one scene.
    pub fn quick_start(config: EngineConfig, scene_name: &str) -> Result<Self, EngineError> {
        let mut host = Self::new(config);
        host.initialize()?;
        host.create_scene(scene_name)?;
        host.load_scene(scene_name)?;
        Ok(host)
    }

    // -- lifecycle ------------------------------------------------------------

    /// Build the allocator, worker pool and scheduler from the config.
    ///
    /// An invalid config or a failed thread spawn leaves the host in
    /// [`EngineState::Error`].
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        self.state.transition(
            &[EngineState::Uninitialized],
            EngineState::Initializing,
            "initialize",
        )?;
        match self.build_subsystems() {
            Ok(()) => {
                self.state.set(EngineState::Stopped);
                info!(
                    workers = self.stats.worker_count,
                    parallel = self.config.use_parallel,
                    target_fps = self.config.target_frame_rate,
                    fixed_rate = self.config.fixed_update_rate,
                    "engine initialized"
                );
                Ok(())
            }
            Err(err) => {
                self.state.set(EngineState::Error);
                error!(error = %err, "engine initialization failed");
                Err(err)
            }
        }
    }

    fn build_subsystems(&mut self) -> Result<(), EngineError> {
        self.config.validate()?;

        let allocator = Arc::new(Allocator::new(AllocatorConfig {
            default_pool_capacity: self.config.default_pool_capacity,
            track_allocations: self.config.track_allocations,
            use_pools: true,
        }));
        allocator.initialize_pools();

        let scheduler_config = SchedulerConfig {
            fixed_update_rate: self.config.fixed_update_rate,
            ..Default::default()
        };
        let scheduler = if self.config.use_parallel {
            let pool = Arc::new(WorkerPool::new(self.config.resolved_worker_count())?);
            self.stats.worker_count = pool.worker_count();
            self.pool = Some(Arc::clone(&pool));
            FrameScheduler::parallel(scheduler_config, pool)
        } else {
            self.stats.worker_count = 0;
            FrameScheduler::sequential(scheduler_config)
        };

        self.allocator = Some(allocator);
        self.scheduler = Some(scheduler);
        self.time = FrameTime::default();
        Ok(())
    }

    /// Run the real-time loop until stopped. Blocks the calling thread.
    pub fn run(&mut self) -> Result<(), EngineError> {
        self.begin_run("run")?;
        let target = Duration::from_secs_f64(self.config.target_frame_time());
        let mut last = Instant::now();
        loop {
            match self.state.get() {
                EngineState::Running => {}
                EngineState::Paused => {
                    thread::sleep(PAUSE_POLL);
                    // Time spent paused does not count toward the next delta.
                    last = Instant::now();
                    continue;
                }
                _ => break,
            }
            let now = Instant::now();
            let delta = now.duration_since(last).as_secs_f32();
            last = now;
            self.frame(delta);

            if self.config.enable_frame_pacing {
                let spent = last.elapsed();
                if spent < target {
                    thread::sleep(target - spent);
                }
            }
        }
        self.end_run();
        Ok(())
    }

    /// Run `frames` frames at the target frame time, without pacing.
    /// Returns the number run, which is lower if a stop was requested.
    pub fn run_frames(&mut self, frames: u64) -> Result<u64, EngineError> {
        self.begin_run("run_frames")?;
        let delta = self.config.target_frame_time() as f32;
        let mut run = 0;
        while run < frames {
            match self.state.get() {
                EngineState::Running => {}
                EngineState::Paused => {
                    thread::sleep(PAUSE_POLL);
                    continue;
                }
                _ => break,
            }
            self.frame(delta);
            run += 1;
        }
        self.end_run();
        Ok(run)
    }

    /// Run one frame of `delta` seconds outside the loop. The host must be
    /// stopped; no start or stop listeners fire.
    pub fn step_frame(&mut self, delta: f32) -> Result<(), EngineError> {
        let state = self.state.get();
        if state != EngineState::Stopped {
            error!(state = %state, operation = "step_frame", "operation rejected in current state");
            return Err(EngineError::InvalidState {
                from: state,
                operation: "step_frame",
            });
        }
        self.frame(delta);
        Ok(())
    }

    fn begin_run(&mut self, operation: &'static str) -> Result<(), EngineError> {
        self.state
            .transition(&[EngineState::Stopped], EngineState::Running, operation)?;
        fire(&mut self.start_listeners);
        Ok(())
    }

    fn end_run(&mut self) {
        self.state.set(EngineState::Stopped);
        info!(frames = self.stats.total_frames, "engine stopped");
        fire(&mut self.stop_listeners);
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.state
            .transition(
                &[EngineState::Running, EngineState::Paused],
                EngineState::Stopping,
                "stop",
            )
            .map(drop)
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.state
            .transition(&[EngineState::Running], EngineState::Paused, "pause")
            .map(drop)
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.state
            .transition(&[EngineState::Paused], EngineState::Running, "resume")
            .map(drop)
    }

    /// Tear everything down and return to [`EngineState::Uninitialized`].
    ///
    /// Stop listeners fire, scenes are dropped (returning their entities to
    /// the pools), the worker pool is joined, and outstanding tracked
    /// allocations are reported.
    pub fn shutdown(&mut self) -> Option<LeakReport> {
        let from = self.state.get();
        if from == EngineState::Uninitialized {
            return None;
        }
        info!(state = %from, "engine shutting down");
        if from.is_looping() {
            self.state.set(EngineState::Stopping);
        }
        fire(&mut self.stop_listeners);

        self.scenes.remove_all();
        self.scheduler = None;
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        let leaks = self.allocator.take().and_then(|a| a.check_leaks());

        self.start_listeners.clear();
        self.stop_listeners.clear();
        self.scene_listeners.clear();
        self.frame_window.clear();
        self.state.set(EngineState::Uninitialized);
        info!("engine shutdown complete");
        leaks
    }

    // -- frame ----------------------------------------------------------------

    fn frame(&mut self, delta: f32) {
        let start = Instant::now();
        self.time = FrameTime::new(delta, self.time.elapsed + f64::from(delta));

        if self.scenes.complete_transition() {
            fire(&mut self.scene_listeners);
        }

        if let (Some(scheduler), Some(scene)) = (self.scheduler.as_mut(), self.scenes.current_mut()) {
            scheduler.update(scene, self.time);
            scheduler.late_update(scene, self.time);
            scheduler.fixed_update(scene, self.time);

            let phases = scheduler.stats();
            self.stats.update_time = millis(phases.last_update_time);
            self.stats.late_update_time = millis(phases.last_late_update_time);
            self.stats.fixed_update_time = millis(phases.last_fixed_update_time);
        }

        self.record_frame(delta, start.elapsed());
    }

    fn record_frame(&mut self, delta: f32, spent: Duration) {
        self.stats.total_frames += 1;
        self.stats.total_run_time = self.time.elapsed;
        if !self.config.enable_statistics {
            return;
        }

        let frame_ms = millis(spent);
        self.stats.frame_time = frame_ms;
        if delta > 0.0 {
            self.stats.current_fps = 1.0 / delta;
        }
        if self.frame_window.len() == FRAME_WINDOW {
            self.frame_window.pop_front();
        }
        self.frame_window.push_back(frame_ms);
        let average = self.frame_window.iter().sum::<f32>() / self.frame_window.len() as f32;
        self.stats.average_frame_time = average;
        self.stats.average_fps = if average > 0.0 { 1000.0 / average } else { 0.0 };

        if let Some(scene) = self.scenes.current() {
            self.stats.entity_count = scene.entity_count();
            self.stats.active_entity_count = scene.active_entity_count();
        }
        if let Some(allocator) = &self.allocator {
            let memory = allocator.stats();
            self.stats.memory_usage = memory.current_usage;
            self.stats.peak_memory_usage = memory.peak_usage;
        }
        if let Some(pool) = &self.pool {
            self.stats.active_tasks = pool.active_tasks();
        }

        let frames = self.stats.total_frames;
        if self.config.enable_perf_logging && frames % PERF_LOG_INTERVAL == 0 {
            info!(
                target: "kestrel::perf",
                fps = self.stats.current_fps,
                frame_ms = self.stats.frame_time,
                entities = self.stats.active_entity_count,
                "frame stats"
            );
        }
        if self.config.enable_mem_logging && frames % MEM_LOG_INTERVAL == 0 {
            info!(
                target: "kestrel::mem",
                usage = self.stats.memory_usage,
                peak = self.stats.peak_memory_usage,
                "memory stats"
            );
        }
    }

    // -- scenes ---------------------------------------------------------------

    /// Create a scene backed by the host's allocator once initialized.
    pub fn create_scene(&mut self, name: &str) -> Result<&mut Scene, EngineError> {
        let scene = match &self.allocator {
            Some(allocator) => Scene::with_allocator(name, Arc::clone(allocator)),
            None => Scene::new(name),
        };
        Ok(self.scenes.add(scene)?)
    }

    /// Switch scenes now and fire the scene-changed listeners.
    pub fn load_scene(&mut self, name: &str) -> Result<(), EngineError> {
        self.scenes.load(name)?;
        fire(&mut self.scene_listeners);
        Ok(())
    }

    /// Switch scenes at the start of the next frame.
    pub fn load_scene_deferred(
        &mut self,
        name: &str,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<(), EngineError> {
        Ok(self.scenes.load_deferred(name, callback)?)
    }

    pub fn current_scene(&self) -> Option<&Scene> {
        self.scenes.current()
    }

    pub fn current_scene_mut(&mut self) -> Option<&mut Scene> {
        self.scenes.current_mut()
    }

    pub fn scenes(&self) -> &SceneRegistry {
        &self.scenes
    }

    pub fn scenes_mut(&mut self) -> &mut SceneRegistry {
        &mut self.scenes
    }

    // -- entities -------------------------------------------------------------

    /// Create an entity in the current scene.
    pub fn create_entity(&mut self, tag: &str) -> Result<EntityId, EngineError> {
        self.scenes
            .create_entity(tag, "")
            .ok_or(EngineError::NoCurrentScene)
    }

    /// Instantiate a registered template into the current scene.
    pub fn create_entity_from_template(&mut self, template: &str) -> Result<CreationReport, EngineError> {
        let scene = self.scenes.current_mut().ok_or(EngineError::NoCurrentScene)?;
        Ok(self.templates.instantiate(scene, template)?)
    }

    pub fn find_entities_with_tag(&self, tag: &str) -> Vec<&Entity> {
        self.scenes.find_entities_with_tag(tag)
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn templates_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.templates
    }

    // -- listeners ------------------------------------------------------------

    pub fn on_start(&mut self, listener: impl FnMut() + Send + 'static) {
        self.start_listeners.push(Box::new(listener));
    }

    pub fn on_stop(&mut self, listener: impl FnMut() + Send + 'static) {
        self.stop_listeners.push(Box::new(listener));
    }

    pub fn on_scene_changed(&mut self, listener: impl FnMut() + Send + 'static) {
        self.scene_listeners.push(Box::new(listener));
    }

    // -- configuration --------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the config. Frame-rate, fixed-rate, logging and focus settings
    /// apply immediately; worker and pool settings apply at the next
    /// [`initialize`](Self::initialize). Rejected while the loop runs.
    pub fn set_config(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        let state = self.state.get();
        if state.is_looping() || state == EngineState::Stopping {
            error!(state = %state, operation = "set_config", "operation rejected in current state");
            return Err(EngineError::InvalidState {
                from: state,
                operation: "set_config",
            });
        }
        config.validate()?;
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_fixed_update_rate(config.fixed_update_rate);
        }
        if config.use_parallel != self.config.use_parallel && self.scheduler.is_some() {
            warn!("parallel mode change takes effect at next initialize");
        }
        self.pause_when_unfocused
            .store(config.pause_when_unfocused, Ordering::Relaxed);
        self.config = config;
        Ok(())
    }

    // -- accessors ------------------------------------------------------------

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            state: self.state.clone(),
            pause_when_unfocused: Arc::clone(&self.pause_when_unfocused),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    pub fn is_initialized(&self) -> bool {
        !matches!(
            self.state.get(),
            EngineState::Uninitialized | EngineState::Initializing | EngineState::Error
        )
    }

    pub fn is_running(&self) -> bool {
        self.state.get() == EngineState::Running
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Clock of the most recent frame.
    pub fn time(&self) -> FrameTime {
        self.time
    }

    pub fn allocator(&self) -> Option<&Arc<Allocator>> {
        self.allocator.as_ref()
    }

    pub fn worker_pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }

    pub fn scheduler(&self) -> Option<&FrameScheduler> {
        self.scheduler.as_ref()
    }

    pub fn scheduler_mut(&mut self) -> Option<&mut FrameScheduler> {
        self.scheduler.as_mut()
    }
}

fn fire(listeners: &mut [HostListener]) {
    for listener in listeners.iter_mut() {
        listener();
    }
}

impl Default for EngineHost {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for EngineHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHost")
            .field("state", &self.state.get())
            .field("scenes", &self.scenes.scene_names())
            .field("current", &self.scenes.current_name())
            .field("frames", &self.stats.total_frames)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
