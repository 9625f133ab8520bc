//! Per-phase frame orchestration over a scene's cached views.
//!
//! The [`FrameScheduler`] drives the three phases of a frame against one
//! [`Scene`]:
//!
//! 1. **update**: every active transform, then every behavior (`start` on
//!    first run, then `on_update`);
//! 2. **late update**: every behavior's `on_late_update`;
//! 3. **fixed update**: zero or more fixed steps, as many as the accumulated
//!    time allows; each step runs every behavior's `on_fixed_update` with the
//!    fixed interval as its delta.
//!
//! Each phase reads the scene's cached views, which are rebuilt on the
//! calling thread before dispatch. In parallel mode the views are split into
//! chunks on the [`WorkerPool`] and the phase waits for every chunk before
//! returning, so all `on_update` calls of a frame finish before any
//! `on_late_update` starts. Commands queued during a phase are applied after
//! it, on the calling thread.
//!
//! A failing phase (a panicking behavior) is logged and counted; the frame
//! continues with the next phase.
//!
//! # Example
//!
//! ```
//! use kestrel_ecs::prelude::*;
//! use kestrel_engine::scheduler::{FrameScheduler, SchedulerConfig};
//!
//! let mut scene = Scene::new("main");
//! scene.create_entity_at("thing", "", Vector3::ZERO);
//!
//! let config = SchedulerConfig { fixed_update_rate: 50.0, ..Default::default() };
//! let mut scheduler = FrameScheduler::sequential(config);
//!
//! let time = FrameTime::from_delta(0.05);
//! scheduler.update(&mut scene, time);
//! scheduler.late_update(&mut scene, time);
//! assert_eq!(scheduler.fixed_update(&mut scene, time), 2);
//! assert_eq!(scheduler.stats().transforms_processed, 1);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel_ecs::behavior::DynBehavior;
use kestrel_ecs::component::{Component, FrameTime, UpdateContext};
use kestrel_ecs::math::Vector3;
use kestrel_ecs::scene::Scene;
use kestrel_ecs::transform::Transform;
use serde::Serialize;
use tracing::{error, trace, warn};

use crate::worker::{panic_message, BatchHandle, PoolError, WorkerPool};

/// Distance from the camera beyond which [`FrameScheduler::frustum_cull`]
/// reports a transform as hidden.
pub const FRUSTUM_RADIUS: f32 = 100.0;

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Configuration for the frame scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed-update ticks per second. Must be positive and finite.
    pub fixed_update_rate: f32,
    /// Items per worker task; `0` sizes chunks automatically.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    /// 60 Hz fixed updates, automatic batch sizing.
    fn default() -> Self {
        Self {
            fixed_update_rate: 60.0,
            batch_size: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// SchedulerStats
// ---------------------------------------------------------------------------

/// Timing and throughput of the most recent phases.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub last_update_time: Duration,
    pub last_late_update_time: Duration,
    /// Total time of every fixed step in the last fixed phase.
    pub last_fixed_update_time: Duration,
    /// Transforms dispatched by the last update phase.
    pub transforms_processed: usize,
    /// Behaviors dispatched by the last update phase.
    pub behaviors_processed: usize,
    /// Fixed steps run by the last fixed phase.
    pub fixed_steps: u32,
    /// Running mean of `last_update_time` across all update phases.
    pub average_frame_time: Duration,
    /// Update phases run since the last reset.
    pub frame_count: u64,
    /// Phases that finished with a failed batch.
    pub failed_phases: u64,
    /// Scene commands applied after phases since the last reset.
    pub commands_applied: usize,
}

// ---------------------------------------------------------------------------
// FrameScheduler
// ---------------------------------------------------------------------------

pub struct FrameScheduler {
    pool: Option<Arc<WorkerPool>>,
    enabled: bool,
    fixed_interval: f64,
    accumulator: f64,
    batch_size: usize,
    stats: SchedulerStats,
}

impl FrameScheduler {
    /// A scheduler that runs every phase on the calling thread.
    pub fn sequential(config: SchedulerConfig) -> Self {
        Self::build(config, None)
    }

    /// A scheduler that dispatches phases to `pool`.
    pub fn parallel(config: SchedulerConfig, pool: Arc<WorkerPool>) -> Self {
        Self::build(config, Some(pool))
    }

    fn build(config: SchedulerConfig, pool: Option<Arc<WorkerPool>>) -> Self {
        assert!(
            config.fixed_update_rate > 0.0 && config.fixed_update_rate.is_finite(),
            "fixed_update_rate must be positive and finite, got {}",
            config.fixed_update_rate
        );
        Self {
            pool,
            enabled: true,
            fixed_interval: 1.0 / f64::from(config.fixed_update_rate),
            accumulator: 0.0,
            batch_size: config.batch_size,
            stats: SchedulerStats::default(),
        }
    }

    // -- phases ---------------------------------------------------------------

    /// Run the update phase: transforms, then behaviors.
    pub fn update(&mut self, scene: &mut Scene, time: FrameTime) {
        if !self.enabled || !scene.is_active() {
            return;
        }
        let start = Instant::now();
        let ctx = scene.update_context(time);
        {
            let transforms = scene.cached_transforms();
            let behaviors = scene.cached_behaviors();
            let result = match &self.pool {
                Some(pool) => self.dispatch_update(pool, &transforms, &behaviors, &ctx),
                None => run_caught(|| {
                    update_transforms(&transforms, &ctx);
                    for behavior in behaviors.iter() {
                        behavior.update(&ctx);
                    }
                }),
            };
            self.note_failure("update", result);
            self.stats.transforms_processed = transforms.len();
            self.stats.behaviors_processed = behaviors.len();
        }
        // The views must be gone here so destroyed transforms go back to their pool.
        self.stats.commands_applied += scene.apply_commands().applied;
        self.stats.last_update_time = start.elapsed();
        self.record_frame_time(self.stats.last_update_time);
    }

    fn dispatch_update(
        &self,
        pool: &WorkerPool,
        transforms: &Arc<Vec<Arc<Transform>>>,
        behaviors: &Arc<Vec<Arc<dyn DynBehavior>>>,
        ctx: &UpdateContext,
    ) -> Result<(), PoolError> {
        let tctx = ctx.clone();
        let bctx = ctx.clone();
        // Submit both views before waiting so workers never wait on workers.
        let batch: BatchHandle = pool
            .submit_batch(
                transforms,
                move |t| {
                    if t.is_active() {
                        t.update(&tctx);
                    }
                },
                self.batch_size,
            )?
            .join(pool.submit_batch(behaviors, move |b| b.update(&bctx), self.batch_size)?);
        batch.wait().map(drop)
    }

    /// Run the late-update phase over behaviors.
    pub fn late_update(&mut self, scene: &mut Scene, time: FrameTime) {
        if !self.enabled || !scene.is_active() {
            return;
        }
        let start = Instant::now();
        let ctx = scene.update_context(time);
        let result = self.run_behaviors(scene, move |b| b.late_update(&ctx));
        self.note_failure("late_update", result);
        self.stats.commands_applied += scene.apply_commands().applied;
        self.stats.last_late_update_time = start.elapsed();
    }

    /// Advance the fixed-step accumulator by `time.delta` and run one
    /// fixed step per whole interval. Returns the number of steps run.
    pub fn fixed_update(&mut self, scene: &mut Scene, time: FrameTime) -> u32 {
        if !self.enabled || !scene.is_active() {
            return 0;
        }
        let start = Instant::now();
        self.accumulator += f64::from(time.delta);
        let step_time = time.with_delta(self.fixed_interval as f32);
        let mut steps = 0;
        while self.accumulator >= self.fixed_interval {
            let ctx = scene.update_context(step_time);
            let result = self.run_behaviors(scene, move |b| b.fixed_update(&ctx));
            self.note_failure("fixed_update", result);
            self.stats.commands_applied += scene.apply_commands().applied;
            self.accumulator -= self.fixed_interval;
            steps += 1;
        }
        self.stats.fixed_steps = steps;
        self.stats.last_fixed_update_time = start.elapsed();
        trace!(steps, accumulator = self.accumulator, "fixed update");
        steps
    }

    fn run_behaviors<F>(&self, scene: &mut Scene, f: F) -> Result<(), PoolError>
    where
        F: Fn(&Arc<dyn DynBehavior>) + Send + Sync + 'static,
    {
        let behaviors = scene.cached_behaviors();
        match &self.pool {
            Some(pool) => pool.process_batch(&behaviors, f, self.batch_size),
            None => run_caught(|| behaviors.iter().for_each(f)),
        }
    }

    fn note_failure(&mut self, phase: &'static str, result: Result<(), PoolError>) {
        if let Err(err) = result {
            self.stats.failed_phases += 1;
            error!(phase, error = %err, "phase failed, continuing frame");
        }
    }

    fn record_frame_time(&mut self, sample: Duration) {
        self.stats.frame_count += 1;
        let n = self.stats.frame_count as f64;
        let mean = self.stats.average_frame_time.as_secs_f64();
        self.stats.average_frame_time =
            Duration::from_secs_f64(mean + (sample.as_secs_f64() - mean) / n);
    }

    // -- parallel helpers -----------------------------------------------------

    /// Apply `op` to every transform, in parallel when a pool is attached.
    pub fn transform_operations<F>(
        &self,
        transforms: &Arc<Vec<Arc<Transform>>>,
        op: F,
    ) -> Result<(), PoolError>
    where
        F: Fn(&Transform) + Send + Sync + 'static,
    {
        match &self.pool {
            Some(pool) => pool.process_batch(transforms, move |t| op(t), self.batch_size),
            None => {
                transforms.iter().for_each(|t| op(t));
                Ok(())
            }
        }
    }

    /// Apply `op` to every behavior, in parallel when a pool is attached.
    pub fn behavior_operations<F>(
        &self,
        behaviors: &Arc<Vec<Arc<dyn DynBehavior>>>,
        op: F,
    ) -> Result<(), PoolError>
    where
        F: Fn(&dyn DynBehavior) + Send + Sync + 'static,
    {
        match &self.pool {
            Some(pool) => pool.process_batch(behaviors, move |b| op(b.as_ref()), self.batch_size),
            None => {
                behaviors.iter().for_each(|b| op(b.as_ref()));
                Ok(())
            }
        }
    }

    pub fn translate_all(
        &self,
        transforms: &Arc<Vec<Arc<Transform>>>,
        delta: Vector3,
    ) -> Result<(), PoolError> {
        self.transform_operations(transforms, move |t| t.translate(delta))
    }

    pub fn rotate_all(
        &self,
        transforms: &Arc<Vec<Arc<Transform>>>,
        delta: Vector3,
    ) -> Result<(), PoolError> {
        self.transform_operations(transforms, move |t| t.rotate(delta))
    }

    /// Set a uniform scale on every transform.
    pub fn scale_all(&self, transforms: &Arc<Vec<Arc<Transform>>>, scale: f32) -> Result<(), PoolError> {
        self.transform_operations(transforms, move |t| t.set_uniform_scale(scale))
    }

    /// World-space distance from each transform to `target`, in view order.
    /// Empty when there is no target.
    pub fn compute_distances(
        &self,
        transforms: &Arc<Vec<Arc<Transform>>>,
        target: Option<&Transform>,
    ) -> Result<Vec<f32>, PoolError> {
        let Some(target) = target else {
            return Ok(Vec::new());
        };
        let origin = target.world_position();
        self.map_transforms(transforms, move |t| t.world_position().distance(origin))
    }

    /// Visibility of each transform: within [`FRUSTUM_RADIUS`] of `camera`.
    pub fn frustum_cull(
        &self,
        transforms: &Arc<Vec<Arc<Transform>>>,
        camera: Vector3,
    ) -> Result<Vec<bool>, PoolError> {
        self.map_transforms(transforms, move |t| {
            t.world_position().distance(camera) <= FRUSTUM_RADIUS
        })
    }

    fn map_transforms<R, F>(&self, transforms: &Arc<Vec<Arc<Transform>>>, f: F) -> Result<Vec<R>, PoolError>
    where
        R: Send + 'static,
        F: Fn(&Transform) -> R + Send + Sync + 'static,
    {
        match &self.pool {
            Some(pool) => pool.map_batch(transforms, move |t| f(t), self.batch_size),
            None => Ok(transforms.iter().map(|t| f(t)).collect()),
        }
    }

    // -- control --------------------------------------------------------------

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Change the fixed-update rate. Non-positive or non-finite rates are
    /// ignored.
    pub fn set_fixed_update_rate(&mut self, rate: f32) {
        if rate > 0.0 && rate.is_finite() {
            self.fixed_interval = 1.0 / f64::from(rate);
        } else {
            warn!(rate, "ignored invalid fixed update rate");
        }
    }

    pub fn reset_stats(&mut self) {
        self.stats = SchedulerStats::default();
    }

    // -- accessors ------------------------------------------------------------

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }

    /// Seconds per fixed step.
    pub fn fixed_interval(&self) -> f64 {
        self.fixed_interval
    }

    pub fn fixed_update_rate(&self) -> f64 {
        1.0 / self.fixed_interval
    }

    /// Time carried over toward the next fixed step.
    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }
}

/// Run a sequential phase body, turning a panic into the same error a
/// worker task would report.
fn run_caught(body: impl FnOnce()) -> Result<(), PoolError> {
    catch_unwind(AssertUnwindSafe(body)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(panic = %message, "behavior panicked");
        PoolError::TaskPanicked { message }
    })
}

fn update_transforms(transforms: &[Arc<Transform>], ctx: &UpdateContext) {
    for t in transforms.iter().filter(|t| t.is_active()) {
        t.update(ctx);
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("parallel", &self.is_parallel())
            .field("enabled", &self.enabled)
            .field("fixed_interval", &self.fixed_interval)
            .field("accumulator", &self.accumulator)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
