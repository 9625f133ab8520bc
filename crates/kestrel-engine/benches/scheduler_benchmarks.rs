//! Frame scheduler benchmarks.
//!
//! Measures one full frame (update, late update, fixed update) over scenes of
//! increasing size in sequential and parallel mode, plus the parallel
//! transform helpers.
//!
//! Run with: `cargo bench --bench scheduler_benchmarks`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use kestrel_engine::prelude::*;

/// A behavior with enough arithmetic to be worth splitting across workers.
struct Wobble {
    phase: f32,
}

impl Behavior for Wobble {
    fn on_update(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.phase += ctx.delta_time();
        if let Some(t) = ctx.transform() {
            let p = t.position();
            t.set_position(Vector3::new(p.x, self.phase.sin(), p.z));
            t.rotate(Vector3::new(0.0, self.phase.cos(), 0.0));
        }
    }

    fn on_fixed_update(&mut self, _ctx: &mut BehaviorContext<'_>) {
        self.phase *= 0.999;
    }
}

fn wobble_scene(n: usize) -> Scene {
    let mut scene = Scene::new("bench");
    for i in 0..n {
        let id = scene.create_entity_at("w", "", Vector3::new(i as f32, 0.0, 0.0));
        if let Some(e) = scene.entity_mut(id) {
            e.add_behavior(Wobble { phase: i as f32 });
        }
    }
    scene
}

fn frame(scheduler: &mut FrameScheduler, scene: &mut Scene) {
    let time = FrameTime::from_delta(1.0 / 60.0);
    scheduler.update(scene, time);
    scheduler.late_update(scene, time);
    scheduler.fixed_update(scene, time);
}

// ---------------------------------------------------------------------------
// Full frame
// ---------------------------------------------------------------------------

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    let pool = Arc::new(WorkerPool::new(0).expect("spawn workers"));

    for &n in &[100usize, 1_000, 10_000] {
        let mut scene = wobble_scene(n);
        let mut sequential = FrameScheduler::sequential(SchedulerConfig::default());
        group.bench_with_input(BenchmarkId::new("sequential", n), &n, |b, _| {
            b.iter(|| frame(&mut sequential, black_box(&mut scene)));
        });

        let mut scene = wobble_scene(n);
        let mut parallel = FrameScheduler::parallel(SchedulerConfig::default(), Arc::clone(&pool));
        group.bench_with_input(BenchmarkId::new("parallel", n), &n, |b, _| {
            b.iter(|| frame(&mut parallel, black_box(&mut scene)));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Transform helpers
// ---------------------------------------------------------------------------

fn bench_helpers(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_helpers");
    let pool = Arc::new(WorkerPool::new(0).expect("spawn workers"));
    let parallel = FrameScheduler::parallel(SchedulerConfig::default(), pool);
    let sequential = FrameScheduler::sequential(SchedulerConfig::default());
    let transforms = wobble_scene(10_000).cached_transforms();

    for (name, scheduler) in [("sequential", &sequential), ("parallel", &parallel)] {
        group.bench_function(BenchmarkId::new("translate", name), |b| {
            b.iter(|| scheduler.translate_all(&transforms, Vector3::UP).expect("batch"));
        });
        group.bench_function(BenchmarkId::new("frustum_cull", name), |b| {
            b.iter(|| black_box(scheduler.frustum_cull(&transforms, Vector3::ZERO).expect("batch")));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame, bench_helpers);
criterion_main!(benches);
