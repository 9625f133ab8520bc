//! Property tests for the frame scheduler.
//!
//! Frame deltas are multiples of 1/1024 s and the fixed interval is 1/64 s,
//! so every sum is exact in binary floating point and the step count can be
//! compared against `floor((acc + dt) / interval)` without tolerance.

use std::sync::Arc;

use kestrel_engine::prelude::*;
use proptest::prelude::*;

const RATE: f32 = 64.0;
const INTERVAL: f64 = 1.0 / 64.0;

#[derive(Default)]
struct FixedCounter {
    steps: u32,
    last_delta: f32,
}

impl Behavior for FixedCounter {
    fn on_fixed_update(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.steps += 1;
        self.last_delta = ctx.delta_time();
    }
}

#[derive(Default)]
struct Tally {
    updates: u32,
}

impl Behavior for Tally {
    fn on_update(&mut self, _ctx: &mut BehaviorContext<'_>) {
        self.updates += 1;
    }
}

#[derive(Debug, Clone)]
enum FrameOp {
    /// A frame of `k / 1024` seconds.
    Frame(u32),
    /// A long stall, several intervals at once.
    Stall(u32),
}

impl FrameOp {
    fn delta(&self) -> f32 {
        match self {
            FrameOp::Frame(k) => *k as f32 / 1024.0,
            FrameOp::Stall(n) => *n as f32 / 16.0,
        }
    }
}

fn frame_op_strategy() -> impl Strategy<Value = FrameOp> {
    prop_oneof![
        8 => (0..64u32).prop_map(FrameOp::Frame),
        1 => (1..8u32).prop_map(FrameOp::Stall),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn fixed_steps_follow_accumulator(ops in proptest::collection::vec(frame_op_strategy(), 1..80)) {
        let mut scene = Scene::new("fixed");
        let id = scene.create_entity("counter", "");
        let counter = scene.entity_mut(id).unwrap().add_behavior(FixedCounter::default());
        let mut scheduler = FrameScheduler::sequential(SchedulerConfig {
            fixed_update_rate: RATE,
            ..Default::default()
        });

        let mut expected_total = 0u32;
        for op in &ops {
            let dt = op.delta();
            let before = scheduler.accumulator();
            let expected = ((before + f64::from(dt)) / INTERVAL).floor() as u32;

            let steps = scheduler.fixed_update(&mut scene, FrameTime::from_delta(dt));

            prop_assert_eq!(steps, expected);
            prop_assert_eq!(scheduler.accumulator(), (before + f64::from(dt)) % INTERVAL);
            prop_assert!(scheduler.accumulator() < INTERVAL);
            expected_total += expected;
        }

        let c = counter.script();
        prop_assert_eq!(c.steps, expected_total);
        if c.steps > 0 {
            prop_assert_eq!(c.last_delta, 1.0 / RATE);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn parallel_updates_every_behavior_once_per_frame(
        entities in 0..300usize,
        workers in 1..5usize,
        batch_size in 0..40usize,
        frames in 1..6u32,
    ) {
        let mut scene = Scene::new("tally");
        let tallies: Vec<_> = (0..entities)
            .map(|_| {
                let id = scene.create_entity_at("t", "", Vector3::ZERO);
                scene.entity_mut(id).unwrap().add_behavior(Tally::default())
            })
            .collect();
        let mut scheduler = FrameScheduler::parallel(
            SchedulerConfig { batch_size, ..Default::default() },
            Arc::new(WorkerPool::new(workers).unwrap()),
        );

        for _ in 0..frames {
            scheduler.update(&mut scene, FrameTime::from_delta(0.01));
        }

        prop_assert!(tallies.iter().all(|t| t.script().updates == frames));
        prop_assert_eq!(scheduler.stats().transforms_processed, entities);
        prop_assert_eq!(scheduler.stats().failed_phases, 0);
    }
}
