//! A small solar system driven by the real-time host loop.
//!
//! Planets orbit a sun; every second a planet launches a moon through the
//! scene command queue. After `DEMO_SECONDS` a director behavior stops the
//! host through its handle.
//!
//! Run with: `RUST_LOG=info cargo run --example orbit_demo -p kestrel-engine`

use kestrel_engine::prelude::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tracing::info;

const DEMO_SECONDS: f64 = 3.0;
const PLANETS: usize = 64;

const TEMPLATES: &str = r#"[
    { "name": "Sun", "tag": "Star",
      "components": [ { "type": "Transform", "properties": { "scale": 5 } } ] },
    { "name": "Planet", "tag": "Planet",
      "components": [ { "type": "Transform" }, { "type": "Orbit" } ] }
]"#;

// -- Behaviors --------------------------------------------------------------

/// Circles the origin in the XZ plane.
#[derive(Default)]
struct Orbit {
    radius: f32,
    angle: f32,
    speed: f32,
    launch_timer: f32,
}

impl Behavior for Orbit {
    fn start(&mut self, ctx: &mut BehaviorContext<'_>) {
        if let Some(t) = ctx.transform() {
            let p = t.position();
            self.radius = (p.x * p.x + p.z * p.z).sqrt();
            self.angle = p.z.atan2(p.x);
        }
        if self.speed == 0.0 {
            self.speed = 1.0 / (1.0 + self.radius * 0.05);
        }
    }

    fn on_update(&mut self, ctx: &mut BehaviorContext<'_>) {
        let dt = ctx.delta_time();
        self.angle += self.speed * dt;
        let position = Vector3::new(self.radius * self.angle.cos(), 0.0, self.radius * self.angle.sin());
        if let Some(t) = ctx.transform() {
            t.set_position(position);
            t.rotate(Vector3::new(0.0, 90.0 * dt, 0.0));
        }

        self.launch_timer += dt;
        if self.launch_timer >= 1.0 {
            self.launch_timer = 0.0;
            ctx.commands().spawn_with("Moon", "", move |moon| {
                moon.add_component(Transform::at(position + Vector3::UP));
            });
        }
    }
}

/// Stops the host once the frame clock passes `DEMO_SECONDS`.
struct Director {
    handle: HostHandle,
}

impl Behavior for Director {
    fn on_late_update(&mut self, ctx: &mut BehaviorContext<'_>) {
        if ctx.time() >= DEMO_SECONDS && self.handle.stop() {
            ctx.log_info("demo time is up");
        }
    }
}

// ---------------------------------------------------------------------------

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig {
        enable_perf_logging: true,
        enable_mem_logging: true,
        ..EngineConfig::default()
    };
    let mut host = EngineHost::quick_start(config, "solar-system")?;
    host.templates_mut().factory_mut().register_behavior::<Orbit>("Orbit");
    host.templates_mut().load_json_str(TEMPLATES)?;

    host.create_entity_from_template("Sun")?;
    let mut rng = Pcg64::seed_from_u64(7);
    for _ in 0..PLANETS {
        let report = host.create_entity_from_template("Planet")?;
        let distance = rng.gen_range(10.0..80.0f32);
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        if let Some(t) = host
            .current_scene()
            .and_then(|scene| scene.find_entity_by_id(report.entity))
            .and_then(|planet| planet.transform())
        {
            t.set_position(Vector3::new(distance * angle.cos(), 0.0, distance * angle.sin()));
        }
    }

    let handle = host.handle();
    let director = host.create_entity("Director")?;
    if let Some(entity) = host
        .current_scene_mut()
        .and_then(|scene| scene.entity_mut(director))
    {
        entity.add_behavior(Director { handle });
    }

    host.on_start(|| info!("simulation started"));
    host.on_stop(|| info!("simulation stopped"));
    host.run()?;

    let stats = host.stats();
    info!(
        frames = stats.total_frames,
        seconds = stats.total_run_time,
        avg_fps = stats.average_fps,
        entities = stats.entity_count,
        moons = host.find_entities_with_tag("Moon").len(),
        "demo finished"
    );
    if let Some(leaks) = host.shutdown() {
        anyhow::bail!("{} tracked allocations leaked", leaks.count);
    }
    Ok(())
}
