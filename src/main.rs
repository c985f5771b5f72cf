//! Ball Attractor
//!
//! Headless driver: spawns a ball population, swings an attractor around the
//! origin and logs what a renderer would receive.

use std::error::Error;
use std::f32::consts::TAU;

use glam::Vec3;
use particle_physics::DEFAULT_TIME_STEP;
use particle_simulation::{
    AttractorSource, ComputeDevice, CpuDevice, ParamUpdate, Renderer, SimulationConfig, Simulation,
    WgpuDevice,
};

const DEFAULT_TICKS: u64 = 500;
const ORBIT_RADIUS: f32 = 20.0;
const ORBIT_PERIOD: f32 = 8.0; // seconds per revolution
const REPORT_EVERY: u64 = 50;

/// Attractor circling the origin in the XZ plane
struct OrbitingAttractor {
    radius: f32,
    angle: f32,
}

impl OrbitingAttractor {
    fn advance(&mut self, dt: f32) {
        self.angle = (self.angle + TAU * dt / ORBIT_PERIOD) % TAU;
    }
}

impl AttractorSource for OrbitingAttractor {
    fn position(&self) -> Vec3 {
        Vec3::new(self.angle.cos(), 0.0, self.angle.sin()) * self.radius
    }
}

/// Stand-in for a mesh renderer: reports where the swarm is
#[derive(Default)]
struct SwarmReport {
    frames: u64,
}

impl Renderer for SwarmReport {
    fn apply_positions(&mut self, positions: &[Vec3]) {
        self.frames += 1;
        if self.frames % REPORT_EVERY != 0 || positions.is_empty() {
            return;
        }

        let centroid = positions.iter().copied().sum::<Vec3>() / positions.len() as f32;
        let spread = positions
            .iter()
            .map(|p| p.distance(centroid))
            .fold(0.0f32, f32::max);
        log::info!(
            "frame {:>5}: centroid ({:>7.2}, {:>7.2}, {:>7.2}), spread {:.2}",
            self.frames,
            centroid.x,
            centroid.y,
            centroid.z,
            spread
        );
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            log::warn!("Ignoring unparsable {}={}", name, value);
            default
        }),
        Err(_) => default,
    }
}

fn run<D: ComputeDevice>(device: D, config: SimulationConfig, ticks: u64) -> Result<(), Box<dyn Error>> {
    let mut simulation = Simulation::new(device);
    simulation.initialize(config)?;

    let mut attractor = OrbitingAttractor {
        radius: ORBIT_RADIUS,
        angle: 0.0,
    };
    let mut renderer = SwarmReport::default();
    let update = ParamUpdate::default();

    for _ in 0..ticks {
        attractor.advance(DEFAULT_TIME_STEP);
        simulation.tick(&attractor, &update, &mut renderer)?;
    }

    log::info!(
        "✓ Ran {} ticks, {} frames rendered",
        simulation.ticks(),
        renderer.frames
    );
    simulation.shutdown()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logger (RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting ball attractor simulation...");

    let config = SimulationConfig {
        ball_count: env_or("BALL_COUNT", SimulationConfig::default().ball_count),
        ..Default::default()
    };
    let ticks = env_or("TICKS", DEFAULT_TICKS);

    if env_or("USE_CPU", false) {
        log::info!("USE_CPU set, running on the CPU backend");
        return run(CpuDevice::new(), config, ticks);
    }

    match WgpuDevice::request() {
        Ok(device) => run(device, config, ticks),
        Err(e) => {
            log::warn!("No GPU available ({}), falling back to CPU", e);
            run(CpuDevice::new(), config, ticks)
        }
    }
}
