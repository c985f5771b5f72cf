//! Full driver runs on the CPU backend

use glam::Vec3;
use particle_physics::{Bounds3, MassRange, SpawnRanges, DEFAULT_FRICTION};
use particle_simulation::{
    CpuDevice, DeviceBuffer, FaultPlan, ParamUpdate, ReadbackMode, Simulation, SimulationConfig,
    SimulationError, SimulationState,
};

fn config(count: u32) -> SimulationConfig {
    SimulationConfig {
        ball_count: count,
        seed: Some(7),
        ..Default::default()
    }
}

/// No gravity, no border push, no damping
fn free_flight(count: u32) -> SimulationConfig {
    SimulationConfig {
        gravity: 0.0,
        friction: 1.0,
        border_force: 0.0,
        bounds: Bounds3::cube(1000.0),
        time_step: 0.5,
        ..config(count)
    }
}

fn idle() -> ParamUpdate {
    ParamUpdate::default()
}

fn assert_close(actual: &[Vec3], expected: &[Vec3]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!(a.abs_diff_eq(*e, 1e-4), "{a} != {e}");
    }
}

#[test]
fn test_initialize_sizes_every_buffer() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(config(100)).unwrap();

    assert_eq!(sim.state(), SimulationState::Initialized);
    assert_eq!(sim.ball_count(), Some(100));
    let buffers = sim.device_buffers().unwrap();
    assert!(buffers.iter().all(|b| b.len() == 100));
    assert_eq!(sim.device().ledger().live_buffers(), 5);
    assert_eq!(sim.host_results().unwrap().len(), 100);
    assert_eq!(sim.host_results_tick(), Some(0));
}

#[test]
fn test_spawn_respects_ranges() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(SimulationConfig {
        spawn: SpawnRanges {
            velocity_range: 1.0,
            position_range: 3.0,
            mass: MassRange::new(0.5, 2.0),
        },
        ..config(500)
    })
    .unwrap();

    let balls = sim.balls().unwrap();
    assert!(balls
        .positions()
        .iter()
        .all(|p| p.abs().max_element() <= 3.0));
    assert!(balls
        .velocities()
        .iter()
        .all(|v| v.abs().max_element() <= 1.0));
    assert!(balls.masses().iter().all(|m| (0.5..=2.0).contains(m)));
    assert!(balls.accelerations().iter().all(|a| *a == Vec3::ZERO));
}

#[test]
fn test_second_initialize_is_rejected() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(config(16)).unwrap();
    let results = sim.host_results().unwrap().to_vec();

    assert_eq!(
        sim.initialize(config(32)),
        Err(SimulationError::AlreadyInitialized)
    );
    assert_eq!(sim.ball_count(), Some(16));
    assert_eq!(sim.host_results().unwrap(), results.as_slice());
    assert_eq!(sim.device().ledger().total_allocations(), 5);
}

#[test]
fn test_zero_forces_keep_velocity() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(free_flight(64)).unwrap();

    let balls = sim.balls().unwrap().clone();
    let buffers = sim.device_buffers().unwrap();
    let velocities = sim.device().peek_vec3(&buffers.velocity).unwrap();
    assert_eq!(velocities, balls.velocities());

    let expected: Vec<Vec3> = balls
        .positions()
        .iter()
        .zip(balls.velocities())
        .map(|(p, v)| *p + *v * 0.5)
        .collect();
    assert_eq!(sim.host_results().unwrap(), expected.as_slice());

    sim.tick(&Vec3::ZERO, &idle(), &mut |_: &[Vec3]| {}).unwrap();
    let buffers = sim.device_buffers().unwrap();
    let velocities = sim.device().peek_vec3(&buffers.velocity).unwrap();
    assert_eq!(velocities, balls.velocities());

    let expected: Vec<Vec3> = expected
        .iter()
        .zip(balls.velocities())
        .map(|(p, v)| *p + *v * 0.5)
        .collect();
    assert_eq!(sim.device().peek_vec3(&buffers.position).unwrap(), expected);
}

#[test]
fn test_border_pushes_back_inside() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(SimulationConfig {
        gravity: 0.0,
        friction: 1.0,
        border_force: 10.0,
        bounds: Bounds3::cube(1.0),
        spawn: SpawnRanges {
            velocity_range: 0.0,
            position_range: 5.0,
            mass: MassRange::fixed(2.0),
        },
        ..config(256)
    })
    .unwrap();

    let positions = sim.balls().unwrap().positions().to_vec();
    let buffers = sim.device_buffers().unwrap();
    let accelerations = sim.device().peek_vec3(&buffers.acceleration).unwrap();

    for (p, a) in positions.iter().zip(&accelerations) {
        for axis in 0..3 {
            let expected = if p[axis] > 1.0 {
                -5.0
            } else if p[axis] < -1.0 {
                5.0
            } else {
                0.0
            };
            assert_eq!(a[axis], expected, "position {p}");
        }
    }
}

#[test]
fn test_pipelined_renders_previous_tick() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(free_flight(8)).unwrap();
    let balls = sim.balls().unwrap().clone();
    let after = |steps: f32| -> Vec<Vec3> {
        balls
            .positions()
            .iter()
            .zip(balls.velocities())
            .map(|(p, v)| *p + *v * 0.5 * steps)
            .collect()
    };

    let mut frames: Vec<Vec<Vec3>> = Vec::new();
    for tick in 1..=4u64 {
        let mut record = |positions: &[Vec3]| frames.push(positions.to_vec());
        sim.tick(&Vec3::ZERO, &idle(), &mut record).unwrap();
        assert_eq!(sim.host_results_tick(), Some(tick - 1));
    }

    // Tick k shows the result computed by tick k - 1 (initialization for k = 1)
    for (k, frame) in frames.iter().enumerate() {
        assert_close(frame, &after(k as f32 + 1.0));
    }
    assert_eq!(sim.state(), SimulationState::Running);
    assert_eq!(sim.ticks(), 4);
    assert_eq!(sim.frames_presented(), 4);
}

#[test]
fn test_blocking_renders_current_tick() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(SimulationConfig {
        readback_mode: ReadbackMode::Blocking,
        ..free_flight(8)
    })
    .unwrap();
    let balls = sim.balls().unwrap().clone();

    let mut frames: Vec<Vec<Vec3>> = Vec::new();
    for tick in 1..=3u64 {
        let mut record = |positions: &[Vec3]| frames.push(positions.to_vec());
        sim.tick(&Vec3::ZERO, &idle(), &mut record).unwrap();
        assert_eq!(sim.host_results_tick(), Some(tick));
    }

    for (k, frame) in frames.iter().enumerate() {
        let expected: Vec<Vec3> = balls
            .positions()
            .iter()
            .zip(balls.velocities())
            .map(|(p, v)| *p + *v * 0.5 * (k as f32 + 2.0))
            .collect();
        assert_close(frame, &expected);
    }
}

#[test]
fn test_shutdown_releases_and_allows_reinitialize() {
    let mut sim = Simulation::new(CpuDevice::new());
    let ledger = sim.device().ledger();
    sim.initialize(config(10)).unwrap();
    sim.tick(&Vec3::ONE, &idle(), &mut |_: &[Vec3]| {}).unwrap();

    sim.shutdown().unwrap();
    assert_eq!(sim.state(), SimulationState::Shutdown);
    assert_eq!(ledger.live_buffers(), 0);
    assert_eq!(ledger.live_bytes(), 0);
    assert!(sim.device_buffers().is_none());

    sim.initialize(config(3)).unwrap();
    assert_eq!(sim.ball_count(), Some(3));
    assert_eq!(ledger.live_buffers(), 5);
    assert_eq!(sim.ticks(), 0);
}

#[test]
fn test_missing_kernel_allocates_nothing() {
    let mut sim = Simulation::new(CpuDevice::new());
    let mut bad = config(10);
    bad.entry_points.integrate = "CSMain".to_string();

    assert_eq!(
        sim.initialize(bad),
        Err(SimulationError::KernelNotFound {
            entry_point: "CSMain".to_string()
        })
    );
    assert_eq!(sim.state(), SimulationState::Uninitialized);
    assert_eq!(sim.device().ledger().total_allocations(), 0);
}

#[test]
fn test_allocation_failure_releases_partial_set() {
    let device = CpuDevice::new().with_faults(FaultPlan {
        memory_limit: Some(12 * 100 * 3),
        ..Default::default()
    });
    let ledger = device.ledger();
    let mut sim = Simulation::new(device);

    let err = sim.initialize(config(100)).unwrap_err();
    assert!(matches!(
        err,
        SimulationError::DeviceAllocationFailed { buffer: "Mass", .. }
    ));
    assert_eq!(sim.state(), SimulationState::Uninitialized);
    assert_eq!(ledger.live_buffers(), 0);

    sim.device_mut().faults_mut().memory_limit = None;
    sim.initialize(config(100)).unwrap();
    assert_eq!(ledger.live_buffers(), 5);
}

#[test]
fn test_device_failure_faults_the_run() {
    // initialize issues two dispatches; the first tick's integrate is the third
    let device = CpuDevice::new().with_faults(FaultPlan {
        fail_dispatch_from: Some(3),
        ..Default::default()
    });
    let ledger = device.ledger();
    let mut sim = Simulation::new(device);
    sim.initialize(config(10)).unwrap();

    let mut frames = 0;
    let err = sim
        .tick(&Vec3::ZERO, &idle(), &mut |_: &[Vec3]| frames += 1)
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(frames, 0);
    assert_eq!(sim.state(), SimulationState::Faulted);

    assert_eq!(
        sim.tick(&Vec3::ZERO, &idle(), &mut |_: &[Vec3]| {}),
        Err(SimulationError::NotRunning {
            state: SimulationState::Faulted
        })
    );

    sim.shutdown().unwrap();
    assert_eq!(ledger.live_buffers(), 0);
}

#[test]
fn test_failed_readback_is_never_rendered() {
    let mut sim = Simulation::new(CpuDevice::new());
    let ledger = sim.device().ledger();
    sim.initialize(config(10)).unwrap();
    let initial = sim.host_results().unwrap().to_vec();
    sim.device_mut().faults_mut().fail_readbacks = true;

    // Tick 1 renders the initialization result; its own readback is only staged
    let mut frames = 0;
    sim.tick(&Vec3::ZERO, &idle(), &mut |_: &[Vec3]| frames += 1)
        .unwrap();
    assert_eq!(frames, 1);

    // Tick 2 has to finish that readback before rendering
    let err = sim
        .tick(&Vec3::ZERO, &idle(), &mut |_: &[Vec3]| frames += 1)
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(frames, 1);
    assert_eq!(sim.frames_presented(), 1);
    assert_eq!(sim.state(), SimulationState::Faulted);
    assert_eq!(sim.host_results().unwrap(), initial.as_slice());
    assert_eq!(sim.host_results_tick(), Some(0));

    sim.shutdown().unwrap();
    assert_eq!(ledger.live_buffers(), 0);
}

#[test]
fn test_failed_blocking_readback_is_never_rendered() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(SimulationConfig {
        readback_mode: ReadbackMode::Blocking,
        ..config(10)
    })
    .unwrap();
    let initial = sim.host_results().unwrap().to_vec();
    sim.device_mut().faults_mut().fail_readbacks = true;

    let mut frames = 0;
    let err = sim
        .tick(&Vec3::ZERO, &idle(), &mut |_: &[Vec3]| frames += 1)
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(frames, 0);
    assert_eq!(sim.state(), SimulationState::Faulted);
    assert_eq!(sim.host_results().unwrap(), initial.as_slice());
}

#[test]
fn test_calls_before_initialize() {
    let mut sim = Simulation::new(CpuDevice::new());
    assert_eq!(
        sim.tick(&Vec3::ZERO, &idle(), &mut |_: &[Vec3]| {}),
        Err(SimulationError::NotRunning {
            state: SimulationState::Uninitialized
        })
    );
    assert!(matches!(
        sim.shutdown(),
        Err(SimulationError::NotRunning { .. })
    ));
    assert_eq!(sim.device().dispatch_count(), 0);
}

#[test]
fn test_invalid_update_changes_nothing() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(config(10)).unwrap();
    let params = *sim.params().unwrap();
    let dispatches = sim.device().dispatch_count();

    let update = ParamUpdate {
        friction: Some(f32::NAN),
        ..Default::default()
    };
    let err = sim
        .tick(&Vec3::X, &update, &mut |_: &[Vec3]| {})
        .unwrap_err();
    assert!(matches!(err, SimulationError::InvalidConfiguration { .. }));
    assert_eq!(sim.state(), SimulationState::Initialized);
    assert_eq!(sim.params(), Some(&params));
    assert_eq!(sim.device().dispatch_count(), dispatches);
    assert_eq!(sim.ticks(), 0);
}

#[test]
fn test_update_reaches_device() {
    let mut sim = Simulation::new(CpuDevice::new());
    sim.initialize(config(10)).unwrap();

    let attractor = Vec3::new(1.0, 2.0, 3.0);
    let update = ParamUpdate {
        gravity: Some(0.25),
        time_step: Some(0.01),
        ..Default::default()
    };
    sim.tick(&attractor, &update, &mut |_: &[Vec3]| {}).unwrap();

    let device_params = sim.device().params().unwrap().step_params();
    assert_eq!(device_params.gravity, 0.25);
    assert_eq!(device_params.time_step, 0.01);
    assert_eq!(device_params.attractor_position, attractor);
    assert_eq!(sim.params().unwrap().gravity, 0.25);
    // Untouched fields carry over
    assert_eq!(sim.params().unwrap().friction, DEFAULT_FRICTION);
}
