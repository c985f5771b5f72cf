//! Simulation driver
//!
//! Owns the compute device, the device buffer set and the kernels, and runs the
//! per-tick protocol:
//!
//! ```text
//! write params -> dispatch integrate -> resolve previous readback -> render
//!              -> dispatch commit -> stage readback of this tick's result
//! ```
//!
//! State machine:
//!
//! ```text
//! Uninitialized --initialize--> Initialized --tick--> Running --shutdown--> Shutdown
//!                                               |                              |
//!                                   failed tick v                              |
//!                                            Faulted --shutdown--> Shutdown <--+
//!                                                         Shutdown --initialize--> Initialized
//! ```

use glam::Vec3;
use particle_physics::{BallState, StepParams};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::buffers::DeviceBuffers;
use crate::config::{ParamUpdate, ReadbackMode, SimulationConfig};
use crate::device::ComputeDevice;
use crate::error::{SimResult, SimulationError};
use crate::kernels::KernelSet;
use crate::params::KernelParams;
use crate::pipeline::FramePipeline;

/// Consumes one complete position array per tick, indexed by ball id
pub trait Renderer {
    fn apply_positions(&mut self, positions: &[Vec3]);
}

impl<F: FnMut(&[Vec3])> Renderer for F {
    fn apply_positions(&mut self, positions: &[Vec3]) {
        (*self)(positions)
    }
}

/// Where the attractor is right now. Sampled once per tick, never written.
pub trait AttractorSource {
    fn position(&self) -> Vec3;
}

impl AttractorSource for Vec3 {
    fn position(&self) -> Vec3 {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    Uninitialized,
    /// Buffers bound and the first dispatch read back; no tick yet
    Initialized,
    Running,
    /// A tick failed on the device; only `shutdown` is accepted
    Faulted,
    Shutdown,
}

/// Everything that lives between `initialize` and `shutdown`.
/// Field order is drop order: kernels release their bindings before the buffers go.
struct Run<D: ComputeDevice> {
    pipeline: FramePipeline<D::Readback>,
    kernels: KernelSet<D::Kernel>,
    buffers: DeviceBuffers<D::Buffer>,
    balls: BallState,
    params: StepParams,
    config: SimulationConfig,
    ticks: u64,
}

impl<D: ComputeDevice> Run<D> {
    fn ball_count(&self) -> u32 {
        self.buffers.len()
    }

    fn tick_pipelined<R: Renderer + ?Sized>(
        &mut self,
        device: &mut D,
        tick: u64,
        renderer: &mut R,
    ) -> SimResult<()> {
        let count = self.ball_count();

        device.dispatch(&self.kernels.integrate, count)?;

        // Previous tick's result; waits for that readback only
        self.pipeline.resolve(device)?;
        renderer.apply_positions(self.pipeline.present());

        device.dispatch(&self.kernels.commit, count)?;
        let readback = device.begin_readback(&self.buffers.result)?;
        self.pipeline.stage(readback, tick)
    }

    fn tick_blocking<R: Renderer + ?Sized>(
        &mut self,
        device: &mut D,
        tick: u64,
        renderer: &mut R,
    ) -> SimResult<()> {
        let count = self.ball_count();

        device.dispatch(&self.kernels.integrate, count)?;
        device.dispatch(&self.kernels.commit, count)?;
        let readback = device.begin_readback(&self.buffers.result)?;
        self.pipeline.complete(device, readback, tick)?;
        renderer.apply_positions(self.pipeline.present());
        Ok(())
    }
}

/// GPU-driven ball simulation around a single attractor
pub struct Simulation<D: ComputeDevice> {
    run: Option<Run<D>>,
    state: SimulationState,
    device: D,
}

impl<D: ComputeDevice> Simulation<D> {
    pub fn new(device: D) -> Self {
        Self {
            run: None,
            state: SimulationState::Uninitialized,
            device,
        }
    }

    /// Spawn the balls, build and bind the device buffers, run the first
    /// integration step and read its result back.
    ///
    /// On error nothing is kept: every buffer created so far is released and
    /// the state is unchanged.
    pub fn initialize(&mut self, config: SimulationConfig) -> SimResult<()> {
        match self.state {
            SimulationState::Uninitialized | SimulationState::Shutdown => {}
            _ => return Err(SimulationError::AlreadyInitialized),
        }
        config.validate()?;

        log::info!(
            "Initializing simulation: {} balls on {}",
            config.ball_count,
            self.device.name()
        );

        let device = &mut self.device;
        let count = config.ball_count;

        let mut kernels = KernelSet::resolve(device, &config.entry_points)?;

        let balls = match config.seed {
            Some(seed) => BallState::initialize(
                count as usize,
                &config.spawn,
                &mut StdRng::seed_from_u64(seed),
            )?,
            None => BallState::initialize(count as usize, &config.spawn, &mut rand::rng())?,
        };
        log::debug!("Spawned {} balls", balls.len());

        let buffers = DeviceBuffers::allocate(device, count)?;
        buffers.upload_state(device, &balls)?;
        kernels.bind(device, &buffers)?;
        log::info!("Buffers created and bound ({} bytes)", buffers.total_bytes());

        let params = config.step_params();
        device.write_params(&KernelParams::new(&params, count))?;

        // First step runs synchronously so tick 1 has something to show
        let mut pipeline = FramePipeline::new(balls.len());
        device.dispatch(&kernels.integrate, count)?;
        device.dispatch(&kernels.commit, count)?;
        let readback = device.begin_readback(&buffers.result)?;
        pipeline.complete(device, readback, 0)?;

        self.run = Some(Run {
            pipeline,
            kernels,
            buffers,
            balls,
            params,
            config,
            ticks: 0,
        });
        self.state = SimulationState::Initialized;
        log::info!("Simulation initialized");
        Ok(())
    }

    /// Advance the simulation one step and hand positions to `renderer`.
    ///
    /// In pipelined mode the positions are those computed by the previous tick
    /// (by `initialize` on the first tick). An invalid `update` is rejected with
    /// no state change; a device failure moves the simulation to `Faulted`.
    pub fn tick<A, R>(&mut self, attractor: &A, update: &ParamUpdate, renderer: &mut R) -> SimResult<()>
    where
        A: AttractorSource + ?Sized,
        R: Renderer + ?Sized,
    {
        let run = match (self.state, self.run.as_mut()) {
            (SimulationState::Initialized | SimulationState::Running, Some(run)) => run,
            (state, _) => return Err(SimulationError::NotRunning { state }),
        };

        let next = update.apply(&run.params, attractor.position())?;
        let tick = run.ticks + 1;
        log::trace!("Tick {tick}: attractor at {}", next.attractor_position);

        let device = &mut self.device;
        let result = device
            .write_params(&KernelParams::new(&next, run.ball_count()))
            .and_then(|()| {
                run.params = next;
                match run.config.readback_mode {
                    ReadbackMode::Pipelined => run.tick_pipelined(device, tick, renderer),
                    ReadbackMode::Blocking => run.tick_blocking(device, tick, renderer),
                }
            });

        match result {
            Ok(()) => {
                run.ticks = tick;
                self.state = SimulationState::Running;
                Ok(())
            }
            Err(e) => {
                log::error!("Tick {tick} failed, simulation halted: {e}");
                self.state = SimulationState::Faulted;
                Err(e)
            }
        }
    }

    /// Release every device buffer. Does not wait for in-flight work.
    pub fn shutdown(&mut self) -> SimResult<()> {
        match self.state {
            SimulationState::Initialized | SimulationState::Running | SimulationState::Faulted => {}
            state => return Err(SimulationError::NotRunning { state }),
        }

        if let Some(run) = self.run.take() {
            log::info!(
                "Shutting down after {} ticks, releasing {} bytes",
                run.ticks,
                run.buffers.total_bytes()
            );
        }
        self.state = SimulationState::Shutdown;
        Ok(())
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Ball count of the current run
    pub fn ball_count(&self) -> Option<u32> {
        self.run.as_ref().map(Run::ball_count)
    }

    /// Initial host state of the current run
    pub fn balls(&self) -> Option<&BallState> {
        self.run.as_ref().map(|run| &run.balls)
    }

    /// Host result array (last completed readback)
    pub fn host_results(&self) -> Option<&[Vec3]> {
        self.run.as_ref().map(|run| run.pipeline.results())
    }

    /// Tick whose dispatch produced `host_results` (0 = initialization)
    pub fn host_results_tick(&self) -> Option<u64> {
        self.run.as_ref().map(|run| run.pipeline.results_tick())
    }

    pub fn device_buffers(&self) -> Option<&DeviceBuffers<D::Buffer>> {
        self.run.as_ref().map(|run| &run.buffers)
    }

    /// Parameters used by the most recent dispatch
    pub fn params(&self) -> Option<&StepParams> {
        self.run.as_ref().map(|run| &run.params)
    }

    pub fn config(&self) -> Option<&SimulationConfig> {
        self.run.as_ref().map(|run| &run.config)
    }

    /// Position arrays handed to the renderer in the current run
    pub fn frames_presented(&self) -> u64 {
        self.run.as_ref().map_or(0, |run| run.pipeline.frames_presented())
    }

    /// Completed ticks in the current run
    pub fn ticks(&self) -> u64 {
        self.run.as_ref().map_or(0, |run| run.ticks)
    }
}
