//! Frame pipeline: decouples "dispatched" from "consumed"
//!
//! In [`ReadbackMode::Pipelined`](crate::config::ReadbackMode::Pipelined) a tick goes through two stages:
//!
//! 1. **Dispatch stage**: the integration kernel for tick `k` is submitted.
//! 2. **Consume stage**: while it runs, the readback staged by tick `k - 1` is
//!    resolved (waiting only for that readback) and presented. Then a readback
//!    of tick `k`'s result is staged for the next call.
//!
//! The renderer therefore sees positions one tick behind the device. The
//! pending slot holds at most one readback, and presented data always comes
//! from a readback that completed in full.

use glam::Vec3;

use crate::device::ComputeDevice;
use crate::error::{SimResult, SimulationError};

/// A readback in flight, tagged with the tick whose dispatch it captures
struct Staged<R> {
    readback: R,
    tick: u64,
}

pub struct FramePipeline<R> {
    /// Host result array: contents of the last completed readback
    results: Vec<Vec3>,
    /// Tick whose integration dispatch produced `results` (0 = initialization)
    results_tick: u64,
    pending: Option<Staged<R>>,
    frames_presented: u64,
}

impl<R> FramePipeline<R> {
    pub fn new(ball_count: usize) -> Self {
        Self {
            results: vec![Vec3::ZERO; ball_count],
            results_tick: 0,
            pending: None,
            frames_presented: 0,
        }
    }

    /// Wait for `readback` right away and make it the current result
    pub fn complete<D>(&mut self, device: &mut D, readback: R, tick: u64) -> SimResult<()>
    where
        D: ComputeDevice<Readback = R>,
    {
        device.finish_readback(readback, &mut self.results)?;
        self.results_tick = tick;
        Ok(())
    }

    /// Park a readback until the next [`resolve`](Self::resolve)
    pub fn stage(&mut self, readback: R, tick: u64) -> SimResult<()> {
        if self.pending.is_some() {
            return Err(SimulationError::execution(
                "readback",
                "a readback is already pending; resolve it before staging another",
            ));
        }
        self.pending = Some(Staged { readback, tick });
        Ok(())
    }

    /// Finish the pending readback, if any. Blocks until it completes.
    /// With nothing pending the current result stays as is.
    pub fn resolve<D>(&mut self, device: &mut D) -> SimResult<()>
    where
        D: ComputeDevice<Readback = R>,
    {
        if let Some(Staged { readback, tick }) = self.pending.take() {
            device.finish_readback(readback, &mut self.results)?;
            self.results_tick = tick;
        }
        Ok(())
    }

    /// Hand out the current result for display
    pub fn present(&mut self) -> &[Vec3] {
        self.frames_presented += 1;
        &self.results
    }

    pub fn results(&self) -> &[Vec3] {
        &self.results
    }

    pub fn results_tick(&self) -> u64 {
        self.results_tick
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}
