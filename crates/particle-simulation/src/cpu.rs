//! CPU compute backend
//!
//! Runs both kernels on the rayon thread pool using the reference math from
//! `particle_physics::step`. Every allocation is tracked in a [`DeviceLedger`],
//! and failures can be injected, which makes this backend the test double for
//! the driver as well as a fallback when no GPU adapter is available.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::Vec3;
use particle_physics::step;
use rayon::prelude::*;

use crate::buffers::DeviceBuffers;
use crate::device::{BufferKind, ComputeDevice, DeviceBuffer};
use crate::error::{SimResult, SimulationError};
use crate::params::KernelParams;

#[derive(Debug, Default)]
struct LedgerCounters {
    live_buffers: AtomicUsize,
    live_bytes: AtomicU64,
    total_allocations: AtomicUsize,
}

/// Allocation accounting shared by a device and all of its buffers
#[derive(Debug, Clone, Default)]
pub struct DeviceLedger {
    counters: Arc<LedgerCounters>,
}

impl DeviceLedger {
    /// Buffers whose memory has not been released yet
    pub fn live_buffers(&self) -> usize {
        self.counters.live_buffers.load(Ordering::SeqCst)
    }

    pub fn live_bytes(&self) -> u64 {
        self.counters.live_bytes.load(Ordering::SeqCst)
    }

    /// Allocations made over the device's lifetime
    pub fn total_allocations(&self) -> usize {
        self.counters.total_allocations.load(Ordering::SeqCst)
    }

    fn acquire(&self, bytes: u64) {
        self.counters.live_buffers.fetch_add(1, Ordering::SeqCst);
        self.counters.live_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.counters.total_allocations.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, bytes: u64) {
        self.counters.live_buffers.fetch_sub(1, Ordering::SeqCst);
        self.counters.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// Backing memory of one buffer. Released when the last handle or binding drops.
#[derive(Debug)]
struct Allocation {
    data: RwLock<Vec<f32>>,
    bytes: u64,
    ledger: DeviceLedger,
}

impl Allocation {
    fn read(&self) -> SimResult<RwLockReadGuard<'_, Vec<f32>>> {
        self.data
            .read()
            .map_err(|_| SimulationError::execution("buffer access", "buffer lock poisoned"))
    }

    fn write(&self) -> SimResult<RwLockWriteGuard<'_, Vec<f32>>> {
        self.data
            .write()
            .map_err(|_| SimulationError::execution("buffer access", "buffer lock poisoned"))
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.ledger.release(self.bytes);
    }
}

#[derive(Debug)]
pub struct CpuBuffer {
    kind: BufferKind,
    len: u32,
    storage: Arc<Allocation>,
}

impl DeviceBuffer for CpuBuffer {
    fn kind(&self) -> BufferKind {
        self.kind
    }

    fn len(&self) -> u32 {
        self.len
    }
}

/// Which kernel body an entry point runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuKernelKind {
    Integrate,
    Commit,
}

struct CpuBindings {
    acceleration: Arc<Allocation>,
    velocity: Arc<Allocation>,
    position: Arc<Allocation>,
    mass: Arc<Allocation>,
    result: Arc<Allocation>,
    len: u32,
}

pub struct CpuKernel {
    entry_point: String,
    kind: CpuKernelKind,
    bindings: Option<CpuBindings>,
}

/// Snapshot of a buffer taken when the readback was issued
pub struct CpuReadback {
    data: Vec<f32>,
}

/// Failures to inject into a [`CpuDevice`]
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Fail allocations that would push live memory above this many bytes
    pub memory_limit: Option<u64>,
    /// Fail the Nth dispatch (1-based) and every dispatch after it
    pub fail_dispatch_from: Option<u64>,
    /// Fail every readback
    pub fail_readbacks: bool,
}

pub struct CpuDevice {
    ledger: DeviceLedger,
    entry_points: Vec<(String, CpuKernelKind)>,
    params: Option<KernelParams>,
    faults: FaultPlan,
    dispatches: u64,
    readbacks: u64,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDevice {
    /// Device exposing the `integrate` and `commit` entry points
    pub fn new() -> Self {
        Self {
            ledger: DeviceLedger::default(),
            entry_points: vec![
                ("integrate".to_string(), CpuKernelKind::Integrate),
                ("commit".to_string(), CpuKernelKind::Commit),
            ],
            params: None,
            faults: FaultPlan::default(),
            dispatches: 0,
            readbacks: 0,
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Expose `kind` under another entry point name
    pub fn register_kernel(&mut self, entry_point: impl Into<String>, kind: CpuKernelKind) {
        self.entry_points.push((entry_point.into(), kind));
    }

    pub fn faults_mut(&mut self) -> &mut FaultPlan {
        &mut self.faults
    }

    pub fn ledger(&self) -> DeviceLedger {
        self.ledger.clone()
    }

    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    pub fn readback_count(&self) -> u64 {
        self.readbacks
    }

    /// Last parameter block written, if any
    pub fn params(&self) -> Option<&KernelParams> {
        self.params.as_ref()
    }

    /// Current contents of a vec3 buffer (bypasses the readback path)
    pub fn peek_vec3(&self, buffer: &CpuBuffer) -> SimResult<Vec<Vec3>> {
        let data = buffer.storage.read()?;
        Ok(data.chunks_exact(3).map(Vec3::from_slice).collect())
    }

    fn run_integrate(b: &CpuBindings, params: &KernelParams, count: usize) -> SimResult<()> {
        let step_params = params.step_params();
        let position_guard = b.position.read()?;
        let mass_guard = b.mass.read()?;
        let positions: &[f32] = &position_guard;
        let masses: &[f32] = &mass_guard;
        let mut accelerations = b.acceleration.write()?;
        let mut velocities = b.velocity.write()?;
        let mut results = b.result.write()?;

        let n = count * 3;
        accelerations[..n]
            .par_chunks_exact_mut(3)
            .zip(velocities[..n].par_chunks_exact_mut(3))
            .zip(results[..n].par_chunks_exact_mut(3))
            .enumerate()
            .for_each(|(i, ((acceleration, velocity), result))| {
                let position = Vec3::from_slice(&positions[i * 3..i * 3 + 3]);
                let out = step(position, Vec3::from_slice(velocity), masses[i], &step_params);
                out.acceleration.write_to_slice(acceleration);
                out.velocity.write_to_slice(velocity);
                out.position.write_to_slice(result);
            });
        Ok(())
    }

    fn run_commit(b: &CpuBindings, count: usize) -> SimResult<()> {
        let result_guard = b.result.read()?;
        let mut positions = b.position.write()?;
        let results: &[f32] = &result_guard;

        let n = count * 3;
        positions[..n]
            .par_iter_mut()
            .zip(results[..n].par_iter())
            .for_each(|(position, result)| *position = *result);
        Ok(())
    }
}

impl ComputeDevice for CpuDevice {
    type Buffer = CpuBuffer;
    type Kernel = CpuKernel;
    type Readback = CpuReadback;

    fn name(&self) -> String {
        format!("CPU ({} threads)", rayon::current_num_threads())
    }

    fn load_kernel(&mut self, entry_point: &str) -> SimResult<CpuKernel> {
        let kind = self
            .entry_points
            .iter()
            .find(|(name, _)| name == entry_point)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| SimulationError::KernelNotFound {
                entry_point: entry_point.to_string(),
            })?;

        Ok(CpuKernel {
            entry_point: entry_point.to_string(),
            kind,
            bindings: None,
        })
    }

    fn create_buffer(&mut self, kind: BufferKind, count: u32) -> SimResult<CpuBuffer> {
        let bytes = count as u64 * kind.element_size();
        if let Some(limit) = self.faults.memory_limit {
            if self.ledger.live_bytes() + bytes > limit {
                return Err(SimulationError::DeviceAllocationFailed {
                    buffer: kind.label(),
                    bytes,
                    reason: format!(
                        "out of device memory ({} of {} bytes in use)",
                        self.ledger.live_bytes(),
                        limit
                    ),
                });
            }
        }

        self.ledger.acquire(bytes);
        let storage = Arc::new(Allocation {
            data: RwLock::new(vec![0.0; count as usize * kind.components()]),
            bytes,
            ledger: self.ledger.clone(),
        });

        Ok(CpuBuffer {
            kind,
            len: count,
            storage,
        })
    }

    fn upload(&mut self, buffer: &CpuBuffer, bytes: &[u8]) -> SimResult<()> {
        if bytes.len() as u64 != buffer.byte_size() {
            return Err(SimulationError::execution(
                "upload",
                format!(
                    "{} buffer holds {} bytes, got {}",
                    buffer.kind.label(),
                    buffer.byte_size(),
                    bytes.len()
                ),
            ));
        }
        let mut data = buffer.storage.write()?;
        bytemuck::cast_slice_mut::<f32, u8>(&mut data[..]).copy_from_slice(bytes);
        Ok(())
    }

    fn bind(&mut self, kernel: &mut CpuKernel, buffers: &DeviceBuffers<CpuBuffer>) -> SimResult<()> {
        kernel.bindings = Some(CpuBindings {
            acceleration: buffers.acceleration.storage.clone(),
            velocity: buffers.velocity.storage.clone(),
            position: buffers.position.storage.clone(),
            mass: buffers.mass.storage.clone(),
            result: buffers.result.storage.clone(),
            len: buffers.len(),
        });
        Ok(())
    }

    fn write_params(&mut self, params: &KernelParams) -> SimResult<()> {
        self.params = Some(*params);
        Ok(())
    }

    fn dispatch(&mut self, kernel: &CpuKernel, count: u32) -> SimResult<()> {
        self.dispatches += 1;
        if let Some(from) = self.faults.fail_dispatch_from {
            if self.dispatches >= from {
                return Err(SimulationError::execution(
                    "dispatch",
                    format!("injected failure in `{}`", kernel.entry_point),
                ));
            }
        }

        let bindings = kernel.bindings.as_ref().ok_or_else(|| {
            SimulationError::execution(
                "dispatch",
                format!("kernel `{}` has no buffers bound", kernel.entry_point),
            )
        })?;
        let params = self.params.as_ref().ok_or_else(|| {
            SimulationError::execution("dispatch", "no parameters written before dispatch")
        })?;

        // Indices past the bound buffers or the uniform count are skipped, as on the GPU
        let count = count.min(bindings.len).min(params.ball_count()) as usize;
        match kernel.kind {
            CpuKernelKind::Integrate => Self::run_integrate(bindings, params, count),
            CpuKernelKind::Commit => Self::run_commit(bindings, count),
        }
    }

    fn begin_readback(&mut self, buffer: &CpuBuffer) -> SimResult<CpuReadback> {
        if buffer.kind.components() != 3 {
            return Err(SimulationError::execution(
                "readback",
                format!("{} buffer is not a vec3 buffer", buffer.kind.label()),
            ));
        }
        self.readbacks += 1;
        let data = buffer.storage.read()?.clone();
        Ok(CpuReadback { data })
    }

    fn finish_readback(&mut self, readback: CpuReadback, out: &mut [Vec3]) -> SimResult<()> {
        if self.faults.fail_readbacks {
            return Err(SimulationError::execution("readback", "injected failure"));
        }
        if readback.data.len() != out.len() * 3 {
            return Err(SimulationError::execution(
                "readback",
                format!(
                    "readback holds {} elements, destination holds {}",
                    readback.data.len() / 3,
                    out.len()
                ),
            ));
        }
        bytemuck::cast_slice_mut::<Vec3, f32>(out).copy_from_slice(&readback.data);
        Ok(())
    }
}
