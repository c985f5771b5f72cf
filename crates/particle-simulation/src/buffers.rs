//! The device buffer set mirroring the host ball arrays

use particle_physics::BallState;

use crate::device::{BufferKind, ComputeDevice, DeviceBuffer};
use crate::error::SimResult;

/// One device buffer per ball attribute plus the staged result.
///
/// `result` receives the position computed by the integration kernel;
/// `position` is only overwritten by the commit kernel.
#[derive(Debug)]
pub struct DeviceBuffers<B> {
    pub acceleration: B,
    pub velocity: B,
    pub position: B,
    pub mass: B,
    pub result: B,
}

impl<B: DeviceBuffer> DeviceBuffers<B> {
    /// Allocate all five buffers sized to `count`.
    ///
    /// If any allocation fails, the ones already made are dropped (and released)
    /// before the error is returned.
    pub fn allocate<D>(device: &mut D, count: u32) -> SimResult<Self>
    where
        D: ComputeDevice<Buffer = B>,
    {
        let acceleration = device.create_buffer(BufferKind::Acceleration, count)?;
        let velocity = device.create_buffer(BufferKind::Velocity, count)?;
        let position = device.create_buffer(BufferKind::Position, count)?;
        let mass = device.create_buffer(BufferKind::Mass, count)?;
        let result = device.create_buffer(BufferKind::Result, count)?;

        let buffers = Self {
            acceleration,
            velocity,
            position,
            mass,
            result,
        };
        log::debug!(
            "Allocated device buffer set: {} balls, {} bytes",
            count,
            buffers.total_bytes()
        );

        Ok(buffers)
    }

    /// Copy the host state into every buffer. `result` starts as the initial positions.
    pub fn upload_state<D>(&self, device: &mut D, balls: &BallState) -> SimResult<()>
    where
        D: ComputeDevice<Buffer = B>,
    {
        device.upload(&self.acceleration, bytemuck::cast_slice(balls.accelerations()))?;
        device.upload(&self.velocity, bytemuck::cast_slice(balls.velocities()))?;
        device.upload(&self.position, bytemuck::cast_slice(balls.positions()))?;
        device.upload(&self.mass, bytemuck::cast_slice(balls.masses()))?;
        device.upload(&self.result, bytemuck::cast_slice(balls.positions()))?;
        Ok(())
    }

    pub fn get(&self, kind: BufferKind) -> &B {
        match kind {
            BufferKind::Acceleration => &self.acceleration,
            BufferKind::Velocity => &self.velocity,
            BufferKind::Position => &self.position,
            BufferKind::Mass => &self.mass,
            BufferKind::Result => &self.result,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &B> {
        BufferKind::ALL.into_iter().map(move |kind| self.get(kind))
    }

    /// Ball count shared by every buffer
    pub fn len(&self) -> u32 {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.iter().map(DeviceBuffer::byte_size).sum()
    }
}
