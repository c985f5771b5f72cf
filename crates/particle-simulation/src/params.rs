//! Uniform parameter block read by both kernels

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use particle_physics::{AxisRange, Bounds3, StepParams};

/// Matches `Params` in `attractor.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    // xyz: attractor position, w: attractor mass
    pub attractor: [f32; 4],

    // x: gravity, y: friction, z: border force, w: dt
    pub forces: [f32; 4],

    // xyz: lower bound per axis, w: padding
    pub bounds_min: [f32; 4],

    // xyz: upper bound per axis, w: padding
    pub bounds_max: [f32; 4],

    // x: ball count, yzw: padding
    pub counts: [u32; 4],
}

impl KernelParams {
    pub fn new(params: &StepParams, ball_count: u32) -> Self {
        let p = params.attractor_position;
        let min = params.bounds.min();
        let max = params.bounds.max();
        Self {
            attractor: [p.x, p.y, p.z, params.attractor_mass],
            forces: [
                params.gravity,
                params.friction,
                params.border_force,
                params.time_step,
            ],
            bounds_min: [min.x, min.y, min.z, 0.0],
            bounds_max: [max.x, max.y, max.z, 0.0],
            counts: [ball_count, 0, 0, 0],
        }
    }

    pub fn ball_count(&self) -> u32 {
        self.counts[0]
    }

    /// Unpack into the host-side form the reference math takes
    pub fn step_params(&self) -> StepParams {
        StepParams {
            attractor_position: Vec3::new(self.attractor[0], self.attractor[1], self.attractor[2]),
            attractor_mass: self.attractor[3],
            gravity: self.forces[0],
            friction: self.forces[1],
            border_force: self.forces[2],
            time_step: self.forces[3],
            bounds: Bounds3::new(
                AxisRange::new(self.bounds_min[0], self.bounds_max[0]),
                AxisRange::new(self.bounds_min[1], self.bounds_max[1]),
                AxisRange::new(self.bounds_min[2], self.bounds_max[2]),
            ),
        }
    }
}
