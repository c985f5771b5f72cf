//! Force and integration math for one ball over one step
//!
//! NOTE: This is the reference implementation. The GPU runs the same math in
//! `attractor.wgsl`; the CPU backend calls `step` directly. Keep the three in sync.

use crate::constants::*;
use crate::particle::Bounds3;
use glam::Vec3;

/// Parameters shared by every ball during one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub attractor_position: Vec3,
    pub attractor_mass: f32,
    pub gravity: f32,
    /// Velocity multiplier applied once per step (1.0 = no damping)
    pub friction: f32,
    pub border_force: f32,
    pub bounds: Bounds3,
    pub time_step: f32,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            attractor_position: Vec3::ZERO,
            attractor_mass: DEFAULT_ATTRACTOR_MASS,
            gravity: DEFAULT_GRAVITY,
            friction: DEFAULT_FRICTION,
            border_force: DEFAULT_BORDER_FORCE,
            bounds: Bounds3::cube(DEFAULT_BOUNDS_EXTENT),
            time_step: DEFAULT_TIME_STEP,
        }
    }
}

/// Output of one integration step for a single ball
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BallStep {
    pub acceleration: Vec3,
    pub velocity: Vec3,
    pub position: Vec3,
}

/// Inverse-square pull toward the attractor
/// a = G * M * normalize(d) / max(|d|, MIN_DISTANCE)²
pub fn gravity_acceleration(position: Vec3, params: &StepParams) -> Vec3 {
    let to_attractor = params.attractor_position - position;
    let distance = to_attractor.length();
    if distance <= 0.0 {
        return Vec3::ZERO;
    }

    let clamped = distance.max(MIN_DISTANCE);
    let magnitude = params.gravity * params.attractor_mass / (clamped * clamped);
    to_attractor / distance * magnitude
}

/// Constant force pushing a ball back inside `bounds` on every axis it has left
pub fn border_force(position: Vec3, bounds: &Bounds3, magnitude: f32) -> Vec3 {
    let below = position.cmplt(bounds.min());
    let above = position.cmpgt(bounds.max());
    Vec3::select(below, Vec3::splat(magnitude), Vec3::ZERO)
        - Vec3::select(above, Vec3::splat(magnitude), Vec3::ZERO)
}

/// Advance one ball by one step (semi-implicit Euler, multiplicative friction)
pub fn step(position: Vec3, velocity: Vec3, mass: f32, params: &StepParams) -> BallStep {
    let border = border_force(position, &params.bounds, params.border_force);
    let acceleration = gravity_acceleration(position, params) + border / mass.max(MIN_MASS);

    let velocity = (velocity + acceleration * params.time_step) * params.friction;
    let position = position + velocity * params.time_step;

    BallStep {
        acceleration,
        velocity,
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::AxisRange;

    fn free_flight() -> StepParams {
        StepParams {
            gravity: 0.0,
            friction: 1.0,
            border_force: 0.0,
            time_step: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_free_flight_keeps_velocity() {
        let params = free_flight();
        let out = step(Vec3::new(1.0, 2.0, 3.0), Vec3::new(2.0, 0.0, -4.0), 1.0, &params);

        assert_eq!(out.velocity, Vec3::new(2.0, 0.0, -4.0));
        assert_eq!(out.position, Vec3::new(2.0, 2.0, 1.0));
        assert_eq!(out.acceleration, Vec3::ZERO);
    }

    #[test]
    fn test_gravity_points_at_attractor() {
        let params = StepParams {
            attractor_position: Vec3::new(10.0, 0.0, 0.0),
            attractor_mass: 2.0,
            gravity: 3.0,
            ..Default::default()
        };
        let a = gravity_acceleration(Vec3::ZERO, &params);

        assert!(a.x > 0.0);
        assert_eq!(a.y, 0.0);
        assert_eq!(a.z, 0.0);
        // G * M / r² = 3 * 2 / 100
        assert!((a.x - 0.06).abs() < 1e-6);
    }

    #[test]
    fn test_gravity_is_clamped_near_attractor() {
        let params = StepParams {
            attractor_position: Vec3::new(1.0e-4, 0.0, 0.0),
            attractor_mass: 1.0,
            gravity: 1.0,
            ..Default::default()
        };
        let a = gravity_acceleration(Vec3::ZERO, &params);
        assert!((a.length() - 1.0 / (MIN_DISTANCE * MIN_DISTANCE)).abs() < 1e-2);

        let at_attractor = StepParams {
            attractor_position: Vec3::ZERO,
            ..params
        };
        assert_eq!(gravity_acceleration(Vec3::ZERO, &at_attractor), Vec3::ZERO);
    }

    #[test]
    fn test_border_force_points_inward() {
        let bounds = Bounds3::new(
            AxisRange::new(-1.0, 1.0),
            AxisRange::new(-2.0, 2.0),
            AxisRange::new(-3.0, 3.0),
        );

        let f = border_force(Vec3::new(1.5, -2.5, 0.0), &bounds, 4.0);
        assert_eq!(f, Vec3::new(-4.0, 4.0, 0.0));

        let inside = border_force(Vec3::new(0.5, 0.0, 3.0), &bounds, 4.0);
        assert_eq!(inside, Vec3::ZERO);
    }

    #[test]
    fn test_border_acceleration_scales_with_magnitude_and_mass() {
        let mut params = free_flight();
        params.bounds = Bounds3::cube(1.0);
        params.border_force = 6.0;

        let out = step(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 2.0, &params);
        assert_eq!(out.acceleration, Vec3::new(0.0, 0.0, -3.0));
        assert!(out.velocity.z < 0.0);
    }

    #[test]
    fn test_friction_damps_velocity() {
        let params = StepParams {
            friction: 0.5,
            ..free_flight()
        };
        let out = step(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0), 1.0, &params);
        assert_eq!(out.velocity, Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(out.position, Vec3::new(1.0, 0.0, 0.0));
    }
}
