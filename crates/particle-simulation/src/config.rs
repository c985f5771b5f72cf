//! Simulation configuration and per-tick parameter updates

use glam::Vec3;
use particle_physics::*;

use crate::error::{SimResult, SimulationError};

/// Names of the two kernel entry points in the device program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelEntryPoints {
    pub integrate: String,
    pub commit: String,
}

impl Default for KernelEntryPoints {
    fn default() -> Self {
        Self {
            integrate: "integrate".to_string(),
            commit: "commit".to_string(),
        }
    }
}

/// When the renderer sees a dispatch's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadbackMode {
    /// Render the previous tick's result while the current dispatch runs (one frame behind)
    #[default]
    Pipelined,
    /// Wait for the current tick's result before rendering (no lag, stalls every tick)
    Blocking,
}

/// Everything needed to start a simulation run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub ball_count: u32,
    pub spawn: SpawnRanges,

    pub gravity: f32,
    /// Per-step velocity multiplier (1.0 = no damping)
    pub friction: f32,
    pub border_force: f32,
    pub bounds: Bounds3,

    pub attractor_position: Vec3,
    pub attractor_mass: f32,
    pub time_step: f32,

    pub entry_points: KernelEntryPoints,
    pub readback_mode: ReadbackMode,
    /// Fixed seed for reproducible spawns; `None` uses the thread RNG
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ball_count: 4096,
            spawn: SpawnRanges {
                velocity_range: DEFAULT_VELOCITY_RANGE,
                position_range: DEFAULT_POSITION_RANGE,
                mass: MassRange::new(DEFAULT_MASS_MIN, DEFAULT_MASS_MAX),
            },
            gravity: DEFAULT_GRAVITY,
            friction: DEFAULT_FRICTION,
            border_force: DEFAULT_BORDER_FORCE,
            bounds: Bounds3::cube(DEFAULT_BOUNDS_EXTENT),
            attractor_position: Vec3::ZERO,
            attractor_mass: DEFAULT_ATTRACTOR_MASS,
            time_step: DEFAULT_TIME_STEP,
            entry_points: KernelEntryPoints::default(),
            readback_mode: ReadbackMode::default(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.ball_count == 0 {
            return Err(SpawnError::EmptyPopulation.into());
        }
        self.spawn.validate()?;
        self.step_params().validate()?;
        if self.entry_points.integrate.is_empty() || self.entry_points.commit.is_empty() {
            return Err(SimulationError::invalid_config(
                "kernel entry point names must not be empty",
            ));
        }
        Ok(())
    }

    /// Initial per-step parameters
    pub fn step_params(&self) -> StepParams {
        StepParams {
            attractor_position: self.attractor_position,
            attractor_mass: self.attractor_mass,
            gravity: self.gravity,
            friction: self.friction,
            border_force: self.border_force,
            bounds: self.bounds,
            time_step: self.time_step,
        }
    }
}

/// Checks shared by the initial configuration and every tick's update
pub(crate) trait ValidateParams {
    fn validate(&self) -> SimResult<()>;
}

impl ValidateParams for StepParams {
    fn validate(&self) -> SimResult<()> {
        for (name, value) in [
            ("gravity", self.gravity),
            ("friction", self.friction),
            ("border force", self.border_force),
            ("attractor mass", self.attractor_mass),
        ] {
            if !value.is_finite() {
                return Err(SimulationError::invalid_config(format!(
                    "{name} must be finite (got {value})"
                )));
            }
        }
        if !self.attractor_position.is_finite() {
            return Err(SimulationError::invalid_config(
                "attractor position must be finite",
            ));
        }
        if !self.time_step.is_finite() || self.time_step < 0.0 {
            return Err(SimulationError::invalid_config(format!(
                "time step must be finite and non-negative (got {})",
                self.time_step
            )));
        }
        for (axis, range) in self.bounds.axes() {
            if !range.straddles_origin() {
                return Err(SimulationError::invalid_config(format!(
                    "bounds on {axis} must satisfy min <= 0 <= max (got {}..{})",
                    range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

/// Parameters that may change between ticks. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParamUpdate {
    pub gravity: Option<f32>,
    pub friction: Option<f32>,
    pub border_force: Option<f32>,
    pub attractor_mass: Option<f32>,
    pub bounds: Option<Bounds3>,
    /// Frame-derived timestep; leave `None` for a fixed step
    pub time_step: Option<f32>,
}

impl ParamUpdate {
    /// Apply on top of `current` with a freshly sampled attractor position.
    /// The result is validated; `current` is left alone on error.
    pub(crate) fn apply(&self, current: &StepParams, attractor: Vec3) -> SimResult<StepParams> {
        let next = StepParams {
            attractor_position: attractor,
            attractor_mass: self.attractor_mass.unwrap_or(current.attractor_mass),
            gravity: self.gravity.unwrap_or(current.gravity),
            friction: self.friction.unwrap_or(current.friction),
            border_force: self.border_force.unwrap_or(current.border_force),
            bounds: self.bounds.unwrap_or(current.bounds),
            time_step: self.time_step.unwrap_or(current.time_step),
        };
        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_ball_count_rejected() {
        let config = SimulationConfig {
            ball_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SimulationError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_bounds_must_contain_origin() {
        let mut config = SimulationConfig::default();
        config.bounds.y = AxisRange::new(1.0, 5.0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bounds on y"));
    }

    #[test]
    fn test_empty_entry_point_rejected() {
        let mut config = SimulationConfig::default();
        config.entry_points.commit.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_update_overrides_only_given_fields() {
        let current = SimulationConfig::default().step_params();
        let update = ParamUpdate {
            gravity: Some(2.5),
            time_step: Some(0.01),
            ..Default::default()
        };
        let next = update.apply(&current, Vec3::X).unwrap();

        assert_eq!(next.gravity, 2.5);
        assert_eq!(next.time_step, 0.01);
        assert_eq!(next.attractor_position, Vec3::X);
        assert_eq!(next.friction, current.friction);
        assert_eq!(next.bounds, current.bounds);
    }

    #[test]
    fn test_update_rejects_non_finite_values() {
        let current = SimulationConfig::default().step_params();
        let update = ParamUpdate {
            friction: Some(f32::NAN),
            ..Default::default()
        };
        assert!(update.apply(&current, Vec3::ZERO).is_err());
        assert!(ParamUpdate::default()
            .apply(&current, Vec3::splat(f32::INFINITY))
            .is_err());
    }
}
