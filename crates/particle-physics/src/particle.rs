//! Ball state and the ranges it is spawned from

use glam::Vec3;
use rand::Rng;
use std::fmt;

/// Closed interval on a single axis. A simulation box axis must contain the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: f32,
    pub max: f32,
}

impl AxisRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Symmetric range `[-extent, extent]`
    pub const fn symmetric(extent: f32) -> Self {
        Self {
            min: -extent,
            max: extent,
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }

    /// `min <= 0 <= max`, both finite
    pub fn straddles_origin(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= 0.0 && self.max >= 0.0
    }
}

/// Axis-aligned simulation box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds3 {
    pub x: AxisRange,
    pub y: AxisRange,
    pub z: AxisRange,
}

impl Bounds3 {
    pub const fn new(x: AxisRange, y: AxisRange, z: AxisRange) -> Self {
        Self { x, y, z }
    }

    pub const fn cube(extent: f32) -> Self {
        Self::new(
            AxisRange::symmetric(extent),
            AxisRange::symmetric(extent),
            AxisRange::symmetric(extent),
        )
    }

    pub fn min(&self) -> Vec3 {
        Vec3::new(self.x.min, self.y.min, self.z.min)
    }

    pub fn max(&self) -> Vec3 {
        Vec3::new(self.x.max, self.y.max, self.z.max)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        self.x.contains(point.x) && self.y.contains(point.y) && self.z.contains(point.z)
    }

    pub fn axes(&self) -> [(&'static str, AxisRange); 3] {
        [("x", self.x), ("y", self.y), ("z", self.z)]
    }
}

/// Range a ball's mass is drawn from. `min == max` gives every ball the same mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassRange {
    pub min: f32,
    pub max: f32,
}

impl MassRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub const fn fixed(mass: f32) -> Self {
        Self {
            min: mass,
            max: mass,
        }
    }
}

/// Everything `BallState::initialize` samples from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnRanges {
    /// Each velocity component is drawn from `[-velocity_range, velocity_range]`
    pub velocity_range: f32,
    /// Each position component is drawn from `[-position_range, position_range]`
    pub position_range: f32,
    pub mass: MassRange,
}

/// Reasons a ball population cannot be spawned
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnError {
    EmptyPopulation,
    InvertedMassRange { min: f32, max: f32 },
    InvalidRange { name: &'static str, value: f32 },
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::EmptyPopulation => write!(f, "ball count must be greater than zero"),
            SpawnError::InvertedMassRange { min, max } => {
                write!(f, "mass range is inverted (min {min} > max {max})")
            }
            SpawnError::InvalidRange { name, value } => {
                write!(f, "{name} must be finite and non-negative (got {value})")
            }
        }
    }
}

impl std::error::Error for SpawnError {}

impl SpawnRanges {
    pub fn validate(&self) -> Result<(), SpawnError> {
        for (name, value) in [
            ("velocity range", self.velocity_range),
            ("position range", self.position_range),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SpawnError::InvalidRange { name, value });
            }
        }
        if !self.mass.min.is_finite() || !self.mass.max.is_finite() {
            return Err(SpawnError::InvalidRange {
                name: "mass range",
                value: if self.mass.min.is_finite() {
                    self.mass.max
                } else {
                    self.mass.min
                },
            });
        }
        if self.mass.min > self.mass.max {
            return Err(SpawnError::InvertedMassRange {
                min: self.mass.min,
                max: self.mass.max,
            });
        }
        Ok(())
    }
}

/// Host-side ball arrays (structure of arrays, one slot per ball index).
///
/// All four arrays have the same length for the lifetime of the state; there is
/// no way to add or remove balls after `initialize`.
#[derive(Debug, Clone)]
pub struct BallState {
    accelerations: Vec<Vec3>,
    velocities: Vec<Vec3>,
    positions: Vec<Vec3>,
    masses: Vec<f32>,
}

impl BallState {
    /// Spawn `count` balls with uniformly random velocity, position and mass.
    /// Accelerations start at zero.
    pub fn initialize<R: Rng + ?Sized>(
        count: usize,
        ranges: &SpawnRanges,
        rng: &mut R,
    ) -> Result<Self, SpawnError> {
        if count == 0 {
            return Err(SpawnError::EmptyPopulation);
        }
        ranges.validate()?;

        let mut velocities = Vec::with_capacity(count);
        let mut positions = Vec::with_capacity(count);
        let mut masses = Vec::with_capacity(count);

        for _ in 0..count {
            velocities.push(random_vec3(rng, ranges.velocity_range));
            positions.push(random_vec3(rng, ranges.position_range));
            masses.push(rng.random_range(ranges.mass.min..=ranges.mass.max));
        }

        Ok(Self {
            accelerations: vec![Vec3::ZERO; count],
            velocities,
            positions,
            masses,
        })
    }

    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    pub fn accelerations(&self) -> &[Vec3] {
        &self.accelerations
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn masses(&self) -> &[f32] {
        &self.masses
    }

    /// Uniform visual scale per ball; a ball is drawn as large as it is heavy.
    pub fn scales(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.masses.iter().map(|&m| Vec3::splat(m))
    }
}

fn random_vec3<R: Rng + ?Sized>(rng: &mut R, range: f32) -> Vec3 {
    Vec3::new(
        rng.random_range(-range..=range),
        rng.random_range(-range..=range),
        rng.random_range(-range..=range),
    )
}
