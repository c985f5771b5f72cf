//! Physical defaults for the attractor simulation
//!
//! Values are in simulation units and tuned for a few thousand balls orbiting
//! a single attractor at interactive frame rates.

/// Lower clamp on the ball-attractor distance in the inverse-square law.
/// Keeps the acceleration finite when a ball passes through the attractor.
/// Must match `MIN_DISTANCE` in `attractor.wgsl`.
pub const MIN_DISTANCE: f32 = 0.1;

/// Lower clamp on ball mass when converting the border force to an acceleration.
/// Must match `MIN_MASS` in `attractor.wgsl`.
pub const MIN_MASS: f32 = 1.0e-4;

/// Fixed timestep (50 Hz fixed update)
pub const DEFAULT_TIME_STEP: f32 = 0.02;

/// Gravitational constant
pub const DEFAULT_GRAVITY: f32 = 1.0;

/// Mass of the attractor
pub const DEFAULT_ATTRACTOR_MASS: f32 = 200.0;

/// Per-step velocity multiplier (1.0 = no damping)
pub const DEFAULT_FRICTION: f32 = 0.995;

/// Force pushing out-of-bounds balls back inside
pub const DEFAULT_BORDER_FORCE: f32 = 20.0;

/// Half-extent of the default simulation box on every axis
pub const DEFAULT_BOUNDS_EXTENT: f32 = 50.0;

/// Spawn ranges
pub const DEFAULT_VELOCITY_RANGE: f32 = 2.0;
pub const DEFAULT_POSITION_RANGE: f32 = 25.0;
pub const DEFAULT_MASS_MIN: f32 = 0.5;
pub const DEFAULT_MASS_MAX: f32 = 1.5;
