//! # Particle Physics
//!
//! Host-side ball state and the reference force/integration math for a
//! population of balls pulled toward a single attractor inside a box.

pub mod constants;
pub mod forces;
pub mod particle;

pub use constants::*;
pub use forces::*;
pub use particle::*;
