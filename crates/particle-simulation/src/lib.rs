//! # Ball Attractor Simulation Engine
//!
//! Compute-driven ball simulation around a single attractor: per-ball device
//! buffers, an integration and a commit kernel, and a one-tick-lag readback
//! pipeline feeding a renderer. Runs on wgpu or on the rayon CPU backend.

pub mod buffers;
pub mod config;
pub mod cpu;
pub mod device;
pub mod error;
pub mod gpu;
pub mod kernels;
pub mod params;
pub mod pipeline;
pub mod simulation;

pub use buffers::DeviceBuffers;
pub use config::*;
pub use cpu::{CpuDevice, CpuKernelKind, DeviceLedger, FaultPlan};
pub use device::{BufferKind, ComputeDevice, DeviceBuffer, WORKGROUP_SIZE};
pub use error::*;
pub use gpu::{WgpuDevice, ATTRACTOR_SHADER};
pub use params::*;
pub use simulation::*;
