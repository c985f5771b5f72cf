//! Error taxonomy for the simulation driver and its device backends.
//!
//! Every failure surfaces synchronously to the caller of `initialize`, `tick`
//! or `shutdown`. Nothing is retried: device failures end the current run.
//!
//! ## Variants
//! * [`SimulationError::InvalidConfiguration`]: bad counts or ranges; the
//!   simulation does not start (or, on a tick, the update is rejected).
//! * [`SimulationError::KernelNotFound`]: a kernel entry point is missing.
//! * [`SimulationError::DeviceAllocationFailed`]: a device buffer could not be
//!   created; buffers created before it are released.
//! * [`SimulationError::DeviceExecutionFailure`]: a dispatch, upload or
//!   readback failed at runtime.
//! * [`SimulationError::AlreadyInitialized`] / [`SimulationError::NotRunning`]:
//!   state machine misuse; no state is mutated.

use std::fmt;

use particle_physics::SpawnError;

use crate::simulation::SimulationState;

pub type SimResult<T> = Result<T, SimulationError>;

#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    InvalidConfiguration {
        reason: String,
    },
    KernelNotFound {
        entry_point: String,
    },
    DeviceAllocationFailed {
        buffer: &'static str,
        bytes: u64,
        reason: String,
    },
    DeviceExecutionFailure {
        operation: &'static str,
        reason: String,
    },
    AlreadyInitialized,
    NotRunning {
        state: SimulationState,
    },
}

impl SimulationError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        SimulationError::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub fn execution(operation: &'static str, reason: impl Into<String>) -> Self {
        SimulationError::DeviceExecutionFailure {
            operation,
            reason: reason.into(),
        }
    }

    /// True for errors that leave the device in an unknown state
    pub fn is_fatal(&self) -> bool {
        matches!(self, SimulationError::DeviceExecutionFailure { .. })
    }
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::InvalidConfiguration { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
            SimulationError::KernelNotFound { entry_point } => {
                write!(f, "kernel entry point `{entry_point}` not found")
            }
            SimulationError::DeviceAllocationFailed {
                buffer,
                bytes,
                reason,
            } => write!(
                f,
                "failed to allocate {buffer} buffer ({bytes} bytes): {reason}"
            ),
            SimulationError::DeviceExecutionFailure { operation, reason } => {
                write!(f, "device {operation} failed: {reason}")
            }
            SimulationError::AlreadyInitialized => {
                write!(f, "simulation is already initialized; call shutdown first")
            }
            SimulationError::NotRunning { state } => {
                write!(f, "operation not valid while simulation is {state:?}")
            }
        }
    }
}

impl std::error::Error for SimulationError {}

impl From<SpawnError> for SimulationError {
    fn from(e: SpawnError) -> Self {
        SimulationError::invalid_config(e.to_string())
    }
}
