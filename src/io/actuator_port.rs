//! actuator_port.rs
//! Actuator sink boundary.
//!
//! Fire-and-forget: the port applies a relay state or DAC code with no
//! acknowledgment. A failed write leaves the physical state unknown; the
//! next iteration's command overwrites it.

use thiserror::Error;

use crate::control::actuator::ActuatorCommand;

#[derive(Debug, Clone, Error)]
#[error("actuator write failed: {0}")]
pub struct WriteError(pub String);

/// External actuator interface (relay driver or DAC).
pub trait ActuatorPort: Send {
    fn apply(&mut self, command: ActuatorCommand) -> Result<(), WriteError>;
}
