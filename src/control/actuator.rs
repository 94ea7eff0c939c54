//! actuator.rs
//! Manipulated variable → physical command.
//!
//! Two actuation styles, picked per deployment: a valve relay driven
//! bang-bang off the sign of the MV, or a DAC code derived from a configured
//! voltage map. Codes are always saturated into `[0, max_code]`; an
//! out-of-range MV clamps, it never errors.

use serde::{Deserialize, Serialize};

/// MV (volts or watts, per deployment) → heater voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VoltageMap {
    /// Straight gain, volts per MV unit.
    Linear { volts_per_unit: f64 },
    /// Resistive-heater power command: `V = sqrt(MV * R)`.
    SqrtPower { resistance: f64 },
}

impl VoltageMap {
    fn volts(&self, mv: f64) -> f64 {
        match *self {
            VoltageMap::Linear { volts_per_unit } => mv * volts_per_unit,
            VoltageMap::SqrtPower { resistance } => (mv.max(0.0) * resistance).sqrt(),
        }
    }
}

/// Continuous output stage: voltage map plus the DAC electrical limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalogOutput {
    pub map: VoltageMap,
    /// Supply ceiling; mapped voltages are clamped here first.
    pub v_max: f64,
    /// DAC reference voltage (full-scale code).
    pub v_ref: f64,
    pub max_code: u16,
}

impl AnalogOutput {
    /// Mapped, supply-clamped output voltage for an MV.
    pub fn voltage(&self, mv: f64) -> f64 {
        self.map.volts(mv).clamp(0.0, self.v_max)
    }

    /// DAC code for an MV. Saturates at the code limits, never wraps.
    pub fn code(&self, mv: f64) -> u16 {
        let max = f64::from(self.max_code);
        let code = self.voltage(mv) / self.v_ref * max;
        code.clamp(0.0, max).round() as u16
    }
}

/// Actuation style, selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActuatorMode {
    /// Bang-bang valve relay: `MV > 0` closes the valve.
    Relay,
    Analog(AnalogOutput),
}

/// One physical command, handed to the actuator port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    Relay(bool),
    Code(u16),
}

impl ActuatorMode {
    /// Derive the command for the latest MV.
    pub fn command(&self, mv: f64) -> ActuatorCommand {
        match self {
            ActuatorMode::Relay => ActuatorCommand::Relay(mv > 0.0),
            ActuatorMode::Analog(out) => ActuatorCommand::Code(out.code(mv)),
        }
    }

    /// Command issued on every exit path: valve open, heater off.
    pub fn safe_command(&self) -> ActuatorCommand {
        match self {
            ActuatorMode::Relay => ActuatorCommand::Relay(false),
            ActuatorMode::Analog(_) => ActuatorCommand::Code(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dac() -> AnalogOutput {
        AnalogOutput {
            map: VoltageMap::Linear { volts_per_unit: 1.0 },
            v_max: 3.3,
            v_ref: 3.3,
            max_code: 4095,
        }
    }

    #[test]
    fn zero_voltage_is_code_zero() {
        assert_eq!(dac().code(0.0), 0);
    }

    #[test]
    fn full_scale_voltage_is_max_code() {
        assert_eq!(dac().code(3.3), 4095);
    }

    #[test]
    fn voltage_above_supply_clamps_to_max_code() {
        assert_eq!(dac().code(500.0), 4095);
    }

    #[test]
    fn negative_mv_clamps_to_zero() {
        assert_eq!(dac().code(-7.0), 0);
    }

    #[test]
    fn heater_preset_math() {
        // 36 V supply scaled onto a 0-5 V command, 12-bit DAC at 3.3 V ref.
        let out = AnalogOutput {
            map: VoltageMap::Linear { volts_per_unit: 5.0 / 36.0 },
            v_max: 36.0,
            v_ref: 3.3,
            max_code: 4095,
        };
        let v = 22.5 * 5.0 / 36.0;
        assert!((out.voltage(22.5) - v).abs() < 1e-12);
        assert_eq!(out.code(22.5), (v / 3.3 * 4095.0).round() as u16);
    }

    #[test]
    fn sqrt_map_converts_power_commands() {
        let map = VoltageMap::SqrtPower { resistance: 16.0 };
        assert!((map.volts(4.0) - 8.0).abs() < 1e-12);
        // Negative power commands floor at zero volts.
        assert_eq!(map.volts(-3.0), 0.0);
    }

    #[test]
    fn relay_threshold_is_sign_of_mv() {
        assert_eq!(ActuatorMode::Relay.command(0.4), ActuatorCommand::Relay(true));
        assert_eq!(ActuatorMode::Relay.command(0.0), ActuatorCommand::Relay(false));
        assert_eq!(ActuatorMode::Relay.command(-1.2), ActuatorCommand::Relay(false));
    }

    #[test]
    fn safe_commands_release_the_plant() {
        assert_eq!(ActuatorMode::Relay.safe_command(), ActuatorCommand::Relay(false));
        assert_eq!(
            ActuatorMode::Analog(dac()).safe_command(),
            ActuatorCommand::Code(0)
        );
    }
}
