//! config.rs
//! Deployment configuration for the control engine.
//!
//! One engine, parameterized: the per-rig script variants differ only in
//! channel table, actuation style, loop period and averaging window, so each
//! rig is a `LoopConfig` value. Two presets cover the deployed rigs; anything
//! else is a hand-built config.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::actuator::{ActuatorMode, AnalogOutput, VoltageMap};
use crate::control::calibration::Calibration;
use crate::control::pid::{PidGains, PidSettings};

/// Rejected configurations never reach the running loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no channels configured")]
    NoChannels,
    #[error("control channel index {0} out of range")]
    ControlChannelOutOfRange(usize),
    #[error("loop period must be positive")]
    ZeroPeriod,
    #[error("averaging window must be at least 1")]
    ZeroWindow,
    #[error("output limits inverted: low {low} >= high {high}")]
    InvertedLimits { low: f64, high: f64 },
    #[error("analog output bounds invalid: {0}")]
    BadAnalogBounds(&'static str),
}

/// One measurement point: a stable name plus its calibration constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub calibration: Calibration,
}

impl ChannelSpec {
    pub fn new(name: &str, calibration: Calibration) -> Self {
        Self {
            name: name.to_string(),
            calibration,
        }
    }
}

/// Full configuration surface for one regulation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Soft-floor wall-clock period per iteration.
    pub period: Duration,
    /// Iterations per checkpoint average; ledger holds `itt_len + 1`.
    pub itt_len: usize,
    pub channels: Vec<ChannelSpec>,
    /// Index of the channel fed to the PID.
    pub control_channel: usize,
    pub pid: PidSettings,
    pub actuator: ActuatorMode,
    /// Consecutive transient read failures tolerated before the loop treats
    /// the sensor as dead and stops.
    pub max_transient_streak: u32,
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.control_channel >= self.channels.len() {
            return Err(ConfigError::ControlChannelOutOfRange(self.control_channel));
        }
        if self.period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.itt_len == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if let Some((low, high)) = self.pid.output_limits {
            if low >= high {
                return Err(ConfigError::InvertedLimits { low, high });
            }
        }
        if let ActuatorMode::Analog(out) = &self.actuator {
            if out.v_max <= 0.0 {
                return Err(ConfigError::BadAnalogBounds("v_max must be positive"));
            }
            if out.v_ref <= 0.0 {
                return Err(ConfigError::BadAnalogBounds("v_ref must be positive"));
            }
            if out.max_code == 0 {
                return Err(ConfigError::BadAnalogBounds("max_code must be non-zero"));
            }
        }
        Ok(())
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// N2 valve rig: three calibrated probes plus the flow meter, bang-bang
    /// relay on the probe tip.
    pub fn relay_valve() -> Self {
        Self {
            period: Duration::from_millis(200),
            itt_len: 15,
            channels: vec![
                ChannelSpec::new(
                    "Tip",
                    Calibration::Linear {
                        raw_offset: 159.6,
                        reference_range: 169.3,
                        raw_range: 179.8,
                        output_offset: 150.7,
                    },
                ),
                ChannelSpec::new(
                    "Ceramic",
                    Calibration::Linear {
                        raw_offset: 159.9,
                        reference_range: 169.5,
                        raw_range: 179.7,
                        output_offset: 150.9,
                    },
                ),
                ChannelSpec::new(
                    "Flange",
                    Calibration::Linear {
                        raw_offset: 159.6,
                        reference_range: 169.1,
                        raw_range: 1797.0,
                        output_offset: 149.2,
                    },
                ),
                ChannelSpec::new("N2Flow", Calibration::Identity),
            ],
            control_channel: 0,
            pid: PidSettings {
                gains: PidGains {
                    kp: 0.2 * 0.6,
                    ki: 1.2 * 0.2 / 60.0,
                    kd: 3.0 * 0.2 * 60.0 / 40.0,
                },
                setpoint: -130.0,
                sample_interval: Duration::from_millis(250),
                output_limits: None,
                integral_limit: Some(20.0),
            },
            actuator: ActuatorMode::Relay,
            max_transient_streak: 25,
        }
    }

    /// Heater rig: four probes, 12-bit DAC driving the supply, PID on the
    /// back heat-exchanger channel. MV is capped at 22.5 so the supply never
    /// puts more than 24 V across the heaters.
    pub fn dac_heater() -> Self {
        Self {
            period: Duration::from_secs(1),
            itt_len: 6,
            channels: vec![
                ChannelSpec::new("ColdHead", Calibration::Identity),
                ChannelSpec::new(
                    "HeatExF",
                    Calibration::Linear {
                        raw_offset: 174.0,
                        reference_range: 179.0,
                        raw_range: 184.0,
                        output_offset: 161.0,
                    },
                ),
                ChannelSpec::new(
                    "HeatExB",
                    Calibration::Linear {
                        raw_offset: 117.0,
                        reference_range: 126.0,
                        raw_range: 121.0,
                        output_offset: 108.0,
                    },
                ),
                ChannelSpec::new("Chamber", Calibration::Offset(7.6)),
            ],
            control_channel: 2,
            pid: PidSettings {
                gains: PidGains {
                    kp: 0.2 * 0.6,
                    ki: 1.2 * 0.2 / 60.0,
                    kd: 3.0 * 0.2 * 60.0 / 40.0,
                },
                setpoint: -110.0,
                sample_interval: Duration::from_secs(1),
                output_limits: Some((0.0, 22.5)),
                integral_limit: Some(20.0),
            },
            actuator: ActuatorMode::Analog(AnalogOutput {
                map: VoltageMap::Linear {
                    volts_per_unit: 5.0 / 36.0,
                },
                v_max: 36.0,
                v_ref: 3.3,
                max_code: 4095,
            }),
            max_transient_streak: 25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        LoopConfig::relay_valve().validate().unwrap();
        LoopConfig::dac_heater().validate().unwrap();
    }

    #[test]
    fn rejects_bad_control_channel() {
        let mut cfg = LoopConfig::relay_valve();
        cfg.control_channel = 99;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ControlChannelOutOfRange(99))
        ));
    }

    #[test]
    fn rejects_empty_channel_table() {
        let mut cfg = LoopConfig::dac_heater();
        cfg.channels.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::NoChannels)));
    }

    #[test]
    fn rejects_inverted_output_limits() {
        let mut cfg = LoopConfig::dac_heater();
        cfg.pid.output_limits = Some((5.0, 1.0));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvertedLimits { .. })
        ));
    }

    #[test]
    fn rejects_zero_window() {
        let mut cfg = LoopConfig::relay_valve();
        cfg.itt_len = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroWindow)));
    }
}
