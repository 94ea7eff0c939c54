//! sim.rs
//! Simulated rig: a small first-order thermal plant with noisy probes and a
//! valve/DAC port, so either preset runs end to end on a desk.
//!
//! Each probe channel carries its own state pulled toward ambient, with the
//! actuation drive pulling toward the driven temperature (LN2 bath for the
//! valve rig, heater ceiling for the heater rig). Flow channels report the
//! meter full-scale reading times the current drive.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::random_range;

use crate::control::actuator::ActuatorCommand;
use crate::io::actuator_port::{ActuatorPort, WriteError};
use crate::io::sensor::{ReadError, Sample, SensorSource};

struct PlantInner {
    temps: Vec<f64>,
    ambient: f64,
    driven: f64,
    /// Pole toward ambient, 1/s.
    coupling: f64,
    /// Pole toward `driven` at full drive, 1/s.
    authority: f64,
    drive: f64,
    last_step: Instant,
}

/// Shared plant state: the probes read it, the actuator port drives it.
#[derive(Clone)]
pub struct SimulatedPlant {
    inner: Arc<Mutex<PlantInner>>,
}

impl SimulatedPlant {
    pub fn new(initial: Vec<f64>, ambient: f64, driven: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlantInner {
                temps: initial,
                ambient,
                driven,
                coupling: 0.02,
                authority: 0.15,
                drive: 0.0,
                last_step: Instant::now(),
            })),
        }
    }

    /// Actuation effort in `[0, 1]`.
    pub fn set_drive(&self, drive: f64) {
        let mut inner = self.inner.lock();
        self.step_locked(&mut inner);
        inner.drive = drive.clamp(0.0, 1.0);
    }

    pub fn drive(&self) -> f64 {
        self.inner.lock().drive
    }

    /// Current plant temperature for one channel, advanced to now.
    pub fn temperature(&self, channel: usize) -> f64 {
        let mut inner = self.inner.lock();
        self.step_locked(&mut inner);
        inner.temps.get(channel).copied().unwrap_or(inner.ambient)
    }

    // Euler step since the last observation; dt capped so a stalled sim
    // cannot jump the state.
    fn step_locked(&self, inner: &mut PlantInner) {
        let dt = inner.last_step.elapsed().as_secs_f64().clamp(0.0, 1.0);
        inner.last_step = Instant::now();
        if dt == 0.0 {
            return;
        }
        let (ambient, driven, coupling, authority, drive) = (
            inner.ambient,
            inner.driven,
            inner.coupling,
            inner.authority,
            inner.drive,
        );
        for t in &mut inner.temps {
            let dtemp = coupling * (ambient - *t) + authority * drive * (driven - *t);
            *t += dtemp * dt;
        }
    }
}

/// What one simulated channel measures.
#[derive(Debug, Clone, Copy)]
pub enum ProbeKind {
    /// Plant temperature plus symmetric noise.
    Temperature { noise: f64 },
    /// Flow meter: full-scale reading times the drive, plus noise.
    Flow { full_scale: f64, noise: f64 },
}

/// Sensor source over the simulated plant.
pub struct SimulatedProbes {
    plant: SimulatedPlant,
    kinds: Vec<ProbeKind>,
}

impl SimulatedProbes {
    pub fn new(plant: SimulatedPlant, kinds: Vec<ProbeKind>) -> Self {
        Self { plant, kinds }
    }
}

impl SensorSource for SimulatedProbes {
    fn read(&mut self, channel: usize) -> Result<Sample, ReadError> {
        let kind = self.kinds.get(channel).ok_or_else(|| ReadError::Fault {
            channel: format!("#{}", channel),
            reason: "unknown channel".into(),
        })?;
        let raw_value = match *kind {
            ProbeKind::Temperature { noise } => self.plant.temperature(channel) + jitter(noise),
            ProbeKind::Flow { full_scale, noise } => {
                (full_scale * self.plant.drive() + jitter(noise)).max(0.0)
            }
        };
        Ok(Sample {
            channel,
            raw_value,
            timestamp: Instant::now(),
        })
    }
}

/// Actuator port over the simulated plant. A closed valve cuts the cryogen
/// (zero drive); an open valve flows it (full drive). DAC codes map linearly
/// onto drive.
pub struct SimulatedActuator {
    plant: SimulatedPlant,
    max_code: u16,
    pub last_command: Option<ActuatorCommand>,
}

impl SimulatedActuator {
    pub fn new(plant: SimulatedPlant, max_code: u16) -> Self {
        Self {
            plant,
            max_code,
            last_command: None,
        }
    }
}

impl ActuatorPort for SimulatedActuator {
    fn apply(&mut self, command: ActuatorCommand) -> Result<(), WriteError> {
        let drive = match command {
            ActuatorCommand::Relay(closed) => {
                if closed {
                    0.0
                } else {
                    1.0
                }
            }
            ActuatorCommand::Code(code) => f64::from(code) / f64::from(self.max_code.max(1)),
        };
        self.plant.set_drive(drive);
        self.last_command = Some(command);
        Ok(())
    }
}

// random_range panics on an empty range; noiseless probes are legal.
fn jitter(noise: f64) -> f64 {
    if noise > 0.0 {
        random_range(-noise..noise)
    } else {
        0.0
    }
}

/// Pre-wired valve rig plant (probe tip near ambient, LN2 sink).
pub fn valve_rig(channel_count: usize) -> SimulatedPlant {
    SimulatedPlant::new(vec![20.0; channel_count], 20.0, -196.0)
}

/// Pre-wired heater rig plant (cold head holding the chamber down, heater
/// ceiling well above the setpoint).
pub fn heater_rig(channel_count: usize) -> SimulatedPlant {
    SimulatedPlant::new(vec![-150.0; channel_count], -150.0, 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn full_drive_pulls_toward_driven_temperature() {
        let plant = SimulatedPlant::new(vec![20.0], 20.0, -196.0);
        plant.set_drive(1.0);
        // Step the pole by hand: a second of full cryogen flow must cool.
        {
            let mut inner = plant.inner.lock();
            inner.last_step = Instant::now() - Duration::from_secs(1);
        }
        assert!(plant.temperature(0) < 20.0);
    }

    #[test]
    fn zero_drive_holds_ambient() {
        let plant = SimulatedPlant::new(vec![20.0], 20.0, -196.0);
        {
            let mut inner = plant.inner.lock();
            inner.last_step = Instant::now() - Duration::from_secs(1);
        }
        assert!((plant.temperature(0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn probes_read_near_plant_state() {
        let plant = SimulatedPlant::new(vec![-100.0, -100.0], -100.0, -196.0);
        let mut probes = SimulatedProbes::new(
            plant,
            vec![
                ProbeKind::Temperature { noise: 0.2 },
                ProbeKind::Flow {
                    full_scale: 180.0,
                    noise: 0.5,
                },
            ],
        );
        let t = probes.read(0).unwrap();
        assert!((t.raw_value + 100.0).abs() < 1.0);
        // Zero drive: the flow meter reads noise around zero, floored.
        let f = probes.read(1).unwrap();
        assert!(f.raw_value >= 0.0 && f.raw_value < 1.0);
    }

    #[test]
    fn unknown_channel_is_a_fault() {
        let plant = valve_rig(1);
        let mut probes =
            SimulatedProbes::new(plant, vec![ProbeKind::Temperature { noise: 0.1 }]);
        assert!(matches!(probes.read(7), Err(ReadError::Fault { .. })));
    }

    #[test]
    fn port_maps_commands_onto_drive() {
        let plant = valve_rig(1);
        let mut port = SimulatedActuator::new(plant.clone(), 4095);
        port.apply(ActuatorCommand::Relay(false)).unwrap();
        assert_eq!(plant.drive(), 1.0);
        port.apply(ActuatorCommand::Relay(true)).unwrap();
        assert_eq!(plant.drive(), 0.0);
        port.apply(ActuatorCommand::Code(4095)).unwrap();
        assert!((plant.drive() - 1.0).abs() < 1e-12);
        port.apply(ActuatorCommand::Code(819)).unwrap();
        assert!((plant.drive() - 819.0 / 4095.0).abs() < 1e-12);
    }
}
