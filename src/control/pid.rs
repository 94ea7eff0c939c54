//! pid.rs
//! PID control law for one regulation axis.
//!
//! Discrete PID with a minimum sample interval: calls arriving faster than
//! the interval return the previous manipulated variable unchanged, so a
//! tight loop cannot inflate the integral. The output clamp freezes integral
//! accumulation in the saturating direction; accumulation that backs out of
//! saturation is still allowed.
//!
//! One controller instance owns one axis. Not shared across threads.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Proportional, integral, derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Controller configuration. Serializable so a deployment can round-trip its
/// tuning alongside the channel table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidSettings {
    pub gains: PidGains,
    pub setpoint: f64,
    /// Updates closer together than this are no-ops.
    pub sample_interval: Duration,
    /// Optional `(low, high)` clamp on the manipulated variable.
    pub output_limits: Option<(f64, f64)>,
    /// Optional symmetric clamp on the raw integral accumulator.
    pub integral_limit: Option<f64>,
}

/// Stateful controller: owns the integral accumulator, the previous error and
/// the previous sample time for one control axis.
#[derive(Debug, Clone)]
pub struct PidController {
    settings: PidSettings,
    integral: f64,
    prev_error: f64,
    prev_update: Option<Instant>,
    last_output: f64,
}

impl PidController {
    pub fn new(settings: PidSettings) -> Self {
        Self {
            settings,
            integral: 0.0,
            prev_error: 0.0,
            prev_update: None,
            last_output: 0.0,
        }
    }

    #[inline]
    pub fn setpoint(&self) -> f64 {
        self.settings.setpoint
    }

    #[inline]
    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    /// Compute the manipulated variable for one measurement taken at `now`.
    ///
    /// The first call establishes the timing baseline: with no previous
    /// sample there is no dt, so only the proportional term applies.
    pub fn update(&mut self, measurement: f64, now: Instant) -> f64 {
        let error = self.settings.setpoint - measurement;

        let Some(prev) = self.prev_update else {
            self.prev_update = Some(now);
            self.prev_error = error;
            self.last_output = self.clamp_output(self.settings.gains.kp * error);
            return self.last_output;
        };

        let dt = now.saturating_duration_since(prev).as_secs_f64();
        if dt < self.settings.sample_interval.as_secs_f64() {
            // Too soon: no state change, previous MV stands.
            return self.last_output;
        }

        let mut integral = self.integral + error * dt;
        if let Some(limit) = self.settings.integral_limit {
            integral = integral.clamp(-limit.abs(), limit.abs());
        }
        // dt can be zero when the configured interval is zero.
        let derivative = if dt > 0.0 {
            (error - self.prev_error) / dt
        } else {
            0.0
        };

        let PidGains { kp, ki, kd } = self.settings.gains;
        let raw = kp * error + ki * integral + kd * derivative;
        let output = self.clamp_output(raw);

        // Anti-windup: while the clamp is engaged, only accept integral
        // movement that heads back out of saturation.
        let saturated_high = output < raw && error > 0.0;
        let saturated_low = output > raw && error < 0.0;
        if !(saturated_high || saturated_low) {
            self.integral = integral;
        }

        self.prev_error = error;
        self.prev_update = Some(now);
        self.last_output = output;
        output
    }

    #[inline]
    fn clamp_output(&self, raw: f64) -> f64 {
        match self.settings.output_limits {
            Some((low, high)) => raw.clamp(low, high),
            None => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(kp: f64, ki: f64, kd: f64, setpoint: f64) -> PidSettings {
        PidSettings {
            gains: PidGains { kp, ki, kd },
            setpoint,
            sample_interval: Duration::from_millis(100),
            output_limits: None,
            integral_limit: None,
        }
    }

    #[test]
    fn first_call_is_proportional_only() {
        let mut pid = PidController::new(settings(0.12, 0.5, 0.9, -110.0));
        let mv = pid.update(-100.0, Instant::now());
        assert!((mv - 0.12 * -10.0).abs() < 1e-12);
    }

    #[test]
    fn calls_within_sample_interval_are_no_ops() {
        let mut pid = PidController::new(settings(1.0, 0.5, 0.0, 10.0));
        let t0 = Instant::now();
        let first = pid.update(4.0, t0 + Duration::from_millis(200));
        let second = pid.update(7.5, t0 + Duration::from_millis(250));
        assert_eq!(first, second);
        // State resumes from the original baseline once the interval passes.
        let third = pid.update(7.5, t0 + Duration::from_millis(400));
        assert_ne!(second, third);
    }

    #[test]
    fn proportional_only_tracks_error_exactly() {
        let mut pid = PidController::new(settings(0.12, 0.0, 0.0, -110.0));
        let t0 = Instant::now();
        let mvs: Vec<f64> = [-100.0, -105.0, -110.0]
            .iter()
            .enumerate()
            .map(|(i, &m)| pid.update(m, t0 + Duration::from_secs(i as u64 + 1)))
            .collect();
        assert!((mvs[0] - -1.2).abs() < 1e-12);
        assert!((mvs[1] - -0.6).abs() < 1e-12);
        assert!(mvs[2].abs() < 1e-12);
    }

    #[test]
    fn integral_drives_steady_state_error_to_zero() {
        let mut pid = PidController::new(settings(0.0, 0.3, 0.0, 50.0));
        let t0 = Instant::now();
        // Hold the measurement at the setpoint: integral must stop moving and
        // the MV settle to a constant.
        let mut last = 0.0;
        for i in 1..200 {
            last = pid.update(50.0, t0 + Duration::from_secs(i));
        }
        let settled = pid.update(50.0, t0 + Duration::from_secs(200));
        assert!((settled - last).abs() < 1e-12);
    }

    #[test]
    fn integral_freezes_while_saturated() {
        let mut s = settings(0.0, 1.0, 0.0, 100.0);
        s.output_limits = Some((0.0, 5.0));
        let mut pid = PidController::new(s);
        let t0 = Instant::now();
        pid.update(0.0, t0);
        // Large positive error saturates the output high; the accumulator
        // must not keep growing while pinned there.
        let a = pid.update(0.0, t0 + Duration::from_secs(1));
        let integral_after_first = pid.integral;
        let b = pid.update(0.0, t0 + Duration::from_secs(100));
        assert_eq!(a, 5.0);
        assert_eq!(b, 5.0);
        assert_eq!(pid.integral, integral_after_first);
    }

    #[test]
    fn output_clamped_to_limits() {
        let mut s = settings(10.0, 0.0, 0.0, 0.0);
        s.output_limits = Some((-2.0, 2.0));
        let mut pid = PidController::new(s);
        assert_eq!(pid.update(-100.0, Instant::now()), 2.0);
    }
}
