//! calibration.rs
//! Raw sensor units → calibrated temperature, per channel.
//!
//! Calibration is data, not code: each channel carries its own transform in
//! configuration, so adding a probe never touches the control loop. The linear
//! form matches the bench-calibration sheets for the MAX3186x probes; channels
//! measured against the reference bath get the full linear correction, the
//! chamber probe only a constant bias, and uncorrected inputs (cold head, flow
//! meter) pass through unchanged.

use serde::{Deserialize, Serialize};

/// Per-channel correction applied to every raw reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Calibration {
    /// `((raw + raw_offset) * reference_range / raw_range) - output_offset`
    Linear {
        raw_offset: f64,
        reference_range: f64,
        raw_range: f64,
        output_offset: f64,
    },
    /// Constant additive bias.
    Offset(f64),
    /// Passthrough for probes needing no correction.
    Identity,
}

impl Calibration {
    /// Apply the channel transform. Total for any finite input; never fails.
    pub fn apply(&self, raw: f64) -> f64 {
        match *self {
            Calibration::Linear {
                raw_offset,
                reference_range,
                raw_range,
                output_offset,
            } => ((raw + raw_offset) * reference_range / raw_range) - output_offset,
            Calibration::Offset(bias) => raw + bias,
            Calibration::Identity => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // Bench constants for the probe tip channel.
    const TIP: Calibration = Calibration::Linear {
        raw_offset: 159.6,
        reference_range: 169.3,
        raw_range: 179.8,
        output_offset: 150.7,
    };

    #[test]
    fn linear_formula_exact() {
        let got = TIP.apply(-100.0);
        let want = ((-100.0 + 159.6) * 169.3 / 179.8) - 150.7;
        assert!((got - want).abs() < 1e-12);
    }

    #[test]
    fn offset_adds_bias() {
        let chamber = Calibration::Offset(7.6);
        assert!((chamber.apply(-102.4) - (-94.8)).abs() < 1e-12);
    }

    #[test]
    fn identity_returns_raw() {
        assert_eq!(Calibration::Identity.apply(-271.3), -271.3);
    }

    proptest! {
        #[test]
        fn linear_is_monotonic(a in -200.0f64..50.0, b in -200.0f64..50.0) {
            prop_assume!(a < b);
            prop_assert!(TIP.apply(a) < TIP.apply(b));
        }
    }
}
