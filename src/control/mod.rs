//! The closed-loop regulation core: calibration, PID, actuation mapping,
//! the rolling ledger and the fixed-period scheduler.

pub mod actuator;
pub mod calibration;
pub mod ledger;
pub mod pid;
pub mod scheduler;
