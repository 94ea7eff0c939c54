//! Configuration surface and run telemetry.

pub mod config;
pub mod metrics;
