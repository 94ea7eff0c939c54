//! metrics.rs
//! Run telemetry and per-channel diagnostics.
//!
//! Two independent paths, kept cheap enough to touch from the control loop:
//! - **Telemetry:** mutex-guarded bounded traces (MV, jitter) plus run
//!   counters, snapshotted for the run summary at shutdown.
//! - **Diagnostics:** lock-free per-channel counters (samples, transient
//!   errors) the loop bumps without blocking.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

pub const MAX_POINTS: usize = 1_000;

/// Appends to a bounded trace; evicts the oldest point at capacity.
#[inline]
pub fn push_capped<T>(buf: &mut VecDeque<T>, val: T) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Live run telemetry, updated once per iteration.
#[derive(Default)]
pub struct Telemetry {
    /// MV trace (last `MAX_POINTS` iterations).
    pub mv: VecDeque<f64>,
    /// Wake-up jitter against the scheduled deadline, microseconds.
    pub jitter_us: VecDeque<u64>,
    pub iterations: u64,
    /// Iterations whose work ran past the loop period.
    pub overruns: u64,
    /// Iterations skipped on transient or malformed reads.
    pub skipped: u64,
}

pub type SharedTelemetry = Arc<Mutex<Telemetry>>;

/// Lock-free per-channel counters. Shared between the loop thread and the
/// shutdown summary without locking.
#[derive(Default)]
pub struct Diagnostics {
    samples: DashMap<String, AtomicU64>,
    transient_errors: DashMap<String, AtomicU64>,
    record_write_failures: AtomicU64,
}

impl Diagnostics {
    pub fn record_sample(&self, channel: &str) {
        self.bump(&self.samples, channel);
    }

    pub fn record_transient_error(&self, channel: &str) {
        self.bump(&self.transient_errors, channel);
    }

    pub fn record_write_failure(&self) {
        self.record_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples(&self, channel: &str) -> u64 {
        self.read(&self.samples, channel)
    }

    pub fn transient_errors(&self, channel: &str) -> u64 {
        self.read(&self.transient_errors, channel)
    }

    pub fn write_failures(&self) -> u64 {
        self.record_write_failures.load(Ordering::Relaxed)
    }

    fn bump(&self, map: &DashMap<String, AtomicU64>, channel: &str) {
        match map.get(channel) {
            Some(counter) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                map.entry(channel.to_string())
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn read(&self, map: &DashMap<String, AtomicU64>, channel: &str) -> u64 {
        map.get(channel)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Min/max/mean summary over a trace.
#[derive(Debug, Clone)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

pub fn calculate_stats(data: &VecDeque<f64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }
    let count = data.len();
    let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().sum::<f64>() / count as f64;
    Some(Stats { min, max, mean, count })
}

pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }
    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;
    Some(Stats { min, max, mean, count })
}
