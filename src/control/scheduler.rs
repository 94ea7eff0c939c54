//! scheduler.rs
//! The fixed-period control loop.
//!
//! One iteration per period: read every channel, calibrate, update the PID on
//! the control channel, actuate, append to the ledger, emit records and plot
//! samples, checkpoint every `itt_len`-th iteration, then sleep to the
//! deadline. The period is a soft floor: slow I/O makes the iteration run
//! long, it is never caught up.
//!
//! Failure discipline: transient and malformed reads skip the iteration and
//! keep the cadence; actuator write failures are logged and overwritten next
//! iteration; faults and operator interrupts share one shutdown path that
//! always leaves the actuator in its safe state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::control::ledger::{LedgerEntry, RollingLedger};
use crate::control::pid::PidController;
use crate::io::actuator_port::ActuatorPort;
use crate::io::log_sink::{ErrorSink, LogRecord, RecordKind, RecordSink};
use crate::io::plot_sink::PlotSink;
use crate::io::sensor::{ReadError, SensorSource};
use crate::utils::config::{ConfigError, LoopConfig};
use crate::utils::metrics::{Diagnostics, SharedTelemetry, push_capped};

/// Why the loop left RUNNING. STOPPED is terminal; a new run builds a new
/// loop.
#[derive(Debug)]
pub enum StopReason {
    /// Cancellation flag cleared by the operator.
    Interrupted,
    /// Unrecoverable sensor failure (including an exhausted transient
    /// streak).
    SensorFault(ReadError),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Interrupted => write!(f, "interrupted by operator"),
            StopReason::SensorFault(err) => write!(f, "sensor fault: {}", err),
        }
    }
}

/// Process-wide run state: built when the loop enters RUNNING, torn down
/// when it stops.
pub struct RunContext {
    pub period: Duration,
    pub iteration: u64,
    pub started: Instant,
}

enum Outcome {
    Completed,
    /// Read trouble this iteration; cadence maintained, no control action.
    Skipped,
}

/// The engine. Owns the controller and ledger outright; collaborators are
/// borrowed for the lifetime of the run through their narrow traits.
pub struct ControlLoop<S: SensorSource, A: ActuatorPort> {
    config: LoopConfig,
    pid: PidController,
    ledger: RollingLedger,
    source: S,
    port: A,
    records: Arc<dyn RecordSink>,
    plots: Box<dyn PlotSink>,
    errors: Arc<dyn ErrorSink>,
    telemetry: SharedTelemetry,
    diagnostics: Arc<Diagnostics>,
    running: Arc<AtomicBool>,
    transient_streak: u32,
}

impl<S: SensorSource, A: ActuatorPort> ControlLoop<S, A> {
    /// Validates the configuration up front; a bad config never runs.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LoopConfig,
        source: S,
        port: A,
        records: Arc<dyn RecordSink>,
        plots: Box<dyn PlotSink>,
        errors: Arc<dyn ErrorSink>,
        telemetry: SharedTelemetry,
        diagnostics: Arc<Diagnostics>,
        running: Arc<AtomicBool>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pid = PidController::new(config.pid.clone());
        let ledger = RollingLedger::new(config.itt_len);
        Ok(Self {
            config,
            pid,
            ledger,
            source,
            port,
            records,
            plots,
            errors,
            telemetry,
            diagnostics,
            running,
            transient_streak: 0,
        })
    }

    /// Run until interrupted or faulted. The actuator is commanded to its
    /// safe state on every way out.
    pub fn run(&mut self) -> StopReason {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut ctx = RunContext {
            period: self.config.period,
            iteration: 0,
            started: Instant::now(),
        };
        info!(
            "loop RUNNING: period {:?}, {} channels, control on '{}'",
            ctx.period,
            self.config.channels.len(),
            self.config.channels[self.config.control_channel].name
        );

        let reason = loop {
            // Cancellation is honored at the iteration boundary only.
            if !self.running.load(Ordering::Acquire) {
                break StopReason::Interrupted;
            }

            let t0 = Instant::now();
            ctx.iteration += 1;

            match self.iterate(&ctx, t0) {
                Ok(Outcome::Completed) => self.transient_streak = 0,
                Ok(Outcome::Skipped) => {}
                Err(fault) => break StopReason::SensorFault(fault),
            }

            let elapsed = t0.elapsed();
            let overran = elapsed >= ctx.period;
            {
                let mut t = self.telemetry.lock();
                t.iterations = ctx.iteration;
                if overran {
                    t.overruns += 1;
                }
            }
            if !overran {
                sleeper.sleep(ctx.period - elapsed);
                let lateness = t0.elapsed().saturating_sub(ctx.period);
                let mut t = self.telemetry.lock();
                push_capped(&mut t.jitter_us, lateness.as_micros() as u64);
            }
            // Overruns roll straight into the next iteration.
        };

        self.shutdown(&reason, &ctx);
        reason
    }

    fn iterate(&mut self, ctx: &RunContext, t0: Instant) -> Result<Outcome, ReadError> {
        let elapsed = t0.duration_since(ctx.started);

        // Read and calibrate every channel; reads dominate the iteration.
        let channel_count = self.config.channels.len();
        let mut readings = Vec::with_capacity(channel_count);
        for idx in 0..channel_count {
            let sample = match self.source.read(idx) {
                Ok(sample) => sample,
                Err(err) => return self.read_trouble(err),
            };
            let spec = &self.config.channels[idx];
            if !sample.raw_value.is_finite() {
                let err = ReadError::Malformed {
                    channel: spec.name.clone(),
                    reason: format!("non-finite raw value {}", sample.raw_value),
                };
                return self.read_trouble(err);
            }
            self.diagnostics.record_sample(&spec.name);
            readings.push(spec.calibration.apply(sample.raw_value));
        }

        let mv = self.pid.update(readings[self.config.control_channel], Instant::now());

        // Actuation comes before any logging and is always attempted.
        let command = self.config.actuator.command(mv);
        if let Err(err) = self.port.apply(command) {
            // Physical state unknown until the next command lands.
            warn!("{} (state unknown until next iteration)", err);
            self.errors.append("control-loop", &err.to_string());
        }

        self.ledger.append(LedgerEntry {
            elapsed,
            readings: readings.clone(),
            mv,
        });

        self.records.submit(LogRecord {
            kind: RecordKind::Sample,
            elapsed,
            readings: readings.clone(),
            mv,
        });

        let t_secs = elapsed.as_secs_f64();
        for (spec, value) in self.config.channels.iter().zip(&readings) {
            self.plots.push(&spec.name, t_secs, *value);
        }
        self.plots.push("MV", t_secs, mv);

        {
            let mut t = self.telemetry.lock();
            push_capped(&mut t.mv, mv);
        }

        // Checkpoint cadence follows the iteration counter, not ledger size.
        if ctx.iteration % self.config.itt_len as u64 == 0 {
            if let Some(avg) = self.ledger.average_over_last(self.config.itt_len) {
                self.records.submit(LogRecord {
                    kind: RecordKind::Checkpoint,
                    elapsed: avg.elapsed,
                    readings: avg.readings,
                    mv: avg.mv,
                });
            }
        }

        Ok(Outcome::Completed)
    }

    fn read_trouble(&mut self, err: ReadError) -> Result<Outcome, ReadError> {
        match err {
            ReadError::Transient { channel, reason } => {
                self.diagnostics.record_transient_error(&channel);
                self.telemetry.lock().skipped += 1;
                self.transient_streak += 1;
                warn!(
                    "transient read failure on {} ({}), retrying next iteration ({}/{})",
                    channel, reason, self.transient_streak, self.config.max_transient_streak
                );
                if self.transient_streak >= self.config.max_transient_streak {
                    return Err(ReadError::Fault {
                        channel,
                        reason: format!(
                            "{} consecutive transient read failures",
                            self.transient_streak
                        ),
                    });
                }
                Ok(Outcome::Skipped)
            }
            ReadError::Malformed { channel, reason } => {
                self.telemetry.lock().skipped += 1;
                warn!("malformed reading on {} ({}), iteration skipped", channel, reason);
                Ok(Outcome::Skipped)
            }
            fault @ ReadError::Fault { .. } => Err(fault),
        }
    }

    /// Shared shutdown path for interrupts and faults: safe-state the
    /// actuator first, then record why the loop stopped.
    fn shutdown(&mut self, reason: &StopReason, ctx: &RunContext) {
        let safe = self.config.actuator.safe_command();
        match self.port.apply(safe) {
            Ok(()) => info!("actuator commanded to safe state"),
            Err(err) => {
                error!("failed to safe the actuator: {}", err);
                self.errors.append("shutdown", &err.to_string());
            }
        }

        match reason {
            StopReason::Interrupted => {
                info!(
                    "loop STOPPED after {} iterations ({:?} elapsed)",
                    ctx.iteration,
                    ctx.started.elapsed()
                );
            }
            StopReason::SensorFault(err) => {
                self.errors.append("control-loop", &err.to_string());
                error!("loop STOPPED on iteration {}: {}", ctx.iteration, err);
            }
        }
    }
}
