//! Entry point: pick a rig, run a fixed-duration regulation session.
//!
//! Sessions drive the engine against the simulated rig. The control loop
//! runs on its own max-priority thread; this thread owns the session clock
//! and the shutdown flag. Outputs land under `Logs/`:
//! - `Temp_log_*.csv`: per-iteration rows plus checkpoint averages.
//! - `live_plot.svg`: rolling chart of every channel and the MV.
//! - `error_log.txt`: dated error entries.
//! - `run_summary.csv`: counters and jitter stats for the session.

use std::io::{Write, stdin, stdout};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{error, info};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use cryostat_control::control::actuator::ActuatorMode;
use cryostat_control::control::scheduler::ControlLoop;
use cryostat_control::io::log_sink::{
    ErrorSink, FileErrorLog, QueuedCsvSink, export_run_summary,
};
use cryostat_control::io::plot_sink::{ChannelPlotSink, spawn_plot_renderer};
use cryostat_control::io::sim::{
    ProbeKind, SimulatedActuator, SimulatedPlant, SimulatedProbes, heater_rig, valve_rig,
};
use cryostat_control::utils::config::LoopConfig;
use cryostat_control::utils::metrics::{Diagnostics, SharedTelemetry};

const LOG_DIR: &str = "Logs";
const DEFAULT_SESSION_SECS: u64 = 60;
const PLOT_TICK_MS: u64 = 500;

fn main() {
    env_logger::init();
    info!("=== CRYOSTAT CONTROL START ===");

    loop {
        match prompt_menu().as_str() {
            "1" | "" => {
                let secs = prompt_duration();
                let config = LoopConfig::relay_valve();
                let plant = valve_rig(config.channels.len());
                let kinds = vec![
                    ProbeKind::Temperature { noise: 0.2 },
                    ProbeKind::Temperature { noise: 0.2 },
                    ProbeKind::Temperature { noise: 0.2 },
                    ProbeKind::Flow {
                        full_scale: 180.0,
                        noise: 0.5,
                    },
                ];
                run_session(config, plant, kinds, secs);
            }
            "2" => {
                let secs = prompt_duration();
                let config = LoopConfig::dac_heater();
                let plant = heater_rig(config.channels.len());
                let kinds = vec![ProbeKind::Temperature { noise: 0.2 }; 4];
                run_session(config, plant, kinds, secs);
            }
            "3" => {
                info!("=== CRYOSTAT CONTROL FINISHED ===");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
            }
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│        SELECT RIG                           │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) N2 valve rig (relay, simulated)         │");
    println!("│  2) Heater rig (12-bit DAC, simulated)      │");
    println!("│  3) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3] (default: 1): ");
    let _ = stdout().flush();

    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

fn prompt_duration() -> u64 {
    print!("Session length in seconds [default: {}]: ", DEFAULT_SESSION_SECS);
    let _ = stdout().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().parse::<u64>().unwrap_or(DEFAULT_SESSION_SECS)
}

fn run_session(config: LoopConfig, plant: SimulatedPlant, kinds: Vec<ProbeKind>, duration_secs: u64) {
    let names = config.channel_names();

    let errors: Arc<dyn ErrorSink> = match FileErrorLog::new(LOG_DIR) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            error!("cannot open error log: {}", e);
            return;
        }
    };
    let diagnostics = Arc::new(Diagnostics::default());
    let telemetry = SharedTelemetry::default();

    let mut header = Vec::with_capacity(names.len() + 2);
    header.push("Real time".to_string());
    header.extend(names.iter().cloned());
    header.push("MV".to_string());

    let records = match QueuedCsvSink::start(
        LOG_DIR,
        "Temp_log",
        header,
        errors.clone(),
        diagnostics.clone(),
    ) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            error!("cannot open record log: {}", e);
            return;
        }
    };

    let (plot_sink, plot_rx) = ChannelPlotSink::new(1024);
    let mut plot_series = names.clone();
    plot_series.push("MV".to_string());
    let plot_handle = spawn_plot_renderer(
        plot_rx,
        std::path::Path::new(LOG_DIR).join("live_plot.svg"),
        plot_series,
        Duration::from_millis(PLOT_TICK_MS),
    );

    let probes = SimulatedProbes::new(plant.clone(), kinds);
    let port = SimulatedActuator::new(plant, max_code_of(&config));

    let running = Arc::new(AtomicBool::new(true));
    let mut engine = match ControlLoop::new(
        config,
        probes,
        port,
        records.clone(),
        Box::new(plot_sink),
        errors.clone(),
        telemetry.clone(),
        diagnostics.clone(),
        running.clone(),
    ) {
        Ok(engine) => engine,
        Err(e) => {
            error!("configuration rejected: {}", e);
            return;
        }
    };

    let loop_handle = thread::Builder::new()
        .name("control-loop".into())
        .spawn_with_priority(ThreadPriority::Max, move |_| engine.run())
        .expect("failed to spawn control loop");

    info!("session running for {} s", duration_secs);
    thread::sleep(Duration::from_secs(duration_secs));
    running.store(false, Ordering::Release);

    match loop_handle.join() {
        Ok(reason) => info!("session ended: {}", reason),
        Err(_) => error!("control loop thread panicked"),
    }

    records.stop();
    // The loop (and its plot sink) is gone, so the renderer sees the
    // disconnect, draws the final frame and exits.
    let _ = plot_handle.join();

    export_run_summary(
        std::path::Path::new(LOG_DIR).join("run_summary.csv"),
        &telemetry,
        &diagnostics,
        &names,
    );
    info!("session artifacts written under {}/", LOG_DIR);
}

fn max_code_of(config: &LoopConfig) -> u16 {
    match &config.actuator {
        ActuatorMode::Analog(out) => out.max_code,
        ActuatorMode::Relay => 1,
    }
}
