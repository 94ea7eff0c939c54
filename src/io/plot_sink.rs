//! plot_sink.rs
//! Live telemetry plotting.
//!
//! The loop pushes `(elapsed, value)` samples with a non-blocking send; a
//! renderer thread accumulates bounded series and redraws an SVG chart grid
//! on a fixed tick and once more at shutdown. Purely observational; nothing
//! here feeds back into control.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, error};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::collections::VecDeque;

use crate::utils::metrics::push_capped;

/// Observational sample stream. Implementations must never block the loop.
pub trait PlotSink: Send {
    fn push(&self, series: &str, t_secs: f64, value: f64);
}

#[derive(Debug, Clone)]
pub struct PlotSample {
    pub series: String,
    pub t_secs: f64,
    pub value: f64,
}

/// Sink half of the plot channel: non-blocking `try_send`, drops (and
/// counts) samples when the renderer falls behind.
pub struct ChannelPlotSink {
    tx: Sender<PlotSample>,
    dropped: Arc<AtomicU64>,
}

impl ChannelPlotSink {
    pub fn new(capacity: usize) -> (Self, Receiver<PlotSample>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PlotSink for ChannelPlotSink {
    fn push(&self, series: &str, t_secs: f64, value: f64) {
        let sample = PlotSample {
            series: series.to_string(),
            t_secs,
            value,
        };
        if self.tx.try_send(sample).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Spawns the renderer: drains the channel, keeps the newest points per
/// series, redraws every `tick`, renders a final frame when the sink side
/// hangs up.
pub fn spawn_plot_renderer(
    rx: Receiver<PlotSample>,
    svg_path: PathBuf,
    series_order: Vec<String>,
    tick: Duration,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("plot-render".into())
        .spawn(move || {
            let mut series: Vec<(String, VecDeque<(f64, f64)>)> = series_order
                .into_iter()
                .map(|name| (name, VecDeque::new()))
                .collect();
            let mut last_render = Instant::now();
            let mut dirty = false;

            loop {
                match rx.recv_timeout(tick) {
                    Ok(sample) => {
                        let idx = match series.iter().position(|(n, _)| *n == sample.series) {
                            Some(i) => i,
                            None => {
                                series.push((sample.series.clone(), VecDeque::new()));
                                series.len() - 1
                            }
                        };
                        push_capped(&mut series[idx].1, (sample.t_secs, sample.value));
                        dirty = true;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                if dirty && last_render.elapsed() >= tick {
                    render_chart(&svg_path, &series);
                    last_render = Instant::now();
                    dirty = false;
                }
            }

            if dirty {
                render_chart(&svg_path, &series);
            }
            debug!("plot renderer exiting");
        })
        .expect("failed to spawn plot renderer")
}

/// Redraws the chart grid: one pane per series, line over elapsed seconds.
/// Draws to a temp file and renames so readers never see a half-written SVG.
fn render_chart(path: &PathBuf, series: &[(String, VecDeque<(f64, f64)>)]) {
    if series.is_empty() {
        return;
    }
    let tmp = path.with_extension("svg.tmp");
    {
        let root = SVGBackend::new(&tmp, (1280, 900)).into_drawing_area();
        if root.fill(&WHITE).is_err() {
            error!("plot render failed: cannot fill backend");
            return;
        }
        let cols = series.len().min(2);
        let rows = series.len().div_ceil(cols);
        let panes = root.split_evenly((rows, cols));
        for ((name, trace), pane) in series.iter().zip(panes.iter()) {
            plot_series(pane, name, trace);
        }
        if root.present().is_err() {
            error!("plot render failed: cannot present SVG");
            return;
        }
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        error!("plot render failed: {}", e);
    }
}

/// Single waveform pane (X: elapsed seconds, Y: value).
fn plot_series(area: &DrawingArea<SVGBackend, Shift>, title: &str, trace: &VecDeque<(f64, f64)>) {
    let (x_min, x_max) = match (trace.front(), trace.back()) {
        (Some((first, _)), Some((last, _))) => (*first, last.max(first + 1e-6)),
        _ => (0.0, 1.0),
    };
    let (mut y_min, mut y_max) = trace.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), &(_, v)| (lo.min(v), hi.max(v)),
    );
    if !y_min.is_finite() {
        (y_min, y_max) = (0.0, 1.0);
    }
    y_max = y_max.max(y_min + 1e-6);

    let chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(20)
        .y_label_area_size(40)
        .build_cartesian_2d(x_min..x_max, y_min..y_max);
    let mut chart = match chart {
        Ok(c) => c,
        Err(e) => {
            error!("chart build failed for {}: {}", title, e);
            return;
        }
    };
    if chart.configure_mesh().disable_mesh().draw().is_err() {
        return;
    }
    let _ = chart.draw_series(LineSeries::new(trace.iter().cloned(), &BLUE));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_drops_when_renderer_is_gone_or_full() {
        let (sink, rx) = ChannelPlotSink::new(2);
        sink.push("Tip", 0.0, -100.0);
        sink.push("Tip", 0.2, -100.5);
        sink.push("Tip", 0.4, -101.0);
        assert_eq!(sink.dropped_samples(), 1);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn renderer_writes_an_svg_and_exits_on_disconnect() {
        let dir = std::env::temp_dir().join(format!("cryostat_plot_{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("live.svg");

        let (sink, rx) = ChannelPlotSink::new(64);
        let handle = spawn_plot_renderer(
            rx,
            path.clone(),
            vec!["Tip".into(), "MV".into()],
            Duration::from_millis(10),
        );
        for i in 0..20 {
            sink.push("Tip", i as f64 * 0.2, -100.0 - i as f64);
            sink.push("MV", i as f64 * 0.2, i as f64 * 0.1);
        }
        drop(sink);
        handle.join().unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
