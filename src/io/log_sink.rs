//! log_sink.rs
//! Persistent record logging.
//!
//! The loop never writes a file on the control path: records go through a
//! bounded lock-free queue and a background consumer drains them into CSV
//! with batched flushing. The queue drops on overflow (counted) so a slow
//! disk cannot stall actuation. Log files rotate at 4 MiB with timestamped
//! names, matching the lab's long-run capture convention.

use std::fs::{File, OpenOptions, create_dir_all};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use crossbeam_queue::ArrayQueue;
use log::{debug, error};
use parking_lot::Mutex;

use crate::utils::metrics::{
    Diagnostics, SharedTelemetry, calculate_stats, calculate_stats_u64,
};

const RECORD_QUEUE_CAPACITY: usize = 8192;
const CONSUMER_POLL_MS: u64 = 5;
const DRAIN_BATCH: usize = 256;
const FLUSH_BATCHES: usize = 8;
pub const ROTATE_BYTES: u64 = 4 * 1024 * 1024;

/// Per-iteration sample row or periodic checkpoint average. Both carry the
/// same shape and land in the same file; checkpoints also force a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Sample,
    Checkpoint,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub kind: RecordKind,
    pub elapsed: Duration,
    pub readings: Vec<f64>,
    pub mv: f64,
}

/// Append-only record writer. Must never fail the loop; internal failures
/// are surfaced through the error sink and counted in diagnostics.
pub trait RecordSink: Send + Sync {
    fn submit(&self, record: LogRecord);
}

/// Durable error channel: one dated block per entry.
pub trait ErrorSink: Send + Sync {
    fn append(&self, context: &str, message: &str);
}

/// Elapsed run time as `H:MM:SS.mmm`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_ms = elapsed.as_millis();
    let ms = total_ms % 1000;
    let secs = total_ms / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    format!("{}:{:02}:{:02}.{:03}", h, m, s, ms)
}

fn record_row(record: &LogRecord) -> Vec<String> {
    let mut row = Vec::with_capacity(record.readings.len() + 2);
    row.push(format_elapsed(record.elapsed));
    for r in &record.readings {
        row.push(format!("{:.3}", r));
    }
    row.push(format!("{:.3}", record.mv));
    row
}

/// One open CSV log file plus the state needed to rotate it. Size is
/// tracked by bytes handed to the writer, so rotation does not depend on
/// when buffered rows reach the disk.
struct CsvLogFile {
    dir: PathBuf,
    stem: String,
    header: Vec<String>,
    path: PathBuf,
    writer: csv::Writer<File>,
    bytes_written: u64,
    max_bytes: u64,
    seq: u32,
}

impl CsvLogFile {
    fn open(dir: PathBuf, stem: String, header: Vec<String>, max_bytes: u64) -> csv::Result<Self> {
        create_dir_all(&dir)?;
        let (path, writer) = Self::create_file(&dir, &stem, &header, 0)?;
        Ok(Self {
            dir,
            stem,
            header,
            path,
            writer,
            bytes_written: 0,
            max_bytes,
            seq: 0,
        })
    }

    fn create_file(
        dir: &Path,
        stem: &str,
        header: &[String],
        seq: u32,
    ) -> csv::Result<(PathBuf, csv::Writer<File>)> {
        let name = format!(
            "{}_{}_{:03}.csv",
            stem,
            Local::now().format("%m-%d-%Y-%H-%M-%S"),
            seq
        );
        let path = dir.join(name);
        let mut writer = csv::Writer::from_writer(File::create(&path)?);
        writer.write_record(header)?;
        writer.flush()?;
        Ok((path, writer))
    }

    fn append(&mut self, record: &LogRecord) -> csv::Result<()> {
        self.rotate_if_needed()?;
        let row = record_row(record);
        self.bytes_written += row.iter().map(|f| f.len() as u64 + 1).sum::<u64>();
        self.writer.write_record(&row)?;
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    fn rotate_if_needed(&mut self) -> csv::Result<()> {
        if self.bytes_written < self.max_bytes {
            return Ok(());
        }
        self.writer.flush()?;
        self.seq += 1;
        let (path, writer) = Self::create_file(&self.dir, &self.stem, &self.header, self.seq)?;
        debug!("rotating log file to {:?}", path);
        self.path = path;
        self.writer = writer;
        self.bytes_written = 0;
        Ok(())
    }
}

/// Record sink backed by a bounded queue and a background CSV consumer.
pub struct QueuedCsvSink {
    queue: Arc<ArrayQueue<LogRecord>>,
    dropped: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedCsvSink {
    /// Open the first log file and start the consumer thread.
    pub fn start(
        dir: impl Into<PathBuf>,
        stem: &str,
        header: Vec<String>,
        errors: Arc<dyn ErrorSink>,
        diagnostics: Arc<Diagnostics>,
    ) -> csv::Result<Self> {
        Self::start_with_rotation(dir, stem, header, errors, diagnostics, ROTATE_BYTES)
    }

    pub fn start_with_rotation(
        dir: impl Into<PathBuf>,
        stem: &str,
        header: Vec<String>,
        errors: Arc<dyn ErrorSink>,
        diagnostics: Arc<Diagnostics>,
        max_bytes: u64,
    ) -> csv::Result<Self> {
        let mut file = CsvLogFile::open(dir.into(), stem.to_string(), header, max_bytes)?;
        let queue = Arc::new(ArrayQueue::new(RECORD_QUEUE_CAPACITY));
        let running = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));

        let q = queue.clone();
        let run = running.clone();
        let drops = dropped.clone();
        let handle = thread::Builder::new()
            .name("record-log".into())
            .spawn(move || {
                let mut flush_counter = 0usize;
                loop {
                    let mut any = false;
                    let mut checkpoint_seen = false;
                    for _ in 0..DRAIN_BATCH {
                        match q.pop() {
                            Some(record) => {
                                any = true;
                                checkpoint_seen |= record.kind == RecordKind::Checkpoint;
                                if let Err(e) = file.append(&record) {
                                    diagnostics.record_write_failure();
                                    errors.append("record-log", &format!("csv append failed: {}", e));
                                }
                            }
                            None => break,
                        }
                    }

                    if any {
                        flush_counter += 1;
                        // Checkpoints flush immediately; sample rows batch up.
                        if checkpoint_seen || flush_counter >= FLUSH_BATCHES {
                            if let Err(e) = file.flush() {
                                diagnostics.record_write_failure();
                                errors.append("record-log", &format!("csv flush failed: {}", e));
                            }
                            flush_counter = 0;
                        }
                    } else if run.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                    } else {
                        break;
                    }
                }

                if let Err(e) = file.flush() {
                    errors.append("record-log", &format!("final csv flush failed: {}", e));
                }
                debug!(
                    "record consumer exiting, dropped={}",
                    drops.load(Ordering::Relaxed)
                );
            })
            .expect("failed to spawn record consumer");

        Ok(Self {
            queue,
            dropped,
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain outstanding records and join the consumer.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl RecordSink for QueuedCsvSink {
    fn submit(&self, record: LogRecord) {
        if self.queue.push(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for QueuedCsvSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Error log file: dashed separator, local timestamp, then the entry.
pub struct FileErrorLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileErrorLog {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join("error_log.txt"),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ErrorSink for FileErrorLog {
    fn append(&self, context: &str, message: &str) {
        let _guard = self.lock.lock();
        let entry = format!(
            "-------------------------------------------------\n{}\n[{}] {}\n\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            context,
            message
        );
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(entry.as_bytes()) {
                    error!("failed to append error log: {}", e);
                }
            }
            Err(e) => error!("failed to open error log {:?}: {}", self.path, e),
        }
    }
}

/// Writes the shutdown summary: one `metric,value,description` row per
/// counter and trace statistic.
pub fn export_run_summary(
    path: impl AsRef<Path>,
    telemetry: &SharedTelemetry,
    diagnostics: &Diagnostics,
    channel_names: &[String],
) {
    let t = telemetry.lock();

    let mut content = String::from("metric,value,description\n");
    content.push_str(&format!("iterations,{},Completed loop iterations\n", t.iterations));
    content.push_str(&format!("overruns,{},Iterations past the loop period\n", t.overruns));
    content.push_str(&format!("skipped,{},Iterations skipped on read errors\n", t.skipped));

    if let Some(jitter) = calculate_stats_u64(&t.jitter_us) {
        content.push_str(&format!("jitter_min_us,{:.2},Minimum wake-up jitter\n", jitter.min));
        content.push_str(&format!("jitter_max_us,{:.2},Maximum wake-up jitter\n", jitter.max));
        content.push_str(&format!("jitter_avg_us,{:.2},Average wake-up jitter\n", jitter.mean));
    }

    if let Some(mv) = calculate_stats(&t.mv) {
        content.push_str(&format!("mv_min,{:.3},Minimum manipulated variable\n", mv.min));
        content.push_str(&format!("mv_max,{:.3},Maximum manipulated variable\n", mv.max));
        content.push_str(&format!("mv_avg,{:.3},Average manipulated variable\n", mv.mean));
    }

    for name in channel_names {
        content.push_str(&format!(
            "samples_{},{},Samples read on {}\n",
            name,
            diagnostics.samples(name),
            name
        ));
        content.push_str(&format!(
            "transient_errors_{},{},Transient read failures on {}\n",
            name,
            diagnostics.transient_errors(name),
            name
        ));
    }
    content.push_str(&format!(
        "record_write_failures,{},Record sink write failures\n",
        diagnostics.write_failures()
    ));

    if let Err(e) = std::fs::write(path.as_ref(), content) {
        error!("failed to export run summary: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullErrors;
    impl ErrorSink for NullErrors {
        fn append(&self, _context: &str, _message: &str) {}
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cryostat_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn record(kind: RecordKind, secs: u64, value: f64) -> LogRecord {
        LogRecord {
            kind,
            elapsed: Duration::from_secs(secs),
            readings: vec![value, value + 1.0],
            mv: value * 2.0,
        }
    }

    #[test]
    fn elapsed_formats_like_a_clock() {
        assert_eq!(format_elapsed(Duration::from_millis(1_200)), "0:00:01.200");
        assert_eq!(format_elapsed(Duration::from_secs(3_661)), "1:01:01.000");
    }

    #[test]
    fn consumer_writes_header_and_rows() {
        let dir = temp_dir("rows");
        let sink = QueuedCsvSink::start(
            dir.clone(),
            "temp_log",
            vec!["Real time".into(), "Tip".into(), "Ceramic".into(), "MV".into()],
            Arc::new(NullErrors),
            Arc::new(Diagnostics::default()),
        )
        .unwrap();

        for i in 0..5 {
            sink.submit(record(RecordKind::Sample, i, i as f64));
        }
        sink.submit(record(RecordKind::Checkpoint, 5, 2.0));
        sink.stop();

        let file = std::fs::read_dir(&dir).unwrap().next().unwrap().unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "Real time,Tip,Ceramic,MV");
        assert_eq!(lines[1], "0:00:00.000,0.000,1.000,0.000");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rotation_starts_a_new_file() {
        let dir = temp_dir("rotate");
        let sink = QueuedCsvSink::start_with_rotation(
            dir.clone(),
            "temp_log",
            vec!["Real time".into(), "Tip".into(), "Ceramic".into(), "MV".into()],
            Arc::new(NullErrors),
            Arc::new(Diagnostics::default()),
            256,
        )
        .unwrap();

        for i in 0..64 {
            sink.submit(record(RecordKind::Sample, i, i as f64));
        }
        sink.stop();

        let files = std::fs::read_dir(&dir).unwrap().count();
        assert!(files >= 2, "expected rotation, found {} file(s)", files);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn error_log_appends_dated_blocks() {
        let dir = temp_dir("errlog");
        let log = FileErrorLog::new(dir.clone()).unwrap();
        log.append("control-loop", "sensor fault on Tip");
        log.append("record-log", "disk full");
        let content = std::fs::read_to_string(log.path()).unwrap();
        let separators = content.lines().filter(|l| l.starts_with("-----")).count();
        assert_eq!(separators, 2);
        assert!(content.contains("sensor fault on Tip"));
        assert!(content.contains("[record-log] disk full"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
