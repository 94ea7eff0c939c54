//! ledger.rs
//! Rolling ledger of recent control iterations.
//!
//! Fixed-capacity FIFO over the last `itt_len + 1` iterations. The checkpoint
//! log averages the newest `itt_len` entries on a cadence driven by the loop
//! iteration counter, not by ledger size.

use std::collections::VecDeque;
use std::time::Duration;

use average::Mean;

/// One iteration's snapshot: elapsed run time, every channel's calibrated
/// reading, and the MV that drove the actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub elapsed: Duration,
    pub readings: Vec<f64>,
    pub mv: f64,
}

/// Bounded FIFO of [`LedgerEntry`] values. Length never exceeds
/// `itt_len + 1`.
#[derive(Debug)]
pub struct RollingLedger {
    entries: VecDeque<LedgerEntry>,
    capacity: usize,
}

impl RollingLedger {
    pub fn new(itt_len: usize) -> Self {
        let capacity = itt_len + 1;
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, evicting the oldest entry once past capacity.
    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Arithmetic mean per field over the newest `n` entries, stamped with
    /// the newest entry's elapsed time. `None` until `n` entries are held.
    pub fn average_over_last(&self, n: usize) -> Option<LedgerEntry> {
        if n == 0 || self.entries.len() < n {
            return None;
        }
        let window = self.entries.iter().skip(self.entries.len() - n);
        let newest = self.entries.back()?;

        let fields = newest.readings.len();
        let readings = (0..fields)
            .map(|i| {
                let mean: Mean = window.clone().map(|e| e.readings[i]).collect();
                mean.mean()
            })
            .collect();
        let mv: Mean = window.clone().map(|e| e.mv).collect();

        Some(LedgerEntry {
            elapsed: newest.elapsed,
            readings,
            mv: mv.mean(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(secs: u64, value: f64) -> LedgerEntry {
        LedgerEntry {
            elapsed: Duration::from_secs(secs),
            readings: vec![value],
            mv: value * 10.0,
        }
    }

    #[test]
    fn capacity_is_itt_len_plus_one() {
        let itt_len = 6;
        let mut ledger = RollingLedger::new(itt_len);
        for i in 0..(itt_len + 5) {
            ledger.append(entry(i as u64, i as f64));
        }
        assert_eq!(ledger.len(), itt_len + 1);
        // Strict FIFO: only the newest itt_len + 1 survive.
        let oldest = ledger.entries.front().unwrap();
        assert_eq!(oldest.readings[0], 4.0);
    }

    #[test]
    fn average_over_window() {
        let mut ledger = RollingLedger::new(3);
        for (i, v) in [1.0, 2.0, 3.0].iter().enumerate() {
            ledger.append(entry(i as u64, *v));
        }
        let avg = ledger.average_over_last(3).unwrap();
        assert!((avg.readings[0] - 2.0).abs() < 1e-12);
        assert!((avg.mv - 20.0).abs() < 1e-12);
        // Timestamps are not averaged.
        assert_eq!(avg.elapsed, Duration::from_secs(2));
    }

    #[test]
    fn average_uses_newest_entries_only() {
        let mut ledger = RollingLedger::new(2);
        for (i, v) in [100.0, 1.0, 3.0].iter().enumerate() {
            ledger.append(entry(i as u64, *v));
        }
        let avg = ledger.average_over_last(2).unwrap();
        assert!((avg.readings[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn average_requires_full_window() {
        let mut ledger = RollingLedger::new(5);
        ledger.append(entry(0, 1.0));
        assert!(ledger.average_over_last(5).is_none());
        assert!(ledger.average_over_last(0).is_none());
    }
}
