//! CPU utilization estimation from cumulative counters
//!
//! Both counter sources only ever grow, so utilization is a delta between
//! two observations of the same key. The estimator keeps the previous
//! observation per key and supports two modes that must never be mixed:
//!
//! | Mode | Numerator | Denominator | Pegged single core reads |
//! |------|-----------|-------------|--------------------------|
//! | Host-relative | process ticks | host ticks (all CPUs) | ~100 / ncpus |
//! | Wall-clock | cgroup ns | elapsed wall ns | ~100 |
//!
//! A key whose stored sample came from the other mode is reseeded as if it
//! were new.

pub mod procfs;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tracing::debug;

pub use procfs::{CounterError, ProcFs};

const NANOS_PER_SEC: f64 = 1e9;

/// Which counter family a reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterSource {
    HostRelative,
    WallClock,
}

/// One raw observation handed to [`UtilizationEstimator::estimate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterReading {
    /// Process ticks against the host-wide tick total
    HostRelative { process_ticks: u64, host_ticks: u64 },
    /// Cumulative nanoseconds against elapsed wall-clock time
    WallClock { cumulative_ns: u64 },
}

impl CounterReading {
    pub fn source(&self) -> CounterSource {
        match self {
            CounterReading::HostRelative { .. } => CounterSource::HostRelative,
            CounterReading::WallClock { .. } => CounterSource::WallClock,
        }
    }

    fn cumulative(&self) -> u64 {
        match *self {
            CounterReading::HostRelative { process_ticks, .. } => process_ticks,
            CounterReading::WallClock { cumulative_ns } => cumulative_ns,
        }
    }
}

/// Stored previous observation for one key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub reading: CounterReading,
    pub captured_at: Instant,
    /// Estimator cycle in which this sample was last written
    pub last_cycle: u64,
}

#[derive(Debug, Default)]
struct History {
    samples: HashMap<u32, Sample>,
    cycle: u64,
}

/// Stateful per-PID utilization calculator
///
/// Safe to share between tasks; the history table sits behind a mutex.
#[derive(Debug)]
pub struct UtilizationEstimator {
    history: Mutex<History>,
    max_idle_cycles: u64,
}

impl UtilizationEstimator {
    /// `max_idle_cycles`: how many cycles a key may go unobserved before
    /// [`end_cycle`](Self::end_cycle) drops its sample
    pub fn new(max_idle_cycles: u64) -> Self {
        Self {
            history: Mutex::new(History::default()),
            max_idle_cycles,
        }
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        // A panic while holding the lock cannot leave a half-written sample
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Utilization percentage for `key` since its previous reading
    ///
    /// - first reading of a key (or of a key in a new mode) → 0.0
    /// - denominator did not advance → 0.0
    /// - counter went backwards → 0.0
    ///
    /// The stored sample is replaced by this reading in every case.
    pub fn estimate(&self, key: u32, reading: CounterReading, now: Instant) -> f64 {
        let mut history = self.lock();
        let cycle = history.cycle;
        let sample = Sample {
            reading,
            captured_at: now,
            last_cycle: cycle,
        };

        let Some(prev) = history.samples.insert(key, sample) else {
            return 0.0;
        };

        if prev.reading.source() != reading.source() {
            debug!(pid = key, "counter source changed, reseeding sample");
            return 0.0;
        }

        let delta = reading.cumulative().saturating_sub(prev.reading.cumulative()) as f64;

        match (prev.reading, reading) {
            (
                CounterReading::HostRelative { host_ticks: prev_host, .. },
                CounterReading::HostRelative { host_ticks, .. },
            ) => {
                let d_host = host_ticks.saturating_sub(prev_host);
                if d_host == 0 {
                    return 0.0;
                }
                delta / d_host as f64 * 100.0
            }
            (CounterReading::WallClock { .. }, CounterReading::WallClock { .. }) => {
                let elapsed = now.saturating_duration_since(prev.captured_at).as_secs_f64();
                if elapsed <= 0.0 {
                    return 0.0;
                }
                delta / (elapsed * NANOS_PER_SEC) * 100.0
            }
            _ => 0.0,
        }
    }

    /// Stored sample for a key
    pub fn sample(&self, key: u32) -> Option<Sample> {
        self.lock().samples.get(&key).copied()
    }

    /// Number of keys with history
    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the current cycle: advance the cycle counter and drop samples
    /// untouched for more than `max_idle_cycles` cycles. Returns how many
    /// were dropped.
    pub fn end_cycle(&self) -> usize {
        let mut history = self.lock();
        let current = history.cycle;
        let max_idle = self.max_idle_cycles;
        let before = history.samples.len();
        history
            .samples
            .retain(|_, s| current.saturating_sub(s.last_cycle) <= max_idle);
        history.cycle += 1;
        before - history.samples.len()
    }
}

impl Default for UtilizationEstimator {
    fn default() -> Self {
        Self::new(3)
    }
}
