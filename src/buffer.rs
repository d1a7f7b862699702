//! # Offline Buffer
//!
//! Memory-bounded FIFO of records waiting for the uplink.
//!
//! This module handles:
//! - Admission control by free-memory fraction
//! - Handing out ordered snapshots for draining
//! - Removing only the acknowledged prefix after a drain

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::location::LocationRecord;

/// Memory usage at one instant, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub free: u64,
    pub allocated: u64,
}

impl MemoryStats {
    /// `free / (free + allocated)`
    pub fn free_fraction(&self) -> f64 {
        let total = self.free + self.allocated;
        if total == 0 {
            return 0.0;
        }
        self.free as f64 / total as f64
    }
}

/// Source of memory usage figures
#[cfg_attr(test, mockall::automock)]
pub trait MemoryProbe: Send + Sync {
    /// Current usage, or `None` if it cannot be sampled
    fn sample(&self) -> Option<MemoryStats>;
}

/// System memory from `/proc/meminfo`
#[derive(Debug, Clone)]
pub struct SystemMemory {
    path: PathBuf,
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self { path: PathBuf::from("/proc/meminfo") }
    }
}

impl SystemMemory {
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl MemoryProbe for SystemMemory {
    fn sample(&self) -> Option<MemoryStats> {
        let contents = fs::read_to_string(&self.path).ok()?;
        parse_meminfo(&contents)
    }
}

/// Parse `MemTotal` and `MemAvailable` (kB) from meminfo text
pub fn parse_meminfo(contents: &str) -> Option<MemoryStats> {
    let field = |name: &str| -> Option<u64> {
        contents
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|value| value.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };

    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;

    Some(MemoryStats {
        free: available,
        allocated: total.saturating_sub(available),
    })
}

/// FIFO of undelivered records
///
/// Shared between the orchestrator (admit, drain) and status readers; one
/// mutex guards the queue.
pub struct OfflineBuffer {
    records: Mutex<VecDeque<LocationRecord>>,
    probe: Box<dyn MemoryProbe>,
    min_free_fraction: f64,
}

impl OfflineBuffer {
    /// # Arguments
    ///
    /// * `probe` - Memory usage source
    /// * `min_free_fraction` - Free memory fraction required to admit a record (0.10 = 10%)
    pub fn new(probe: Box<dyn MemoryProbe>, min_free_fraction: f64) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            probe,
            min_free_fraction,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LocationRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a record if enough memory is free
    ///
    /// Returns `false` and leaves the buffer unchanged when memory is short.
    /// If memory cannot be sampled the record is admitted.
    pub fn admit(&self, record: LocationRecord) -> bool {
        if let Some(stats) = self.probe.sample() {
            let fraction = stats.free_fraction();
            if fraction < self.min_free_fraction {
                warn!(
                    "Buffer admission refused: {:.1}% memory free, {:.1}% required",
                    fraction * 100.0,
                    self.min_free_fraction * 100.0
                );
                return false;
            }
        }

        let mut records = self.lock();
        records.push_back(record);
        debug!("Record buffered, size: {}", records.len());
        true
    }

    /// Copy of all records, oldest first
    pub fn all(&self) -> Vec<LocationRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Remove the `count` oldest records
    pub fn drain_prefix(&self, count: usize) {
        let mut records = self.lock();
        let count = count.min(records.len());
        records.drain(..count);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Latest memory sample, for status reports
    pub fn memory(&self) -> Option<MemoryStats> {
        self.probe.sample()
    }
}
