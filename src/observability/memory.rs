//! Resident memory of the current process.
//!
//! Reading process memory goes through the OS (`/proc` on Linux), so the
//! sampler refreshes at most once per refresh interval and hands out the
//! cached figure in between. A caller that finds another thread mid-refresh
//! gets the cached figure instead of waiting.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System};

/// Minimum time between two OS reads
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(250);

struct Sample {
    system: System,
    taken_at: Option<Instant>,
}

pub struct MemorySampler {
    sample: Mutex<Sample>,
    last_bytes: AtomicU64,
    refresh_interval: Duration,
    pid: Pid,
}

impl std::fmt::Debug for MemorySampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySampler")
            .field("pid", &self.pid)
            .field("last_bytes", &self.last_bytes.load(Ordering::Relaxed))
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler {
    pub fn new() -> Self {
        Self::with_refresh_interval(DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(refresh_interval: Duration) -> Self {
        Self {
            sample: Mutex::new(Sample {
                system: System::new(),
                taken_at: None,
            }),
            last_bytes: AtomicU64::new(0),
            refresh_interval,
            pid: Pid::from(std::process::id() as usize),
        }
    }

    /// Resident set size in bytes as of the latest sample, 0 when the
    /// process cannot be inspected or nothing has been sampled yet.
    pub fn current_bytes(&self) -> u64 {
        if let Some(mut sample) = self.sample.try_lock() {
            let fresh = sample
                .taken_at
                .is_some_and(|at| at.elapsed() < self.refresh_interval);
            if !fresh {
                sample.system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[self.pid]),
                    false,
                    ProcessRefreshKind::new().with_memory(),
                );
                let bytes = sample.system.process(self.pid).map_or(0, Process::memory);
                self.last_bytes.store(bytes, Ordering::Relaxed);
                sample.taken_at = Some(Instant::now());
            }
        }
        self.last_bytes.load(Ordering::Relaxed)
    }
}

/// Bytes rendered as megabytes with two decimals, e.g. `12.34MB`
pub fn format_megabytes(bytes: i64) -> String {
    format!("{:.2}MB", bytes as f64 / (1024.0 * 1024.0))
}
