//! Process memory sampling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::warn;

/// Source of memory usage readings.
pub trait MemorySampler: Send {
    /// Resident memory of this process as a percentage of system memory.
    fn usage_percent(&mut self) -> Option<f64>;
}

/// Samples the current process through `sysinfo`.
pub struct ProcessMemorySampler {
    system: System,
    pid: Option<Pid>,
}

impl ProcessMemorySampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        let mut system = System::new();
        system.refresh_memory();
        Self { system, pid }
    }
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn usage_percent(&mut self) -> Option<f64> {
        let pid = self.pid?;
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let rss = self.system.process(pid)?.memory();
        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        Some(rss as f64 / total as f64 * 100.0)
    }
}

/// Result of one [`MemoryGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryStatus {
    pub usage_percent: f64,
    pub exceeded: bool,
}

struct GuardState {
    sampler: Box<dyn MemorySampler>,
    last: Option<(Instant, f64)>,
}

/// Advisory memory check run before each file.
///
/// Readings are reused for `interval` so per-file checks stay cheap.
pub struct MemoryGuard {
    threshold_percent: f64,
    interval: Duration,
    state: Mutex<GuardState>,
    trips: AtomicU64,
}

impl MemoryGuard {
    pub fn new(threshold_percent: f64) -> Self {
        Self::with_sampler(threshold_percent, Box::new(ProcessMemorySampler::new()))
    }

    pub fn with_sampler(threshold_percent: f64, sampler: Box<dyn MemorySampler>) -> Self {
        Self {
            threshold_percent,
            interval: Duration::from_millis(250),
            state: Mutex::new(GuardState {
                sampler,
                last: None,
            }),
            trips: AtomicU64::new(0),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn check(&self) -> MemoryStatus {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let usage_percent = match state.last {
            Some((at, value)) if at.elapsed() < self.interval => value,
            _ => {
                // An unavailable reading never trips the guard.
                let value = state.sampler.usage_percent().unwrap_or(0.0);
                state.last = Some((Instant::now(), value));
                value
            }
        };
        drop(state);

        let exceeded = usage_percent > self.threshold_percent;
        if exceeded {
            self.trips.fetch_add(1, Ordering::Relaxed);
            warn!(
                usage = usage_percent,
                threshold = self.threshold_percent,
                "memory threshold exceeded"
            );
        }
        MemoryStatus {
            usage_percent,
            exceeded,
        }
    }

    /// Number of checks that reported `exceeded`.
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }
}
