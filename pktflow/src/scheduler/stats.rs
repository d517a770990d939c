//! Shared runtime statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Point-in-time view of one stage, published every debug period.
#[derive(Debug, Clone)]
pub struct StageSnapshot {
    /// Stage name, e.g. `"handler-3"`.
    pub name: String,
    /// Live replica count (always 1 for unclonable stages).
    pub replicas: usize,
    /// Occupancy of the stage's input ring, if it has one.
    pub input_occupancy: Option<usize>,
    /// Packets per second observed over the last check window (clonable
    /// stages only; 0 before the first window closes).
    pub rate_pps: u64,
}

/// Counters and per-stage snapshots shared between the scheduler and
/// embedding applications.
///
/// Obtain a handle with [`GraphBuilder::stats`](crate::GraphBuilder::stats)
/// before `start`; counters are live, snapshots refresh every
/// `debug_period_ms`.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    dropped: AtomicU64,
    freed: AtomicU64,
    stages: Mutex<Vec<StageSnapshot>>,
}

impl SchedulerStats {
    /// Total packets shed on overflowing enqueues. Monotonically
    /// non-decreasing.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total packets freed through the stop subsystem (drained or
    /// direct-stopped). Monotonically non-decreasing.
    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }

    /// Latest per-stage snapshots.
    pub fn snapshot(&self) -> Vec<StageSnapshot> {
        self.stages.lock().unwrap().clone()
    }

    #[inline]
    pub(crate) fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_freed(&self, n: u64) {
        self.freed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn publish(&self, stages: Vec<StageSnapshot>) {
        *self.stages.lock().unwrap() = stages;
    }
}
