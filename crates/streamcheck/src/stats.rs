use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tracing::info;

use crate::probe::{FailureKind, Outcome, ProbeVerdict};

/// Counters for one dispatcher run, updated lock-free by the workers
#[derive(Debug, Default)]
pub struct RunStats {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    live: AtomicU64,
    dead: AtomicU64,
    too_slow: AtomicU64,
    unknown: AtomicU64,
    /// Dead verdicts that came from the host gate without a request
    gated: AtomicU64,
    /// Dead verdicts caused by the batch deadline
    expired: AtomicU64,
}

/// Point-in-time copy of [`RunStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStatsSnapshot {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub live: u64,
    pub dead: u64,
    pub too_slow: u64,
    pub unknown: u64,
    pub gated: u64,
    pub expired: u64,
}

impl RunStatsSnapshot {
    pub fn total(&self) -> u64 {
        self.live + self.dead + self.too_slow + self.unknown
    }
}

/// Marks one probe as running until dropped
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    stats: &'a RunStats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlightGuard { stats: self }
    }

    pub fn record(&self, verdict: &ProbeVerdict) {
        let counter = match verdict.outcome {
            Outcome::Live => &self.live,
            Outcome::Dead => &self.dead,
            Outcome::TooSlow => &self.too_slow,
            Outcome::Unknown => &self.unknown,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match verdict.failure {
            Some(FailureKind::HostGated) => {
                self.gated.fetch_add(1, Ordering::Relaxed);
            }
            Some(FailureKind::Deadline) => {
                self.expired.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            in_flight: self.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.peak_in_flight.load(Ordering::Acquire),
            live: self.live.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            too_slow: self.too_slow.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            gated: self.gated.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        if snapshot.total() == 0 {
            return;
        }
        info!(
            total = snapshot.total(),
            live = snapshot.live,
            dead = snapshot.dead,
            too_slow = snapshot.too_slow,
            unknown = snapshot.unknown,
            host_gated = snapshot.gated,
            deadline_expired = snapshot.expired,
            peak_in_flight = snapshot.peak_in_flight,
            "Probe run finished"
        );
    }
}
