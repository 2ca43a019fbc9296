//! Statistics tracking for the DNS filter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// How a single datagram was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Blocked,
    Forwarded,
    ServFail,
    Dropped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Blocked => "BLOCKED",
            Outcome::Forwarded => "FORWARDED",
            Outcome::ServFail => "SERVFAIL",
            Outcome::Dropped => "DROPPED",
        }
    }
}

/// Atomic statistics for tracking relay performance.
pub struct Stats {
    started: Instant,
    requests: AtomicU64,
    blocked: AtomicU64,
    forwarded: AtomicU64,
    servfail: AtomicU64,
    dropped: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            servfail: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
        }
    }

    pub fn record(&self, outcome: Outcome, response_time_ms: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Blocked => &self.blocked,
            Outcome::Forwarded => &self.forwarded,
            Outcome::ServFail => &self.servfail,
            Outcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add((response_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let blocked = self.blocked.swap(0, Ordering::Relaxed);
        let forwarded = self.forwarded.swap(0, Ordering::Relaxed);
        let servfail = self.servfail.swap(0, Ordering::Relaxed);
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if requests > 0 {
            (total_us as f64 / requests as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            requests,
            blocked,
            forwarded,
            servfail,
            dropped,
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub blocked: u64,
    pub forwarded: u64,
    pub servfail: u64,
    pub dropped: u64,
    pub avg_response_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_counts_each_outcome() {
        let stats = Stats::new();

        stats.record(Outcome::Blocked, 1.0);
        stats.record(Outcome::Forwarded, 3.0);
        stats.record(Outcome::Forwarded, 5.0);
        stats.record(Outcome::ServFail, 3.0);
        stats.record(Outcome::Dropped, 0.0);

        let snapshot = stats.snapshot_and_reset();
        assert_eq!(snapshot.requests, 5);
        assert_eq!(snapshot.blocked, 1);
        assert_eq!(snapshot.forwarded, 2);
        assert_eq!(snapshot.servfail, 1);
        assert_eq!(snapshot.dropped, 1);
        assert!((snapshot.avg_response_ms - 2.4).abs() < 0.01);
    }

    #[test]
    fn snapshot_resets_counters() {
        let stats = Stats::new();
        stats.record(Outcome::Blocked, 1.0);

        stats.snapshot_and_reset();
        let snapshot = stats.snapshot_and_reset();

        assert_eq!(snapshot.requests, 0);
        assert_eq!(snapshot.avg_response_ms, 0.0);
    }
}
