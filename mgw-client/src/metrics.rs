//! # Pool Metrics
//!
//! Provide lightweight counters and a latency histogram for calls routed
//! through the pool.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply.
//! 2. **Fixed Buckets**: Histogram buckets live in a contiguous array.
//! 3. **Plain Snapshots**: Readers get owned structs, never live atomics.
//!
//! ## Notes
//! - Bucket boundaries are milliseconds; a manager round trip is network
//!   bound, so sub-millisecond resolution buys nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default latency bucket boundaries in milliseconds.
pub const DEFAULT_LATENCY_BUCKETS_MS: [u64; 12] =
    [1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000];

/// Snapshot of all pool metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    /// Calls executed by workers.
    pub requests_total: u64,
    /// Calls answered with a non-success retcode.
    pub remote_errors: u64,
    /// Calls failed by I/O or framing errors.
    pub transport_errors: u64,
    /// Blocking calls whose caller stopped waiting.
    pub timeouts: u64,
    /// Responses dropped because the slot was gone.
    pub abandoned: u64,
    /// Successful reconnects across all sessions.
    pub reconnects: u64,
    /// Calls currently executing.
    pub inflight: u64,
    /// Round-trip latency histogram.
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    /// Bucket boundaries in milliseconds.
    pub bounds_ms: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    /// Total number of samples.
    pub samples: u64,
    /// Sum of latencies in microseconds.
    pub sum_us: u64,
}

impl LatencySnapshot {
    /// Mean latency, or zero with no samples.
    pub fn mean(&self) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_us / self.samples)
    }
}

/// Metrics shared by every session and worker of one pool.
///
/// `Ordering::Relaxed` is enough: no reader needs cross-field consistency.
pub struct PoolMetrics {
    requests_total: AtomicU64,
    remote_errors: AtomicU64,
    transport_errors: AtomicU64,
    timeouts: AtomicU64,
    abandoned: AtomicU64,
    reconnects: AtomicU64,
    inflight: AtomicU64,
    latency: LatencyHistogram,
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_MS.to_vec())
    }

    /// Creates metrics with custom bucket boundaries (ascending milliseconds).
    pub fn with_latency_buckets(bounds_ms: Vec<u64>) -> Self {
        PoolMetrics {
            requests_total: AtomicU64::new(0),
            remote_errors: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            inflight: AtomicU64::new(0),
            latency: LatencyHistogram::new(bounds_ms),
        }
    }

    /// Records that a worker started executing a call.
    pub fn record_request_start(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the end of a call and its round-trip latency.
    pub fn record_request_end(&self, latency: Duration) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    pub fn record_remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters and histogram buckets.
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

/// Fixed-bucket latency histogram.
///
/// Bucket selection is a linear scan; the list is short and stays hot.
pub struct LatencyHistogram {
    bounds_ms: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// Creates a histogram with `bounds_ms.len() + 1` buckets (last is overflow).
    pub fn new(bounds_ms: Vec<u64>) -> Self {
        let buckets = (0..=bounds_ms.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_ms,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    /// Records one sample.
    ///
    /// **Logic**:
    /// 1. Add the microsecond value to `sum_us` and bump `samples`.
    /// 2. Pick the first bucket whose bound covers the sample, else overflow.
    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);

        let index = self
            .bounds_ms
            .iter()
            .position(|&bound| micros <= bound.saturating_mul(1_000))
            .unwrap_or(self.bounds_ms.len());
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_ms: self.bounds_ms.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}
