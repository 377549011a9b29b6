//! Dispatch metrics collection.
//!
//! A ring buffer of module callback durations plus running counters for
//! polls, invocations and skipped entries. Storage is allocated once at
//! construction; recording never allocates.

use serde::Serialize;
use std::time::Duration;

/// Callback latency and dispatch counters.
#[derive(Debug)]
pub struct DispatchMetrics {
    /// Ring buffer of callback durations in nanoseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Dispatcher polls performed.
    polls: u64,
    /// Module callbacks invoked.
    invoked: u64,
    /// Entries popped but not delivered.
    skipped: u64,
    /// Minimum observed callback time in nanoseconds.
    min_ns: u64,
    /// Maximum observed callback time in nanoseconds.
    max_ns: u64,
    /// Sum of all callback times for mean calculation.
    sum_ns: u64,
    /// Callbacks that exceeded the slow threshold.
    slow_count: u64,
    /// Slow-callback threshold in nanoseconds.
    slow_threshold_ns: u64,
}

impl DispatchMetrics {
    /// Create a new metrics collector.
    ///
    /// # Arguments
    ///
    /// * `histogram_size` - Number of callback durations to retain.
    /// * `slow_threshold` - Callbacks running longer than this count as slow.
    #[must_use]
    pub fn new(histogram_size: usize, slow_threshold: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            polls: 0,
            invoked: 0,
            skipped: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            slow_count: 0,
            slow_threshold_ns: saturating_nanos(slow_threshold),
        }
    }

    /// Count one dispatcher poll.
    pub fn record_poll(&mut self) {
        self.polls += 1;
    }

    /// Count one skipped entry.
    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    /// Record a completed module callback.
    ///
    /// Returns true if the callback exceeded the slow threshold.
    pub fn record_invocation(&mut self, duration: Duration) -> bool {
        let ns = saturating_nanos(duration);

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.invoked += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        let slow = ns > self.slow_threshold_ns;
        if slow {
            self.slow_count += 1;
        }
        slow
    }

    /// Total dispatcher polls.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Total module callbacks invoked.
    #[must_use]
    pub fn invoked(&self) -> u64 {
        self.invoked
    }

    /// Total entries skipped.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Number of callbacks over the slow threshold.
    #[must_use]
    pub fn slow_count(&self) -> u64 {
        self.slow_count
    }

    /// Minimum observed callback time.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.invoked > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Maximum observed callback time.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.invoked > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean callback time.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.invoked > 0).then(|| Duration::from_nanos(self.sum_ns / self.invoked))
    }

    /// Compute multiple percentiles from the ring buffer.
    ///
    /// Invalid percentiles (< 0, > 100, or NaN) are skipped.
    #[must_use]
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, Duration)> {
        if self.sample_count == 0 {
            return vec![];
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        percentiles
            .iter()
            .filter(|p| (0.0..=100.0).contains(*p))
            .map(|&p| {
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
                let idx = idx.min(sorted.len() - 1);
                (p, Duration::from_nanos(sorted[idx]))
            })
            .collect()
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let any = self.invoked > 0;
        MetricsSnapshot {
            polls: self.polls,
            invoked: self.invoked,
            skipped: self.skipped,
            slow_count: self.slow_count,
            min_ns: any.then_some(self.min_ns),
            max_ns: any.then_some(self.max_ns),
            mean_ns: any.then(|| self.sum_ns / self.invoked),
            sample_count: self.sample_count,
        }
    }

    /// Reset all metrics to initial state.
    pub fn reset(&mut self) {
        self.samples.fill(0);
        self.write_pos = 0;
        self.sample_count = 0;
        self.polls = 0;
        self.invoked = 0;
        self.skipped = 0;
        self.min_ns = u64::MAX;
        self.max_ns = 0;
        self.sum_ns = 0;
        self.slow_count = 0;
    }
}

fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Immutable snapshot of dispatch metrics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Dispatcher polls performed.
    pub polls: u64,
    /// Module callbacks invoked.
    pub invoked: u64,
    /// Entries popped but not delivered.
    pub skipped: u64,
    /// Callbacks over the slow threshold.
    pub slow_count: u64,
    /// Minimum callback time in nanoseconds.
    pub min_ns: Option<u64>,
    /// Maximum callback time in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean callback time in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Number of samples in the histogram.
    pub sample_count: usize,
}
