//! Streaming statistics: timings, loads, evictions and visual churn.
//!
//! Feature-gated and runtime-toggled so a release build without the
//! `metrics` feature pays nothing.
//!
//! # Usage
//!
//! ```ignore
//! use cloud_stream::metrics::COLLECT_METRICS;
//!
//! // Compile with --features metrics
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! let snapshot = engine.metrics();
//! println!("avg traversal: {:.1} us", snapshot.avg_traversal_us());
//! ```

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;

/// Runtime toggle for metrics collection.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Check if metrics collection is enabled (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
    #[cfg(feature = "metrics")]
    {
        COLLECT_METRICS.load(Ordering::Relaxed)
    }
    #[cfg(not(feature = "metrics"))]
    {
        false
    }
}

/// The last `limit` samples of a timing or count, with a running sum so
/// the mean is O(1) per frame.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<u64>,
    limit: usize,
    sum: u64,
}

impl RollingWindow {
    pub fn new(limit: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(limit),
            limit,
            sum: 0,
        }
    }

    /// Append `sample`; past the limit the oldest one falls out.
    pub fn push(&mut self, sample: u64) {
        if self.limit == 0 {
            return;
        }
        while self.samples.len() >= self.limit {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(sample);
        self.sum += sample;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0;
    }

    /// Newest sample.
    pub fn last(&self) -> Option<u64> {
        self.samples.back().copied()
    }

    /// Mean of the window, 0 when empty.
    pub fn average(&self) -> f64 {
        match self.samples.len() {
            0 => 0.0,
            n => self.sum as f64 / n as f64,
        }
    }

    /// Smallest and largest sample in the window.
    pub fn min_max(&self) -> Option<(u64, u64)> {
        self.samples.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

impl Default for RollingWindow {
    /// About two seconds of frames at 60 Hz.
    fn default() -> Self {
        Self::new(128)
    }
}

/// Engine-wide streaming statistics.
#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
    // Timing
    /// Traversal pass durations in microseconds.
    pub traversal_timings: RollingWindow,
    /// Point / hierarchy fetch durations in microseconds.
    pub fetch_timings: RollingWindow,

    // Last pass
    /// Rendering point count of the last published pass.
    pub rendering_points: u64,
    /// Nodes scheduled for loading by the last pass.
    pub last_scheduled: u32,

    // Cumulative
    /// Nodes whose point data was loaded.
    pub nodes_loaded: u64,
    /// Hierarchy chunks applied.
    pub chunks_applied: u64,
    /// Nodes evicted from the cache.
    pub evictions: u64,
    /// Failed fetches (points or hierarchy).
    pub fetch_failures: u64,
    pub visuals_created: u64,
    pub visuals_destroyed: u64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset everything but the cumulative counters.
    pub fn reset(&mut self) {
        self.traversal_timings.clear();
        self.fetch_timings.clear();
        self.rendering_points = 0;
        self.last_scheduled = 0;
    }

    /// Record a finished traversal pass.
    pub fn record_traversal(&mut self, timing_us: u64, rendering_points: u64, scheduled: u32) {
        if is_enabled() {
            self.traversal_timings.push(timing_us);
            self.rendering_points = rendering_points;
            self.last_scheduled = scheduled;
        }
    }

    /// Record a completed point fetch.
    pub fn record_load(&mut self, timing_us: u64) {
        if is_enabled() {
            self.fetch_timings.push(timing_us);
            self.nodes_loaded += 1;
        }
    }

    /// Record an applied hierarchy chunk.
    pub fn record_chunk(&mut self, timing_us: u64) {
        if is_enabled() {
            self.fetch_timings.push(timing_us);
            self.chunks_applied += 1;
        }
    }

    pub fn record_fetch_failure(&mut self) {
        if is_enabled() {
            self.fetch_failures += 1;
        }
    }

    pub fn record_evictions(&mut self, count: usize) {
        if is_enabled() {
            self.evictions += count as u64;
        }
    }

    /// Record visuals created and destroyed while applying one frame.
    pub fn record_visuals(&mut self, created: usize, destroyed: usize) {
        if is_enabled() {
            self.visuals_created += created as u64;
            self.visuals_destroyed += destroyed as u64;
        }
    }

    pub fn avg_traversal_us(&self) -> f64 {
        self.traversal_timings.average()
    }

    pub fn avg_fetch_us(&self) -> f64 {
        self.fetch_timings.average()
    }

    /// Visuals currently alive according to the counters.
    pub fn live_visuals(&self) -> u64 {
        self.visuals_created.saturating_sub(self.visuals_destroyed)
    }
}
