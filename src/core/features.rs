//! Per-source behavioral feature extraction.
//!
//! This module tracks a sliding window of request activity for every
//! source and derives the five-signal feature vector the detector
//! evaluates: request rate, burst size, path diversity, request pacing,
//! and error rate.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use dashmap::DashMap;

/// Lookback window for feature computation, in seconds
const WINDOW_SECS: f64 = 5.0;

/// Maximum number of recent paths retained per source
const PATH_HISTORY: usize = 50;

/// Five-signal behavioral feature vector for a single source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    /// Requests per second over the window
    pub rps: f64,
    /// Maximum requests falling in the same 1-second bucket
    pub burst: u32,
    /// Distinct paths / (retained paths + 1)
    pub unique_path_ratio: f64,
    /// Mean gap between consecutive requests, in seconds
    pub avg_gap: f64,
    /// Error responses / (retained paths + 1)
    pub error_rate: f64,
}

impl FeatureVector {
    /// Vector for a source with no retained history.
    ///
    /// The gap defaults to 1.0 so sparse traffic reads as slow rather
    /// than bursty.
    pub fn empty() -> Self {
        Self {
            rps: 0.0,
            burst: 0,
            unique_path_ratio: 0.0,
            avg_gap: 1.0,
            error_rate: 0.0,
        }
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::empty()
    }
}

/// Sliding request window for a single source
#[derive(Debug, Default)]
struct ClientWindow {
    /// Request timestamps in monotonic seconds
    timestamps: VecDeque<f64>,
    /// Most recently requested paths
    paths: VecDeque<String>,
    /// Running count of error-status responses
    errors: u32,
    /// Last activity stamp, used for eviction
    last_seen: f64,
}

impl ClientWindow {
    fn record(&mut self, path: &str, status: u16, now: f64) {
        self.timestamps.push_back(now);
        self.paths.push_back(path.to_string());
        while self.paths.len() > PATH_HISTORY {
            self.paths.pop_front();
        }
        if status >= 400 {
            self.errors += 1;
        }
        self.last_seen = now;
    }

    fn compute(&mut self, now: f64) -> FeatureVector {
        while matches!(self.timestamps.front(), Some(&t) if now - t >= WINDOW_SECS) {
            self.timestamps.pop_front();
        }
        while self.paths.len() > PATH_HISTORY {
            self.paths.pop_front();
        }

        let rps = self.timestamps.len() as f64 / WINDOW_SECS;

        let mut buckets: HashMap<i64, u32> = HashMap::new();
        for &t in &self.timestamps {
            *buckets.entry(t.floor() as i64).or_insert(0) += 1;
        }
        let burst = buckets.values().copied().max().unwrap_or(0);

        let distinct = {
            let mut seen: Vec<&str> = self.paths.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            seen.len()
        };
        let unique_path_ratio = distinct as f64 / (self.paths.len() + 1) as f64;

        let avg_gap = if self.timestamps.len() < 2 {
            1.0
        } else {
            let gaps: f64 = self
                .timestamps
                .iter()
                .zip(self.timestamps.iter().skip(1))
                .map(|(a, b)| b - a)
                .sum();
            gaps / (self.timestamps.len() - 1) as f64
        };

        let error_rate = self.errors as f64 / (self.paths.len() + 1) as f64;

        FeatureVector {
            rps,
            burst,
            unique_path_ratio,
            avg_gap,
            error_rate,
        }
    }
}

/// Tracks per-source sliding windows and computes feature vectors.
///
/// Entries are guarded per shard, so unrelated sources never contend on
/// a single lock. The table is bounded: once it grows past the
/// configured cap, the least recently seen sources are evicted.
#[derive(Debug)]
pub struct FeatureTracker {
    windows: DashMap<String, ClientWindow>,
    epoch: Instant,
    max_sources: usize,
}

impl FeatureTracker {
    pub fn new(max_sources: usize) -> Self {
        Self {
            windows: DashMap::new(),
            epoch: Instant::now(),
            max_sources,
        }
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Record a request from `source`
    pub fn record(&self, source: &str, path: &str, status: u16) {
        self.record_at(source, path, status, self.now());
    }

    pub(crate) fn record_at(&self, source: &str, path: &str, status: u16, now: f64) {
        self.windows
            .entry(source.to_string())
            .or_default()
            .record(path, status, now);
        self.maybe_evict();
    }

    /// Bump the error counter for `source` once an origin status is known.
    ///
    /// Adds no timestamp or path sample, so it only moves the error rate.
    pub fn note_error(&self, source: &str) {
        if let Some(mut window) = self.windows.get_mut(source) {
            window.errors += 1;
        }
    }

    /// Compute the current feature vector for `source`.
    ///
    /// Prunes the window first; an unknown source yields the empty
    /// vector rather than an error.
    pub fn compute_features(&self, source: &str) -> FeatureVector {
        self.compute_features_at(source, self.now())
    }

    pub(crate) fn compute_features_at(&self, source: &str, now: f64) -> FeatureVector {
        match self.windows.get_mut(source) {
            Some(mut window) => window.compute(now),
            None => FeatureVector::empty(),
        }
    }

    /// Number of sources currently tracked
    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }

    /// Evict least-recently-seen windows once the table outgrows the cap.
    ///
    /// Shrinks to 90% of the cap so the scan amortizes instead of
    /// running on every insert at the boundary.
    fn maybe_evict(&self) {
        if self.windows.len() <= self.max_sources {
            return;
        }
        let target = self.max_sources * 9 / 10;

        let mut by_age: Vec<(String, f64)> = self
            .windows
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_seen))
            .collect();
        by_age.sort_by(|a, b| a.1.total_cmp(&b.1));

        let excess = by_age.len().saturating_sub(target);
        for (source, _) in by_age.into_iter().take(excess) {
            self.windows.remove(&source);
        }
    }
}
