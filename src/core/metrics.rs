//! Windowed traffic metrics.
//!
//! One shared aggregator finalizes a requests-per-second figure every
//! second and keeps a cumulative attack counter. Updates are tiny and
//! frequent, so the state sits behind a plain mutex rather than
//! anything durable.

use std::time::Instant;

use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Window length for the rolling rps figure, in seconds
const WINDOW_SECS: f64 = 1.0;

/// Reported rps decays to zero after this much idle time, in seconds
const IDLE_TIMEOUT_SECS: f64 = 3.0;

#[derive(Debug)]
struct MetricsState {
    count: u64,
    rps: f64,
    attacks: u64,
    window_start: f64,
    last_update: f64,
}

/// Point-in-time metrics view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub rps: f64,
    pub attacks: u64,
}

/// Shared windowed throughput and attack counters
pub struct TrafficMetrics {
    inner: Mutex<MetricsState>,
    epoch: Instant,
}

impl TrafficMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsState {
                count: 0,
                rps: 0.0,
                attacks: 0,
                window_start: 0.0,
                last_update: 0.0,
            }),
            epoch: Instant::now(),
        }
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Count one request; finalizes the window once a second has passed
    pub fn record(&self, observed_rps: f64, is_attack: bool) {
        counter!("gateway_requests_total", 1);
        histogram!("gateway_source_rps", observed_rps);
        if is_attack {
            counter!("gateway_attacks_detected_total", 1);
        }
        self.record_at(is_attack, self.now());
    }

    fn record_at(&self, is_attack: bool, now: f64) {
        let mut state = self.inner.lock();

        state.count += 1;
        state.last_update = now;
        if is_attack {
            state.attacks += 1;
        }

        let elapsed = now - state.window_start;
        if elapsed >= WINDOW_SECS {
            state.rps = (state.count as f64 / elapsed * 100.0).round() / 100.0;
            state.count = 0;
            state.window_start = now;
        }
    }

    /// Last finalized rate and the cumulative attack count; the rate
    /// reads zero once traffic has been idle past the timeout
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(self.now())
    }

    fn snapshot_at(&self, now: f64) -> MetricsSnapshot {
        let state = self.inner.lock();

        let rps = if now - state.last_update > IDLE_TIMEOUT_SECS {
            0.0
        } else {
            state.rps
        };

        MetricsSnapshot {
            rps,
            attacks: state.attacks,
        }
    }
}

impl Default for TrafficMetrics {
    fn default() -> Self {
        Self::new()
    }
}
