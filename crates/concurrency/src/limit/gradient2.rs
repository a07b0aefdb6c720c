//! Gradient limit with a long-window baseline
//!
//! Instead of a minimum RTT, the baseline is an exponential average over
//! `long_window` samples. When the baseline drifts far above the current RTT
//! (load went away) it decays so the limit can climb back quickly.

use super::measurement::ExpAvgMeasurement;
use super::Sample;
use crate::config::Gradient2Config;

const WARMUP_WINDOW: usize = 10;

/// Gradient2 limit state
#[derive(Debug, Clone)]
pub struct Gradient2Limit {
    estimated_limit: f64,
    min_limit: usize,
    max_limit: usize,
    smoothing: f64,
    rtt_tolerance: f64,
    queue_size: f64,
    last_rtt: u64,
    long_rtt: ExpAvgMeasurement,
}

impl Gradient2Limit {
    /// Build from configuration
    pub fn from_config(config: &Gradient2Config) -> Self {
        let min_limit = config.min_limit.max(1);
        let max_limit = config.max_limit.max(min_limit);
        Gradient2Limit {
            estimated_limit: config.initial_limit.clamp(min_limit, max_limit) as f64,
            min_limit,
            max_limit,
            smoothing: config.smoothing,
            rtt_tolerance: config.rtt_tolerance,
            queue_size: config.queue_size as f64,
            last_rtt: 0,
            long_rtt: ExpAvgMeasurement::new(config.long_window, WARMUP_WINDOW),
        }
    }

    /// Current ceiling
    pub fn limit(&self) -> usize {
        self.estimated_limit as usize
    }

    /// Long-window RTT average in nanoseconds
    pub fn long_rtt(&self) -> f64 {
        self.long_rtt.get()
    }

    pub(crate) fn update(&mut self, sample: &Sample) -> usize {
        self.last_rtt = sample.rtt_nanos;
        let short_rtt = sample.rtt_nanos as f64;
        let long_rtt = self.long_rtt.add(short_rtt);

        // Recover faster once the load that inflated the baseline is gone
        if short_rtt > 0.0 && long_rtt / short_rtt > 2.0 {
            self.long_rtt.update(|current| current * 0.95);
        }

        let current = self.estimated_limit;
        if (sample.inflight as f64) < current / 2.0 {
            return self.limit();
        }

        let gradient = if short_rtt == 0.0 {
            1.0
        } else {
            (self.rtt_tolerance * self.long_rtt.get() / short_rtt).clamp(0.5, 1.0)
        };

        let new_limit = current * gradient + self.queue_size;
        let smoothed = current * (1.0 - self.smoothing) + new_limit * self.smoothing;
        self.estimated_limit = smoothed
            .min(self.max_limit as f64)
            .max(self.min_limit as f64);
        self.limit()
    }
}
