//! Delay-based limit after TCP Vegas
//!
//! The queue size is estimated as `limit * (1 - rtt_noload / rtt)`. Below
//! `alpha` the limit grows, above `beta` it shrinks, in between it holds.
//! The no-load RTT is re-learned periodically by a jittered probe so that a
//! permanent latency shift does not pin the limit down forever.

use super::Sample;
use crate::config::VegasConfig;
use rand::Rng;

const PROBE_MULTIPLIER: f64 = 30.0;

/// Vegas limit state
#[derive(Debug, Clone)]
pub struct VegasLimit {
    estimated_limit: f64,
    max_limit: usize,
    alpha: f64,
    beta: f64,
    smoothing: f64,
    rtt_noload: u64,
    probe_count: u64,
    probe_jitter: f64,
}

impl VegasLimit {
    /// Build from configuration
    pub fn from_config(config: &VegasConfig) -> Self {
        let max_limit = config.max_limit.max(1);
        VegasLimit {
            estimated_limit: config.initial_limit.clamp(1, max_limit) as f64,
            max_limit,
            alpha: config.alpha,
            beta: config.beta,
            smoothing: config.smoothing,
            rtt_noload: 0,
            probe_count: 0,
            probe_jitter: next_jitter(),
        }
    }

    /// Current ceiling
    pub fn limit(&self) -> usize {
        self.estimated_limit as usize
    }

    /// Lowest RTT observed since the last probe, in nanoseconds
    pub fn rtt_noload(&self) -> u64 {
        self.rtt_noload
    }

    pub(crate) fn update(&mut self, sample: &Sample) -> usize {
        self.probe_count += 1;
        if self.should_probe() {
            tracing::debug!(
                limit = self.limit(),
                rtt_nanos = sample.rtt_nanos,
                "Vegas probe, resetting no-load RTT"
            );
            self.probe_jitter = next_jitter();
            self.probe_count = 0;
            self.rtt_noload = sample.rtt_nanos;
            return self.limit();
        }

        if self.rtt_noload == 0 || sample.rtt_nanos < self.rtt_noload {
            self.rtt_noload = sample.rtt_nanos;
            return self.limit();
        }

        self.update_estimated_limit(sample)
    }

    fn should_probe(&self) -> bool {
        self.probe_jitter * PROBE_MULTIPLIER * self.estimated_limit <= self.probe_count as f64
    }

    fn update_estimated_limit(&mut self, sample: &Sample) -> usize {
        let current = self.estimated_limit;
        let queue_size =
            (current * (1.0 - self.rtt_noload as f64 / sample.rtt_nanos as f64)).ceil();

        let new_limit = if sample.did_drop {
            current - log10(current)
        } else if (sample.inflight as f64) * 2.0 < current {
            // App-limited: no signal about the real capacity
            return self.limit();
        } else {
            let threshold = log10(current);
            if queue_size <= threshold {
                current + self.beta
            } else if queue_size < self.alpha {
                current + log10(current)
            } else if queue_size > self.beta {
                current - log10(current)
            } else {
                return self.limit();
            }
        };

        let bounded = new_limit.min(self.max_limit as f64).max(1.0);
        self.estimated_limit = (1.0 - self.smoothing) * current + self.smoothing * bounded;
        self.limit()
    }
}

fn log10(limit: f64) -> f64 {
    limit.max(1.0).log10()
}

fn next_jitter() -> f64 {
    rand::thread_rng().gen_range(0.5..1.0)
}
