//! Gradient limit
//!
//! Compares each RTT against the minimum RTT seen since the last reset. The
//! ratio (clamped to `[0.5, 1.0]`) scales the limit, and a queue allowance of
//! `sqrt(limit)` keeps it probing upwards. The minimum is forgotten every
//! `probe_interval` samples (jittered) so the limit can recover from a
//! permanently shifted baseline.

use super::measurement::MinimumMeasurement;
use super::Sample;
use crate::config::GradientConfig;
use rand::Rng;

const MIN_QUEUE_SIZE: f64 = 4.0;

/// Gradient limit state
#[derive(Debug, Clone)]
pub struct GradientLimit {
    estimated_limit: f64,
    min_limit: usize,
    max_limit: usize,
    smoothing: f64,
    rtt_tolerance: f64,
    backoff_ratio: f64,
    probe_interval: u64,
    reset_rtt_counter: i64,
    last_rtt: u64,
    rtt_noload: MinimumMeasurement,
}

impl GradientLimit {
    /// Build from configuration
    pub fn from_config(config: &GradientConfig) -> Self {
        let min_limit = config.min_limit.max(1);
        let max_limit = config.max_limit.max(min_limit);
        let mut limit = GradientLimit {
            estimated_limit: config.initial_limit.clamp(min_limit, max_limit) as f64,
            min_limit,
            max_limit,
            smoothing: config.smoothing,
            rtt_tolerance: config.rtt_tolerance,
            backoff_ratio: config.backoff_ratio,
            probe_interval: config.probe_interval,
            reset_rtt_counter: 0,
            last_rtt: 0,
            rtt_noload: MinimumMeasurement::default(),
        };
        limit.reset_rtt_counter = limit.next_probe_countdown();
        limit
    }

    /// Current ceiling
    pub fn limit(&self) -> usize {
        self.estimated_limit as usize
    }

    /// Most recent RTT sample, 0 right after a probe reset
    pub fn last_rtt(&self) -> u64 {
        self.last_rtt
    }

    fn next_probe_countdown(&self) -> i64 {
        if self.probe_interval == 0 {
            return i64::MAX;
        }
        let jitter = rand::thread_rng().gen_range(0..self.probe_interval);
        (self.probe_interval + jitter) as i64
    }

    fn queue_size(&self) -> f64 {
        self.estimated_limit.sqrt().max(MIN_QUEUE_SIZE)
    }

    pub(crate) fn update(&mut self, sample: &Sample) -> usize {
        self.last_rtt = sample.rtt_nanos;
        let rtt_noload = self.rtt_noload.add(sample.rtt_nanos);
        let queue_size = self.queue_size();

        if self.probe_interval != 0 {
            self.reset_rtt_counter -= 1;
            if self.reset_rtt_counter <= 0 {
                self.reset_rtt_counter = self.next_probe_countdown();
                self.estimated_limit = (self.min_limit as f64).max(queue_size);
                self.rtt_noload.reset();
                self.last_rtt = 0;
                tracing::debug!(limit = self.limit(), "Gradient probe, resetting limit");
                return self.limit();
            }
        }

        let gradient = if sample.rtt_nanos == 0 {
            1.0
        } else {
            (self.rtt_tolerance * rtt_noload as f64 / sample.rtt_nanos as f64).clamp(0.5, 1.0)
        };

        let current = self.estimated_limit;
        let mut new_limit = if sample.did_drop {
            current * self.backoff_ratio
        } else if (sample.inflight as f64) < current / 2.0 {
            return self.limit();
        } else {
            current * gradient + queue_size
        };

        if new_limit < current {
            new_limit =
                (self.min_limit as f64).max(current * (1.0 - self.smoothing) + self.smoothing * new_limit);
        }
        self.estimated_limit = queue_size.max(new_limit.min(self.max_limit as f64));
        self.limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GradientConfig {
        GradientConfig {
            initial_limit: 20,
            min_limit: 10,
            max_limit: 100,
            rtt_tolerance: 2.0,
            smoothing: 0.2,
            backoff_ratio: 0.9,
            probe_interval: 0,
        }
    }

    #[test]
    fn test_grows_while_rtt_is_stable() {
        let mut limit = GradientLimit::from_config(&config());
        // gradient 1.0, queue allowance max(4, sqrt(20)) = 4.47
        assert_eq!(limit.update(&Sample::success(0, 100, 20)), 24);
    }

    #[test]
    fn test_shrinks_when_rtt_exceeds_tolerance() {
        let mut limit = GradientLimit::from_config(&config());
        limit.update(&Sample::success(0, 100, 20));
        let before = limit.limit();
        // 10x the minimum RTT: gradient clamps at 0.5
        let after = limit.update(&Sample::success(0, 1_000, before));
        assert!(after < before, "{} should be below {}", after, before);
        assert!(after >= 10);
    }

    #[test]
    fn test_backoff_on_drop() {
        let mut limit = GradientLimit::from_config(&config());
        let after = limit.update(&Sample::dropped(0, 100, 20));
        assert!(after < 20);
    }

    #[test]
    fn test_app_limited_holds() {
        let mut limit = GradientLimit::from_config(&config());
        assert_eq!(limit.update(&Sample::success(0, 100, 2)), 20);
    }

    #[test]
    fn test_never_exceeds_max() {
        let mut limit = GradientLimit::from_config(&config());
        for _ in 0..100 {
            let inflight = limit.limit();
            limit.update(&Sample::success(0, 100, inflight));
        }
        assert_eq!(limit.limit(), 100);
    }

    #[test]
    fn test_probe_resets_limit_and_noload() {
        let mut cfg = config();
        cfg.probe_interval = 1;
        let mut limit = GradientLimit::from_config(&cfg);
        // countdown is 1 + jitter(0..1) = 1, so the first sample probes
        assert_eq!(limit.update(&Sample::success(0, 100, 20)), 10);
        assert_eq!(limit.last_rtt(), 0);
    }
}
