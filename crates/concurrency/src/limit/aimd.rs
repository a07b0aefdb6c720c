//! Additive-increase / multiplicative-decrease limit

use super::Sample;
use crate::config::AimdConfig;

/// Loss-based limit: grows by one per successful sample while the limiter is
/// actually saturated, shrinks by `backoff_ratio` on a drop or a timeout.
#[derive(Debug, Clone)]
pub struct AimdLimit {
    limit: usize,
    min_limit: usize,
    max_limit: usize,
    backoff_ratio: f64,
    timeout_nanos: u64,
}

impl AimdLimit {
    /// Build from configuration
    pub fn from_config(config: &AimdConfig) -> Self {
        let min_limit = config.min_limit.max(1);
        let max_limit = config.max_limit.max(min_limit);
        AimdLimit {
            limit: config.initial_limit.clamp(min_limit, max_limit),
            min_limit,
            max_limit,
            backoff_ratio: config.backoff_ratio,
            timeout_nanos: config.request_timeout().as_nanos() as u64,
        }
    }

    /// Current ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn update(&mut self, sample: &Sample) -> usize {
        let mut current = self.limit;

        if sample.did_drop || sample.rtt_nanos > self.timeout_nanos {
            current = (current as f64 * self.backoff_ratio) as usize;
        } else if sample.inflight * 2 >= current {
            // Only grow while the limit is actually the bottleneck
            current += 1;
        }

        self.limit = current.clamp(self.min_limit, self.max_limit);
        self.limit
    }
}
