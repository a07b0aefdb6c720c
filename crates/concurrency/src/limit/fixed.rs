//! Constant concurrency ceiling

use super::Sample;
use crate::config::FixedConfig;

/// A limit that never changes
#[derive(Debug, Clone)]
pub struct FixedLimit {
    limit: usize,
}

impl FixedLimit {
    /// Fixed limit of `limit` concurrent requests (at least 1)
    pub fn of(limit: usize) -> Self {
        FixedLimit {
            limit: limit.max(1),
        }
    }

    /// Build from configuration
    pub fn from_config(config: &FixedConfig) -> Self {
        Self::of(config.limit)
    }

    /// Current ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn update(&mut self, _sample: &Sample) -> usize {
        self.limit
    }
}
