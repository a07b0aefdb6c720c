//! Adaptive concurrency limit algorithms
//!
//! Every algorithm consumes [`Sample`]s (round-trip time, in-flight count at
//! acquisition, drop flag) and produces a new ceiling. The set of algorithms
//! is closed: [`AdaptiveLimit`] is an enum and dispatch is a `match`.
//!
//! | variant      | signal                                   |
//! |--------------|------------------------------------------|
//! | `Fixed`      | none, constant ceiling                   |
//! | `Aimd`       | drops and timeouts                       |
//! | `Vegas`      | estimated queue size from RTT / min RTT  |
//! | `Gradient`   | RTT vs. minimum RTT                      |
//! | `Gradient2`  | RTT vs. long-window average RTT          |
//! | `Windowed`   | wraps another variant, batches samples   |

mod aimd;
mod fixed;
mod gradient;
mod gradient2;
mod measurement;
mod vegas;
mod windowed;

pub use aimd::AimdLimit;
pub use fixed::FixedLimit;
pub use gradient::GradientLimit;
pub use gradient2::Gradient2Limit;
pub use vegas::VegasLimit;
pub use windowed::WindowedLimit;

use crate::config::{AlgorithmConfig, WindowConfig};

/// One observation fed into a limit algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Time the request was admitted, in clock nanoseconds
    pub start_nanos: u64,
    /// Round-trip time in nanoseconds
    pub rtt_nanos: u64,
    /// In-flight count at the time the request was admitted
    pub inflight: usize,
    /// Whether the request was dropped or failed
    pub did_drop: bool,
}

impl Sample {
    /// A successful round trip
    pub fn success(start_nanos: u64, rtt_nanos: u64, inflight: usize) -> Self {
        Sample {
            start_nanos,
            rtt_nanos,
            inflight,
            did_drop: false,
        }
    }

    /// A dropped or failed round trip
    pub fn dropped(start_nanos: u64, rtt_nanos: u64, inflight: usize) -> Self {
        Sample {
            start_nanos,
            rtt_nanos,
            inflight,
            did_drop: true,
        }
    }
}

/// A concurrency limit algorithm, selected once at construction
#[derive(Debug, Clone)]
pub enum AdaptiveLimit {
    /// Constant ceiling
    Fixed(FixedLimit),
    /// Additive increase, multiplicative decrease
    Aimd(AimdLimit),
    /// Queue-size estimation
    Vegas(VegasLimit),
    /// Gradient over minimum RTT
    Gradient(GradientLimit),
    /// Gradient over long-window RTT
    Gradient2(Gradient2Limit),
    /// Sample batching around another algorithm
    Windowed(Box<WindowedLimit>),
}

impl AdaptiveLimit {
    /// Build the algorithm described by `config`
    pub fn from_config(config: &AlgorithmConfig) -> Self {
        match config {
            AlgorithmConfig::Fixed(c) => AdaptiveLimit::Fixed(FixedLimit::from_config(c)),
            AlgorithmConfig::Aimd(c) => AdaptiveLimit::Aimd(AimdLimit::from_config(c)),
            AlgorithmConfig::Vegas(c) => AdaptiveLimit::Vegas(VegasLimit::from_config(c)),
            AlgorithmConfig::Gradient(c) => AdaptiveLimit::Gradient(GradientLimit::from_config(c)),
            AlgorithmConfig::Gradient2(c) => {
                AdaptiveLimit::Gradient2(Gradient2Limit::from_config(c))
            }
        }
    }

    /// Wrap this algorithm in a sample window
    pub fn windowed(self, config: &WindowConfig) -> Self {
        AdaptiveLimit::Windowed(Box::new(WindowedLimit::new(self, config)))
    }

    /// Current ceiling, always at least 1
    pub fn limit(&self) -> usize {
        let limit = match self {
            AdaptiveLimit::Fixed(l) => l.limit(),
            AdaptiveLimit::Aimd(l) => l.limit(),
            AdaptiveLimit::Vegas(l) => l.limit(),
            AdaptiveLimit::Gradient(l) => l.limit(),
            AdaptiveLimit::Gradient2(l) => l.limit(),
            AdaptiveLimit::Windowed(l) => l.limit(),
        };
        limit.max(1)
    }

    /// Feed one sample and return the new ceiling
    pub fn update(&mut self, sample: &Sample) -> usize {
        let limit = match self {
            AdaptiveLimit::Fixed(l) => l.update(sample),
            AdaptiveLimit::Aimd(l) => l.update(sample),
            AdaptiveLimit::Vegas(l) => l.update(sample),
            AdaptiveLimit::Gradient(l) => l.update(sample),
            AdaptiveLimit::Gradient2(l) => l.update(sample),
            AdaptiveLimit::Windowed(l) => l.update(sample),
        };
        limit.max(1)
    }

    /// Short algorithm name for logs
    pub fn name(&self) -> &'static str {
        match self {
            AdaptiveLimit::Fixed(_) => "fixed",
            AdaptiveLimit::Aimd(_) => "aimd",
            AdaptiveLimit::Vegas(_) => "vegas",
            AdaptiveLimit::Gradient(_) => "gradient",
            AdaptiveLimit::Gradient2(_) => "gradient2",
            AdaptiveLimit::Windowed(_) => "windowed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AimdConfig, FixedConfig, Gradient2Config, GradientConfig, LimitAlgorithm, VegasConfig,
    };
    use proptest::prelude::*;

    #[test]
    fn test_from_config_selects_variant() {
        let fixed = AdaptiveLimit::from_config(&AlgorithmConfig::Fixed(FixedConfig { limit: 7 }));
        assert_eq!(fixed.name(), "fixed");
        assert_eq!(fixed.limit(), 7);

        let vegas = AdaptiveLimit::from_config(&AlgorithmConfig::Vegas(VegasConfig::default()));
        assert_eq!(vegas.name(), "vegas");
    }

    #[test]
    fn test_windowed_wraps_delegate() {
        let limit = AdaptiveLimit::from_config(&AlgorithmConfig::Fixed(FixedConfig { limit: 3 }))
            .windowed(&WindowConfig::default());
        assert_eq!(limit.name(), "windowed");
        assert_eq!(limit.limit(), 3);
        if let AdaptiveLimit::Windowed(w) = &limit {
            assert_eq!(w.delegate().name(), "fixed");
        } else {
            panic!("expected windowed limit");
        }
    }

    #[test]
    fn test_every_algorithm_name_is_selectable() {
        for algorithm in [
            LimitAlgorithm::Fixed,
            LimitAlgorithm::Aimd,
            LimitAlgorithm::Vegas,
            LimitAlgorithm::Gradient,
            LimitAlgorithm::Gradient2,
        ] {
            let config = crate::config::BackpressureConfig {
                algorithm,
                ..Default::default()
            };
            let limit = AdaptiveLimit::from_config(&config.algorithm_config());
            assert_eq!(limit.name(), algorithm.as_str());
        }
    }

    fn arb_sample() -> impl Strategy<Value = Sample> {
        (0u64..1_000_000_000, 0u64..5_000_000_000, 0usize..2_000, any::<bool>()).prop_map(
            |(start_nanos, rtt_nanos, inflight, did_drop)| Sample {
                start_nanos,
                rtt_nanos,
                inflight,
                did_drop,
            },
        )
    }

    proptest! {
        #[test]
        fn prop_aimd_stays_within_bounds(samples in prop::collection::vec(arb_sample(), 1..200)) {
            let config = AimdConfig::default();
            let mut limit = AdaptiveLimit::from_config(&AlgorithmConfig::Aimd(config.clone()));
            for sample in &samples {
                let l = limit.update(sample);
                prop_assert!(l >= config.min_limit && l <= config.max_limit);
            }
        }

        #[test]
        fn prop_gradient_stays_within_bounds(samples in prop::collection::vec(arb_sample(), 1..200)) {
            let config = GradientConfig::default();
            let mut limit = AdaptiveLimit::from_config(&AlgorithmConfig::Gradient(config.clone()));
            for sample in &samples {
                let l = limit.update(sample);
                prop_assert!(l >= 1 && l <= config.max_limit);
            }
        }

        #[test]
        fn prop_gradient2_stays_within_bounds(samples in prop::collection::vec(arb_sample(), 1..200)) {
            let config = Gradient2Config::default();
            let mut limit = AdaptiveLimit::from_config(&AlgorithmConfig::Gradient2(config.clone()));
            for sample in &samples {
                let l = limit.update(sample);
                prop_assert!(l >= config.min_limit && l <= config.max_limit);
            }
        }

        #[test]
        fn prop_vegas_stays_within_bounds(samples in prop::collection::vec(arb_sample(), 1..200)) {
            let config = VegasConfig::default();
            let mut limit = AdaptiveLimit::from_config(&AlgorithmConfig::Vegas(config.clone()));
            for sample in &samples {
                let l = limit.update(sample);
                prop_assert!(l >= 1 && l <= config.max_limit);
            }
        }
    }
}
