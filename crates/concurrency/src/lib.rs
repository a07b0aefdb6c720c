//! Admission control for tidelog
//!
//! This crate decides how many appends a partition may have in flight:
//! - [`limit`]: adaptive limit algorithms (Fixed, AIMD, Vegas, Gradient, Gradient2, Windowed)
//! - [`limiter`]: token-tracking limiters built on an algorithm, plus the no-op limiter
//! - [`registry`]: per-partition limiter map with lazy construction
//! - [`config`]: backpressure configuration (TOML, environment overrides, validation)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod limit;
pub mod limiter;
pub mod registry;

pub use config::{
    AimdConfig, AlgorithmConfig, BackpressureConfig, BackpressureConfigError, FixedConfig,
    Gradient2Config, GradientConfig, LimitAlgorithm, VegasConfig, WindowConfig,
};
pub use limit::{AdaptiveLimit, Sample};
pub use limiter::{
    AdaptiveLimiter, AdmissionContext, Limiter, NoopLimiter, ReleaseListener, ReleaseOutcome,
    TokenKey,
};
pub use registry::{LimiterFactory, PartitionLimiterRegistry};
