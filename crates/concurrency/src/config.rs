//! Backpressure configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! enabled = true
//! use_windowed = true
//! algorithm = "vegas"   # fixed | aimd | vegas | gradient | gradient2
//!
//! [vegas]
//! initial_limit = 20
//! alpha = 3
//! beta = 6
//! ```
//!
//! Only the section named by `algorithm` is used; the others may be present.

use crate::limit::AdaptiveLimit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tidelog_core::{Error, Result};

/// Environment variable toggling backpressure on or off
pub const ENV_BACKPRESSURE_ENABLED: &str = "TIDELOG_BACKPRESSURE_ENABLED";
/// Environment variable selecting the limit algorithm
pub const ENV_BACKPRESSURE_ALGORITHM: &str = "TIDELOG_BACKPRESSURE_ALGORITHM";
/// Environment variable toggling the sample window
pub const ENV_BACKPRESSURE_WINDOWED: &str = "TIDELOG_BACKPRESSURE_WINDOWED";

/// Available limit algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitAlgorithm {
    /// Constant limit
    Fixed,
    /// Additive increase, multiplicative decrease
    Aimd,
    /// TCP Vegas style queue estimation
    Vegas,
    /// Gradient over minimum RTT
    Gradient,
    /// Gradient over long-window RTT
    Gradient2,
}

impl LimitAlgorithm {
    /// Lower-case name as used in config files
    pub fn as_str(self) -> &'static str {
        match self {
            LimitAlgorithm::Fixed => "fixed",
            LimitAlgorithm::Aimd => "aimd",
            LimitAlgorithm::Vegas => "vegas",
            LimitAlgorithm::Gradient => "gradient",
            LimitAlgorithm::Gradient2 => "gradient2",
        }
    }
}

impl fmt::Display for LimitAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitAlgorithm {
    type Err = BackpressureConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(LimitAlgorithm::Fixed),
            "aimd" => Ok(LimitAlgorithm::Aimd),
            "vegas" => Ok(LimitAlgorithm::Vegas),
            "gradient" => Ok(LimitAlgorithm::Gradient),
            "gradient2" => Ok(LimitAlgorithm::Gradient2),
            other => Err(BackpressureConfigError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Fixed limit parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedConfig {
    /// The constant limit
    pub limit: usize,
}

impl Default for FixedConfig {
    fn default() -> Self {
        FixedConfig { limit: 20 }
    }
}

/// AIMD parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AimdConfig {
    /// Round trips slower than this count as drops
    pub request_timeout_ms: u64,
    /// Starting limit
    pub initial_limit: usize,
    /// Floor
    pub min_limit: usize,
    /// Ceiling
    pub max_limit: usize,
    /// Multiplier applied on a drop, in (0, 1)
    pub backoff_ratio: f64,
}

impl AimdConfig {
    /// Timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for AimdConfig {
    fn default() -> Self {
        AimdConfig {
            request_timeout_ms: 1000,
            initial_limit: 100,
            min_limit: 1,
            max_limit: 1000,
            backoff_ratio: 0.9,
        }
    }
}

/// Vegas parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VegasConfig {
    /// Starting limit
    pub initial_limit: usize,
    /// Ceiling
    pub max_limit: usize,
    /// Grow while the estimated queue is below this
    pub alpha: f64,
    /// Shrink while the estimated queue is above this
    pub beta: f64,
    /// Weight of the new estimate, in (0, 1]
    pub smoothing: f64,
}

impl Default for VegasConfig {
    fn default() -> Self {
        VegasConfig {
            initial_limit: 20,
            max_limit: 1000,
            alpha: 3.0,
            beta: 6.0,
            smoothing: 1.0,
        }
    }
}

/// Gradient parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    /// Starting limit
    pub initial_limit: usize,
    /// Floor
    pub min_limit: usize,
    /// Ceiling
    pub max_limit: usize,
    /// How much RTT growth is tolerated before shrinking, >= 1
    pub rtt_tolerance: f64,
    /// Weight of a decreasing estimate, in (0, 1]
    pub smoothing: f64,
    /// Multiplier applied on a drop, in (0, 1)
    pub backoff_ratio: f64,
    /// Samples between minimum-RTT resets; 0 disables probing
    pub probe_interval: u64,
}

impl Default for GradientConfig {
    fn default() -> Self {
        GradientConfig {
            initial_limit: 20,
            min_limit: 10,
            max_limit: 1000,
            rtt_tolerance: 2.0,
            smoothing: 0.2,
            backoff_ratio: 0.9,
            probe_interval: 1000,
        }
    }
}

/// Gradient2 parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gradient2Config {
    /// Starting limit
    pub initial_limit: usize,
    /// Floor
    pub min_limit: usize,
    /// Ceiling
    pub max_limit: usize,
    /// How much RTT growth is tolerated before shrinking, >= 1
    pub rtt_tolerance: f64,
    /// Number of samples in the long RTT average
    pub long_window: usize,
    /// Weight of the new estimate, in (0, 1]
    pub smoothing: f64,
    /// Constant queue allowance added on every update
    pub queue_size: usize,
}

impl Default for Gradient2Config {
    fn default() -> Self {
        Gradient2Config {
            initial_limit: 20,
            min_limit: 10,
            max_limit: 200,
            rtt_tolerance: 2.0,
            long_window: 600,
            smoothing: 0.2,
            queue_size: 4,
        }
    }
}

/// Sample window parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Minimum samples per window
    pub window_size: usize,
    /// Minimum window span
    pub min_window_ms: u64,
    /// Maximum window span
    pub max_window_ms: u64,
    /// Samples faster than this are discarded as noise
    pub min_rtt_threshold_us: u64,
}

impl WindowConfig {
    /// Minimum window span as a duration
    pub fn min_window(&self) -> Duration {
        Duration::from_millis(self.min_window_ms)
    }

    /// Maximum window span as a duration
    pub fn max_window(&self) -> Duration {
        Duration::from_millis(self.max_window_ms)
    }

    /// Noise threshold as a duration
    pub fn min_rtt_threshold(&self) -> Duration {
        Duration::from_micros(self.min_rtt_threshold_us)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            window_size: 10,
            min_window_ms: 1000,
            max_window_ms: 1000,
            min_rtt_threshold_us: 100,
        }
    }
}

/// The selected algorithm together with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum AlgorithmConfig {
    /// Constant limit
    Fixed(FixedConfig),
    /// AIMD
    Aimd(AimdConfig),
    /// Vegas
    Vegas(VegasConfig),
    /// Gradient
    Gradient(GradientConfig),
    /// Gradient2
    Gradient2(Gradient2Config),
}

/// Backpressure configuration for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// When false every admission succeeds and nothing is tracked
    pub enabled: bool,
    /// Wrap the algorithm in a sample window
    pub use_windowed: bool,
    /// Which algorithm to use
    pub algorithm: LimitAlgorithm,
    /// Fixed limit parameters
    pub fixed: FixedConfig,
    /// AIMD parameters
    pub aimd: AimdConfig,
    /// Vegas parameters
    pub vegas: VegasConfig,
    /// Gradient parameters
    pub gradient: GradientConfig,
    /// Gradient2 parameters
    pub gradient2: Gradient2Config,
    /// Sample window parameters
    pub windowed: WindowConfig,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        BackpressureConfig {
            enabled: true,
            use_windowed: true,
            algorithm: LimitAlgorithm::Vegas,
            fixed: FixedConfig::default(),
            aimd: AimdConfig::default(),
            vegas: VegasConfig::default(),
            gradient: GradientConfig::default(),
            gradient2: Gradient2Config::default(),
            windowed: WindowConfig::default(),
        }
    }
}

impl BackpressureConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with backpressure switched off
    pub fn disabled() -> Self {
        BackpressureConfig {
            enabled: false,
            ..Self::default()
        }
    }

    /// Select the algorithm (builder pattern)
    pub fn with_algorithm(mut self, algorithm: LimitAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Toggle the sample window (builder pattern)
    pub fn with_windowed(mut self, use_windowed: bool) -> Self {
        self.use_windowed = use_windowed;
        self
    }

    /// Use a fixed limit (builder pattern)
    pub fn with_fixed_limit(mut self, limit: usize) -> Self {
        self.algorithm = LimitAlgorithm::Fixed;
        self.fixed.limit = limit;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BackpressureConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse backpressure config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize backpressure config: {}", e)))
    }

    /// Apply `TIDELOG_BACKPRESSURE_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_BACKPRESSURE_ENABLED) {
            self.enabled = parse_bool(ENV_BACKPRESSURE_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_BACKPRESSURE_ALGORITHM) {
            self.algorithm = value.parse()?;
        }
        if let Some(value) = lookup(ENV_BACKPRESSURE_WINDOWED) {
            self.use_windowed = parse_bool(ENV_BACKPRESSURE_WINDOWED, &value)?;
        }
        Ok(())
    }

    /// The selected algorithm and its parameters
    pub fn algorithm_config(&self) -> AlgorithmConfig {
        match self.algorithm {
            LimitAlgorithm::Fixed => AlgorithmConfig::Fixed(self.fixed.clone()),
            LimitAlgorithm::Aimd => AlgorithmConfig::Aimd(self.aimd.clone()),
            LimitAlgorithm::Vegas => AlgorithmConfig::Vegas(self.vegas.clone()),
            LimitAlgorithm::Gradient => AlgorithmConfig::Gradient(self.gradient.clone()),
            LimitAlgorithm::Gradient2 => AlgorithmConfig::Gradient2(self.gradient2.clone()),
        }
    }

    /// Build a fresh algorithm instance for one limiter
    pub fn build_limit(&self) -> AdaptiveLimit {
        let limit = AdaptiveLimit::from_config(&self.algorithm_config());
        if self.use_windowed {
            limit.windowed(&self.windowed)
        } else {
            limit
        }
    }

    /// Validate the parameters of the selected algorithm and the window
    pub fn validate(&self) -> std::result::Result<(), BackpressureConfigError> {
        match self.algorithm_config() {
            AlgorithmConfig::Fixed(c) => {
                check_positive("fixed.limit", c.limit)?;
            }
            AlgorithmConfig::Aimd(c) => {
                check_bounds(c.initial_limit, c.min_limit, c.max_limit)?;
                check_ratio("aimd.backoff_ratio", c.backoff_ratio)?;
                if c.request_timeout_ms == 0 {
                    return Err(BackpressureConfigError::ZeroValue("aimd.request_timeout_ms"));
                }
            }
            AlgorithmConfig::Vegas(c) => {
                check_positive("vegas.initial_limit", c.initial_limit)?;
                check_bounds(c.initial_limit, 1, c.max_limit)?;
                if !(c.alpha >= 0.0 && c.alpha < c.beta) {
                    return Err(BackpressureConfigError::InvalidVegasThresholds {
                        alpha: c.alpha,
                        beta: c.beta,
                    });
                }
                check_smoothing(c.smoothing)?;
            }
            AlgorithmConfig::Gradient(c) => {
                check_bounds(c.initial_limit, c.min_limit, c.max_limit)?;
                check_tolerance(c.rtt_tolerance)?;
                check_smoothing(c.smoothing)?;
                check_ratio("gradient.backoff_ratio", c.backoff_ratio)?;
            }
            AlgorithmConfig::Gradient2(c) => {
                check_bounds(c.initial_limit, c.min_limit, c.max_limit)?;
                check_tolerance(c.rtt_tolerance)?;
                check_smoothing(c.smoothing)?;
                check_positive("gradient2.long_window", c.long_window)?;
            }
        }

        if self.use_windowed {
            check_positive("windowed.window_size", self.windowed.window_size)?;
            if self.windowed.min_window_ms > self.windowed.max_window_ms {
                return Err(BackpressureConfigError::InvalidWindow {
                    min_ms: self.windowed.min_window_ms,
                    max_ms: self.windowed.max_window_ms,
                });
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "Expected a boolean for {}, got '{}'",
            key, other
        ))),
    }
}

fn check_positive(name: &'static str, value: usize) -> std::result::Result<(), BackpressureConfigError> {
    if value == 0 {
        return Err(BackpressureConfigError::ZeroValue(name));
    }
    Ok(())
}

fn check_bounds(
    initial: usize,
    min: usize,
    max: usize,
) -> std::result::Result<(), BackpressureConfigError> {
    if min == 0 || max == 0 {
        return Err(BackpressureConfigError::ZeroValue("min_limit/max_limit"));
    }
    if min > max || initial < min || initial > max {
        return Err(BackpressureConfigError::LimitOutOfBounds { initial, min, max });
    }
    Ok(())
}

fn check_ratio(name: &'static str, ratio: f64) -> std::result::Result<(), BackpressureConfigError> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(BackpressureConfigError::InvalidRatio { name, value: ratio });
    }
    Ok(())
}

fn check_smoothing(smoothing: f64) -> std::result::Result<(), BackpressureConfigError> {
    if !(smoothing > 0.0 && smoothing <= 1.0) {
        return Err(BackpressureConfigError::InvalidRatio {
            name: "smoothing",
            value: smoothing,
        });
    }
    Ok(())
}

fn check_tolerance(tolerance: f64) -> std::result::Result<(), BackpressureConfigError> {
    if !(tolerance >= 1.0) {
        return Err(BackpressureConfigError::InvalidRttTolerance(tolerance));
    }
    Ok(())
}

/// Backpressure configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackpressureConfigError {
    /// Algorithm name not recognized
    #[error("Unknown limit algorithm '{0}', expected fixed, aimd, vegas, gradient or gradient2")]
    UnknownAlgorithm(String),

    /// A parameter that must be positive is zero
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    /// `min <= initial <= max` does not hold
    #[error("Initial limit {initial} must lie within [{min}, {max}]")]
    LimitOutOfBounds {
        /// Initial limit
        initial: usize,
        /// Floor
        min: usize,
        /// Ceiling
        max: usize,
    },

    /// A ratio outside its open or half-open unit interval
    #[error("{name} must lie within (0, 1), got {value}")]
    InvalidRatio {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: f64,
    },

    /// RTT tolerance below 1
    #[error("RTT tolerance must be at least 1.0, got {0}")]
    InvalidRttTolerance(f64),

    /// Vegas needs `0 <= alpha < beta`
    #[error("Vegas thresholds must satisfy 0 <= alpha < beta, got alpha={alpha} beta={beta}")]
    InvalidVegasThresholds {
        /// Lower watermark
        alpha: f64,
        /// Upper watermark
        beta: f64,
    },

    /// Window span bounds inverted
    #[error("Window minimum {min_ms}ms exceeds maximum {max_ms}ms")]
    InvalidWindow {
        /// Minimum span
        min_ms: u64,
        /// Maximum span
        max_ms: u64,
    },
}

impl From<BackpressureConfigError> for Error {
    fn from(e: BackpressureConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
