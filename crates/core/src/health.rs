//! Health reporting for long-running components

use serde::{Deserialize, Serialize};

/// Coarse health of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Running normally
    Healthy,
    /// Closed or failed
    Unhealthy,
}

/// Observer notified when a component fails
pub trait FailureListener: Send + Sync {
    /// Called at most once per failure
    fn on_failure(&self);
}

impl<F> FailureListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_failure(&self) {
        self()
    }
}

/// A component exposing its health and accepting failure observers
pub trait HealthMonitorable {
    /// Current health
    fn health_status(&self) -> HealthStatus;

    /// Register an observer for failures
    fn add_failure_listener(&self, listener: Box<dyn FailureListener>);
}
