//! Tidelog - backpressure-controlled log append pipeline
//!
//! Producers write framed records into a [`WriteBuffer`]. One
//! [`LogStorageAppender`] per partition drains the buffer into durable
//! storage, asking the partition's adaptive [`Limiter`] for admission before
//! every append and resolving each record's completion handler once its
//! entry commits.
//!
//! # Quick Start
//!
//! ```ignore
//! use tidelog::*;
//!
//! let scheduler = ActorScheduler::new(SchedulerConfig::default());
//! let registry = PartitionLimiterRegistry::from_config(
//!     &BackpressureConfig::default(),
//!     Arc::new(MonotonicClock::new()),
//! );
//! let buffer = WriteBuffer::default();
//! let appender = LogStorageAppender::from_registry(
//!     PartitionId::new(1),
//!     &buffer,
//!     storage,
//!     &registry,
//!     &AppenderConfig::default(),
//! )?
//! .start(&scheduler)?;
//!
//! buffer.offer(StreamId::new(1), b"record", handler)?;
//! ```
//!
//! # Architecture
//!
//! - [`tidelog_core`]: errors, identifiers, positions, clocks, health
//! - [`tidelog_concurrency`]: limit algorithms, limiters, partition registry
//! - [`tidelog_engine`]: cooperative actor scheduler
//! - [`tidelog_durability`]: framing, write buffer, storage contract, appender

pub use tidelog_concurrency::{
    AdaptiveLimit, AdaptiveLimiter, AdmissionContext, BackpressureConfig, BackpressureConfigError,
    LimitAlgorithm, Limiter, NoopLimiter, PartitionLimiterRegistry, ReleaseListener, ReleaseOutcome,
};
pub use tidelog_core::{
    Clock, Error, FailureListener, HealthMonitorable, HealthStatus, ManualClock, MonotonicClock,
    PartitionId, Position, Result, StreamId,
};
pub use tidelog_durability::{
    AppendListener, AppendMetricsSnapshot, AppenderConfig, AppenderHandle, CompletionHandler,
    LogEntry, LogStorage, LogStorageAppender, WriteBuffer,
};
pub use tidelog_engine::{ActorScheduler, ActorState, CompletionSignal, SchedulerConfig};

