//! Core types for Tidelog
//!
//! This crate defines the foundational types used throughout the pipeline:
//! - Error: Error type hierarchy (storage, protocol, configuration)
//! - PartitionId / StreamId: Identifiers for log shards and request streams
//! - Position: Composite record position `(entry_index << 8) | ordinal`
//! - Clock: Monotonic time sources for round-trip measurements
//! - HealthStatus: Health reporting and failure observers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod health;
pub mod types;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{Error, Result};
pub use health::{FailureListener, HealthMonitorable, HealthStatus};
pub use types::{PartitionId, Position, StreamId, MAX_RECORDS_PER_ENTRY, ORDINAL_BITS};
