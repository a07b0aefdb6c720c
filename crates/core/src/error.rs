//! Error types for the append pipeline
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Admission rejection is deliberately absent: a full limiter is reported as
//! `false` from `try_acquire` and handled by deferral, never as an error.

use crate::types::PartitionId;
use std::io;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the append pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (config files, storage backends)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Invalid or unparsable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The write buffer cannot take the offered record
    #[error("Write buffer full: {requested} bytes requested, {available} bytes available")]
    BufferFull {
        /// Framed bytes the producer tried to write
        requested: usize,
        /// Free bytes left in the buffer
        available: usize,
    },

    /// Storage rejected a write because this node is no longer the owner of
    /// the partition. Transient: the appender swallows it.
    #[error("Partition {partition} changed role: {reason}")]
    RoleTransition {
        /// Partition whose ownership moved away
        partition: PartitionId,
        /// Human-readable reason
        reason: String,
    },

    /// Any other storage write or commit failure. Fatal for the appender.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Positions and completion handlers went out of sync. Always fatal.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The actor clock was requested outside of a running task turn
    #[error("Actor clock can only be accessed from within an actor turn")]
    NotInActor,

    /// The target actor has already closed or failed
    #[error("Actor {0} is closed")]
    ActorClosed(String),

    /// An actor callback panicked; the actor is failed
    #[error("Actor {actor} panicked: {message}")]
    ActorPanicked {
        /// Name of the failed actor
        actor: String,
        /// Panic payload, if it was a string
        message: String,
    },
}

impl Error {
    /// Shorthand for a protocol violation
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolViolation(msg.into())
    }

    /// Shorthand for a fatal storage failure
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Whether a storage write failing with this error is benign.
    ///
    /// Only ownership changes qualify; they happen while a partition steps
    /// down and the pending appends are discarded by the new owner.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RoleTransition { .. })
    }

    /// Whether this error must bring the appender down
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}
