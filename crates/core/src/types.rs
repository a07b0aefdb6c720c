//! Identifier types shared across the pipeline
//!
//! - [`PartitionId`]: an independently ordered shard of the log
//! - [`StreamId`]: the producer-side stream a request arrived on
//! - [`Position`]: a record's place in the log, `(entry_index << 8) | ordinal`

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits reserved for the record ordinal inside a position
pub const ORDINAL_BITS: u32 = 8;

/// Maximum number of records a single log entry may hold (ordinals 0..=255)
pub const MAX_RECORDS_PER_ENTRY: usize = 1 << ORDINAL_BITS;

/// Identifier of a log partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Wrap a raw partition number
    pub const fn new(id: u32) -> Self {
        PartitionId(id)
    }

    /// Raw partition number
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        PartitionId(id)
    }
}

/// Identifier of a request stream (a client connection, or the appender itself)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(u32);

impl StreamId {
    /// Stream used by log appenders for their own admission tokens.
    ///
    /// Reserved so appender sequences never collide with request ids.
    pub const APPENDER: StreamId = StreamId(u32::MAX);

    /// Wrap a raw stream number
    pub const fn new(id: u32) -> Self {
        StreamId(id)
    }

    /// Raw stream number
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == StreamId::APPENDER {
            write!(f, "appender")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Position of a record in the log.
///
/// Encodes the storage index of the entry holding the record in the upper
/// bits and the record's ordinal inside that entry in the lower 8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position(u64);

impl Position {
    /// Compose a position from an entry index and a record ordinal.
    ///
    /// Fails with a protocol violation when the ordinal does not fit into
    /// 8 bits, or when the entry index would overflow the upper bits.
    pub fn new(entry_index: u64, ordinal: usize) -> Result<Self> {
        if ordinal >= MAX_RECORDS_PER_ENTRY {
            return Err(Error::protocol(format!(
                "The number of records in the entry with index {} exceeds the supported amount of {}",
                entry_index, MAX_RECORDS_PER_ENTRY
            )));
        }
        if entry_index > (u64::MAX >> ORDINAL_BITS) {
            return Err(Error::protocol(format!(
                "Entry index {} does not fit into a position",
                entry_index
            )));
        }
        Ok(Position((entry_index << ORDINAL_BITS) | ordinal as u64))
    }

    /// First position of an entry
    pub fn lowest_of(entry_index: u64) -> Result<Self> {
        Self::new(entry_index, 0)
    }

    /// Raw composite value
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Index of the entry this position belongs to
    pub const fn entry_index(self) -> u64 {
        self.0 >> ORDINAL_BITS
    }

    /// Ordinal of the record inside its entry
    pub const fn ordinal(self) -> usize {
        (self.0 & 0xFF) as usize
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entry_index(), self.ordinal())
    }
}
