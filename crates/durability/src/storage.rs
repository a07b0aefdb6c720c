//! Durable log storage boundary
//!
//! Storage itself (replication, disk layout) lives outside this crate. The
//! appender only needs to hand it bytes and learn, possibly on another
//! thread, when they were written and committed.
//!
//! Per append, storage calls the listener in this order:
//!
//! ```text
//! on_write ──► update_records ──► on_commit
//!    │               │                └──► on_commit_error
//!    │               └──► on_write_error   (update_records failed)
//!    └──► on_write_error
//! ```

use std::fmt;
use tidelog_core::{Error, Position, Result};

/// The durable unit appended to storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Index assigned by storage
    pub index: u64,
    /// Raw framed bytes of one block
    pub data: Vec<u8>,
    /// Position of the first record, set by `update_records`
    pub lowest_position: Option<Position>,
    /// Position of the last record, set by `update_records`
    pub highest_position: Option<Position>,
}

impl LogEntry {
    /// Entry with no positions assigned yet
    pub fn new(index: u64, data: Vec<u8>) -> Self {
        LogEntry {
            index,
            data,
            lowest_position: None,
            highest_position: None,
        }
    }
}

/// Callbacks for one append. Storage may invoke them from any thread.
pub trait AppendListener: Send {
    /// The entry was written locally
    fn on_write(&mut self, address: u64);

    /// The entry could not be written
    fn on_write_error(&mut self, error: Error);

    /// The entry is durable
    fn on_commit(&mut self, address: u64);

    /// The entry was written but could not be committed
    fn on_commit_error(&mut self, address: u64, error: Error);

    /// Assign record positions to `entry` once storage chose its index.
    ///
    /// On error the entry must not be committed; storage reports the error
    /// through [`AppendListener::on_write_error`].
    fn update_records(&mut self, entry: &mut LogEntry, index: u64) -> Result<()>;
}

/// Append-only durable log
pub trait LogStorage: Send + Sync + fmt::Debug {
    /// Append `data` as one entry and report progress to `listener`
    fn append(&self, data: Vec<u8>, listener: Box<dyn AppendListener>);
}
