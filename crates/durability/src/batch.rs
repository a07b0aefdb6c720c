//! Completion handler resolution for committed entries
//!
//! Every logical write registers one completion handler. When storage
//! commits an entry, its frames are walked left to right and each frame is
//! matched to a handler from a FIFO queue:
//!
//! - a standalone frame, or the frame closing a batch, **polls** the head
//! - a frame opening a batch, or inside one, **peeks** the head
//!
//! so all frames of one batch share the handler, which leaves the queue with
//! the batch's last frame. The decision is a two-state machine kept apart
//! from storage so it can be tested on its own.

use crate::frame::{FrameFlags, FrameIter};
use crate::storage::LogEntry;
use std::collections::VecDeque;
use std::fmt;
use tidelog_core::{Error, Position, Result};

/// Called once per frame of a logical write: `(entry, position, frame_offset)`
pub type CompletionHandler = Box<dyn FnMut(&LogEntry, Position, usize) + Send>;

/// Whether the walker is inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchState {
    /// Between logical writes
    #[default]
    Idle,
    /// A batch was opened and not yet closed
    InBatch,
}

/// What to do with the head of the handler queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    /// Invoke the head and keep it
    Peek,
    /// Invoke the head and remove it
    Poll,
}

impl BatchState {
    /// Feed the next frame's flags and decide how to resolve its handler
    pub fn advance(&mut self, flags: FrameFlags) -> HandlerAction {
        match *self {
            BatchState::InBatch if flags.is_batch_end() => {
                *self = BatchState::Idle;
                HandlerAction::Poll
            }
            BatchState::InBatch => HandlerAction::Peek,
            BatchState::Idle if flags.is_batch_begin() && !flags.is_batch_end() => {
                *self = BatchState::InBatch;
                HandlerAction::Peek
            }
            BatchState::Idle => HandlerAction::Poll,
        }
    }
}

/// FIFO of completion handlers for the writes in one block
#[derive(Default)]
pub struct CompletionQueue {
    handlers: VecDeque<CompletionHandler>,
}

impl CompletionQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler
    pub fn push(&mut self, handler: CompletionHandler) {
        self.handlers.push_back(handler);
    }

    /// Number of queued handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is queued
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke the head handler according to `action`
    pub fn resolve(
        &mut self,
        action: HandlerAction,
        entry: &LogEntry,
        position: Position,
        frame_offset: usize,
    ) -> Result<()> {
        let missing = || {
            Error::protocol(format!(
                "Expected to have handler for record {} but none was found",
                position
            ))
        };
        match action {
            HandlerAction::Peek => {
                let handler = self.handlers.front_mut().ok_or_else(missing)?;
                handler(entry, position, frame_offset);
            }
            HandlerAction::Poll => {
                let mut handler = self.handlers.pop_front().ok_or_else(missing)?;
                handler(entry, position, frame_offset);
            }
        }
        Ok(())
    }

    /// Walk the frames of a committed entry, resolve a handler for each, and
    /// set the entry's position range.
    ///
    /// Fails with a protocol violation on malformed frames, on a missing
    /// handler, or when the entry holds more records than a position can
    /// address.
    pub fn update_records(&mut self, entry: &mut LogEntry, index: u64) -> Result<()> {
        let mut state = BatchState::Idle;
        let mut lowest = None;
        let mut highest = None;

        for (ordinal, frame) in FrameIter::new(&entry.data).enumerate() {
            let frame = frame?;
            let position = Position::new(index, ordinal)?;
            let action = state.advance(frame.header.flags);
            self.resolve(action, entry, position, frame.offset)?;
            lowest.get_or_insert(position);
            highest = Some(position);
        }

        if lowest.is_none() {
            return Err(Error::protocol(format!(
                "entry with index {} contains no records",
                index
            )));
        }
        entry.index = index;
        entry.lowest_position = lowest;
        entry.highest_position = highest;
        Ok(())
    }
}

impl fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl FromIterator<CompletionHandler> for CompletionQueue {
    fn from_iter<I: IntoIterator<Item = CompletionHandler>>(iter: I) -> Self {
        CompletionQueue {
            handlers: iter.into_iter().collect(),
        }
    }
}
