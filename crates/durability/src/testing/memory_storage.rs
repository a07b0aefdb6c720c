//! In-memory log storage with manual commits and fault injection

use crate::storage::{AppendListener, LogEntry, LogStorage};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tidelog_core::Error;

/// What happened to the entry processed by [`InMemoryLogStorage::commit_next`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Positions were assigned and the entry committed
    Committed(u64),
    /// `update_records` failed; the listener got a write error
    RecordsRejected {
        /// Index the entry would have had
        index: u64,
        /// Error reported by the listener
        reason: String,
    },
    /// An injected commit failure was reported
    CommitFailed(u64),
}

struct PendingAppend {
    index: u64,
    data: Vec<u8>,
    listener: Box<dyn AppendListener>,
}

struct StorageState {
    next_index: u64,
    pending: VecDeque<PendingAppend>,
    committed: Vec<LogEntry>,
    appended: Vec<Vec<u8>>,
    write_failures: VecDeque<Error>,
    commit_failures: VecDeque<Error>,
}

/// Log storage that keeps entries in memory
///
/// Appends are queued; nothing is written or committed until the test calls
/// [`commit_next`](InMemoryLogStorage::commit_next), which runs the listener
/// callbacks on the calling thread. Indexes start at 1.
pub struct InMemoryLogStorage {
    state: Mutex<StorageState>,
    append_signal: Condvar,
}

impl InMemoryLogStorage {
    /// Empty storage
    pub fn new() -> Self {
        InMemoryLogStorage {
            state: Mutex::new(StorageState {
                next_index: 1,
                pending: VecDeque::new(),
                committed: Vec::new(),
                appended: Vec::new(),
                write_failures: VecDeque::new(),
                commit_failures: VecDeque::new(),
            }),
            append_signal: Condvar::new(),
        }
    }

    /// Reject the next append with `error`
    pub fn fail_next_write(&self, error: Error) {
        self.state.lock().write_failures.push_back(error);
    }

    /// Fail the commit of the next committed entry with `error`
    pub fn fail_next_commit(&self, error: Error) {
        self.state.lock().commit_failures.push_back(error);
    }

    /// Write and commit the oldest pending append
    pub fn commit_next(&self) -> Option<CommitOutcome> {
        let (pending, commit_failure) = {
            let mut state = self.state.lock();
            let pending = state.pending.pop_front()?;
            (pending, state.commit_failures.pop_front())
        };
        let PendingAppend {
            index,
            data,
            mut listener,
        } = pending;

        listener.on_write(index);
        let mut entry = LogEntry::new(index, data);
        if let Err(e) = listener.update_records(&mut entry, index) {
            let reason = e.to_string();
            listener.on_write_error(e);
            return Some(CommitOutcome::RecordsRejected { index, reason });
        }

        if let Some(error) = commit_failure {
            listener.on_commit_error(index, error);
            return Some(CommitOutcome::CommitFailed(index));
        }

        self.state.lock().committed.push(entry);
        listener.on_commit(index);
        Some(CommitOutcome::Committed(index))
    }

    /// Commit until nothing is pending
    pub fn commit_all(&self) -> Vec<CommitOutcome> {
        std::iter::from_fn(|| self.commit_next()).collect()
    }

    /// Block until at least `count` appends were received, including failed ones
    pub fn wait_for_appends(&self, count: usize, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.appended.len() < count {
            self.append_signal
                .wait_while_for(&mut state, |s| s.appended.len() < count, timeout);
        }
        state.appended.len() >= count
    }

    /// Appends waiting for `commit_next`
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Bytes of every append received, in order
    pub fn appended(&self) -> Vec<Vec<u8>> {
        self.state.lock().appended.clone()
    }

    /// Committed entries, in commit order
    pub fn committed(&self) -> Vec<LogEntry> {
        self.state.lock().committed.clone()
    }
}

impl Default for InMemoryLogStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStorage for InMemoryLogStorage {
    fn append(&self, data: Vec<u8>, mut listener: Box<dyn AppendListener>) {
        let mut state = self.state.lock();
        state.appended.push(data.clone());
        self.append_signal.notify_all();

        if let Some(error) = state.write_failures.pop_front() {
            drop(state);
            listener.on_write_error(error);
            return;
        }

        let index = state.next_index;
        state.next_index += 1;
        state.pending.push_back(PendingAppend {
            index,
            data,
            listener,
        });
    }
}

impl fmt::Debug for InMemoryLogStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryLogStorage")
            .field("next_index", &state.next_index)
            .field("pending", &state.pending.len())
            .field("committed", &state.committed.len())
            .finish()
    }
}
