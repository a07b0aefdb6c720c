//! Actor lifecycle states and completion signals

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of an actor
///
/// ```text
/// Starting ──► Started ──► Closing ──► Closed
///     │           │           │
///     └───────────┴───────────┴──────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActorState {
    /// Scheduled, `on_starting` not yet run
    Starting = 0,
    /// Running turns
    Started = 1,
    /// Close requested; waiting for pending work
    Closing = 2,
    /// Closed cleanly
    Closed = 3,
    /// Failed on an unhandled error
    Failed = 4,
}

impl ActorState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ActorState::Starting,
            1 => ActorState::Started,
            2 => ActorState::Closing,
            3 => ActorState::Closed,
            _ => ActorState::Failed,
        }
    }

    /// Whether no further turns will run
    pub fn is_terminal(self) -> bool {
        matches!(self, ActorState::Closed | ActorState::Failed)
    }
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActorState::Starting => "starting",
            ActorState::Started => "started",
            ActorState::Closing => "closing",
            ActorState::Closed => "closed",
            ActorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct SignalInner {
    state: Mutex<Option<ActorState>>,
    done: Condvar,
}

/// One-shot signal completed with the state an actor reached
///
/// Clones share the same signal, so every caller of `close()` waits on the
/// same completion.
#[derive(Clone)]
pub struct CompletionSignal {
    inner: Arc<SignalInner>,
}

impl CompletionSignal {
    pub(crate) fn new() -> Self {
        CompletionSignal {
            inner: Arc::new(SignalInner {
                state: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    /// Complete the signal. Later completions are ignored.
    pub(crate) fn complete(&self, state: ActorState) {
        let mut slot = self.inner.state.lock();
        if slot.is_none() {
            *slot = Some(state);
            self.inner.done.notify_all();
        }
    }

    /// Whether the signal has completed
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().is_some()
    }

    /// State the signal completed with, if any
    pub fn state(&self) -> Option<ActorState> {
        *self.inner.state.lock()
    }

    /// Block until completed. Must not be called from within an actor turn.
    pub fn wait(&self) -> ActorState {
        let mut slot = self.inner.state.lock();
        loop {
            if let Some(state) = *slot {
                return state;
            }
            self.inner.done.wait(&mut slot);
        }
    }

    /// Block until completed or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ActorState> {
        let mut slot = self.inner.state.lock();
        if slot.is_none() {
            self.inner
                .done
                .wait_while_for(&mut slot, |state| state.is_none(), timeout);
        }
        *slot
    }

    /// Whether both handles refer to the same signal
    pub fn same_as(&self, other: &CompletionSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("state", &self.state())
            .finish()
    }
}
