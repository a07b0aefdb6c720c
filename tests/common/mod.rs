//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tidelog::{CompletionHandler, LogEntry, Position};
use tidelog_durability::testing::InMemoryLogStorage;

pub const TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Initialization
// ============================================================================

/// Install a test-writer subscriber once per process; `RUST_LOG` wins
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

// ============================================================================
// Background committer
// ============================================================================

/// Commits everything appended to an [`InMemoryLogStorage`] from a
/// separate thread until dropped
pub struct Committer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Committer {
    pub fn spawn(storage: Arc<InMemoryLogStorage>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                if storage.commit_next().is_none() {
                    thread::sleep(Duration::from_micros(200));
                }
            }
            storage.commit_all();
        });
        Committer {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Committer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Completion tracking
// ============================================================================

/// Records which positions each logical write completed at
#[derive(Clone, Default)]
pub struct Completions {
    calls: Arc<AtomicUsize>,
    positions: Arc<Mutex<Vec<(u64, Position)>>>,
}

impl Completions {
    /// Handler for the write identified by `write_id`
    pub fn handler(&self, write_id: u64) -> CompletionHandler {
        let calls = Arc::clone(&self.calls);
        let positions = Arc::clone(&self.positions);
        Box::new(move |_entry: &LogEntry, position: Position, _offset: usize| {
            calls.fetch_add(1, Ordering::SeqCst);
            positions.lock().push((write_id, position));
        })
    }

    /// Total handler invocations
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(write_id, position)` in invocation order
    pub fn positions(&self) -> Vec<(u64, Position)> {
        self.positions.lock().clone()
    }
}

/// Poll `condition` until it holds or [`TIMEOUT`] passes
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
