//! Cooperative actor scheduler
//!
//! A fixed pool of worker threads multiplexes actor turns from one FIFO run
//! queue. An actor is in the queue at most once, so no two turns of the same
//! actor ever overlap, while different actors run in parallel on different
//! workers. Turns are never preempted: an actor that wants to continue
//! re-enqueues itself at the tail and lets the others go first.

use crate::actor::{Actor, ActorCell, ActorControl};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tidelog_core::{Clock, Error, MonotonicClock, Result};
use tracing::{debug, error};

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads
    pub worker_threads: usize,
    /// Prefix of worker thread names
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(2),
            thread_name_prefix: "tidelog-actor".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the number of worker threads (at least one)
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    /// Builder: set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

/// Scheduler metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Actors waiting for a worker
    pub queue_depth: usize,
    /// Turns currently executing
    pub active_turns: usize,
    /// Turns completed since creation
    pub turns_executed: u64,
    /// Actors ever spawned on this scheduler
    pub actors_registered: u64,
    /// Number of worker threads
    pub worker_count: usize,
}

/// Something that can run one turn on a worker
pub(crate) trait Schedulable: Send + Sync {
    fn run_turn(self: Arc<Self>);
    fn name(&self) -> &str;
}

pub(crate) struct SchedulerInner {
    queue: Mutex<VecDeque<Arc<dyn Schedulable>>>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    active_turns: AtomicUsize,
    turns_executed: AtomicU64,
    actors_registered: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl SchedulerInner {
    /// Put an actor at the tail of the run queue
    pub(crate) fn enqueue(&self, actor: Arc<dyn Schedulable>) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::ActorClosed(actor.name().to_string()));
        }
        self.queue.lock().push_back(actor);
        self.work_ready.notify_one();
        Ok(())
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}

/// Runs actors on a fixed pool of worker threads
pub struct ActorScheduler {
    inner: Arc<SchedulerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl ActorScheduler {
    /// Create a scheduler using the monotonic system clock
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a scheduler whose actors observe `clock` through [`crate::ActorClock`]
    ///
    /// Workers are named `<prefix>-0`, `<prefix>-1`, etc.
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let num_threads = config.worker_threads.max(1);
        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_turns: AtomicUsize::new(0),
            turns_executed: AtomicU64::new(0),
            actors_registered: AtomicU64::new(0),
            clock,
        });

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let inner_clone = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, i))
                .spawn(move || worker_loop(&inner_clone))
                .expect("failed to spawn actor worker thread");
            workers.push(handle);
        }
        debug!(workers = num_threads, "Started actor scheduler");

        ActorScheduler {
            inner,
            workers: Mutex::new(workers),
            num_threads,
        }
    }

    /// Register an actor and schedule its first turn, which runs `on_starting`
    pub fn spawn<A: Actor>(&self, actor: A) -> Result<ActorControl<A>> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::ActorClosed(actor.name()));
        }
        let cell = ActorCell::new(actor, &self.inner);
        self.inner.actors_registered.fetch_add(1, Ordering::Relaxed);
        debug!(actor = cell.name(), "Spawned actor");
        cell.schedule();
        Ok(ActorControl::new(cell))
    }

    /// Stop accepting turns, finish queued ones, and join the workers.
    ///
    /// Actors should be closed first; turns re-enqueued after this call are
    /// dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        // Notify under the queue lock so a worker about to wait cannot miss it
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Return a snapshot of scheduler metrics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_depth: self.inner.queue.lock().len(),
            active_turns: self.inner.active_turns.load(Ordering::Relaxed),
            turns_executed: self.inner.turns_executed.load(Ordering::Relaxed),
            actors_registered: self.inner.actors_registered.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

/// Decrements `active_turns` on drop, even if the turn panicked
struct ActiveTurnGuard<'a> {
    inner: &'a SchedulerInner,
}

impl<'a> Drop for ActiveTurnGuard<'a> {
    fn drop(&mut self) {
        self.inner.active_turns.fetch_sub(1, Ordering::Release);
        self.inner.turns_executed.fetch_add(1, Ordering::Relaxed);
    }
}

fn worker_loop(inner: &SchedulerInner) {
    loop {
        let actor = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(actor) = queue.pop_front() {
                    inner.active_turns.fetch_add(1, Ordering::Release);
                    break actor;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTurnGuard { inner };

        // Actor callbacks are already guarded inside the turn; this keeps the
        // worker alive if the turn bookkeeping itself panics.
        let name = actor.name().to_string();
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| actor.run_turn()))
        {
            error!(
                actor = %name,
                "actor turn panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
