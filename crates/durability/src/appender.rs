//! Log storage appender
//!
//! The actor that drains one partition's write buffer into durable storage.
//! Each consume turn:
//!
//! 1. peeks one block of at most `max_append_block_size` bytes
//! 2. copies its bytes and assigns the next append sequence
//! 3. asks the partition's limiter for admission; on rejection the block
//!    stays in the buffer and is retried as soon as the limiter frees a
//!    slot, whoever released it
//! 4. takes the block's completion handlers out of the buffer and appends
//!    the copy to storage with a listener owning those handlers
//!
//! Storage answers on its own threads. `update_records` runs there, since it
//! only touches the handlers the listener owns. Tokens are released there
//! too, before anything is handed to the actor, so a job dropped because the
//! actor failed can never keep a slot. The remaining bookkeeping goes back
//! to the actor through its [`ActorControl`].
//!
//! # Failure handling
//!
//! | callback                         | token                 | actor  |
//! |----------------------------------|-----------------------|--------|
//! | `on_commit`                      | released              | keeps running |
//! | `on_write_error` (role change)   | abandoned at teardown | keeps running |
//! | `on_write_error` (other)         | released, drop        | fails  |
//! | `on_commit_error`                | released, drop        | fails  |
//!
//! On close or failure every token the appender still holds is released
//! without a sample, so the partition's limiter, which outlives the
//! appender, starts the next appender with full capacity.

use crate::batch::CompletionQueue;
use crate::metrics::{AppendMetrics, AppendMetricsSnapshot};
use crate::storage::{AppendListener, LogEntry, LogStorage};
use crate::write_buffer::{Subscription, WriteBuffer};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidelog_concurrency::{AdmissionContext, Limiter, PartitionLimiterRegistry};
use tidelog_core::{
    Clock, Error, FailureListener, HealthMonitorable, HealthStatus, PartitionId, Result, StreamId,
};
use tidelog_engine::{
    Actor, ActorClock, ActorContext, ActorControl, ActorScheduler, ActorState, CompletionSignal,
};
use tracing::{debug, error, trace, warn};

/// Default upper bound of one appended block (4 MiB)
pub const DEFAULT_MAX_APPEND_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Appender configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppenderConfig {
    /// Largest block peeked from the write buffer in one turn. A single
    /// write larger than this is still appended on its own.
    pub max_append_block_size: usize,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        AppenderConfig {
            max_append_block_size: DEFAULT_MAX_APPEND_BLOCK_SIZE,
        }
    }
}

impl AppenderConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the maximum block size
    pub fn with_max_append_block_size(mut self, size: usize) -> Self {
        self.max_append_block_size = size;
        self
    }

    /// Reject a zero block size
    pub fn validate(&self) -> Result<()> {
        if self.max_append_block_size == 0 {
            return Err(Error::Config(
                "max_append_block_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Appender actor for one partition
pub struct LogStorageAppender {
    name: String,
    partition_id: PartitionId,
    subscription: Subscription,
    storage: Arc<dyn LogStorage>,
    limiter: Arc<dyn Limiter>,
    metrics: Arc<AppendMetrics>,
    max_append_block_size: usize,
    sequence: u64,
    pending_listeners: usize,
    /// Sequences whose tokens may still be held by the limiter
    outstanding: BTreeSet<u64>,
    /// Set while a block waits for capacity
    deferred: Arc<AtomicBool>,
    release_listener: Option<u64>,
}

impl LogStorageAppender {
    /// Create an appender draining `subscription` into `storage`
    pub fn new(
        partition_id: PartitionId,
        subscription: Subscription,
        storage: Arc<dyn LogStorage>,
        limiter: Arc<dyn Limiter>,
        config: &AppenderConfig,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(AppendMetrics::new(partition_id));
        metrics.observe(limiter.as_ref());
        Ok(LogStorageAppender {
            name: format!("LogAppender-{}", partition_id),
            partition_id,
            subscription,
            storage,
            limiter,
            metrics,
            max_append_block_size: config.max_append_block_size,
            sequence: 0,
            pending_listeners: 0,
            outstanding: BTreeSet::new(),
            deferred: Arc::new(AtomicBool::new(false)),
            release_listener: None,
        })
    }

    /// Create an appender subscribed to `buffer`, using the partition's
    /// limiter from `registry`
    pub fn from_registry(
        partition_id: PartitionId,
        buffer: &WriteBuffer,
        storage: Arc<dyn LogStorage>,
        registry: &PartitionLimiterRegistry,
        config: &AppenderConfig,
    ) -> Result<Self> {
        let limiter = registry.get_or_create(partition_id);
        if !limiter.is_enabled() {
            warn!(
                partition = %partition_id,
                "No backpressure for the log appender, this might cause problems"
            );
        }
        Self::new(partition_id, buffer.subscribe()?, storage, limiter, config)
    }

    /// Spawn the appender on `scheduler`
    pub fn start(self, scheduler: &ActorScheduler) -> Result<AppenderHandle> {
        let partition_id = self.partition_id;
        let metrics = Arc::clone(&self.metrics);
        let control = scheduler.spawn(self)?;
        Ok(AppenderHandle {
            partition_id,
            control,
            metrics,
        })
    }

    fn append_block(&mut self, ctx: &mut ActorContext<Self>) -> Result<()> {
        let Some(peek) = self.subscription.peek_block(self.max_append_block_size) else {
            // Woken again by the buffer's data listener
            return Ok(());
        };
        let data = peek.bytes().to_vec();

        self.metrics.new_entry_to_append();
        self.sequence += 1;
        let sequence = self.sequence;

        // Raised before asking, so a release racing the rejection still wakes us
        self.deferred.store(true, Ordering::SeqCst);
        if !self
            .limiter
            .try_acquire(StreamId::APPENDER, sequence, AdmissionContext::Append)
        {
            self.metrics.deferred();
            self.metrics.observe(self.limiter.as_ref());
            trace!(
                partition = %self.partition_id,
                sequence,
                inflight = self.limiter.inflight(),
                limit = self.limiter.limit(),
                "Backpressure: append deferred"
            );
            return Ok(());
        }

        self.deferred.store(false, Ordering::SeqCst);
        self.outstanding.insert(sequence);

        let handlers = peek.mark_completed();
        let listener = StorageListener {
            control: ctx.control(),
            limiter: Arc::clone(&self.limiter),
            partition_id: self.partition_id,
            sequence,
            handlers,
            appended_at_nanos: ActorClock::current()?.now_nanos(),
        };
        self.pending_listeners += 1;
        self.metrics.observe(self.limiter.as_ref());
        self.storage.append(data, Box::new(listener));

        // Give other actors a turn before the next block
        ctx.yield_now();
        Ok(())
    }

    /// Storage will not call back for `sequence` again. `released` tells
    /// whether its token was freed; otherwise it is kept until teardown.
    fn listener_done(&mut self, sequence: u64, released: bool) {
        self.pending_listeners = self.pending_listeners.saturating_sub(1);
        if released {
            self.outstanding.remove(&sequence);
        }
    }

    /// Detach from the buffer and the limiter, releasing every held token
    fn tear_down(&mut self) {
        self.subscription.clear_data_listener();
        if let Some(id) = self.release_listener.take() {
            self.limiter.remove_release_listener(id);
        }
        if !self.outstanding.is_empty() {
            debug!(
                partition = %self.partition_id,
                tokens = self.outstanding.len(),
                "Abandoning tokens held by the log appender"
            );
        }
        for sequence in std::mem::take(&mut self.outstanding) {
            self.limiter.on_abandon(sequence);
        }
    }
}

impl Actor for LogStorageAppender {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn on_starting(&mut self, ctx: &mut ActorContext<Self>) -> Result<()> {
        let control = ctx.control();
        self.subscription
            .set_data_listener(move || control.signal_consume());

        let control = ctx.control();
        let deferred = Arc::clone(&self.deferred);
        self.release_listener = Some(self.limiter.add_release_listener(Arc::new(move || {
            if deferred.swap(false, Ordering::SeqCst) {
                control.signal_consume();
            }
        })));
        debug!(
            partition = %self.partition_id,
            max_append_block_size = self.max_append_block_size,
            limit = self.limiter.limit(),
            "Log appender starting"
        );
        Ok(())
    }

    fn on_consume(&mut self, ctx: &mut ActorContext<Self>) -> Result<()> {
        self.append_block(ctx)
    }

    fn on_closing(&mut self, _ctx: &mut ActorContext<Self>) {
        debug!(
            partition = %self.partition_id,
            pending = self.pending_listeners,
            "Log appender closing"
        );
    }

    fn on_closed(&mut self) {
        self.tear_down();
    }

    fn on_failed(&mut self, error: &Error) {
        self.tear_down();
        error!(
            partition = %self.partition_id,
            error = %error,
            "Log appender failed"
        );
    }

    fn has_pending_work(&self) -> bool {
        self.pending_listeners > 0
    }
}

/// Listener attached to one append
struct StorageListener {
    control: ActorControl<LogStorageAppender>,
    limiter: Arc<dyn Limiter>,
    partition_id: PartitionId,
    sequence: u64,
    handlers: CompletionQueue,
    appended_at_nanos: u64,
}

impl StorageListener {
    /// Release the token as dropped and fail the appender
    fn release_and_fail(&self, error: Error) {
        let sequence = self.sequence;
        self.limiter.on_commit_error(sequence);
        let scheduled = self.control.run(move |appender, _ctx| {
            appender.listener_done(sequence, true);
            appender.metrics.failed();
            appender.metrics.observe(appender.limiter.as_ref());
            Err(error)
        });
        self.log_unscheduled(scheduled);
    }

    fn log_unscheduled(&self, scheduled: Result<()>) {
        if let Err(e) = scheduled {
            trace!(
                partition = %self.partition_id,
                sequence = self.sequence,
                error = %e,
                "Appender no longer running, callback not delivered"
            );
        }
    }
}

impl AppendListener for StorageListener {
    fn on_write(&mut self, address: u64) {
        trace!(
            partition = %self.partition_id,
            sequence = self.sequence,
            address,
            "Block written"
        );
    }

    fn on_write_error(&mut self, error: Error) {
        if error.is_transient() {
            warn!(
                partition = %self.partition_id,
                sequence = self.sequence,
                error = %error,
                "Failed to append block during role transition"
            );
            let sequence = self.sequence;
            let scheduled = self.control.run(move |appender, _ctx| {
                appender.listener_done(sequence, false);
                Ok(())
            });
            self.log_unscheduled(scheduled);
            return;
        }

        error!(
            partition = %self.partition_id,
            sequence = self.sequence,
            error = %error,
            "Failed to append block"
        );
        self.release_and_fail(error);
    }

    fn on_commit(&mut self, address: u64) {
        let sequence = self.sequence;
        let appended_at = self.appended_at_nanos;
        trace!(
            partition = %self.partition_id,
            sequence,
            address,
            "Block committed"
        );
        self.limiter.on_commit(sequence);
        let scheduled = self.control.run(move |appender, ctx| {
            appender.listener_done(sequence, true);
            let latency = ActorClock::current()?.elapsed_since(appended_at);
            appender.metrics.committed(latency);
            appender.metrics.observe(appender.limiter.as_ref());
            ctx.yield_now();
            Ok(())
        });
        self.log_unscheduled(scheduled);
    }

    fn on_commit_error(&mut self, address: u64, error: Error) {
        error!(
            partition = %self.partition_id,
            sequence = self.sequence,
            address,
            error = %error,
            "Failed to commit block"
        );
        self.release_and_fail(error);
    }

    fn update_records(&mut self, entry: &mut LogEntry, index: u64) -> Result<()> {
        self.handlers.update_records(entry, index)
    }
}

/// Handle to a running appender
#[derive(Clone, Debug)]
pub struct AppenderHandle {
    partition_id: PartitionId,
    control: ActorControl<LogStorageAppender>,
    metrics: Arc<AppendMetrics>,
}

impl AppenderHandle {
    /// Partition the appender serves
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Request close; waits for outstanding storage callbacks.
    /// Repeated calls return the same signal.
    pub fn close(&self) -> CompletionSignal {
        self.control.close()
    }

    /// Completes once the appender started
    pub fn started(&self) -> CompletionSignal {
        self.control.started()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ActorState {
        self.control.state()
    }

    /// Snapshot of the append metrics
    pub fn metrics(&self) -> AppendMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl HealthMonitorable for AppenderHandle {
    fn health_status(&self) -> HealthStatus {
        self.control.health_status()
    }

    fn add_failure_listener(&self, listener: Box<dyn FailureListener>) {
        self.control.add_failure_listener(listener);
    }
}
