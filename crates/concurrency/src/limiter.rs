//! In-flight admission limiters
//!
//! A limiter owns the set of admission tokens for one partition. Producers
//! call [`Limiter::try_acquire`] from request threads; the appender task
//! releases tokens from its own thread once storage answers. Per token:
//!
//! ```text
//! try_acquire ──► in flight ──► on_commit / on_response   (RTT sample)
//!                          └──► on_commit_error / drop    (RTT sample, did_drop)
//!                          └──► ignore                    (no sample)
//! ```
//!
//! Releasing a token that is unknown (already released, or never admitted)
//! is a no-op, so each admission releases capacity exactly once.
//!
//! Release listeners are told whenever capacity was actually freed, so a
//! caller that was rejected can retry without polling.

use crate::limit::{AdaptiveLimit, Sample};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tidelog_core::{Clock, PartitionId, StreamId};
use tracing::{debug, trace};

/// What kind of work is asking for admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionContext {
    /// A block the log appender wants to hand to storage
    Append,
    /// A client command entering the partition
    Command,
    /// Work that frees capacity elsewhere (e.g. completing a job).
    /// Always admitted and never tracked.
    Priority,
}

impl AdmissionContext {
    /// Whether this context skips the ceiling entirely
    pub fn bypasses_limit(self) -> bool {
        matches!(self, AdmissionContext::Priority)
    }
}

/// How an admitted token ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Completed; the round trip is a latency sample
    Success,
    /// Failed or timed out; the round trip is a drop sample
    Dropped,
    /// Abandoned; no sample is recorded
    Ignored,
}

/// Key of an admission token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenKey {
    /// Stream the request arrived on
    pub stream_id: StreamId,
    /// Sequence or request id, unique within the stream
    pub sequence: u64,
}

impl TokenKey {
    /// Key for an appender-owned token
    pub fn append(sequence: u64) -> Self {
        TokenKey {
            stream_id: StreamId::APPENDER,
            sequence,
        }
    }
}

/// Callback invoked after a token was released
pub type ReleaseListener = Arc<dyn Fn() + Send + Sync>;

/// Common interface of adaptive and no-op limiters
pub trait Limiter: Send + Sync + fmt::Debug {
    /// Admit one request if the in-flight count is below the ceiling.
    ///
    /// Returns `false` without side effects when the ceiling is reached or
    /// the key is already in flight.
    fn try_acquire(&self, stream_id: StreamId, sequence: u64, context: AdmissionContext) -> bool;

    /// Release a token. Returns whether a token was actually released.
    fn release(&self, stream_id: StreamId, sequence: u64, outcome: ReleaseOutcome) -> bool;

    /// Number of admitted, unreleased tokens
    fn inflight(&self) -> usize;

    /// Current ceiling
    fn limit(&self) -> usize;

    /// Whether admissions are actually bounded
    fn is_enabled(&self) -> bool {
        true
    }

    /// A reply was observed for a request-side token
    fn on_response(&self, stream_id: StreamId, sequence: u64) {
        self.release(stream_id, sequence, ReleaseOutcome::Success);
    }

    /// Storage committed the appender's entry
    fn on_commit(&self, sequence: u64) {
        self.release(StreamId::APPENDER, sequence, ReleaseOutcome::Success);
    }

    /// Storage failed to write or commit the appender's entry
    fn on_commit_error(&self, sequence: u64) {
        self.release(StreamId::APPENDER, sequence, ReleaseOutcome::Dropped);
    }

    /// The appender gave up on its entry without an outcome
    fn on_abandon(&self, sequence: u64) {
        self.release(StreamId::APPENDER, sequence, ReleaseOutcome::Ignored);
    }

    /// Register `listener` to run after every effective release.
    /// Returns an id for [`Limiter::remove_release_listener`].
    fn add_release_listener(&self, _listener: ReleaseListener) -> u64 {
        0
    }

    /// Unregister a release listener; unknown ids are ignored
    fn remove_release_listener(&self, _id: u64) {}
}

#[derive(Debug, Clone, Copy)]
struct Token {
    start_nanos: u64,
    inflight_at_acquire: usize,
}

/// Limiter driven by an [`AdaptiveLimit`]
///
/// The ceiling and the in-flight count are atomics so that observers and
/// admitters never take a lock; only releases serialize on the algorithm.
pub struct AdaptiveLimiter {
    partition_id: PartitionId,
    algorithm: Mutex<AdaptiveLimit>,
    limit: AtomicUsize,
    inflight: AtomicUsize,
    tokens: DashMap<TokenKey, Token>,
    release_listeners: DashMap<u64, ReleaseListener>,
    next_listener_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl AdaptiveLimiter {
    /// Create a limiter for `partition_id` running `algorithm`
    pub fn new(partition_id: PartitionId, algorithm: AdaptiveLimit, clock: Arc<dyn Clock>) -> Self {
        let limit = algorithm.limit();
        debug!(
            partition = %partition_id,
            algorithm = algorithm.name(),
            limit,
            "Created adaptive limiter"
        );
        AdaptiveLimiter {
            partition_id,
            algorithm: Mutex::new(algorithm),
            limit: AtomicUsize::new(limit),
            inflight: AtomicUsize::new(0),
            tokens: DashMap::new(),
            release_listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            clock,
        }
    }

    /// Partition this limiter belongs to
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Name of the configured algorithm
    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.lock().name()
    }

    /// Whether the given token is currently in flight
    pub fn is_in_flight(&self, stream_id: StreamId, sequence: u64) -> bool {
        self.tokens.contains_key(&TokenKey {
            stream_id,
            sequence,
        })
    }

    fn notify_released(&self) {
        if self.release_listeners.is_empty() {
            return;
        }
        // Cloned out so no shard lock is held while listeners run
        let listeners: Vec<ReleaseListener> = self
            .release_listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl Limiter for AdaptiveLimiter {
    fn try_acquire(&self, stream_id: StreamId, sequence: u64, context: AdmissionContext) -> bool {
        if context.bypasses_limit() {
            return true;
        }

        let reserved = self
            .inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit.load(Ordering::Acquire)).then_some(n + 1)
            });
        let inflight_at_acquire = match reserved {
            Ok(previous) => previous + 1,
            Err(current) => {
                trace!(
                    partition = %self.partition_id,
                    stream = %stream_id,
                    sequence,
                    inflight = current,
                    limit = self.limit(),
                    "Admission rejected"
                );
                return false;
            }
        };

        let key = TokenKey {
            stream_id,
            sequence,
        };
        match self.tokens.entry(key) {
            Entry::Occupied(_) => {
                self.inflight.fetch_sub(1, Ordering::AcqRel);
                debug!(
                    partition = %self.partition_id,
                    stream = %stream_id,
                    sequence,
                    "Admission rejected, token already in flight"
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(Token {
                    start_nanos: self.clock.now_nanos(),
                    inflight_at_acquire,
                });
                true
            }
        }
    }

    fn release(&self, stream_id: StreamId, sequence: u64, outcome: ReleaseOutcome) -> bool {
        let key = TokenKey {
            stream_id,
            sequence,
        };
        let Some((_, token)) = self.tokens.remove(&key) else {
            return false;
        };
        self.inflight.fetch_sub(1, Ordering::AcqRel);

        let rtt_nanos = self.clock.elapsed_since(token.start_nanos);
        let sample = match outcome {
            ReleaseOutcome::Success => Some(Sample::success(
                token.start_nanos,
                rtt_nanos,
                token.inflight_at_acquire,
            )),
            ReleaseOutcome::Dropped => Some(Sample::dropped(
                token.start_nanos,
                rtt_nanos,
                token.inflight_at_acquire,
            )),
            ReleaseOutcome::Ignored => None,
        };

        if let Some(sample) = sample {
            let mut algorithm = self.algorithm.lock();
            let new_limit = algorithm.update(&sample);
            let old_limit = self.limit.swap(new_limit, Ordering::AcqRel);
            if old_limit != new_limit {
                trace!(
                    partition = %self.partition_id,
                    old_limit,
                    new_limit,
                    rtt_nanos,
                    "Limit changed"
                );
            }
        }

        self.notify_released();
        true
    }

    fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    fn add_release_listener(&self, listener: ReleaseListener) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.release_listeners.insert(id, listener);
        id
    }

    fn remove_release_listener(&self, id: u64) {
        self.release_listeners.remove(&id);
    }
}

impl fmt::Debug for AdaptiveLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveLimiter")
            .field("partition_id", &self.partition_id)
            .field("inflight", &self.inflight())
            .field("limit", &self.limit())
            .finish()
    }
}

/// Limiter used when backpressure is disabled: admits everything, tracks nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLimiter;

impl Limiter for NoopLimiter {
    fn try_acquire(&self, _stream_id: StreamId, _sequence: u64, _context: AdmissionContext) -> bool {
        true
    }

    fn release(&self, _stream_id: StreamId, _sequence: u64, _outcome: ReleaseOutcome) -> bool {
        false
    }

    fn inflight(&self) -> usize {
        0
    }

    fn limit(&self) -> usize {
        usize::MAX
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
