//! Partition limiter registry
//!
//! Maps each partition to exactly one limiter. Limiters are built lazily by a
//! factory the first time a partition is touched, or eagerly through
//! [`PartitionLimiterRegistry::add_partition`]. Construction is performed
//! under the map's shard lock, so racing callers for the same partition
//! always observe the same instance.
//!
//! Lookups that miss after a partition was removed are normal during role
//! transitions: responses for such partitions are dropped silently.

use crate::config::BackpressureConfig;
use crate::limiter::{AdaptiveLimiter, AdmissionContext, Limiter, NoopLimiter};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tidelog_core::{Clock, PartitionId, StreamId};
use tracing::{debug, warn};

/// Builds the limiter for a newly seen partition
pub type LimiterFactory = Box<dyn Fn(PartitionId) -> Arc<dyn Limiter> + Send + Sync>;

/// Thread-safe map from partition to its limiter
pub struct PartitionLimiterRegistry {
    limiters: DashMap<PartitionId, Arc<dyn Limiter>>,
    factory: LimiterFactory,
}

impl PartitionLimiterRegistry {
    /// Registry with a custom factory
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(PartitionId) -> Arc<dyn Limiter> + Send + Sync + 'static,
    {
        PartitionLimiterRegistry {
            limiters: DashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// Registry whose partitions never apply backpressure
    pub fn new_noop() -> Self {
        let noop: Arc<dyn Limiter> = Arc::new(NoopLimiter);
        Self::with_factory(move |_| Arc::clone(&noop))
    }

    /// Registry building limiters from `config`
    ///
    /// A disabled configuration yields a no-op registry.
    pub fn from_config(config: &BackpressureConfig, clock: Arc<dyn Clock>) -> Self {
        if !config.enabled {
            warn!("Backpressure is disabled, appends are never deferred");
            return Self::new_noop();
        }

        debug!(
            algorithm = %config.algorithm,
            windowed = config.use_windowed,
            "Configured partition limiters"
        );
        let config = config.clone();
        Self::with_factory(move |partition_id| {
            Arc::new(AdaptiveLimiter::new(
                partition_id,
                config.build_limit(),
                Arc::clone(&clock),
            )) as Arc<dyn Limiter>
        })
    }

    /// Limiter for `partition_id`, created on first use
    pub fn get_or_create(&self, partition_id: PartitionId) -> Arc<dyn Limiter> {
        let entry = self
            .limiters
            .entry(partition_id)
            .or_insert_with(|| (self.factory)(partition_id));
        Arc::clone(entry.value())
    }

    /// Eagerly create the limiter for a partition that became active
    pub fn add_partition(&self, partition_id: PartitionId) -> Arc<dyn Limiter> {
        self.get_or_create(partition_id)
    }

    /// Detach a partition. Tokens it issued are abandoned.
    pub fn remove_partition(&self, partition_id: PartitionId) {
        if self.limiters.remove(&partition_id).is_some() {
            debug!(partition = %partition_id, "Removed partition limiter");
        }
    }

    /// Limiter for `partition_id` if one exists
    pub fn get_limiter(&self, partition_id: PartitionId) -> Option<Arc<dyn Limiter>> {
        self.limiters
            .get(&partition_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Admit a request on `partition_id`, creating its limiter if needed
    pub fn try_acquire(
        &self,
        partition_id: PartitionId,
        stream_id: StreamId,
        request_id: u64,
        context: AdmissionContext,
    ) -> bool {
        self.get_or_create(partition_id)
            .try_acquire(stream_id, request_id, context)
    }

    /// Forward a response; ignored for unknown partitions
    pub fn on_response(&self, partition_id: PartitionId, stream_id: StreamId, request_id: u64) {
        // Clone out of the map before calling, the limiter may take its own lock
        if let Some(limiter) = self.get_limiter(partition_id) {
            limiter.on_response(stream_id, request_id);
        }
    }

    /// Number of partitions with a live limiter
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Whether no partition has a limiter
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

impl fmt::Debug for PartitionLimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionLimiterRegistry")
            .field("partitions", &self.limiters.len())
            .finish()
    }
}
