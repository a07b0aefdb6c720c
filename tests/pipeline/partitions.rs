//! Several partitions sharing one scheduler and one limiter registry

use crate::common::*;
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

use tidelog::{
    ActorScheduler, ActorState, AdmissionContext, AppenderConfig, AppenderHandle,
    BackpressureConfig, HealthMonitorable, HealthStatus, LimitAlgorithm, LogStorage,
    LogStorageAppender, MonotonicClock, PartitionId, PartitionLimiterRegistry, SchedulerConfig,
    StreamId, WriteBuffer,
};
use tidelog_durability::testing::InMemoryLogStorage;

const PRODUCERS: u64 = 4;
const WRITES_PER_PRODUCER: u64 = 250;

struct Partition {
    id: PartitionId,
    buffer: WriteBuffer,
    storage: Arc<InMemoryLogStorage>,
    appender: AppenderHandle,
}

fn start_partition(
    id: PartitionId,
    scheduler: &ActorScheduler,
    registry: &PartitionLimiterRegistry,
) -> Partition {
    let buffer = WriteBuffer::default();
    let storage = Arc::new(InMemoryLogStorage::new());
    let appender = LogStorageAppender::from_registry(
        id,
        &buffer,
        Arc::clone(&storage) as Arc<dyn LogStorage>,
        registry,
        &AppenderConfig::new().with_max_append_block_size(256),
    )
    .unwrap()
    .start(scheduler)
    .unwrap();
    Partition {
        id,
        buffer,
        storage,
        appender,
    }
}

fn fixed_registry(limit: usize) -> PartitionLimiterRegistry {
    let config = BackpressureConfig::new()
        .with_algorithm(LimitAlgorithm::Fixed)
        .with_windowed(false)
        .with_fixed_limit(limit);
    PartitionLimiterRegistry::from_config(&config, Arc::new(MonotonicClock::new()))
}

/// Producers on several threads write to two partitions while storage
/// commits in the background. Every write completes exactly once, in
/// per-producer order, and every partition's limiter drains to zero.
#[test]
fn test_concurrent_producers_complete_every_write_once() {
    init_tracing();
    let scheduler = ActorScheduler::new(SchedulerConfig::default().with_worker_threads(3));
    let registry = fixed_registry(3);
    let partitions: Vec<Partition> = (1..=2)
        .map(|id| start_partition(PartitionId::new(id), &scheduler, &registry))
        .collect();
    let committers: Vec<Committer> = partitions
        .iter()
        .map(|p| Committer::spawn(Arc::clone(&p.storage)))
        .collect();

    let completions: Vec<Completions> = partitions.iter().map(|_| Completions::default()).collect();
    let barrier = Arc::new(Barrier::new(PRODUCERS as usize));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let barrier = Arc::clone(&barrier);
            let targets: Vec<(WriteBuffer, Completions)> = partitions
                .iter()
                .zip(&completions)
                .map(|(p, c)| (p.buffer.clone(), c.clone()))
                .collect();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..WRITES_PER_PRODUCER {
                    let (buffer, completions) = &targets[(i % 2) as usize];
                    let write_id = producer * WRITES_PER_PRODUCER + i;
                    buffer
                        .offer(
                            StreamId::new(producer as u32),
                            &write_id.to_le_bytes(),
                            completions.handler(write_id),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let expected_per_partition = (PRODUCERS * WRITES_PER_PRODUCER / 2) as usize;
    for (partition, completions) in partitions.iter().zip(&completions) {
        assert!(
            wait_until(|| completions.calls() == expected_per_partition),
            "partition {} completed {} of {}",
            partition.id,
            completions.calls(),
            expected_per_partition
        );

        // Positions strictly increase in completion order
        let positions = completions.positions();
        assert!(positions.windows(2).all(|w| w[0].1 < w[1].1));

        // Each producer's writes complete in the order they were offered
        let mut last_seen: HashMap<u64, u64> = HashMap::new();
        for (write_id, _) in &positions {
            let producer = write_id / WRITES_PER_PRODUCER;
            if let Some(previous) = last_seen.insert(producer, *write_id) {
                assert!(previous < *write_id);
            }
        }

        let limiter = registry.get_limiter(partition.id).unwrap();
        assert!(wait_until(|| limiter.inflight() == 0));
        assert_eq!(partition.appender.health_status(), HealthStatus::Healthy);
    }

    for partition in &partitions {
        assert_eq!(
            partition.appender.close().wait_timeout(TIMEOUT),
            Some(ActorState::Closed)
        );
    }
    drop(committers);
    scheduler.shutdown();
}

/// Request-side admissions on the same limiter compete with appends for
/// capacity; once the requests are answered the appender catches up.
#[test]
fn test_request_tokens_share_capacity_with_appends() {
    init_tracing();
    let scheduler = ActorScheduler::new(SchedulerConfig::default().with_worker_threads(2));
    let registry = fixed_registry(2);
    let id = PartitionId::new(7);
    let partition = start_partition(id, &scheduler, &registry);
    let client = StreamId::new(42);

    assert!(registry.try_acquire(id, client, 1, AdmissionContext::Command));
    assert!(registry.try_acquire(id, client, 2, AdmissionContext::Command));
    assert!(!registry.try_acquire(id, client, 3, AdmissionContext::Command));
    // Priority requests are always admitted
    assert!(registry.try_acquire(id, client, 4, AdmissionContext::Priority));

    let completions = Completions::default();
    partition
        .buffer
        .offer(StreamId::new(1), b"deferred", completions.handler(1))
        .unwrap();
    assert!(wait_until(|| partition.appender.metrics().deferred_appends >= 1));
    assert!(partition.storage.appended().is_empty());

    // Answering the requests alone resumes the deferred write
    registry.on_response(id, client, 1);
    registry.on_response(id, client, 2);

    let committer = Committer::spawn(Arc::clone(&partition.storage));
    assert!(wait_until(|| completions.calls() == 1));
    assert_eq!(
        completions
            .positions()
            .iter()
            .map(|(id, _)| *id)
            .collect::<Vec<_>>(),
        vec![1]
    );
    assert_eq!(partition.storage.appended().len(), 1);

    assert_eq!(
        partition.appender.close().wait_timeout(TIMEOUT),
        Some(ActorState::Closed)
    );
    drop(committer);
    scheduler.shutdown();
}

/// Removing a partition drops its limiter from the registry; a later
/// appender for the same partition gets a fresh one.
#[test]
fn test_partition_removal_and_recreation() {
    init_tracing();
    let scheduler = ActorScheduler::new(SchedulerConfig::default().with_worker_threads(1));
    let registry = fixed_registry(4);
    let id = PartitionId::new(3);

    let first = start_partition(id, &scheduler, &registry);
    let first_limiter = registry.get_limiter(id).unwrap();
    assert_eq!(
        first.appender.close().wait_timeout(TIMEOUT),
        Some(ActorState::Closed)
    );
    registry.remove_partition(id);
    assert!(registry.get_limiter(id).is_none());
    // Responses for a removed partition are ignored
    registry.on_response(id, StreamId::new(1), 1);

    let second = start_partition(id, &scheduler, &registry);
    let second_limiter = registry.get_limiter(id).unwrap();
    assert!(!Arc::ptr_eq(&first_limiter, &second_limiter));

    let completions = Completions::default();
    second
        .buffer
        .offer(StreamId::new(1), b"again", completions.handler(1))
        .unwrap();
    let committer = Committer::spawn(Arc::clone(&second.storage));
    assert!(wait_until(|| completions.calls() == 1));
    drop(committer);
    scheduler.shutdown();
}
