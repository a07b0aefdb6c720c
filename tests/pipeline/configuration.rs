//! Pipelines built from backpressure configuration documents

use crate::common::*;
use std::collections::HashMap;
use std::sync::Arc;

use tidelog::{
    ActorScheduler, ActorState, AppenderConfig, BackpressureConfig, LimitAlgorithm, Limiter,
    LogStorage, LogStorageAppender, MonotonicClock, PartitionId, PartitionLimiterRegistry,
    SchedulerConfig, StreamId, WriteBuffer,
};
use tidelog_durability::testing::InMemoryLogStorage;

const RECORDS: u64 = 300;

/// Run `RECORDS` writes through one partition built from `config` and
/// return the partition's limiter afterwards
fn drive(config: &BackpressureConfig) -> Arc<dyn Limiter> {
    init_tracing();
    let scheduler = ActorScheduler::new(SchedulerConfig::default().with_worker_threads(2));
    let registry = PartitionLimiterRegistry::from_config(config, Arc::new(MonotonicClock::new()));
    let partition = PartitionId::new(1);
    let buffer = WriteBuffer::default();
    let storage = Arc::new(InMemoryLogStorage::new());
    let appender = LogStorageAppender::from_registry(
        partition,
        &buffer,
        Arc::clone(&storage) as Arc<dyn LogStorage>,
        &registry,
        &AppenderConfig::new().with_max_append_block_size(64),
    )
    .unwrap()
    .start(&scheduler)
    .unwrap();
    let committer = Committer::spawn(Arc::clone(&storage));

    let completions = Completions::default();
    for i in 0..RECORDS {
        buffer
            .offer(StreamId::new(1), &i.to_le_bytes(), completions.handler(i))
            .unwrap();
    }
    assert!(wait_until(|| completions.calls() == RECORDS as usize));
    let ids: Vec<u64> = completions.positions().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, (0..RECORDS).collect::<Vec<_>>());

    assert_eq!(appender.close().wait_timeout(TIMEOUT), Some(ActorState::Closed));
    drop(committer);
    scheduler.shutdown();

    let limiter = registry.get_or_create(partition);
    assert_eq!(limiter.inflight(), 0);
    limiter
}

#[test]
fn test_every_algorithm_drives_the_pipeline() {
    for algorithm in [
        LimitAlgorithm::Fixed,
        LimitAlgorithm::Aimd,
        LimitAlgorithm::Vegas,
        LimitAlgorithm::Gradient,
        LimitAlgorithm::Gradient2,
    ] {
        for windowed in [false, true] {
            let config = BackpressureConfig::new()
                .with_algorithm(algorithm)
                .with_windowed(windowed);
            let limiter = drive(&config);
            assert!(limiter.limit() >= 1, "{:?} windowed={}", algorithm, windowed);
        }
    }
}

#[test]
fn test_toml_document_selects_algorithm() {
    let config = BackpressureConfig::from_toml_str(
        r#"
        algorithm = "aimd"
        use_windowed = false

        [aimd]
        initial_limit = 4
        min_limit = 1
        max_limit = 8
        backoff_ratio = 0.5
        "#,
    )
    .unwrap();
    assert_eq!(config.algorithm, LimitAlgorithm::Aimd);

    let limiter = drive(&config);
    assert!((1..=8).contains(&limiter.limit()));
}

#[test]
fn test_environment_can_disable_backpressure() {
    let mut config = BackpressureConfig::new();
    let env: HashMap<&str, &str> = [("TIDELOG_BACKPRESSURE_ENABLED", "false")]
        .into_iter()
        .collect();
    config
        .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()))
        .unwrap();
    assert!(!config.enabled);

    let limiter = drive(&config);
    assert!(!limiter.is_enabled());
    assert_eq!(limiter.limit(), usize::MAX);
}

#[test]
fn test_invalid_document_is_rejected() {
    let result = BackpressureConfig::from_toml_str(
        r#"
        algorithm = "vegas"

        [vegas]
        alpha = 6.0
        beta = 3.0
        "#,
    );
    assert!(result.is_err());
}
