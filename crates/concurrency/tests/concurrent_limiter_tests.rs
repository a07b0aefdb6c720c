//! Concurrent tests for tidelog-concurrency
//!
//! Admission is checked from request threads while releases come from the
//! appender's thread, so these tests run real threads against one limiter:
//!
//! 1. **Admission bound** - held tokens never exceed the ceiling
//! 2. **Exactly-once release** - racing releases free capacity once
//! 3. **Single construction** - racing `get_or_create` builds one limiter
//! 4. **Removal races** - responses after removal are no-ops
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test concurrent_limiter_tests
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use tidelog_concurrency::{
    AdmissionContext, BackpressureConfig, LimitAlgorithm, Limiter, NoopLimiter,
    PartitionLimiterRegistry, ReleaseOutcome,
};
use tidelog_core::{ManualClock, MonotonicClock, PartitionId, StreamId};

// ============================================================================
// Test Helpers
// ============================================================================

fn fixed_config(limit: usize) -> BackpressureConfig {
    BackpressureConfig::new()
        .with_algorithm(LimitAlgorithm::Fixed)
        .with_windowed(false)
        .with_fixed_limit(limit)
}

fn fixed_limiter(limit: usize) -> Arc<dyn Limiter> {
    let registry = PartitionLimiterRegistry::from_config(
        &fixed_config(limit),
        Arc::new(MonotonicClock::new()),
    );
    registry.get_or_create(PartitionId::new(1))
}

// ============================================================================
// SECTION 1: Admission Bound
// ============================================================================

mod admission_bound {
    use super::*;

    /// Each thread acquires, holds briefly, then releases its own sequences.
    /// The held counter is raised after a successful acquire and lowered
    /// before release, so it is a lower bound of the limiter's in-flight set.
    #[test]
    fn test_held_tokens_never_exceed_limit() {
        const LIMIT: usize = 4;
        const THREADS: u64 = 8;
        const ATTEMPTS: u64 = 2_000;

        let limiter = fixed_limiter(LIMIT);
        let held = Arc::new(AtomicUsize::new(0));
        let max_held = Arc::new(AtomicUsize::new(0));
        let admitted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS as usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let limiter = Arc::clone(&limiter);
                let held = Arc::clone(&held);
                let max_held = Arc::clone(&max_held);
                let admitted = Arc::clone(&admitted);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let stream = StreamId::new(t as u32);
                    barrier.wait();
                    for sequence in 0..ATTEMPTS {
                        if limiter.try_acquire(stream, sequence, AdmissionContext::Command) {
                            admitted.fetch_add(1, Ordering::Relaxed);
                            let now = held.fetch_add(1, Ordering::AcqRel) + 1;
                            max_held.fetch_max(now, Ordering::AcqRel);
                            assert!(limiter.inflight() <= LIMIT);
                            thread::yield_now();
                            held.fetch_sub(1, Ordering::AcqRel);
                            assert!(limiter.release(stream, sequence, ReleaseOutcome::Success));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(max_held.load(Ordering::Acquire) <= LIMIT);
        assert!(admitted.load(Ordering::Acquire) > 0);
        assert_eq!(limiter.inflight(), 0);
    }

    /// Saturating a limiter from many threads admits exactly `limit` tokens
    #[test]
    fn test_saturation_admits_exactly_limit() {
        const LIMIT: usize = 16;
        const THREADS: usize = 8;

        let limiter = fixed_limiter(LIMIT);
        let admitted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for sequence in 0..100u64 {
                        if limiter.try_acquire(
                            StreamId::new(t as u32),
                            sequence,
                            AdmissionContext::Command,
                        ) {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::Acquire), LIMIT);
        assert_eq!(limiter.inflight(), LIMIT);
    }
}

// ============================================================================
// SECTION 2: Exactly-Once Release
// ============================================================================

mod exactly_once_release {
    use super::*;

    #[test]
    fn test_racing_releases_free_one_slot() {
        const THREADS: usize = 8;

        let limiter = fixed_limiter(2);
        assert!(limiter.try_acquire(StreamId::APPENDER, 1, AdmissionContext::Append));
        assert!(limiter.try_acquire(StreamId::APPENDER, 2, AdmissionContext::Append));

        let released = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let limiter = Arc::clone(&limiter);
                let released = Arc::clone(&released);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let outcome = if i % 2 == 0 {
                        ReleaseOutcome::Success
                    } else {
                        ReleaseOutcome::Dropped
                    };
                    if limiter.release(StreamId::APPENDER, 1, outcome) {
                        released.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(released.load(Ordering::Acquire), 1);
        assert_eq!(limiter.inflight(), 1);
    }
}

// ============================================================================
// SECTION 3: Registry
// ============================================================================

mod registry {
    use super::*;

    #[test]
    fn test_racing_get_or_create_builds_once() {
        const THREADS: usize = 16;

        let built = Arc::new(AtomicUsize::new(0));
        let registry = {
            let built = Arc::clone(&built);
            Arc::new(PartitionLimiterRegistry::with_factory(move |_| {
                built.fetch_add(1, Ordering::SeqCst);
                Arc::new(NoopLimiter) as Arc<dyn Limiter>
            }))
        };
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create(PartitionId::new(7))
                })
            })
            .collect();

        let limiters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        for limiter in &limiters[1..] {
            assert!(Arc::ptr_eq(&limiters[0], limiter));
        }
    }

    #[test]
    fn test_responses_race_with_removal() {
        const REQUESTS: u64 = 1_000;

        let registry = Arc::new(PartitionLimiterRegistry::from_config(
            &fixed_config(REQUESTS as usize),
            Arc::new(ManualClock::new()),
        ));
        let partition = PartitionId::new(3);
        let stream = StreamId::new(1);
        for request in 0..REQUESTS {
            assert!(registry.try_acquire(partition, stream, request, AdmissionContext::Command));
        }

        let barrier = Arc::new(Barrier::new(2));
        let responder = {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for request in 0..REQUESTS {
                    registry.on_response(partition, stream, request);
                }
            })
        };
        let remover = {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.remove_partition(partition);
            })
        };

        responder.join().unwrap();
        remover.join().unwrap();

        assert!(registry.get_limiter(partition).is_none());
    }

    #[test]
    fn test_noop_registry_admits_everything() {
        let registry = PartitionLimiterRegistry::new_noop();
        for request in 0..100_000u64 {
            assert!(registry.try_acquire(
                PartitionId::new((request % 4) as u32),
                StreamId::APPENDER,
                request,
                AdmissionContext::Append,
            ));
        }
        assert_eq!(registry.len(), 4);
    }
}
