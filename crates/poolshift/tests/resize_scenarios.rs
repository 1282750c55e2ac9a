//! End-to-end resize scenarios through the pool manager

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{counted, release_at, saturated_pool, wait_until};
use poolshift::prelude::*;
use tokio_util::sync::CancellationToken;

fn manager_with_metrics(config: EngineConfig) -> (PoolManager, Arc<InMemoryMetrics>) {
    let metrics = Arc::new(InMemoryMetrics::new());
    let factory = Arc::new(DefaultPoolFactory::new(PoolConfig::from(&config)));
    let manager = PoolManager::with_parts(config, factory, metrics.clone());
    (manager, metrics)
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_grow_capacity_migrates_every_pending_task() {
    let (manager, metrics) = manager_with_metrics(EngineConfig::default());
    let gate = CancellationToken::new();
    let (pool, blockers) = saturated_pool(&manager, "grow", 2, &gate).await;

    let runs = Arc::new(AtomicUsize::new(0));
    let mut pending = Vec::new();
    for _ in 0..10 {
        pending.push(manager.submit_task(pool, None, counted(&runs)).await.unwrap());
    }
    assert_eq!(manager.get_pool_info(pool).unwrap().pending_tasks, 10);

    let (outcome, _) = tokio::join!(
        manager.resize(pool, 5),
        release_at(&manager, pool, ResizePhase::Cleaning, &gate)
    );
    let outcome = outcome.unwrap();

    assert!(outcome.success);
    assert!(!outcome.retirement_deferred);
    assert_eq!(outcome.old_capacity, 2);
    assert_eq!(outcome.new_capacity, 5);
    assert_eq!(outcome.migrated_count, 10);
    assert_eq!(outcome.discarded_count, 0);
    assert_eq!(outcome.running_at_freeze, 2);
    assert!(outcome.failure.is_none());

    let new_pool = outcome.new_pool_id.unwrap();
    assert_ne!(new_pool, pool);
    let info = manager.get_pool_info(pool).unwrap();
    assert_eq!(info.pool_id, new_pool);
    assert_eq!(info.name, "grow");
    assert_eq!(info.capacity, 5);
    assert_eq!(info.total_tasks, 12);

    for task in pending.iter().chain(&blockers) {
        let record = manager.get_task(*task).await.unwrap();
        assert_eq!(record.owner_pool_id, new_pool);
    }
    for task in &pending {
        let record = manager
            .wait_for_task(*task, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 10);
    assert_eq!(metrics.success_count(), 1);
}

#[test_log::test(tokio::test)]
async fn test_zero_capacity_is_rejected_without_side_effects() {
    let (manager, metrics) = manager_with_metrics(EngineConfig::default());
    let pool = manager.create_pool(Some("fixed".into()), Some(3)).unwrap();

    let err = manager.resize(pool, 0).await.unwrap_err();
    assert_eq!(
        err,
        ResizeError::InvalidCapacity {
            requested: 0,
            min: MIN_CAPACITY,
            max: MAX_CAPACITY
        }
    );
    assert!(!err.is_transient());

    let info = manager.get_pool_info(pool).unwrap();
    assert_eq!(info.pool_id, pool);
    assert_eq!(info.capacity, 3);
    assert!(info.accepting_submissions);
    assert!(!manager.engine().checkpoints().has_checkpoint(pool));
    assert_eq!(manager.engine().phase(pool), ResizePhase::Ready);

    let outcomes = metrics.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0].failure,
        Some(ResizeFailure::Rejected {
            error: ResizeError::InvalidCapacity { .. }
        })
    ));

    assert!(matches!(
        manager.resize(pool, 51).await.unwrap_err(),
        ResizeError::InvalidCapacity { requested: 51, .. }
    ));
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_resizes_of_one_pool() {
    let (manager, metrics) = manager_with_metrics(EngineConfig::default().with_max_concurrent_resizes(4));
    let gate = CancellationToken::new();
    let (pool, _) = saturated_pool(&manager, "contended", 2, &gate).await;

    let (first, second, _) = tokio::join!(
        manager.resize(pool, 4),
        manager.resize(pool, 6),
        release_at(&manager, pool, ResizePhase::Cleaning, &gate)
    );

    let results = [first, second];
    let successes = results
        .iter()
        .filter(|r| matches!(r, Ok(outcome) if outcome.success))
        .count();
    assert_eq!(successes, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ResizeError::AlreadyResizing(id)) if *id == pool)));

    let migrating = metrics
        .phases(pool)
        .into_iter()
        .filter(|p| *p == ResizePhase::Migrating)
        .count();
    assert_eq!(migrating, 1);
    assert_eq!(metrics.outcomes().len(), 2);
    assert!([4, 6].contains(&manager.get_pool_info(pool).unwrap().capacity));
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_global_permit_limit_reports_busy() {
    let config = EngineConfig::default()
        .with_max_concurrent_resizes(1)
        .with_acquire_timeout(Duration::from_millis(50));
    let (manager, _) = manager_with_metrics(config);
    let gate = CancellationToken::new();
    let (held, _) = saturated_pool(&manager, "held", 1, &gate).await;
    let other = manager.create_pool(Some("other".into()), Some(1)).unwrap();

    let (first, second) = tokio::join!(manager.resize(held, 2), async {
        wait_until(|| manager.engine().phase(held) == ResizePhase::Cleaning).await;
        let result = manager.resize(other, 3).await;
        gate.cancel();
        result
    });

    assert!(first.unwrap().success);
    let err = second.unwrap_err();
    assert_eq!(err, ResizeError::Busy(other));
    assert!(err.is_transient());
    assert_eq!(manager.get_pool_info(other).unwrap().capacity, 1);

    // The permit is free again once the first resize is done.
    assert!(manager.resize(other, 3).await.unwrap().success);
}

#[test_log::test(tokio::test)]
async fn test_shrink_and_chain_through_old_ids() {
    let (manager, _) = manager_with_metrics(EngineConfig::default());
    let original = manager.create_pool(Some("chain".into()), Some(8)).unwrap();

    let first = manager.resize(original, 4).await.unwrap();
    let second = manager.resize(original, 2).await.unwrap();
    assert!(first.success && second.success);
    assert_eq!(second.pool_id, first.new_pool_id.unwrap());

    let info = manager.get_pool_info(original).unwrap();
    assert_eq!(info.capacity, 2);
    assert_eq!(info.pool_id, second.new_pool_id.unwrap());
    assert_eq!(manager.list_pools().len(), 1);

    let noop = manager.resize(original, 2).await.unwrap();
    assert!(noop.success);
    assert!(noop.new_pool_id.is_none());
}

#[test_log::test(tokio::test)]
async fn test_resize_info_and_advised_resize() {
    let (manager, _) = manager_with_metrics(EngineConfig::default());
    let gate = CancellationToken::new();
    let (pool, _) = saturated_pool(&manager, "advised", 2, &gate).await;
    for _ in 0..8 {
        manager.submit_task(pool, None, common::gated(&gate)).await.unwrap();
    }

    let info = manager.get_resize_info(pool).unwrap();
    assert_eq!(info.current_capacity, 2);
    assert_eq!(info.active_tasks, 2);
    assert_eq!(info.queue_depth, 8);
    assert_eq!(info.suggested_capacity, 4);
    assert!(info.can_resize);
    assert!(info.rationale.contains("backlog of 8"));

    let (outcome, _) = tokio::join!(
        manager.resize(pool, info.suggested_capacity),
        release_at(&manager, pool, ResizePhase::Cleaning, &gate)
    );
    assert_eq!(outcome.unwrap().migrated_count, 8);
    assert_eq!(manager.get_resize_info(pool).unwrap().current_capacity, 4);
}

#[test_log::test(tokio::test)]
async fn test_resize_of_closed_pool() {
    let (manager, _) = manager_with_metrics(EngineConfig::default());
    let pool = manager.create_pool(None, Some(2)).unwrap();
    manager.close_pool(pool, true).await.unwrap();

    assert_eq!(
        manager.resize(pool, 4).await.unwrap_err(),
        ResizeError::PoolNotFound(pool)
    );
}
