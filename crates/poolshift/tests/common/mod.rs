//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use poolshift::pool::{ManagedPool, PoolConfig, PoolFactory};
use poolshift::prelude::*;
use tokio_util::sync::CancellationToken;

/// Work that parks until `gate` opens
pub fn gated(gate: &CancellationToken) -> Work {
    let gate = gate.clone();
    work_fn(move |_| {
        let gate = gate.clone();
        async move {
            gate.cancelled().await;
            Ok(serde_json::Value::Null)
        }
    })
}

/// Work that counts its executions
pub fn counted(runs: &Arc<AtomicUsize>) -> Work {
    let runs = Arc::clone(runs);
    work_fn(move |ctx| {
        let runs = Arc::clone(&runs);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!(ctx.task_id().to_string()))
        }
    })
}

/// Poll `check` until it holds, panicking after five seconds
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Create a pool and park every one of its workers on `gate`
pub async fn saturated_pool(
    manager: &PoolManager,
    name: &str,
    capacity: usize,
    gate: &CancellationToken,
) -> (PoolId, Vec<TaskId>) {
    let pool = manager.create_pool(Some(name.to_string()), Some(capacity)).unwrap();
    let mut blockers = Vec::new();
    for _ in 0..capacity {
        blockers.push(manager.submit_task(pool, None, gated(gate)).await.unwrap());
    }
    wait_until(|| manager.get_pool(pool).unwrap().running_count() == capacity).await;
    (pool, blockers)
}

/// Wait until `pool` is in `phase`, then open `gate`
pub async fn release_at(manager: &PoolManager, pool: PoolId, phase: ResizePhase, gate: &CancellationToken) {
    wait_until(|| manager.engine().phase(pool) == phase).await;
    gate.cancel();
}

/// Builds the first pool normally and bounds the queue of every later one,
/// so migrating more than `limit` pending tasks fails part way.
pub struct BoundedReplacementFactory {
    created: AtomicUsize,
    limit: usize,
}

impl BoundedReplacementFactory {
    pub fn new(limit: usize) -> Self {
        Self {
            created: AtomicUsize::new(0),
            limit,
        }
    }
}

impl PoolFactory for BoundedReplacementFactory {
    fn create(&self, id: PoolId, name: &str, capacity: usize) -> Result<Arc<ManagedPool>, PoolError> {
        let config = if self.created.fetch_add(1, Ordering::SeqCst) == 0 {
            PoolConfig::default()
        } else {
            PoolConfig::default().with_max_queue_depth(self.limit)
        };
        ManagedPool::new(id, name, capacity, config)
    }
}
