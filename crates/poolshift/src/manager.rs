//! Pool manager
//!
//! The facade consumed by outer layers (an HTTP API, a CLI). Owns the
//! registries, creates pools, routes task operations to the owning pool and
//! delegates capacity changes to the [`ResizeEngine`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{PoolError, ResizeError};
use crate::ids::{PoolId, TaskId};
use crate::metrics::{ResizeMetrics, TracingMetrics};
use crate::pool::{
    validate_capacity, DefaultPoolFactory, ManagedPool, PoolConfig, PoolFactory, PoolInfo, PoolRegistry, TaskRegistry,
};
use crate::resize::{ResizeEngine, ResizeInfo, ResizeOutcome, ResizePhase};
use crate::task::{TaskRecord, Work};

/// Poll interval while an operation waits out a resize
const REDIRECT_POLL: Duration = Duration::from_millis(10);

/// System-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub total_pools: usize,
    pub total_tasks: usize,
    /// Pending plus running
    pub active_tasks: usize,
    /// Completed, failed or cancelled
    pub completed_tasks: usize,
}

/// Owns every pool and task and exposes the operations of the system
pub struct PoolManager {
    config: EngineConfig,
    pools: Arc<PoolRegistry>,
    tasks: Arc<TaskRegistry>,
    factory: Arc<dyn PoolFactory>,
    engine: ResizeEngine,
}

impl PoolManager {
    /// Manager with the default pool factory and tracing metrics
    pub fn new(config: EngineConfig) -> Self {
        let factory = Arc::new(DefaultPoolFactory::new(PoolConfig::from(&config)));
        Self::with_parts(config, factory, Arc::new(TracingMetrics))
    }

    /// Manager with a custom pool factory and metrics sink
    pub fn with_parts(config: EngineConfig, factory: Arc<dyn PoolFactory>, metrics: Arc<dyn ResizeMetrics>) -> Self {
        let pools = Arc::new(PoolRegistry::new());
        let tasks = Arc::new(TaskRegistry::new());
        let engine = ResizeEngine::new(
            Arc::clone(&pools),
            Arc::clone(&tasks),
            Arc::clone(&factory),
            metrics,
            &config,
        );

        Self {
            config,
            pools,
            tasks,
            factory,
            engine,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> &ResizeEngine {
        &self.engine
    }

    // ---- pools ----

    /// Create and start a pool.
    ///
    /// Defaults: name `pool-<id prefix>`, capacity from the configuration.
    pub fn create_pool(&self, name: Option<String>, capacity: Option<usize>) -> Result<PoolId, PoolError> {
        let capacity = capacity.unwrap_or(self.config.default_capacity);
        validate_capacity(capacity)?;

        let id = PoolId::new();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("pool-{}", id.short()));
        if self.pools.get_by_name(&name).is_some() {
            return Err(PoolError::PoolAlreadyExists(name));
        }

        let pool = self.factory.create(id, &name, capacity)?;
        self.pools.insert(Arc::clone(&pool))?;
        pool.start();

        info!(pool_id = %id, %name, capacity, "pool created");
        Ok(id)
    }

    /// Resolve a pool id, following resize redirects
    pub fn get_pool(&self, pool_id: PoolId) -> Result<Arc<ManagedPool>, PoolError> {
        self.pools.resolve(pool_id).ok_or(PoolError::PoolNotFound(pool_id))
    }

    pub fn get_pool_info(&self, pool_id: PoolId) -> Result<PoolInfo, PoolError> {
        Ok(self.get_pool(pool_id)?.info())
    }

    /// Info for every published pool, sorted by name
    pub fn list_pools(&self) -> Vec<PoolInfo> {
        self.pools.list().iter().map(|p| p.info()).collect()
    }

    /// Close a pool and forget it.
    ///
    /// With `wait`, queued and running work finishes first and a timeout is
    /// reported as `ShutdownTimeout` (the pool stays registered). Without it,
    /// the pool is removed at once and drains in the background.
    pub async fn close_pool(&self, pool_id: PoolId, wait: bool) -> Result<(), PoolError> {
        let pool = self.get_pool(pool_id)?;
        let _claim = self.engine.claim_exclusive(pool.id())?;

        if wait {
            pool.shutdown(true).await?;
        } else {
            pool.freeze();
            let draining = Arc::clone(&pool);
            tokio::spawn(async move {
                if let Err(e) = draining.shutdown(true).await {
                    warn!(pool_id = %draining.id(), error = %e, "background pool drain did not finish");
                }
            });
        }

        self.forget(&pool);
        info!(pool_id = %pool.id(), wait, "pool closed");
        Ok(())
    }

    /// Stop a pool immediately. Returns the ids of tasks that were still
    /// pending or running.
    pub async fn force_close_pool(&self, pool_id: PoolId) -> Result<Vec<TaskId>, PoolError> {
        let pool = self.get_pool(pool_id)?;
        let _claim = self.engine.claim_exclusive(pool.id())?;

        let active: Vec<TaskId> = pool
            .list_tasks()
            .into_iter()
            .filter(|t| !t.is_terminal())
            .map(|t| t.id)
            .collect();
        pool.shutdown(false).await?;

        self.forget(&pool);
        info!(pool_id = %pool.id(), active = active.len(), "pool force closed");
        Ok(active)
    }

    /// Cancel every pending task of a pool
    pub fn cancel_pool_tasks(&self, pool_id: PoolId) -> Result<Vec<TaskId>, PoolError> {
        Ok(self.get_pool(pool_id)?.cancel_pending())
    }

    // ---- tasks ----

    /// Submit work to a pool.
    ///
    /// A submission that lands on a pool frozen by a resize is retried
    /// against the replacement once it is published, for up to the
    /// configured redirect timeout.
    pub async fn submit_task(&self, pool_id: PoolId, name: Option<String>, work: Work) -> Result<TaskId, PoolError> {
        let deadline = Instant::now() + self.config.redirect_timeout;
        let task_id = TaskId::new();
        loop {
            let pool = self.get_pool(pool_id)?;
            // Registered before the task exists, so a resize that drains it
            // right away always finds an entry to remap.
            self.tasks.register(task_id, pool.id());
            let err = match pool.submit_with_id(task_id, name.clone(), Arc::clone(&work)) {
                Ok(()) => return Ok(task_id),
                Err(e) => e,
            };
            self.tasks.remove(task_id);

            match err {
                PoolError::PoolClosed(closed) if self.in_transition(&pool) && Instant::now() < deadline => {
                    debug!(pool_id = %closed, "pool frozen by resize, retrying submission");
                    tokio::time::sleep(REDIRECT_POLL).await;
                }
                e => return Err(e),
            }
        }
    }

    /// Current record of a task, wherever it lives now
    pub async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord, PoolError> {
        self.with_task(task_id, |pool| pool.get_task(task_id).ok_or(PoolError::TaskNotFound(task_id)))
            .await
    }

    /// Wait for a task to reach a terminal state.
    ///
    /// Follows the task across migrations. With a timeout, the current
    /// (possibly non-terminal) record is returned when it elapses.
    pub async fn wait_for_task(&self, task_id: TaskId, timeout: Option<Duration>) -> Result<TaskRecord, PoolError> {
        let mut rx = self
            .with_task(task_id, |pool| pool.subscribe(task_id).ok_or(PoolError::TaskNotFound(task_id)))
            .await?;

        let finished = async {
            // A dropped sender means the record was removed; the lookup below
            // reports that.
            let _ = rx.wait_for(|status| status.is_terminal()).await;
        };
        match timeout {
            Some(limit) => {
                let _ = tokio::time::timeout(limit, finished).await;
            }
            None => finished.await,
        }

        self.get_task(task_id).await
    }

    /// Cancel a pending task
    pub async fn cancel_task(&self, task_id: TaskId) -> Result<(), PoolError> {
        self.with_task(task_id, |pool| pool.cancel(task_id)).await?;
        info!(%task_id, "task cancelled");
        Ok(())
    }

    /// Stop a task: running tasks get the cooperative stop signal, pending
    /// ones are cancelled. There is no guarantee that running work halts.
    pub async fn stop_task(&self, task_id: TaskId) -> Result<(), PoolError> {
        let status = self.with_task(task_id, |pool| pool.interrupt(task_id)).await?;
        info!(%task_id, %status, "task stop requested");
        Ok(())
    }

    /// Task records of one pool, or of every pool.
    ///
    /// Work still finishing on a pool replaced by a resize is listed under
    /// its successor.
    pub fn list_tasks(&self, pool_id: Option<PoolId>) -> Result<Vec<TaskRecord>, PoolError> {
        match pool_id {
            Some(id) => {
                let pool = self.get_pool(id)?;
                let mut records = pool.list_tasks();
                for replaced in self.pools.retiring() {
                    if self.pools.resolve_id(replaced.id()) == Some(pool.id()) {
                        records.extend(replaced.list_tasks());
                    }
                }
                Ok(records)
            }
            None => {
                let mut all: Vec<TaskRecord> = self
                    .pools
                    .list()
                    .iter()
                    .chain(self.pools.retiring().iter())
                    .flat_map(|p| p.list_tasks())
                    .collect();
                all.sort_by_key(|r| (r.submitted_at, r.id));
                Ok(all)
            }
        }
    }

    /// Drop every terminal task record. Returns how many were removed.
    pub fn cleanup_completed_tasks(&self) -> usize {
        let mut removed = 0;
        for pool in self.pools.list() {
            for task_id in pool.remove_terminal() {
                self.tasks.remove(task_id);
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "cleaned up finished tasks");
        }
        removed
    }

    pub fn stats(&self) -> ManagerStats {
        let infos = self.list_pools();
        let replaced: Vec<PoolInfo> = self.pools.retiring().iter().map(|p| p.info()).collect();
        let total_tasks: usize = infos.iter().chain(&replaced).map(|i| i.total_tasks).sum();
        let active_tasks: usize = infos.iter().chain(&replaced).map(|i| i.active_tasks).sum();

        ManagerStats {
            total_pools: infos.len(),
            total_tasks,
            active_tasks,
            completed_tasks: total_tasks - active_tasks,
        }
    }

    // ---- resize ----

    /// Change a pool's capacity. See [`ResizeEngine::resize`].
    pub async fn resize(&self, pool_id: PoolId, new_capacity: usize) -> Result<ResizeOutcome, ResizeError> {
        self.engine.resize(pool_id, new_capacity).await
    }

    /// Read-only resize view of a pool
    pub fn get_resize_info(&self, pool_id: PoolId) -> Result<ResizeInfo, ResizeError> {
        self.engine.resize_info(pool_id)
    }

    // ---- lifecycle ----

    /// Periodically drop finished task records until `shutdown` flips
    pub async fn run_cleanup_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("cleanup loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = self.cleanup_completed_tasks();
                    debug!(removed, "periodic cleanup");
                }
            }
        }
    }

    /// Close every pool without waiting for its work
    pub async fn shutdown(&self) {
        info!(pools = self.pools.len(), "shutting down pool manager");
        for pool in self.pools.drain() {
            if let Err(e) = pool.shutdown(false).await {
                error!(pool_id = %pool.id(), error = %e, "error closing pool");
            }
        }
        self.tasks.clear();
        info!("pool manager shutdown complete");
    }

    fn forget(&self, pool: &ManagedPool) {
        self.pools.remove(pool.id());
        self.tasks.remove_pool(pool.id());
    }

    /// Whether `pool` is frozen or replaced by a resize that is still settling
    fn in_transition(&self, pool: &ManagedPool) -> bool {
        pool.is_retired() || self.engine.phase(pool.id()) != ResizePhase::Ready
    }

    /// Run `op` against the pool owning `task_id`.
    ///
    /// While a resize moves the task, `op` may briefly miss it; such misses
    /// are retried until the redirect timeout.
    async fn with_task<T>(
        &self,
        task_id: TaskId,
        op: impl Fn(&ManagedPool) -> Result<T, PoolError>,
    ) -> Result<T, PoolError> {
        let deadline = Instant::now() + self.config.redirect_timeout;
        loop {
            let owner = self.tasks.owner(task_id).ok_or(PoolError::TaskNotFound(task_id))?;
            let result = match self.pools.lookup(owner) {
                Some(pool) => op(pool.as_ref()),
                None => Err(PoolError::TaskNotFound(task_id)),
            };

            match result {
                Err(PoolError::TaskNotFound(_)) if self.is_moving(owner) && Instant::now() < deadline => {
                    tokio::time::sleep(REDIRECT_POLL).await;
                }
                other => return other,
            }
        }
    }

    /// Whether records of `owner` may be changing hands right now
    fn is_moving(&self, owner: PoolId) -> bool {
        self.pools.is_staged(owner) || self.pools.is_retiring(owner) || self.engine.phase(owner) != ResizePhase::Ready
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.config)
            .field("pools", &self.pools.len())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{work_fn, TaskStatus};
    use tokio_util::sync::CancellationToken;

    fn manager() -> PoolManager {
        PoolManager::new(EngineConfig::default())
    }

    fn value(v: i64) -> Work {
        work_fn(move |_| async move { Ok(serde_json::json!(v)) })
    }

    fn gated(gate: &CancellationToken) -> Work {
        let gate = gate.clone();
        work_fn(move |_| {
            let gate = gate.clone();
            async move {
                gate.cancelled().await;
                Ok(serde_json::Value::Null)
            }
        })
    }

    #[tokio::test]
    async fn test_create_pool_defaults_and_uniqueness() {
        let manager = manager();
        let id = manager.create_pool(None, None).unwrap();

        let info = manager.get_pool_info(id).unwrap();
        assert_eq!(info.name, format!("pool-{}", id.short()));
        assert_eq!(info.capacity, 5);

        manager.create_pool(Some("alpha".into()), Some(2)).unwrap();
        assert_eq!(
            manager.create_pool(Some("alpha".into()), Some(3)).unwrap_err(),
            PoolError::PoolAlreadyExists("alpha".into())
        );
        assert!(matches!(
            manager.create_pool(Some("beta".into()), Some(0)).unwrap_err(),
            PoolError::InvalidCapacity { .. }
        ));
        assert_eq!(manager.list_pools().len(), 2);
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let manager = manager();
        let pool = manager.create_pool(Some("work".into()), Some(2)).unwrap();

        let task = manager.submit_task(pool, Some("answer".into()), value(42)).await.unwrap();
        let record = manager.wait_for_task(task, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(serde_json::json!(42)));

        let stats = manager.stats();
        assert_eq!(stats.total_pools, 1);
        assert_eq!(stats.total_tasks, 1);
        assert_eq!(stats.completed_tasks, 1);

        assert_eq!(manager.cleanup_completed_tasks(), 1);
        assert_eq!(manager.get_task(task).await.unwrap_err(), PoolError::TaskNotFound(task));
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let manager = manager();
        let pool = PoolId::new();
        let task = TaskId::new();

        assert_eq!(
            manager.submit_task(pool, None, value(1)).await.unwrap_err(),
            PoolError::PoolNotFound(pool)
        );
        assert_eq!(manager.cancel_task(task).await.unwrap_err(), PoolError::TaskNotFound(task));
        assert!(manager.list_tasks(Some(pool)).is_err());
        assert!(manager.get_resize_info(pool).is_err());
    }

    #[tokio::test]
    async fn test_stop_task_cancels_pending_and_stops_running() {
        let manager = manager();
        let pool = manager.create_pool(None, Some(1)).unwrap();
        let gate = CancellationToken::new();

        let running = manager.submit_task(pool, None, gated(&gate)).await.unwrap();
        let pending = manager.submit_task(pool, None, value(1)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.get_pool(pool).unwrap().running_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        manager.stop_task(pending).await.unwrap();
        manager.stop_task(running).await.unwrap();
        let record = manager.wait_for_task(running, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(manager.get_task(pending).await.unwrap().status, TaskStatus::Cancelled);
        assert!(matches!(
            manager.stop_task(running).await.unwrap_err(),
            PoolError::NotRunning { .. }
        ));
    }

    #[tokio::test]
    async fn test_close_pool_waits_for_work() {
        let manager = manager();
        let pool = manager.create_pool(None, Some(2)).unwrap();
        for i in 0..4 {
            manager.submit_task(pool, None, value(i)).await.unwrap();
        }

        manager.close_pool(pool, true).await.unwrap();
        assert!(manager.get_pool(pool).is_err());
        assert_eq!(manager.stats().total_pools, 0);
    }

    #[tokio::test]
    async fn test_force_close_reports_active_tasks() {
        let manager = manager();
        let pool = manager.create_pool(None, Some(1)).unwrap();
        let gate = CancellationToken::new();

        let a = manager.submit_task(pool, None, gated(&gate)).await.unwrap();
        let b = manager.submit_task(pool, None, gated(&gate)).await.unwrap();

        let mut active = manager.force_close_pool(pool).await.unwrap();
        active.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(active, expected);
        assert!(manager.get_pool(pool).is_err());
        assert!(manager.get_task(a).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_pool_tasks() {
        let manager = manager();
        let pool = manager.create_pool(None, Some(1)).unwrap();
        let gate = CancellationToken::new();

        manager.submit_task(pool, None, gated(&gate)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.get_pool(pool).unwrap().running_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let queued = manager.submit_task(pool, None, value(1)).await.unwrap();

        assert_eq!(manager.cancel_pool_tasks(pool).unwrap(), vec![queued]);
        assert_eq!(manager.get_pool_info(pool).unwrap().cancelled_tasks, 1);
        gate.cancel();
    }

    #[tokio::test]
    async fn test_cleanup_loop_stops_on_shutdown() {
        let config = EngineConfig::default().with_cleanup_interval(Duration::from_millis(10));
        let manager = Arc::new(PoolManager::new(config));
        let pool = manager.create_pool(None, Some(1)).unwrap();
        let task = manager.submit_task(pool, None, value(1)).await.unwrap();
        manager.wait_for_task(task, Some(Duration::from_secs(5))).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&manager).run_cleanup_loop(rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.stats().total_tasks > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let manager = manager();
        manager.create_pool(Some("a".into()), Some(1)).unwrap();
        manager.create_pool(Some("b".into()), Some(1)).unwrap();

        manager.shutdown().await;
        assert!(manager.list_pools().is_empty());
        assert_eq!(manager.stats().total_tasks, 0);
    }

    #[tokio::test]
    async fn test_failed_submission_leaves_no_registration() {
        let manager = manager();
        let pool = manager.create_pool(None, Some(1)).unwrap();
        manager.get_pool(pool).unwrap().freeze();

        assert_eq!(
            manager.submit_task(pool, None, value(1)).await.unwrap_err(),
            PoolError::PoolClosed(pool)
        );
        assert!(manager.tasks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_submissions_racing_a_resize_are_all_tracked() {
        let manager = Arc::new(manager());
        let pool = manager.create_pool(None, Some(1)).unwrap();
        let gate = CancellationToken::new();
        let blocker = manager.submit_task(pool, None, gated(&gate)).await.unwrap();

        let submitters: Vec<_> = (0..20)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.submit_task(pool, None, value(i)).await })
            })
            .collect();
        let resizer = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.resize(pool, 3).await })
        };

        let mut submitted = vec![blocker];
        for handle in submitters {
            submitted.push(handle.await.unwrap().unwrap());
        }
        gate.cancel();
        assert!(resizer.await.unwrap().unwrap().success);

        assert_eq!(manager.tasks.len(), submitted.len());
        for id in submitted {
            let record = manager.wait_for_task(id, Some(Duration::from_secs(5))).await.unwrap();
            assert_eq!(record.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_work_on_replaced_pool_stays_visible() {
        let config = EngineConfig::default().with_retire_timeout(Duration::from_millis(50));
        let manager = PoolManager::new(config);
        let pool = manager.create_pool(None, Some(1)).unwrap();
        let gate = CancellationToken::new();
        let blocker = manager.submit_task(pool, None, gated(&gate)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.get_pool(pool).unwrap().running_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let outcome = manager.resize(pool, 2).await.unwrap();
        assert!(outcome.retirement_deferred);
        assert_ne!(manager.get_pool(pool).unwrap().id(), pool);

        let listed: Vec<TaskId> = manager.list_tasks(Some(pool)).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(listed, vec![blocker]);
        assert_eq!(manager.list_tasks(None).unwrap().len(), 1);
        assert_eq!(manager.stats().active_tasks, 1);

        manager.stop_task(blocker).await.unwrap();
        let record = manager.wait_for_task(blocker, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
    }
}
