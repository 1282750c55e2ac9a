//! Retiring replaced pools
//!
//! After a resize commits, the replaced pool keeps running the tasks it had
//! already started. Once it is idle its records move to whichever pool
//! currently answers for its id, and the registry forgets it. A resize does
//! this inline when the old pool goes idle quickly; otherwise a background
//! task finishes the job.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ids::TaskId;
use crate::pool::{ManagedPool, PoolRegistry, TaskRegistry};

use super::controller::ConcurrencyController;

/// Pause before retrying when the successor is busy with its own resize
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub(crate) struct Retirement {
    pools: Arc<PoolRegistry>,
    tasks: Arc<TaskRegistry>,
    controller: ConcurrencyController,
    /// How often a background retirement reports work still running
    report_every: Duration,
}

impl Retirement {
    pub(crate) fn new(
        pools: Arc<PoolRegistry>,
        tasks: Arc<TaskRegistry>,
        controller: ConcurrencyController,
        report_every: Duration,
    ) -> Self {
        Self {
            pools,
            tasks,
            controller,
            report_every,
        }
    }

    /// Hand the records of an idle replaced pool to its successor.
    ///
    /// Returns false when the successor is being resized or closed right
    /// now; the caller tries again later.
    pub(crate) fn try_finish(&self, old: &ManagedPool) -> bool {
        let id = old.id();
        let Some(target) = self.pools.resolve(id) else {
            // The successor was closed; its tasks are gone with it.
            for task in old.take_all() {
                self.tasks.remove(task.id());
            }
            self.pools.finish_retiring(id);
            info!(pool_id = %id, "replaced pool forgotten, no successor left");
            return true;
        };

        // Holding the successor's claim keeps a resize of it from taking its
        // records while ours are still arriving.
        let Ok(_claim) = self.controller.acquire_exclusive(target.id()) else {
            debug!(pool_id = %id, successor = %target.id(), "successor busy, retirement deferred");
            return false;
        };
        if target.is_retired() {
            return false;
        }

        let history = old.take_all();
        let moved: Vec<TaskId> = history.iter().map(|t| t.id()).collect();
        target.adopt_history(history);
        // Owners flip only once the records are in place; until then lookups
        // see the old pool as retiring and retry.
        for task_id in &moved {
            self.tasks.remap(*task_id, target.id());
        }
        self.pools.finish_retiring(id);

        info!(
            pool_id = %id,
            successor = %target.id(),
            moved = moved.len(),
            "replaced pool retired"
        );
        true
    }

    /// Wait for the replaced pool to go idle, then retire it
    pub(crate) async fn finish(self, old: Arc<ManagedPool>) {
        loop {
            match old.wait_idle(self.report_every).await {
                Ok(()) => {
                    if self.try_finish(&old) {
                        return;
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(_) => warn!(
                    pool_id = %old.id(),
                    running = old.running_count(),
                    "replaced pool still has running tasks"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PoolId;
    use crate::pool::PoolConfig;
    use crate::task::{work_fn, TaskStatus};

    fn fixture() -> (Arc<PoolRegistry>, Arc<TaskRegistry>, ConcurrencyController, Retirement) {
        let pools = Arc::new(PoolRegistry::new());
        let tasks = Arc::new(TaskRegistry::new());
        let controller = ConcurrencyController::new(1, Duration::from_millis(50));
        let retirement = Retirement::new(
            Arc::clone(&pools),
            Arc::clone(&tasks),
            controller.clone(),
            Duration::from_millis(50),
        );
        (pools, tasks, controller, retirement)
    }

    /// An old pool with one finished task, replaced by `new`
    async fn replaced(pools: &PoolRegistry, tasks: &TaskRegistry) -> (Arc<ManagedPool>, Arc<ManagedPool>, TaskId) {
        let old = ManagedPool::new(PoolId::new(), "alpha", 1, PoolConfig::default()).unwrap();
        let new = ManagedPool::new(PoolId::new(), "alpha", 2, PoolConfig::default()).unwrap();
        pools.insert(Arc::clone(&old)).unwrap();
        old.start();

        let task = old
            .submit(None, work_fn(|_| async { Ok(serde_json::json!(1)) }))
            .unwrap();
        tasks.register(task, old.id());
        old.subscribe(task)
            .unwrap()
            .wait_for(|s| s.is_terminal())
            .await
            .unwrap();

        pools.stage(Arc::clone(&new));
        pools.publish(old.id(), new.id()).unwrap();
        old.retire();
        new.start();
        (old, new, task)
    }

    #[tokio::test]
    async fn test_history_moves_to_successor() {
        let (pools, tasks, _controller, retirement) = fixture();
        let (old, new, task) = replaced(&pools, &tasks).await;

        assert!(retirement.try_finish(&old));
        assert_eq!(old.task_count(), 0);
        assert_eq!(new.get_task(task).unwrap().status, TaskStatus::Completed);
        assert_eq!(tasks.owner(task), Some(new.id()));
        assert!(!pools.is_retiring(old.id()));
    }

    #[tokio::test]
    async fn test_waits_while_successor_is_claimed() {
        let (pools, tasks, controller, retirement) = fixture();
        let (old, new, task) = replaced(&pools, &tasks).await;

        let claim = controller.acquire_exclusive(new.id()).unwrap();
        assert!(!retirement.try_finish(&old));
        assert_eq!(tasks.owner(task), Some(old.id()));
        assert!(pools.is_retiring(old.id()));

        let background = tokio::spawn(retirement.clone().finish(Arc::clone(&old)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(claim);
        tokio::time::timeout(Duration::from_secs(5), background)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tasks.owner(task), Some(new.id()));
    }

    #[tokio::test]
    async fn test_closed_successor_drops_records() {
        let (pools, tasks, _controller, retirement) = fixture();
        let (old, new, task) = replaced(&pools, &tasks).await;

        pools.remove(new.id());
        assert!(retirement.try_finish(&old));
        assert_eq!(tasks.owner(task), None);
        assert!(pools.lookup(old.id()).is_none());
    }
}
