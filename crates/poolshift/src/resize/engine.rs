//! Resize and migration engine
//!
//! Changes a pool's capacity by building a replacement pool, moving pending
//! work across and then publishing the replacement, which starts running the
//! migrated work at once. Work the old pool had already started finishes
//! there; the old pool is retired when it goes idle, inline if that happens
//! within `retire_timeout` and in the background otherwise.
//!
//! The replacement stays staged (registered but invisible, workers not
//! started) until every pending task has moved. A failure before that point
//! rolls the old pool back from its checkpoint, and since nothing has run on
//! the replacement yet, every migrated task goes back still pending.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{error, info, instrument, warn};

use crate::config::{EngineConfig, MAX_CAPACITY, MIN_CAPACITY};
use crate::error::{PoolError, ResizeError};
use crate::ids::PoolId;
use crate::metrics::ResizeMetrics;
use crate::pool::{validate_capacity, ManagedPool, PoolFactory, PoolRegistry, PoolStatus, TaskRegistry, TaskSlot};

use super::advisor::advise;
use super::checkpoint::CheckpointManager;
use super::controller::{ConcurrencyController, ResizePermit};
use super::outcome::{ResizeFailure, ResizeInfo, ResizeOutcome, ResizePhase};
use super::retire::Retirement;

/// Work in progress of one resize, kept so a rollback can undo it
#[derive(Default)]
struct Migration {
    replacement: Option<Arc<ManagedPool>>,
    /// Drained tasks not yet handed to the replacement
    in_flight: VecDeque<TaskSlot>,
    /// Drained tasks that were already terminal, kept as history
    discarded: usize,
    migrated: usize,
    running_at_freeze: usize,
}

/// Orchestrates capacity changes
pub struct ResizeEngine {
    pools: Arc<PoolRegistry>,
    tasks: Arc<TaskRegistry>,
    factory: Arc<dyn PoolFactory>,
    metrics: Arc<dyn ResizeMetrics>,
    controller: ConcurrencyController,
    checkpoints: CheckpointManager,
    retirement: Retirement,
    phases: DashMap<PoolId, ResizePhase>,
    /// Published replacement -> the pool it replaced, while that resize is
    /// still waiting on the old pool
    settling: DashMap<PoolId, PoolId>,
    retire_timeout: Duration,
}

impl ResizeEngine {
    pub fn new(
        pools: Arc<PoolRegistry>,
        tasks: Arc<TaskRegistry>,
        factory: Arc<dyn PoolFactory>,
        metrics: Arc<dyn ResizeMetrics>,
        config: &EngineConfig,
    ) -> Self {
        let controller = ConcurrencyController::new(config.max_concurrent_resizes, config.acquire_timeout);
        let retirement = Retirement::new(
            Arc::clone(&pools),
            Arc::clone(&tasks),
            controller.clone(),
            config.retire_timeout,
        );
        Self {
            pools,
            tasks,
            factory,
            metrics,
            controller,
            checkpoints: CheckpointManager::new(),
            retirement,
            phases: DashMap::new(),
            settling: DashMap::new(),
            retire_timeout: config.retire_timeout,
        }
    }

    pub fn controller(&self) -> &ConcurrencyController {
        &self.controller
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Claim `pool_id` for an operation that must not overlap a resize of
    /// it, such as closing it. A replacement whose resize has not returned
    /// yet counts as being resized.
    pub fn claim_exclusive(&self, pool_id: PoolId) -> Result<ResizePermit, PoolError> {
        let permit = self.controller.acquire_exclusive(pool_id)?;
        if self.settling.contains_key(&pool_id) {
            return Err(PoolError::ResizeInProgress(pool_id));
        }
        Ok(permit)
    }

    /// Current resize phase of `pool_id`
    pub fn phase(&self, pool_id: PoolId) -> ResizePhase {
        self.phases
            .get(&pool_id)
            .map(|p| *p.value())
            .unwrap_or(ResizePhase::Ready)
    }

    /// Change the capacity of a pool.
    ///
    /// Returns `Err` when the request is refused before anything changes
    /// (unknown pool, invalid capacity, permit unavailable, pool closed).
    /// Once mutation has begun the result is always `Ok`, with
    /// `success = false` and a [`ResizeFailure`] if the pool was rolled back.
    /// An outcome is reported to the metrics sink in every case.
    ///
    /// Work still running on the old pool never fails a resize: if it
    /// outlasts `retire_timeout` the old pool retires in the background and
    /// the outcome says so with `retirement_deferred`.
    #[instrument(skip(self))]
    pub async fn resize(&self, pool_id: PoolId, new_capacity: usize) -> Result<ResizeOutcome, ResizeError> {
        let started = Instant::now();

        let (pool, _permit) = match self.acquire(pool_id).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(%pool_id, new_capacity, error = %e, "resize rejected");
                let old_capacity = self.pools.resolve(pool_id).map(|p| p.capacity()).unwrap_or(0);
                self.record(self.rejected(pool_id, old_capacity, new_capacity, started, e.clone()));
                return Err(e);
            }
        };
        let id = pool.id();
        let old_capacity = pool.capacity();

        self.set_phase(id, ResizePhase::Resizing);
        self.checkpoints.checkpoint(&pool);

        if validate_capacity(new_capacity).is_err() {
            self.checkpoints.discard(id);
            self.clear_phase(id);
            let e = ResizeError::InvalidCapacity {
                requested: new_capacity,
                min: MIN_CAPACITY,
                max: MAX_CAPACITY,
            };
            warn!(pool_id = %id, new_capacity, "resize rejected: invalid capacity");
            self.record(self.rejected(id, old_capacity, new_capacity, started, e.clone()));
            return Err(e);
        }

        if new_capacity == old_capacity {
            self.checkpoints.discard(id);
            self.clear_phase(id);
            info!(pool_id = %id, capacity = new_capacity, "capacity unchanged");
            let outcome = ResizeOutcome {
                pool_id: id,
                new_pool_id: None,
                success: true,
                old_capacity,
                new_capacity,
                migrated_count: 0,
                discarded_count: 0,
                running_at_freeze: pool.running_count(),
                retirement_deferred: false,
                duration: started.elapsed(),
                failure: None,
                completed_at: Utc::now(),
            };
            return Ok(self.record(outcome));
        }

        let mut migration = Migration::default();
        let result = match self.migrate(&pool, new_capacity, &mut migration) {
            Ok(replacement) => self.commit(&pool, &replacement),
            Err(reason) => Err(reason),
        };

        let (new_pool_id, failure, retirement_deferred) = match result {
            Ok(new_id) => {
                let retired = self.settle(&pool).await;
                self.settling.remove(&new_id);
                (Some(new_id), None, !retired)
            }
            Err(reason) => (None, Some(self.roll_back(&pool, &mut migration, reason)), false),
        };

        let outcome = ResizeOutcome {
            pool_id: id,
            new_pool_id,
            success: failure.is_none(),
            old_capacity,
            new_capacity,
            migrated_count: migration.migrated,
            discarded_count: migration.discarded,
            running_at_freeze: migration.running_at_freeze,
            retirement_deferred,
            duration: started.elapsed(),
            failure,
            completed_at: Utc::now(),
        };
        self.clear_phase(id);
        Ok(self.record(outcome))
    }

    /// Read-only resize view of a pool. Never mutates anything.
    pub fn resize_info(&self, pool_id: PoolId) -> Result<ResizeInfo, ResizeError> {
        let pool = self
            .pools
            .resolve(pool_id)
            .ok_or(ResizeError::PoolNotFound(pool_id))?;
        let info = pool.info();
        let suggestion = advise(info.running_tasks, info.pending_tasks, info.capacity);

        Ok(ResizeInfo {
            pool_id: info.pool_id,
            name: info.name,
            status: info.status,
            current_capacity: info.capacity,
            active_tasks: info.running_tasks,
            queue_depth: info.pending_tasks,
            suggested_capacity: suggestion.suggested,
            suggestion_bounds: (suggestion.lower_bound, suggestion.upper_bound),
            rationale: suggestion.rationale,
            can_resize: info.status == PoolStatus::Running
                && !self.controller.is_resizing(info.pool_id)
                && !self.settling.contains_key(&info.pool_id),
            min_capacity: MIN_CAPACITY,
            max_capacity: MAX_CAPACITY,
        })
    }

    /// Resolve the pool and take its permit.
    ///
    /// A resize that waited on the global permit may find the pool replaced
    /// in the meantime; it then targets the replacement, unless the resize
    /// that produced it is still running.
    async fn acquire(&self, pool_id: PoolId) -> Result<(Arc<ManagedPool>, ResizePermit), ResizeError> {
        loop {
            let pool = self
                .pools
                .resolve(pool_id)
                .ok_or(ResizeError::PoolNotFound(pool_id))?;
            // A replacement is only reachable once it is marked settling.
            if self.settling.contains_key(&pool.id()) {
                return Err(ResizeError::AlreadyResizing(pool_id));
            }
            let permit = self.controller.acquire(pool.id()).await?;

            match pool.status() {
                PoolStatus::Running => return Ok((pool, permit)),
                PoolStatus::Retired => continue,
                _ => return Err(ResizeError::PoolClosed(pool.id())),
            }
        }
    }

    /// Stage the replacement and move every pending task into it
    fn migrate(
        &self,
        pool: &Arc<ManagedPool>,
        new_capacity: usize,
        migration: &mut Migration,
    ) -> Result<Arc<ManagedPool>, String> {
        let id = pool.id();
        let replacement = self
            .factory
            .create(PoolId::new(), pool.name(), new_capacity)
            .map_err(|e| format!("could not create replacement pool: {e}"))?;
        self.pools.stage(Arc::clone(&replacement));
        migration.replacement = Some(Arc::clone(&replacement));

        self.set_phase(id, ResizePhase::Migrating);
        pool.freeze();
        migration.running_at_freeze = pool.running_count();
        migration.in_flight = pool.drain_pending().into();
        info!(
            pool_id = %id,
            replacement_id = %replacement.id(),
            pending = migration.in_flight.len(),
            running = migration.running_at_freeze,
            "migrating pending tasks"
        );

        while let Some(task) = migration.in_flight.pop_front() {
            let task_id = task.id();
            if task.record().is_terminal() {
                // Cancelled while queued: it stays findable as history.
                replacement.adopt_history(vec![task]);
                self.tasks.remap(task_id, replacement.id());
                migration.discarded += 1;
                continue;
            }
            match replacement.adopt(task) {
                Ok(()) => {
                    self.tasks.remap(task_id, replacement.id());
                    migration.migrated += 1;
                }
                Err((e, task)) => {
                    migration.in_flight.push_front(task);
                    return Err(format!("could not migrate task {task_id}: {e}"));
                }
            }
        }

        Ok(replacement)
    }

    /// Publish and start the replacement, retire the old pool
    fn commit(&self, pool: &Arc<ManagedPool>, replacement: &Arc<ManagedPool>) -> Result<PoolId, String> {
        let id = pool.id();
        let new_id = replacement.id();
        // Marked before publishing so nothing can reach the replacement
        // through a redirect and act on it while this resize is running.
        self.settling.insert(new_id, id);
        if let Err(e) = self.pools.publish(id, new_id) {
            self.settling.remove(&new_id);
            return Err(format!("could not publish replacement pool: {e}"));
        }

        replacement.start();
        pool.retire();
        self.checkpoints.discard(id);

        info!(
            pool_id = %id,
            new_pool_id = %new_id,
            capacity = replacement.capacity(),
            still_running = pool.running_count(),
            "resize committed"
        );
        Ok(new_id)
    }

    /// Wait a bounded time for the old pool's running work, then hand its
    /// records to the replacement. Returns false if that was left to a
    /// background task.
    async fn settle(&self, pool: &Arc<ManagedPool>) -> bool {
        let id = pool.id();
        self.set_phase(id, ResizePhase::Cleaning);

        let idle = match pool.wait_idle(self.retire_timeout).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    pool_id = %id,
                    running = pool.running_count(),
                    timeout_ms = self.retire_timeout.as_millis() as u64,
                    "old pool still running work, retiring in background"
                );
                false
            }
        };
        if idle && self.retirement.try_finish(pool) {
            return true;
        }
        tokio::spawn(self.retirement.clone().finish(Arc::clone(pool)));
        false
    }

    /// Undo a partial migration and restore the old pool from its checkpoint.
    ///
    /// Only reachable before the replacement is published, so none of its
    /// tasks has started.
    fn roll_back(&self, pool: &Arc<ManagedPool>, migration: &mut Migration, reason: String) -> ResizeFailure {
        let id = pool.id();
        self.set_phase(id, ResizePhase::Failed);
        warn!(pool_id = %id, %reason, migrated = migration.migrated, "resize failed, rolling back");

        let mut returned: Vec<TaskSlot> = migration.in_flight.drain(..).collect();
        if let Some(replacement) = migration.replacement.take() {
            replacement.retire();
            returned.extend(replacement.take_all());
            self.pools.unstage(replacement.id());
        }
        for task in &returned {
            self.tasks.remap(task.id(), id);
        }
        pool.restore_tasks(returned);

        match self.checkpoints.rollback(id, pool) {
            Ok(report) => {
                info!(
                    pool_id = %id,
                    capacity = report.capacity,
                    requeued = report.requeued.len(),
                    "rollback complete"
                );
                ResizeFailure::MigrationFailed { reason }
            }
            Err(e) => {
                let err = ResizeError::from(e);
                error!(pool_id = %id, error = %err, "rollback failed, task bookkeeping may be inconsistent");
                match err {
                    ResizeError::RollbackFailed {
                        reason: rollback_reason,
                        unrestored,
                        ..
                    } => ResizeFailure::RollbackFailed {
                        reason: format!("{reason}; {rollback_reason}"),
                        unrestored,
                    },
                    other => ResizeFailure::RollbackFailed {
                        reason: format!("{reason}; {other}"),
                        unrestored: vec![],
                    },
                }
            }
        }
    }

    fn rejected(
        &self,
        pool_id: PoolId,
        old_capacity: usize,
        new_capacity: usize,
        started: Instant,
        error: ResizeError,
    ) -> ResizeOutcome {
        ResizeOutcome {
            pool_id,
            new_pool_id: None,
            success: false,
            old_capacity,
            new_capacity,
            migrated_count: 0,
            discarded_count: 0,
            running_at_freeze: 0,
            retirement_deferred: false,
            duration: started.elapsed(),
            failure: Some(ResizeFailure::Rejected { error }),
            completed_at: Utc::now(),
        }
    }

    fn record(&self, outcome: ResizeOutcome) -> ResizeOutcome {
        self.metrics.record_outcome(&outcome);
        outcome
    }

    fn set_phase(&self, pool_id: PoolId, phase: ResizePhase) {
        self.phases.insert(pool_id, phase);
        self.metrics.record_phase(pool_id, phase);
    }

    fn clear_phase(&self, pool_id: PoolId) {
        self.phases.remove(&pool_id);
        self.metrics.record_phase(pool_id, ResizePhase::Ready);
    }
}
