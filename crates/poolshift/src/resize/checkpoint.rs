//! Pre-resize snapshots and rollback

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info};

use crate::error::CheckpointError;
use crate::ids::{PoolId, TaskId};
use crate::pool::ManagedPool;
use crate::task::{TaskRecord, Work};

/// A non-terminal task as it was when the checkpoint was taken
#[derive(Clone)]
pub struct CheckpointedTask {
    pub record: TaskRecord,
    work: Work,
}

impl std::fmt::Debug for CheckpointedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointedTask")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of a pool's observable state.
///
/// Records are copies, so later changes to the live pool cannot leak in.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub pool_id: PoolId,
    pub capacity: usize,
    pub accepting: bool,
    /// Non-terminal tasks, oldest first
    pub tasks: Vec<CheckpointedTask>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot `pool` as it is right now
    pub fn capture(pool: &ManagedPool) -> Self {
        let tasks = pool
            .snapshot_active()
            .into_iter()
            .map(|(record, work)| CheckpointedTask { record, work })
            .collect();

        Self {
            pool_id: pool.id(),
            capacity: pool.capacity(),
            accepting: pool.is_accepting(),
            tasks,
            created_at: Utc::now(),
        }
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.record.id).collect()
    }
}

/// What a successful rollback did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub capacity: usize,
    pub accepting: bool,
    /// Tasks that were missing from the pool and had to be re-submitted
    pub requeued: Vec<TaskId>,
}

/// Holds at most one checkpoint per pool
#[derive(Debug, Default)]
pub struct CheckpointManager {
    checkpoints: DashMap<PoolId, Arc<Checkpoint>>,
}

impl CheckpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot `pool`, replacing any earlier checkpoint for it
    pub fn checkpoint(&self, pool: &ManagedPool) -> Arc<Checkpoint> {
        let checkpoint = Arc::new(Checkpoint::capture(pool));
        debug!(
            pool_id = %pool.id(),
            capacity = checkpoint.capacity,
            tasks = checkpoint.tasks.len(),
            "checkpoint taken"
        );
        self.checkpoints.insert(pool.id(), Arc::clone(&checkpoint));
        checkpoint
    }

    pub fn get(&self, pool_id: PoolId) -> Option<Arc<Checkpoint>> {
        self.checkpoints.get(&pool_id).map(|c| Arc::clone(c.value()))
    }

    pub fn has_checkpoint(&self, pool_id: PoolId) -> bool {
        self.checkpoints.contains_key(&pool_id)
    }

    /// Drop the checkpoint after a commit or a rejected request
    pub fn discard(&self, pool_id: PoolId) -> bool {
        self.checkpoints.remove(&pool_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Restore `pool` from its checkpoint, consuming the checkpoint.
    ///
    /// Capacity and the submission gate come back first. Then every
    /// checkpointed task missing from the pool is re-submitted under its
    /// original id. Any task that cannot be re-submitted makes the whole
    /// rollback fail; the ids are reported, never dropped silently.
    pub fn rollback(&self, pool_id: PoolId, pool: &Arc<ManagedPool>) -> Result<RollbackReport, CheckpointError> {
        let (_, checkpoint) = self
            .checkpoints
            .remove(&pool_id)
            .ok_or(CheckpointError::NoCheckpoint(pool_id))?;

        pool.restore_state(checkpoint.capacity, checkpoint.accepting);

        let mut requeued = Vec::new();
        let mut unrestored = Vec::new();
        let mut last_error = None;
        for task in &checkpoint.tasks {
            let task_id = task.record.id;
            if pool.contains(task_id) {
                continue;
            }
            match pool.requeue(task.record.clone(), Arc::clone(&task.work)) {
                Ok(()) => requeued.push(task_id),
                Err(e) => {
                    unrestored.push(task_id);
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            error!(
                %pool_id,
                unrestored = unrestored.len(),
                error = %e,
                "rollback could not restore checkpointed tasks"
            );
            return Err(CheckpointError::RollbackFailed {
                pool: pool_id,
                reason: e.to_string(),
                unrestored,
            });
        }

        info!(
            %pool_id,
            capacity = checkpoint.capacity,
            requeued = requeued.len(),
            "pool restored from checkpoint"
        );
        Ok(RollbackReport {
            capacity: checkpoint.capacity,
            accepting: checkpoint.accepting,
            requeued,
        })
    }
}
