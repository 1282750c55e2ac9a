//! Error types for pools, resizes and checkpoints

use serde::{Deserialize, Serialize};

use crate::ids::{PoolId, TaskId};
use crate::task::TaskStatus;

/// Errors raised by managed pools and the pool manager
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Submission raced with a freeze or the pool was shut down.
    /// Re-resolve the pool id and retry.
    #[error("pool {0} is not accepting submissions")]
    PoolClosed(PoolId),

    /// Unknown pool id
    #[error("pool not found: {0}")]
    PoolNotFound(PoolId),

    /// A live pool already uses this name
    #[error("pool with name '{0}' already exists")]
    PoolAlreadyExists(String),

    /// Unknown task id
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Only pending tasks can be cancelled
    #[error("task {id} cannot be cancelled in state {status}")]
    NotCancellable { id: TaskId, status: TaskStatus },

    /// Only running tasks can be stopped
    #[error("task {id} is not running (state {status})")]
    NotRunning { id: TaskId, status: TaskStatus },

    /// Capacity outside the allowed range
    #[error("invalid capacity {requested}: must be within [{min}, {max}]")]
    InvalidCapacity {
        requested: usize,
        min: usize,
        max: usize,
    },

    /// The pool's pending queue is at its configured bound
    #[error("pool {pool} queue is full ({limit} pending tasks)")]
    QueueFull { pool: PoolId, limit: usize },

    /// Graceful shutdown did not finish in time
    #[error("graceful shutdown of pool {0} timed out")]
    ShutdownTimeout(PoolId),

    /// The pool is being resized and cannot be closed right now
    #[error("pool {0} is being resized")]
    ResizeInProgress(PoolId),
}

/// Errors returned by the resize engine.
///
/// Everything except `RollbackFailed` is recoverable; see the variant docs
/// for what the caller should do.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ResizeError {
    /// Requested capacity outside `[min, max]`. No state was changed.
    #[error("invalid capacity {requested}: must be within [{min}, {max}]")]
    InvalidCapacity {
        requested: usize,
        min: usize,
        max: usize,
    },

    /// Unknown pool id
    #[error("pool not found: {0}")]
    PoolNotFound(PoolId),

    /// No global resize permit became available in time. Retry with backoff.
    #[error("resize of pool {0} rejected: too many concurrent resizes")]
    Busy(PoolId),

    /// Another resize of the same pool is in progress. Retry with backoff.
    #[error("pool {0} is already being resized")]
    AlreadyResizing(PoolId),

    /// The pool is shut down or retired
    #[error("pool {0} is not running")]
    PoolClosed(PoolId),

    /// Migration failed and the pool was rolled back to its checkpoint
    #[error("migration of pool {pool} failed and was rolled back: {reason}")]
    MigrationFailed { pool: PoolId, reason: String },

    /// Rollback could not restore a known-good state. Task bookkeeping for
    /// the pool may be inconsistent and needs operator attention.
    #[error("rollback of pool {pool} failed: {reason}")]
    RollbackFailed {
        pool: PoolId,
        reason: String,
        unrestored: Vec<TaskId>,
    },
}

impl ResizeError {
    /// Whether retrying the same request later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::AlreadyResizing(_) | Self::MigrationFailed { .. }
        )
    }
}

/// Errors from the checkpoint/rollback manager
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckpointError {
    /// Rollback requested without a prior checkpoint
    #[error("no checkpoint recorded for pool {0}")]
    NoCheckpoint(PoolId),

    /// Re-submission of checkpointed tasks failed
    #[error("rollback of pool {pool} failed: {reason}")]
    RollbackFailed {
        pool: PoolId,
        reason: String,
        unrestored: Vec<TaskId>,
    },
}

impl From<CheckpointError> for ResizeError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::NoCheckpoint(pool) => ResizeError::RollbackFailed {
                pool,
                reason: "no checkpoint recorded".to_string(),
                unrestored: vec![],
            },
            CheckpointError::RollbackFailed {
                pool,
                reason,
                unrestored,
            } => ResizeError::RollbackFailed {
                pool,
                reason,
                unrestored,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ResizeError::InvalidCapacity {
            requested: 0,
            min: 1,
            max: 50,
        };
        assert_eq!(err.to_string(), "invalid capacity 0: must be within [1, 50]");

        let id = TaskId::new();
        let err = PoolError::NotCancellable {
            id,
            status: TaskStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            format!("task {id} cannot be cancelled in state running")
        );
    }

    #[test]
    fn test_transient_classification() {
        let pool = PoolId::new();
        assert!(ResizeError::Busy(pool).is_transient());
        assert!(ResizeError::AlreadyResizing(pool).is_transient());
        assert!(!ResizeError::PoolNotFound(pool).is_transient());
        assert!(!ResizeError::RollbackFailed {
            pool,
            reason: "x".into(),
            unrestored: vec![],
        }
        .is_transient());
    }

    #[test]
    fn test_checkpoint_error_converts_to_rollback_failed() {
        let pool = PoolId::new();
        let err: ResizeError = CheckpointError::NoCheckpoint(pool).into();
        assert!(matches!(err, ResizeError::RollbackFailed { pool: p, .. } if p == pool));
    }
}
