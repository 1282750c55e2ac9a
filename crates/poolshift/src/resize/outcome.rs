//! Resize phases, outcomes and the read-only resize view

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::duration_millis;
use crate::error::ResizeError;
use crate::ids::{PoolId, TaskId};
use crate::pool::PoolStatus;

/// Where a resize of one pool currently is
///
/// ```text
/// Ready ──► Resizing ──► Migrating ──► Cleaning ──► Ready
///              │             │
///              └─────────────┴──► Failed ──► Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePhase {
    Ready,
    /// Permit held, checkpoint taken, request being validated
    Resizing,
    /// Old pool frozen, pending tasks moving to the replacement
    Migrating,
    /// Replacement live; waiting for work already running on the old pool
    Cleaning,
    /// Rolling back to the checkpoint
    Failed,
}

impl std::fmt::Display for ResizePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Resizing => write!(f, "resizing"),
            Self::Migrating => write!(f, "migrating"),
            Self::Cleaning => write!(f, "cleaning"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a resize attempt did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResizeFailure {
    /// Refused before anything was changed
    Rejected { error: ResizeError },
    /// Failed after mutation began; the pool was restored from its checkpoint
    MigrationFailed { reason: String },
    /// The pool could not be restored
    RollbackFailed {
        reason: String,
        unrestored: Vec<TaskId>,
    },
}

/// Result of one resize attempt. Exactly one is emitted per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeOutcome {
    /// The pool the request targeted
    pub pool_id: PoolId,
    /// The replacement pool, when one was published
    pub new_pool_id: Option<PoolId>,
    pub success: bool,
    pub old_capacity: usize,
    pub new_capacity: usize,
    /// Pending tasks moved to the replacement
    pub migrated_count: usize,
    /// Terminal tasks found during the drain, cleaned up rather than lost
    pub discarded_count: usize,
    /// Tasks left to finish on the old pool
    pub running_at_freeze: usize,
    /// The old pool was still running work when the resize returned and
    /// retires in the background once that work finishes
    #[serde(default)]
    pub retirement_deferred: bool,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub failure: Option<ResizeFailure>,
    pub completed_at: DateTime<Utc>,
}

impl ResizeOutcome {
    /// The pool that owns the work after this attempt
    pub fn current_pool_id(&self) -> PoolId {
        self.new_pool_id.unwrap_or(self.pool_id)
    }

    pub fn is_rollback_failure(&self) -> bool {
        matches!(self.failure, Some(ResizeFailure::RollbackFailed { .. }))
    }

    /// Map a failed outcome onto the error taxonomy
    pub fn into_result(self) -> Result<ResizeOutcome, ResizeError> {
        let pool = self.pool_id;
        match self.failure.clone() {
            None => Ok(self),
            Some(ResizeFailure::Rejected { error }) => Err(error),
            Some(ResizeFailure::MigrationFailed { reason }) => Err(ResizeError::MigrationFailed { pool, reason }),
            Some(ResizeFailure::RollbackFailed { reason, unrestored }) => Err(ResizeError::RollbackFailed {
                pool,
                reason,
                unrestored,
            }),
        }
    }
}

/// Read-only view of a pool for resize decisions. Safe to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeInfo {
    pub pool_id: PoolId,
    pub name: String,
    pub status: PoolStatus,
    pub current_capacity: usize,
    /// Running tasks
    pub active_tasks: usize,
    /// Pending tasks
    pub queue_depth: usize,
    pub suggested_capacity: usize,
    pub suggestion_bounds: (usize, usize),
    pub rationale: String,
    pub can_resize: bool,
    pub min_capacity: usize,
    pub max_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(failure: Option<ResizeFailure>) -> ResizeOutcome {
        ResizeOutcome {
            pool_id: PoolId::new(),
            new_pool_id: None,
            success: failure.is_none(),
            old_capacity: 2,
            new_capacity: 5,
            migrated_count: 0,
            discarded_count: 0,
            running_at_freeze: 0,
            retirement_deferred: false,
            duration: Duration::from_millis(12),
            failure,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_into_result() {
        assert!(outcome(None).into_result().is_ok());

        let err = outcome(Some(ResizeFailure::MigrationFailed {
            reason: "queue full".into(),
        }))
        .into_result()
        .unwrap_err();
        assert!(matches!(err, ResizeError::MigrationFailed { ref reason, .. } if reason == "queue full"));

        let task = TaskId::new();
        let failed = outcome(Some(ResizeFailure::RollbackFailed {
            reason: "closed".into(),
            unrestored: vec![task],
        }));
        assert!(failed.is_rollback_failure());
        assert!(matches!(
            failed.into_result().unwrap_err(),
            ResizeError::RollbackFailed { unrestored, .. } if unrestored == vec![task]
        ));
    }

    #[test]
    fn test_outcome_serialization() {
        let pool = PoolId::new();
        let rejected = outcome(Some(ResizeFailure::Rejected {
            error: ResizeError::AlreadyResizing(pool),
        }));
        let json = serde_json::to_value(&rejected).unwrap();
        assert_eq!(json["duration"], 12);
        assert_eq!(json["failure"]["kind"], "rejected");
        assert_eq!(json["failure"]["error"]["kind"], "already_resizing");
        assert_eq!(json["success"], false);

        let parsed: ResizeOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.into_result().unwrap_err(), ResizeError::AlreadyResizing(pool));
    }

    #[test]
    fn test_current_pool_id() {
        let mut o = outcome(None);
        assert_eq!(o.current_pool_id(), o.pool_id);
        let new = PoolId::new();
        o.new_pool_id = Some(new);
        assert_eq!(o.current_pool_id(), new);
    }
}
