//! Task record and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PoolId, TaskId};

/// Lifecycle state of a task
///
/// ```text
/// Pending ──► Running ──► Completed
///    │           │  └───► Failed
///    │           ▼
///    └──────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a worker
    Pending,
    /// Executing on a worker
    Running,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled while pending, or stopped while running
    Cancelled,
}

impl TaskStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Rejected state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid task transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// The tracked state of one task.
///
/// Records handed out by pools are copies; only the owning pool mutates the
/// live record, and only through the transition methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only when the task completed
    pub result: Option<serde_json::Value>,
    /// Set only when the task failed or was cancelled
    pub failure: Option<String>,
    /// The pool currently responsible for this task
    pub owner_pool_id: PoolId,
}

impl TaskRecord {
    /// Create a pending record. A missing name defaults to `task-<id prefix>`.
    pub fn new(id: TaskId, name: Option<String>, owner_pool_id: PoolId) -> Self {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("task-{}", id.short()));

        Self {
            id,
            name,
            status: TaskStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            failure: None,
            owner_pool_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// Pending -> Running
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Completed
    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        Ok(())
    }

    /// Running -> Failed
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.failure = Some(error.into());
        Ok(())
    }

    /// Pending or Running -> Cancelled
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        self.failure = Some(reason.into());
        Ok(())
    }

    /// Seconds spent running so far, or in total once terminal
    pub fn running_time_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
