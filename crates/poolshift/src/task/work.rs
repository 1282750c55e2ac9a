//! Units of work executed by pool workers

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::ids::TaskId;

/// Result of a unit of work
pub type WorkResult = Result<serde_json::Value, String>;

/// A re-invocable unit of work.
///
/// Pending work can be handed to a different pool by a resize or a rollback,
/// so it is stored as a shareable function and only invoked when a worker
/// actually starts the task.
pub type Work = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, WorkResult> + Send + Sync>;

/// Wrap an async closure as [`Work`]
///
/// # Example
///
/// ```
/// use poolshift::task::work_fn;
///
/// let work = work_fn(|ctx| async move {
///     if ctx.is_cancelled() {
///         return Err("stopped".to_string());
///     }
///     Ok(serde_json::json!({ "task": ctx.task_id().to_string() }))
/// });
/// # let _ = work;
/// ```
pub fn work_fn<F, Fut>(f: F) -> Work
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkResult> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Context handed to a unit of work when it starts
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(task_id: TaskId, cancel: CancellationToken) -> Self {
        Self { task_id, cancel }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Whether `stop` was requested for this task.
    ///
    /// Long-running work should poll this (or await [`Self::cancelled`]);
    /// stopping is cooperative and never forcibly terminates a worker.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once `stop` is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_work_fn_is_reinvocable() {
        let work = work_fn(|ctx| async move { Ok(serde_json::json!(ctx.task_id().to_string())) });
        let id = TaskId::new();

        let first = work(TaskContext::new(id, CancellationToken::new())).await;
        let second = work(TaskContext::new(id, CancellationToken::new())).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_context_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = TaskContext::new(TaskId::new(), token.clone());
        assert!(!ctx.is_cancelled());

        token.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }
}
