//! Managed worker pool
//!
//! Runs `capacity` worker loops on the tokio runtime that pull tasks from a
//! FIFO queue. All bookkeeping sits behind one lock, which is what makes
//! `drain_pending` atomic with respect to `submit` and to workers starting
//! tasks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::slot::TaskSlot;
use crate::config::{EngineConfig, MAX_CAPACITY, MIN_CAPACITY};
use crate::error::PoolError;
use crate::ids::{PoolId, TaskId};
use crate::task::{TaskContext, TaskRecord, TaskStatus, Work, WorkResult};

/// Per-pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,

    /// Bound on pending tasks (None = unbounded)
    pub max_queue_depth: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            max_queue_depth: None,
        }
    }
}

impl From<&EngineConfig> for PoolConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            shutdown_timeout: config.shutdown_timeout,
            max_queue_depth: config.max_queue_depth,
        }
    }
}

impl PoolConfig {
    /// Bound the pending queue
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    /// Set the graceful shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Pool lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Built but workers not started (a staged resize replacement)
    Created,
    /// Workers running
    Running,
    /// Graceful shutdown in progress
    Draining,
    /// Graceful shutdown finished
    Terminated,
    /// Forcefully stopped
    Stopped,
    /// Replaced by a resize
    Retired,
}

impl PoolStatus {
    /// Whether the pool can still take on work
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Terminated => write!(f, "terminated"),
            Self::Stopped => write!(f, "stopped"),
            Self::Retired => write!(f, "retired"),
        }
    }
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_id: PoolId,
    pub name: String,
    pub status: PoolStatus,
    pub capacity: usize,
    pub accepting_submissions: bool,
    pub total_tasks: usize,
    /// Pending plus running
    pub active_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
}

struct PoolState {
    status: PoolStatus,
    capacity: usize,
    accepting: bool,
    tasks: HashMap<TaskId, TaskSlot>,
    queue: VecDeque<TaskId>,
    live_workers: HashSet<usize>,
}

impl PoolState {
    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status() == status).count()
    }

    fn pending_len(&self) -> usize {
        self.count(TaskStatus::Pending)
    }

    fn next_job(&mut self, slot: usize) -> NextJob {
        if slot >= self.capacity {
            return NextJob::Exit;
        }
        if matches!(
            self.status,
            PoolStatus::Stopped | PoolStatus::Retired | PoolStatus::Terminated
        ) {
            return NextJob::Exit;
        }

        while let Some(task_id) = self.queue.pop_front() {
            let Some(task) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            // Cancelled entries are left behind in the queue.
            if task.record.start().is_err() {
                continue;
            }
            task.publish_status();
            return NextJob::Run(Job {
                task_id,
                work: Arc::clone(&task.work),
                cancel: task.cancel.clone(),
            });
        }

        if self.status == PoolStatus::Draining {
            NextJob::Exit
        } else {
            NextJob::Wait
        }
    }
}

enum NextJob {
    Run(Job),
    Wait,
    Exit,
}

struct Job {
    task_id: TaskId,
    work: Work,
    cancel: CancellationToken,
}

enum Finish {
    Completed(serde_json::Value),
    Failed(String),
    Stopped,
}

/// A bounded set of workers executing submitted work, with its own task map.
pub struct ManagedPool {
    id: PoolId,
    name: String,
    config: PoolConfig,
    state: Mutex<PoolState>,
    /// Wakes workers: new work, capacity change, shutdown
    wakeup: Notify,
    /// Signalled whenever a running task finishes
    idle: Notify,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ManagedPool {
    /// Build a pool without starting its workers.
    ///
    /// Capacity must be within `[MIN_CAPACITY, MAX_CAPACITY]`.
    pub fn new(
        id: PoolId,
        name: impl Into<String>,
        capacity: usize,
        config: PoolConfig,
    ) -> Result<Arc<Self>, PoolError> {
        validate_capacity(capacity)?;

        Ok(Arc::new(Self {
            id,
            name: name.into(),
            config,
            state: Mutex::new(PoolState {
                status: PoolStatus::Created,
                capacity,
                accepting: true,
                tasks: HashMap::new(),
                queue: VecDeque::new(),
                live_workers: HashSet::new(),
            }),
            wakeup: Notify::new(),
            idle: Notify::new(),
            workers: Mutex::new(Vec::new()),
        }))
    }

    /// Start the worker loops. Returns false if the pool was already started
    /// or is shut down.
    pub fn start(self: &Arc<Self>) -> bool {
        {
            let mut state = self.state.lock();
            if state.status != PoolStatus::Created {
                return false;
            }
            state.status = PoolStatus::Running;
        }
        self.spawn_missing_workers();
        info!(pool_id = %self.id, name = %self.name, capacity = self.capacity(), "pool started");
        true
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn status(&self) -> PoolStatus {
        self.state.lock().status
    }

    pub fn is_accepting(&self) -> bool {
        let state = self.state.lock();
        state.accepting && state.status.is_live()
    }

    pub fn is_running(&self) -> bool {
        self.status() == PoolStatus::Running
    }

    pub fn is_retired(&self) -> bool {
        self.status() == PoolStatus::Retired
    }

    /// Submit work. Fails with `PoolClosed` once the pool is frozen or shut
    /// down, and with `QueueFull` at the configured queue bound.
    pub fn submit(&self, name: Option<String>, work: Work) -> Result<TaskId, PoolError> {
        let task_id = TaskId::new();
        self.submit_with_id(task_id, name, work)?;
        Ok(task_id)
    }

    /// Submit work under an id chosen by the caller, so it can be registered
    /// elsewhere before the task becomes visible to a drain.
    pub fn submit_with_id(&self, task_id: TaskId, name: Option<String>, work: Work) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock();
            if !state.accepting || !state.status.is_live() {
                return Err(PoolError::PoolClosed(self.id));
            }
            self.check_queue_bound(&state)?;

            let record = TaskRecord::new(task_id, name, self.id);
            state.tasks.insert(task_id, TaskSlot::new(record, work));
            state.queue.push_back(task_id);
        }
        self.wakeup.notify_waiters();
        debug!(pool_id = %self.id, %task_id, "task submitted");
        Ok(())
    }

    /// Cancel a pending task. Running and terminal tasks are not cancellable.
    pub fn cancel(&self, task_id: TaskId) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(PoolError::TaskNotFound(task_id))?;

        if !task.record.is_pending() {
            return Err(PoolError::NotCancellable {
                id: task_id,
                status: task.status(),
            });
        }
        task.record
            .cancel("cancelled before start")
            .map_err(|e| PoolError::NotCancellable {
                id: task_id,
                status: e.from,
            })?;
        task.cancel.cancel();
        task.publish_status();

        debug!(pool_id = %self.id, %task_id, "task cancelled");
        Ok(())
    }

    /// Cancel a pending task or send the stop signal to a running one.
    ///
    /// The status check and the action happen under one lock, so a task that
    /// starts concurrently still gets the stop signal. Returns the status the
    /// task had when the request landed.
    ///
    /// A running task only receives the signal. Work that never awaits or
    /// polls its context keeps running until it returns on its own.
    pub fn interrupt(&self, task_id: TaskId) -> Result<TaskStatus, PoolError> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(PoolError::TaskNotFound(task_id))?;

        let status = task.status();
        match status {
            TaskStatus::Pending => {
                task.record
                    .cancel("cancelled before start")
                    .map_err(|e| PoolError::NotCancellable {
                        id: task_id,
                        status: e.from,
                    })?;
                task.cancel.cancel();
                task.publish_status();
            }
            TaskStatus::Running => task.cancel.cancel(),
            _ => return Err(PoolError::NotRunning { id: task_id, status }),
        }
        debug!(pool_id = %self.id, %task_id, from = %status, "interrupt requested");
        Ok(status)
    }

    /// Cancel every pending task, returning their ids
    pub fn cancel_pending(&self) -> Vec<TaskId> {
        let mut state = self.state.lock();
        let mut cancelled = Vec::new();
        for task in state.tasks.values_mut().filter(|t| t.record.is_pending()) {
            if task.record.cancel("pool tasks cancelled").is_ok() {
                task.cancel.cancel();
                task.publish_status();
                cancelled.push(task.id());
            }
        }
        state.queue.clear();
        info!(pool_id = %self.id, count = cancelled.len(), "cancelled pending tasks");
        cancelled
    }

    /// Stop accepting submissions. Queued and running work is unaffected.
    pub fn freeze(&self) {
        self.state.lock().accepting = false;
        debug!(pool_id = %self.id, "pool frozen");
    }

    /// Atomically remove and return every queued task, in queue order.
    ///
    /// Tasks cancelled while queued keep their queue entry until a worker or
    /// a drain reaches it, so the result can include terminal tasks. Running
    /// tasks are never in the queue and stay behind.
    pub fn drain_pending(&self) -> Vec<TaskSlot> {
        let mut state = self.state.lock();
        let queue = std::mem::take(&mut state.queue);
        let mut drained = Vec::with_capacity(queue.len());

        for task_id in queue {
            if let Some(task) = state.tasks.remove(&task_id) {
                drained.push(task);
            }
        }

        debug!(pool_id = %self.id, count = drained.len(), "drained pending tasks");
        drained
    }

    /// Take ownership of a task moved from another pool, keeping its id.
    ///
    /// On failure the task is handed back so the caller still owns it.
    pub fn adopt(&self, mut task: TaskSlot) -> Result<(), (PoolError, TaskSlot)> {
        {
            let mut state = self.state.lock();
            if !state.status.is_live() {
                return Err((PoolError::PoolClosed(self.id), task));
            }
            if task.record.is_pending() {
                if let Err(e) = self.check_queue_bound(&state) {
                    return Err((e, task));
                }
                state.queue.push_back(task.id());
            }
            task.record.owner_pool_id = self.id;
            state.tasks.insert(task.id(), task);
        }
        self.wakeup.notify_waiters();
        Ok(())
    }

    /// Put tasks back after an aborted migration.
    ///
    /// Pending tasks go to the front of the queue in submission order.
    /// No bounds are checked: these tasks were already accepted once.
    pub fn restore_tasks(&self, tasks: Vec<TaskSlot>) {
        if tasks.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock();
            let mut pending: Vec<(chrono::DateTime<chrono::Utc>, TaskId)> = Vec::new();
            for mut task in tasks {
                task.record.owner_pool_id = self.id;
                if task.record.is_pending() {
                    pending.push((task.record.submitted_at, task.id()));
                }
                state.tasks.insert(task.id(), task);
            }
            pending.sort();
            for (_, task_id) in pending.into_iter().rev() {
                if !state.queue.contains(&task_id) {
                    state.queue.push_front(task_id);
                }
            }
        }
        self.wakeup.notify_waiters();
    }

    /// Move finished records from a retired pool into this one
    pub fn adopt_history(&self, tasks: Vec<TaskSlot>) {
        let mut state = self.state.lock();
        for mut task in tasks {
            task.record.owner_pool_id = self.id;
            if task.record.is_pending() && !state.queue.contains(&task.id()) {
                state.queue.push_back(task.id());
            }
            state.tasks.insert(task.id(), task);
        }
    }

    /// Re-submit a task from a checkpoint copy, keeping its id
    pub fn requeue(&self, mut record: TaskRecord, work: Work) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock();
            if !state.status.is_live() {
                return Err(PoolError::PoolClosed(self.id));
            }
            // A task that was running at checkpoint time starts over.
            record.status = TaskStatus::Pending;
            record.started_at = None;
            record.owner_pool_id = self.id;

            let task_id = record.id;
            state.tasks.insert(task_id, TaskSlot::new(record, work));
            state.queue.push_back(task_id);
        }
        self.wakeup.notify_waiters();
        Ok(())
    }

    /// Remove and return every task, leaving the pool empty
    pub fn take_all(&self) -> Vec<TaskSlot> {
        let mut state = self.state.lock();
        state.queue.clear();
        let mut tasks: Vec<TaskSlot> = state.tasks.drain().map(|(_, t)| t).collect();
        tasks.sort_by_key(|t| (t.record.submitted_at, t.id()));
        tasks
    }

    /// Copies of every non-terminal task, oldest first
    pub fn snapshot_active(&self) -> Vec<(TaskRecord, Work)> {
        let state = self.state.lock();
        let mut active: Vec<(TaskRecord, Work)> = state
            .tasks
            .values()
            .filter(|t| !t.record.is_terminal())
            .map(|t| (t.record.clone(), Arc::clone(&t.work)))
            .collect();
        active.sort_by_key(|(record, _)| (record.submitted_at, record.id));
        active
    }

    /// Restore capacity and the submission gate
    pub fn restore_state(self: &Arc<Self>, capacity: usize, accepting: bool) {
        self.set_capacity(capacity);
        self.state.lock().accepting = accepting;
    }

    /// Change the worker count in place.
    ///
    /// Extra workers exit after their current task; missing ones are spawned
    /// if the pool is running.
    pub fn set_capacity(self: &Arc<Self>, capacity: usize) {
        let capacity = capacity.clamp(MIN_CAPACITY, MAX_CAPACITY);
        let running = {
            let mut state = self.state.lock();
            state.capacity = capacity;
            state.status == PoolStatus::Running
        };
        if running {
            self.spawn_missing_workers();
        }
        self.wakeup.notify_waiters();
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.state.lock().tasks.contains_key(&task_id)
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.state.lock().tasks.get(&task_id).map(|t| t.record.clone())
    }

    /// Copies of all task records, oldest first
    pub fn list_tasks(&self) -> Vec<TaskRecord> {
        let state = self.state.lock();
        let mut records: Vec<TaskRecord> =
            state.tasks.values().map(|t| t.record.clone()).collect();
        records.sort_by_key(|r| (r.submitted_at, r.id));
        records
    }

    /// Status updates for one task
    pub fn subscribe(&self, task_id: TaskId) -> Option<watch::Receiver<TaskStatus>> {
        self.state.lock().tasks.get(&task_id).map(|t| t.subscribe())
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending_len()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().count(TaskStatus::Running)
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn info(&self) -> PoolInfo {
        let state = self.state.lock();
        let pending = state.count(TaskStatus::Pending);
        let running = state.count(TaskStatus::Running);

        PoolInfo {
            pool_id: self.id,
            name: self.name.clone(),
            status: state.status,
            capacity: state.capacity,
            accepting_submissions: state.accepting && state.status.is_live(),
            total_tasks: state.tasks.len(),
            active_tasks: pending + running,
            pending_tasks: pending,
            running_tasks: running,
            completed_tasks: state.count(TaskStatus::Completed),
            failed_tasks: state.count(TaskStatus::Failed),
            cancelled_tasks: state.count(TaskStatus::Cancelled),
        }
    }

    /// Remove terminal records, returning their ids
    pub fn remove_terminal(&self) -> Vec<TaskId> {
        let mut state = self.state.lock();
        let done: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|t| t.record.is_terminal())
            .map(|t| t.id())
            .collect();
        for task_id in &done {
            state.tasks.remove(task_id);
        }
        done
    }

    /// Wait until no task is running
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), PoolError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.running_count() == 0 {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(PoolError::ShutdownTimeout(self.id));
            }
        }
    }

    /// Mark the pool as replaced. Its workers exit; it never accepts work again.
    pub fn retire(&self) {
        {
            let mut state = self.state.lock();
            state.accepting = false;
            state.status = PoolStatus::Retired;
        }
        self.wakeup.notify_waiters();
        info!(pool_id = %self.id, name = %self.name, "pool retired");
    }

    /// Shut the pool down.
    ///
    /// Graceful: stop accepting, let workers finish queued and running work,
    /// and wait up to `shutdown_timeout`. Forced: cancel pending work, send
    /// the stop signal to running work, and return the discarded records.
    pub async fn shutdown(self: &Arc<Self>, graceful: bool) -> Result<Vec<TaskRecord>, PoolError> {
        if graceful {
            self.shutdown_graceful().await.map(|_| Vec::new())
        } else {
            Ok(self.shutdown_now())
        }
    }

    async fn shutdown_graceful(self: &Arc<Self>) -> Result<(), PoolError> {
        let never_started = {
            let mut state = self.state.lock();
            if !state.status.is_live() {
                return Ok(());
            }
            let never_started = state.status == PoolStatus::Created;
            state.accepting = false;
            state.status = PoolStatus::Draining;
            never_started
        };
        if never_started {
            self.spawn_missing_workers();
        }
        self.wakeup.notify_waiters();
        info!(pool_id = %self.id, "draining pool");

        let handles = std::mem::take(&mut *self.workers.lock());
        let all_exited = futures::future::join_all(handles);
        match tokio::time::timeout(self.config.shutdown_timeout, all_exited).await {
            Ok(_) => {
                self.state.lock().status = PoolStatus::Terminated;
                info!(pool_id = %self.id, "pool terminated");
                Ok(())
            }
            Err(_) => {
                warn!(
                    pool_id = %self.id,
                    running = self.running_count(),
                    "graceful shutdown timed out"
                );
                Err(PoolError::ShutdownTimeout(self.id))
            }
        }
    }

    fn shutdown_now(&self) -> Vec<TaskRecord> {
        let discarded = {
            let mut state = self.state.lock();
            // A retired pool may still be finishing work it had started.
            if matches!(state.status, PoolStatus::Stopped | PoolStatus::Terminated) {
                return Vec::new();
            }
            state.accepting = false;
            state.status = PoolStatus::Stopped;
            state.queue.clear();

            let mut discarded = Vec::new();
            for task in state.tasks.values_mut() {
                match task.status() {
                    TaskStatus::Pending => {
                        if task.record.cancel("pool stopped").is_ok() {
                            task.cancel.cancel();
                            task.publish_status();
                            discarded.push(task.record.clone());
                        }
                    }
                    TaskStatus::Running => task.cancel.cancel(),
                    _ => {}
                }
            }
            discarded.sort_by_key(|r| (r.submitted_at, r.id));
            discarded
        };
        self.wakeup.notify_waiters();
        info!(pool_id = %self.id, discarded = discarded.len(), "pool stopped");
        discarded
    }

    fn check_queue_bound(&self, state: &PoolState) -> Result<(), PoolError> {
        match self.config.max_queue_depth {
            Some(limit) if state.pending_len() >= limit => Err(PoolError::QueueFull {
                pool: self.id,
                limit,
            }),
            _ => Ok(()),
        }
    }

    fn spawn_missing_workers(self: &Arc<Self>) {
        let slots: Vec<usize> = {
            let mut state = self.state.lock();
            let missing: Vec<usize> = (0..state.capacity)
                .filter(|slot| !state.live_workers.contains(slot))
                .collect();
            state.live_workers.extend(missing.iter().copied());
            missing
        };

        let mut workers = self.workers.lock();
        for slot in slots {
            let pool = Arc::clone(self);
            workers.push(tokio::spawn(async move { pool.run_worker(slot).await }));
        }
    }

    async fn run_worker(self: Arc<Self>, slot: usize) {
        debug!(pool_id = %self.id, slot, "worker started");
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut state = self.state.lock();
                let next = state.next_job(slot);
                if matches!(next, NextJob::Exit) {
                    state.live_workers.remove(&slot);
                }
                next
            };
            match next {
                NextJob::Run(job) => self.execute(job).await,
                NextJob::Wait => notified.await,
                NextJob::Exit => break,
            }
        }
        debug!(pool_id = %self.id, slot, "worker exited");
    }

    async fn execute(&self, job: Job) {
        let Job {
            task_id,
            work,
            cancel,
        } = job;
        debug!(pool_id = %self.id, %task_id, "task started");

        let ctx = TaskContext::new(task_id, cancel.clone());
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| work(ctx))) {
            Ok(future) => future,
            Err(_) => futures::future::ready::<WorkResult>(Err("task panicked".to_string())).boxed(),
        };

        let finish = tokio::select! {
            biased;
            _ = cancel.cancelled() => Finish::Stopped,
            result = AssertUnwindSafe(future).catch_unwind() => match result {
                Ok(Ok(value)) => Finish::Completed(value),
                Ok(Err(error)) => Finish::Failed(error),
                Err(_) => Finish::Failed("task panicked".to_string()),
            },
        };

        {
            let mut state = self.state.lock();
            if let Some(task) = state.tasks.get_mut(&task_id) {
                let transition = match finish {
                    Finish::Completed(value) => task.record.complete(value),
                    Finish::Failed(error) => task.record.fail(error),
                    Finish::Stopped => task.record.cancel("stopped while running"),
                };
                match transition {
                    Ok(()) => {
                        debug!(pool_id = %self.id, %task_id, status = %task.status(), "task finished");
                        task.publish_status();
                    }
                    Err(e) => warn!(pool_id = %self.id, %task_id, error = %e, "dropping task result"),
                }
            }
        }
        self.idle.notify_waiters();
    }
}

impl std::fmt::Debug for ManagedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPool")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Check a capacity against `[MIN_CAPACITY, MAX_CAPACITY]`
pub fn validate_capacity(capacity: usize) -> Result<(), PoolError> {
    if (MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
        Ok(())
    } else {
        Err(PoolError::InvalidCapacity {
            requested: capacity,
            min: MIN_CAPACITY,
            max: MAX_CAPACITY,
        })
    }
}
