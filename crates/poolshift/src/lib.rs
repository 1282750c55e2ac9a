//! # Poolshift
//!
//! Worker pools whose capacity can change while they run, without losing,
//! duplicating or orphaning queued work.
//!
//! ## Features
//!
//! - **Managed pools**: tokio-backed workers with a FIFO queue, per-task
//!   status channels and cooperative stop
//! - **Live resize**: a replacement pool takes over pending work while work
//!   already running finishes where it started
//! - **Checkpoint/rollback**: any failure mid-migration restores the original
//!   pool, queue and submission gate
//! - **Resize permits**: per-pool exclusivity plus a global throttle
//! - **Capacity advisor**: a pure recommendation from current load
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PoolManager                           │
//! │  (create/close pools, submit/cancel/stop tasks, stats)      │
//! └─────────────────────────────────────────────────────────────┘
//!               │                               │
//!               ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │ PoolRegistry             │◄──│        ResizeEngine           │
//! │ TaskRegistry             │   │ ConcurrencyController         │
//! │ (ids, names, redirects)  │   │ CheckpointManager · advise()  │
//! └──────────────────────────┘   └──────────────────────────────┘
//!               │                               │
//!               ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ManagedPool                            │
//! │  (worker loops, task map, freeze/drain/adopt, shutdown)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use poolshift::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = PoolManager::new(EngineConfig::from_env());
//! let pool = manager.create_pool(Some("reports".into()), Some(2))?;
//!
//! let task = manager
//!     .submit_task(pool, None, work_fn(|_| async { Ok(serde_json::json!("done")) }))
//!     .await?;
//!
//! let outcome = manager.resize(pool, 5).await?;
//! assert!(outcome.success);
//!
//! let record = manager.wait_for_task(task, None).await?;
//! println!("{} finished as {}", record.name, record.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod resize;
pub mod task;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{EngineConfig, MAX_CAPACITY, MIN_CAPACITY};
    pub use crate::error::{CheckpointError, PoolError, ResizeError};
    pub use crate::ids::{PoolId, TaskId};
    pub use crate::manager::{ManagerStats, PoolManager};
    pub use crate::metrics::{InMemoryMetrics, ResizeMetrics, TracingMetrics};
    pub use crate::pool::{DefaultPoolFactory, ManagedPool, PoolConfig, PoolFactory, PoolInfo, PoolStatus};
    pub use crate::resize::{
        advise, CapacitySuggestion, ResizeEngine, ResizeFailure, ResizeInfo, ResizeOutcome, ResizePhase,
    };
    pub use crate::task::{work_fn, TaskContext, TaskRecord, TaskStatus, Work, WorkResult};
}

pub use config::EngineConfig;
pub use error::{CheckpointError, PoolError, ResizeError};
pub use ids::{PoolId, TaskId};
pub use manager::{ManagerStats, PoolManager};
pub use resize::{ResizeOutcome, ResizePhase};
