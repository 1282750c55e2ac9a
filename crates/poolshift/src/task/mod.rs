//! Task records and units of work
//!
//! - [`TaskRecord`] - Pure state of one task and its monotonic state machine
//! - [`Work`] - Re-invocable async function executed by a pool worker
//! - [`TaskContext`] - Task id plus the cooperative stop signal

mod record;
mod work;

pub use record::{InvalidTransition, TaskRecord, TaskStatus};
pub use work::{work_fn, TaskContext, Work, WorkResult};
