//! Live capacity changes
//!
//! - [`advisor`]: stateless capacity recommendation
//! - [`controller`]: per-pool and global resize permits
//! - [`checkpoint`]: pre-resize snapshots and rollback
//! - [`engine`]: the resize state machine tying them together
//! - `retire`: handing a replaced pool's records to its successor

pub mod advisor;
pub mod checkpoint;
pub mod controller;
pub mod engine;
mod outcome;
mod retire;

pub use advisor::{advise, CapacitySuggestion};
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointedTask, RollbackReport};
pub use controller::{ConcurrencyController, ResizePermit};
pub use engine::ResizeEngine;
pub use outcome::{ResizeFailure, ResizeInfo, ResizeOutcome, ResizePhase};
