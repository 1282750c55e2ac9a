//! Managed pools, their construction seam and the registries that track them

mod factory;
mod managed;
mod registry;
mod slot;

pub use factory::{DefaultPoolFactory, PoolFactory};
pub use managed::{validate_capacity, ManagedPool, PoolConfig, PoolInfo, PoolStatus};
pub use registry::{PoolRegistry, TaskRegistry};
pub use slot::TaskSlot;
