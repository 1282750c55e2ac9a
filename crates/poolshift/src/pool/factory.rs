//! Construction seam for replacement pools

use std::sync::Arc;

use crate::error::PoolError;
use crate::ids::PoolId;

use super::managed::{ManagedPool, PoolConfig};

/// Builds pools for the manager and for resize replacements.
///
/// Pools are returned unstarted; the caller decides when workers begin.
pub trait PoolFactory: Send + Sync {
    fn create(&self, id: PoolId, name: &str, capacity: usize) -> Result<Arc<ManagedPool>, PoolError>;
}

/// Builds every pool from one shared [`PoolConfig`]
#[derive(Debug, Clone, Default)]
pub struct DefaultPoolFactory {
    config: PoolConfig,
}

impl DefaultPoolFactory {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl PoolFactory for DefaultPoolFactory {
    fn create(&self, id: PoolId, name: &str, capacity: usize) -> Result<Arc<ManagedPool>, PoolError> {
        ManagedPool::new(id, name, capacity, self.config.clone())
    }
}
