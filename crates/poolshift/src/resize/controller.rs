//! Resize permits
//!
//! Two layers: per-pool exclusivity, which is checked first and fails fast
//! with `AlreadyResizing`, then a global semaphore that throttles resizes
//! across all pools and fails with `Busy` after a bounded wait.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{PoolError, ResizeError};
use crate::ids::PoolId;

/// Gate in front of every resize. Clones share the same permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    active: Arc<Mutex<HashSet<PoolId>>>,
    global: Arc<Semaphore>,
    max_concurrent: usize,
    acquire_timeout: Duration,
}

impl ConcurrencyController {
    pub fn new(max_concurrent: usize, acquire_timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
            global: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            acquire_timeout,
        }
    }

    /// Acquire the right to resize `pool_id`.
    ///
    /// The permit is released when the returned guard is dropped, on every
    /// exit path of the caller.
    pub async fn acquire(&self, pool_id: PoolId) -> Result<ResizePermit, ResizeError> {
        let claim = self
            .claim(pool_id)
            .ok_or(ResizeError::AlreadyResizing(pool_id))?;

        match tokio::time::timeout(self.acquire_timeout, Arc::clone(&self.global).acquire_owned()).await {
            Ok(Ok(permit)) => {
                debug!(%pool_id, "resize permit acquired");
                Ok(ResizePermit {
                    claim,
                    _global: Some(permit),
                })
            }
            // A closed semaphore is treated like an exhausted one.
            Ok(Err(_)) | Err(_) => {
                debug!(%pool_id, timeout_ms = self.acquire_timeout.as_millis() as u64, "no global resize permit available");
                Err(ResizeError::Busy(pool_id))
            }
        }
    }

    /// Claim only the per-pool slot, without a global permit.
    ///
    /// Used by operations such as closing a pool that must not overlap a
    /// resize of the same pool.
    pub fn acquire_exclusive(&self, pool_id: PoolId) -> Result<ResizePermit, PoolError> {
        let claim = self
            .claim(pool_id)
            .ok_or(PoolError::ResizeInProgress(pool_id))?;
        Ok(ResizePermit {
            claim,
            _global: None,
        })
    }

    /// Whether a permit is currently held for `pool_id`
    pub fn is_resizing(&self, pool_id: PoolId) -> bool {
        self.active.lock().contains(&pool_id)
    }

    /// Global permits not currently held
    pub fn available_permits(&self) -> usize {
        self.global.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    fn claim(&self, pool_id: PoolId) -> Option<PoolClaim> {
        if !self.active.lock().insert(pool_id) {
            return None;
        }
        Some(PoolClaim {
            pool_id,
            active: Arc::clone(&self.active),
        })
    }
}

/// Per-pool slot; removing it on drop covers the `Busy` path too
#[derive(Debug)]
struct PoolClaim {
    pool_id: PoolId,
    active: Arc<Mutex<HashSet<PoolId>>>,
}

impl Drop for PoolClaim {
    fn drop(&mut self) {
        self.active.lock().remove(&self.pool_id);
    }
}

/// Scoped resize permit. Dropping it releases both layers.
#[derive(Debug)]
pub struct ResizePermit {
    claim: PoolClaim,
    _global: Option<OwnedSemaphorePermit>,
}

impl ResizePermit {
    pub fn pool_id(&self) -> PoolId {
        self.claim.pool_id
    }
}

impl Drop for ResizePermit {
    fn drop(&mut self) {
        debug!(pool_id = %self.claim.pool_id, "resize permit released");
    }
}
