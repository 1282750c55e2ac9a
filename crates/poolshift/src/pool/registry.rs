//! Pool and task registries

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::PoolError;
use crate::ids::{PoolId, TaskId};

use super::managed::ManagedPool;

#[derive(Default)]
struct RegistryInner {
    pools: HashMap<PoolId, Arc<ManagedPool>>,
    names: HashMap<String, PoolId>,
    /// Resize replacements that exist but are not visible yet
    staged: HashSet<PoolId>,
    /// Retired pool id -> current pool id
    redirects: HashMap<PoolId, PoolId>,
    /// Replaced pools still finishing work they had started
    retiring: HashMap<PoolId, Arc<ManagedPool>>,
}

impl RegistryInner {
    fn resolve_id(&self, id: PoolId) -> Option<PoolId> {
        let current = self.redirects.get(&id).copied().unwrap_or(id);
        (self.pools.contains_key(&current) && !self.staged.contains(&current)).then_some(current)
    }
}

/// Maps pool ids to pool instances.
///
/// Every mutation happens under one coarse lock, held only for map updates.
#[derive(Default)]
pub struct PoolRegistry {
    inner: Mutex<RegistryInner>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new pool. Names are unique across published pools.
    pub fn insert(&self, pool: Arc<ManagedPool>) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        if inner.names.contains_key(pool.name()) {
            return Err(PoolError::PoolAlreadyExists(pool.name().to_string()));
        }
        inner.names.insert(pool.name().to_string(), pool.id());
        inner.pools.insert(pool.id(), pool);
        Ok(())
    }

    /// Look up a published pool by its exact id
    pub fn get(&self, id: PoolId) -> Option<Arc<ManagedPool>> {
        let inner = self.inner.lock();
        if inner.staged.contains(&id) {
            return None;
        }
        inner.pools.get(&id).cloned()
    }

    /// Look up a pool, following redirects left by resizes
    pub fn resolve(&self, id: PoolId) -> Option<Arc<ManagedPool>> {
        let inner = self.inner.lock();
        let current = inner.resolve_id(id)?;
        inner.pools.get(&current).cloned()
    }

    /// Like [`Self::resolve`], but staged and retiring pools are visible too.
    ///
    /// Task lookups use this: while a resize is in flight a migrated task
    /// already lives in the staged replacement, and a task that was running
    /// at freeze time still lives in the replaced pool.
    pub fn lookup(&self, id: PoolId) -> Option<Arc<ManagedPool>> {
        let inner = self.inner.lock();
        if let Some(pool) = inner.retiring.get(&id) {
            return Some(Arc::clone(pool));
        }
        let current = inner.redirects.get(&id).copied().unwrap_or(id);
        inner.pools.get(&current).cloned()
    }

    /// The current id for `id`, following redirects
    pub fn resolve_id(&self, id: PoolId) -> Option<PoolId> {
        self.inner.lock().resolve_id(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<ManagedPool>> {
        let inner = self.inner.lock();
        let id = inner.names.get(name)?;
        inner.pools.get(id).cloned()
    }

    /// Register a resize replacement without making it visible
    pub fn stage(&self, pool: Arc<ManagedPool>) {
        let mut inner = self.inner.lock();
        inner.staged.insert(pool.id());
        inner.pools.insert(pool.id(), pool);
    }

    /// Drop a staged replacement after a rollback
    pub fn unstage(&self, id: PoolId) -> Option<Arc<ManagedPool>> {
        let mut inner = self.inner.lock();
        if !inner.staged.remove(&id) {
            return None;
        }
        inner.pools.remove(&id)
    }

    /// Whether `id` is a staged, unpublished replacement
    pub fn is_staged(&self, id: PoolId) -> bool {
        self.inner.lock().staged.contains(&id)
    }

    /// Swap a published pool for its staged replacement.
    ///
    /// The old id, and every id that already redirected to it, now
    /// resolves to the replacement. The old pool stays reachable through
    /// [`Self::lookup`] until [`Self::finish_retiring`].
    pub fn publish(&self, old: PoolId, new: PoolId) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        if !inner.staged.contains(&new) {
            return Err(PoolError::PoolNotFound(new));
        }
        let Some(old_pool) = inner.pools.remove(&old) else {
            return Err(PoolError::PoolNotFound(old));
        };

        inner.staged.remove(&new);
        inner.names.insert(old_pool.name().to_string(), new);
        for target in inner.redirects.values_mut() {
            if *target == old {
                *target = new;
            }
        }
        inner.redirects.insert(old, new);
        inner.retiring.insert(old, old_pool);
        Ok(())
    }

    /// Whether `id` was replaced but still has work of its own
    pub fn is_retiring(&self, id: PoolId) -> bool {
        self.inner.lock().retiring.contains_key(&id)
    }

    /// Replaced pools still finishing work of their own
    pub fn retiring(&self) -> Vec<Arc<ManagedPool>> {
        self.inner.lock().retiring.values().cloned().collect()
    }

    /// Forget a replaced pool once its work has moved on
    pub fn finish_retiring(&self, id: PoolId) -> Option<Arc<ManagedPool>> {
        self.inner.lock().retiring.remove(&id)
    }

    /// Remove a published pool along with its name and redirects
    pub fn remove(&self, id: PoolId) -> Option<Arc<ManagedPool>> {
        let mut inner = self.inner.lock();
        let current = inner.resolve_id(id)?;
        let pool = inner.pools.remove(&current)?;

        if inner.names.get(pool.name()) == Some(&current) {
            inner.names.remove(pool.name());
        }
        inner.redirects.retain(|_, target| *target != current);
        Some(pool)
    }

    /// Published pools, sorted by name
    pub fn list(&self) -> Vec<Arc<ManagedPool>> {
        let inner = self.inner.lock();
        let mut pools: Vec<Arc<ManagedPool>> = inner
            .pools
            .iter()
            .filter(|(id, _)| !inner.staged.contains(id))
            .map(|(_, pool)| Arc::clone(pool))
            .collect();
        pools.sort_by(|a, b| a.name().cmp(b.name()));
        pools
    }

    /// Number of published pools
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.pools.len() - inner.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every pool, retiring ones included, returning them
    pub fn drain(&self) -> Vec<Arc<ManagedPool>> {
        let mut inner = self.inner.lock();
        inner.names.clear();
        inner.staged.clear();
        inner.redirects.clear();
        let mut pools: Vec<Arc<ManagedPool>> = inner.pools.drain().map(|(_, pool)| pool).collect();
        pools.extend(inner.retiring.drain().map(|(_, pool)| pool));
        pools
    }
}

/// Maps every logical task id to the pool that owns it
#[derive(Debug, Default)]
pub struct TaskRegistry {
    owners: DashMap<TaskId, PoolId>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task: TaskId, pool: PoolId) {
        self.owners.insert(task, pool);
    }

    pub fn owner(&self, task: TaskId) -> Option<PoolId> {
        self.owners.get(&task).map(|entry| *entry)
    }

    /// Point a known task at a new owner. Returns false for unknown tasks.
    pub fn remap(&self, task: TaskId, pool: PoolId) -> bool {
        match self.owners.get_mut(&task) {
            Some(mut owner) => {
                *owner = pool;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, task: TaskId) -> Option<PoolId> {
        self.owners.remove(&task).map(|(_, pool)| pool)
    }

    /// Drop every task owned by `pool`, returning how many were removed
    pub fn remove_pool(&self, pool: PoolId) -> usize {
        let before = self.owners.len();
        self.owners.retain(|_, owner| *owner != pool);
        before - self.owners.len()
    }

    /// Task ids currently owned by `pool`
    pub fn tasks_of(&self, pool: PoolId) -> Vec<TaskId> {
        self.owners
            .iter()
            .filter(|entry| *entry.value() == pool)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn clear(&self) {
        self.owners.clear();
    }
}
