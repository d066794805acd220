//! Hierarchical Lock Manager Module
//!
//! Two lock levels per shard: a structural lock for iteration, eviction,
//! and snapshot work, and an on-demand registry of per-key locks for
//! point operations. Point operations hold the structural lock in shared
//! mode, so a structural (exclusive) acquisition naturally waits for all
//! in-flight per-key sections to drain.
//!
//! Per-key locks are reference counted and dropped at zero holders so the
//! registry cannot grow without bound under key churn. The count is only
//! ever changed under the registry mutex, which closes the race between a
//! last-holder release and a new waiter arriving: the waiter either finds
//! the live slot or creates a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{
    Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use tokio::time::timeout;

use crate::error::{CacheError, Result};

// == Key Lock Registry ==
/// Slot for one key's lock plus its holder/waiter count.
struct KeyLockSlot {
    lock: Arc<Mutex<()>>,
    refs: usize,
}

/// Reference-counted pool of per-key locks for a single shard.
pub struct KeyLockRegistry {
    slots: parking_lot::Mutex<HashMap<String, KeyLockSlot>>,
}

impl KeyLockRegistry {
    fn new() -> Self {
        Self {
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Fetches (or creates) the lock for `key` and counts the caller in.
    fn checkout(&self, key: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_insert_with(|| KeyLockSlot {
            lock: Arc::new(Mutex::new(())),
            refs: 0,
        });
        slot.refs += 1;
        Arc::clone(&slot.lock)
    }

    /// Counts the caller out, dropping the slot at zero holders.
    fn release(&self, key: &str) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                slots.remove(key);
            }
        }
    }

    /// Number of live key locks (holders or waiters present).
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == Key Guard ==
/// Exclusive hold on one key, released (and possibly garbage collected)
/// on drop.
pub struct KeyGuard {
    key: String,
    registry: Arc<KeyLockRegistry>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release the mutex before the refcount so a queued waiter can
        // take over the same slot.
        self.guard.take();
        self.registry.release(&self.key);
    }
}

// == Point Guard ==
/// Combined hold for a point operation: shared structural access plus the
/// key's exclusive lock.
pub struct PointGuard {
    _structural: OwnedRwLockReadGuard<()>,
    _key: KeyGuard,
}

impl std::fmt::Debug for PointGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointGuard").finish()
    }
}

// == Shard Lock Manager ==
struct ShardLocks {
    structural: Arc<RwLock<()>>,
    keys: Arc<KeyLockRegistry>,
}

/// Manages hierarchical locking across all shards.
pub struct ShardLockManager {
    shards: Vec<ShardLocks>,
    acquire_timeout: Duration,
}

impl ShardLockManager {
    // == Constructor ==
    /// Creates lock state for `shard_count` shards.
    ///
    /// Every acquisition honors `acquire_timeout`; a contended lock
    /// surfaces as [`CacheError::LockTimeout`], never an indefinite hang.
    pub fn new(shard_count: usize, acquire_timeout: Duration) -> Self {
        let shards = (0..shard_count)
            .map(|_| ShardLocks {
                structural: Arc::new(RwLock::new(())),
                keys: Arc::new(KeyLockRegistry::new()),
            })
            .collect();
        Self {
            shards,
            acquire_timeout,
        }
    }

    // == Point Section ==
    /// Enters a point-operation section: shared structural + key lock.
    ///
    /// Operations on the same key are totally ordered by the key lock's
    /// FIFO queue; operations on different keys in the same shard run
    /// concurrently.
    pub async fn point_section(&self, shard_id: usize, key: &str) -> Result<PointGuard> {
        let structural = timeout(
            self.acquire_timeout,
            Arc::clone(&self.shards[shard_id].structural).read_owned(),
        )
        .await
        .map_err(|_| {
            CacheError::LockTimeout(format!("shard {} structural (shared)", shard_id))
        })?;

        let key_guard = self.lock_key(shard_id, key).await?;

        Ok(PointGuard {
            _structural: structural,
            _key: key_guard,
        })
    }

    // == Key Lock ==
    /// Acquires just the per-key lock (no structural hold).
    pub async fn lock_key(&self, shard_id: usize, key: &str) -> Result<KeyGuard> {
        let registry = Arc::clone(&self.shards[shard_id].keys);
        let slot = registry.checkout(key);

        match timeout(self.acquire_timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(KeyGuard {
                key: key.to_string(),
                registry,
                guard: Some(guard),
            }),
            Err(_) => {
                registry.release(key);
                Err(CacheError::LockTimeout(format!(
                    "key '{}' in shard {}",
                    key, shard_id
                )))
            }
        }
    }

    /// Non-blocking key lock attempt, used when picking eviction victims.
    pub fn try_lock_key(&self, shard_id: usize, key: &str) -> Option<KeyGuard> {
        let registry = Arc::clone(&self.shards[shard_id].keys);
        let slot = registry.checkout(key);

        match slot.try_lock_owned() {
            Ok(guard) => Some(KeyGuard {
                key: key.to_string(),
                registry,
                guard: Some(guard),
            }),
            Err(_) => {
                registry.release(key);
                None
            }
        }
    }

    // == Structural Section ==
    /// Enters an exclusive structural section, draining in-flight point
    /// operations on the shard first.
    pub async fn structural_section(
        &self,
        shard_id: usize,
    ) -> Result<OwnedRwLockWriteGuard<()>> {
        timeout(
            self.acquire_timeout,
            Arc::clone(&self.shards[shard_id].structural).write_owned(),
        )
        .await
        .map_err(|_| {
            CacheError::LockTimeout(format!("shard {} structural (exclusive)", shard_id))
        })
    }

    /// Non-blocking shared structural attempt, used for cross-shard
    /// eviction so two point operations can never wait on each other's
    /// shards in a cycle.
    pub fn try_structural_read(&self, shard_id: usize) -> Option<OwnedRwLockReadGuard<()>> {
        Arc::clone(&self.shards[shard_id].structural)
            .try_read_owned()
            .ok()
    }

    /// Number of live key locks in one shard's registry.
    pub fn key_lock_count(&self, shard_id: usize) -> usize {
        self.shards[shard_id].keys.len()
    }

    /// Number of shards managed.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}
