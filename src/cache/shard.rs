//! Shard Store Module
//!
//! Per-shard entry table with shard-local LRU order and incrementally
//! maintained size/memory counters. A shard never recomputes its
//! counters by scanning; every mutation adjusts them in place so the
//! hot path stays O(1).

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde_json::Value;

use crate::cache::entry::CacheEntry;
use crate::cache::lru::LruTracker;

// == Get Outcome ==
/// Result of a locked shard read.
#[derive(Debug)]
pub enum GetOutcome {
    /// Entry present and valid; value cloned out, LRU promoted.
    Hit(Value),
    /// Entry was present but expired; removed in line.
    ExpiredRemoved { size_bytes: usize },
    /// No entry for the key.
    Miss,
}

// == Entry State ==
/// What a key currently holds, without mutating anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Live,
    Expired,
    Absent,
}

// == Shard Store ==
/// The mutable interior of one shard.
#[derive(Debug, Default)]
pub struct ShardStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Shard-local LRU order
    lru: LruTracker,
    /// Estimated bytes held by this shard
    memory_bytes: usize,
}

impl ShardStore {
    // == Get ==
    /// Returns the current value for `key`, promoting it to
    /// most-recently-used; expired entries encountered in line are
    /// removed.
    pub fn get(&mut self, key: &str, now_ms: u64, stamp: u64) -> GetOutcome {
        let expired = match self.entries.get(key) {
            None => return GetOutcome::Miss,
            Some(entry) => entry.is_expired_at(now_ms),
        };
        if expired {
            return match self.remove(key) {
                Some(removed) => GetOutcome::ExpiredRemoved {
                    size_bytes: removed.size_bytes,
                },
                None => GetOutcome::Miss,
            };
        }
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed_at = now_ms;
                let value = entry.value.clone();
                self.lru.touch(key, stamp);
                GetOutcome::Hit(value)
            }
            None => GetOutcome::Miss,
        }
    }

    // == Peek ==
    /// Lock-free-path read: clones a consistent snapshot of the value if
    /// the entry exists and passes its own expiry check. Never mutates.
    pub fn peek(&self, key: &str, now_ms: u64) -> Option<(Value, u64)> {
        let entry = self.entries.get(key)?;
        if entry.is_expired_at(now_ms) {
            return None;
        }
        Some((entry.value.clone(), entry.seq))
    }

    /// Classifies a key without touching it.
    pub fn state(&self, key: &str, now_ms: u64) -> EntryState {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired_at(now_ms) => EntryState::Expired,
            Some(_) => EntryState::Live,
            None => EntryState::Absent,
        }
    }

    /// Clones the raw entry under a key, expired or not. Used to capture
    /// prior state for transaction rollback.
    pub fn entry_clone(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).cloned()
    }

    /// Promotes a key after an optimistic read, but only if the entry the
    /// reader saw (identified by its sequence number) is still in place.
    pub fn promote_if_current(&mut self, key: &str, seq: u64, now_ms: u64, stamp: u64) {
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.seq == seq {
                entry.last_accessed_at = now_ms;
                self.lru.touch(key, stamp);
            }
        }
    }

    // == Put ==
    /// Inserts or overwrites an entry and returns the prior one, if any.
    pub fn put(&mut self, key: String, entry: CacheEntry, stamp: u64) -> Option<CacheEntry> {
        self.memory_bytes += entry.size_bytes;
        self.lru.touch(&key, stamp);
        let prior = self.entries.insert(key, entry);
        if let Some(ref old) = prior {
            self.memory_bytes -= old.size_bytes;
        }
        prior
    }

    // == Remove ==
    /// Removes an entry, returning it if anything was deleted.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.lru.remove(key);
        self.memory_bytes -= removed.size_bytes;
        Some(removed)
    }

    // == Sweep Support ==
    /// Keys whose entries are expired as of `now_ms`.
    pub fn expired_keys(&self, now_ms: u64) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now_ms))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Oldest (LRU) key with its recency stamp.
    pub fn peek_oldest(&self) -> Option<(u64, &str)> {
        self.lru.peek_oldest()
    }

    /// Oldest key not in `skip`, for eviction victim selection.
    pub fn oldest_excluding<'a>(&'a self, skip: &HashSet<String>) -> Option<(u64, &'a str)> {
        self.lru.oldest_excluding(skip)
    }

    // == Bulk Access ==
    /// Non-expired keys currently stored.
    pub fn live_keys(&self, now_ms: u64) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now_ms))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Clones out every entry, for snapshotting.
    pub fn dump(&self) -> Vec<(String, CacheEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Removes everything, returning (entry count, bytes) released.
    pub fn clear(&mut self) -> (usize, usize) {
        let count = self.entries.len();
        let bytes = self.memory_bytes;
        self.entries.clear();
        self.lru.clear();
        self.memory_bytes = 0;
        (count, bytes)
    }

    // == Counters ==
    /// Current number of entries in the shard.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated bytes held by this shard.
    pub fn memory_bytes(&self) -> usize {
        self.memory_bytes
    }
}

// == Shard ==
/// One shard: an id plus its interior table behind a short-critical-
/// section lock. Async-level ordering (key locks, structural drain) is
/// the lock manager's job; this lock only guards table integrity and is
/// never held across an await.
#[derive(Debug)]
pub struct Shard {
    id: usize,
    store: RwLock<ShardStore>,
}

impl Shard {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            store: RwLock::new(ShardStore::default()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn store(&self) -> &RwLock<ShardStore> {
        &self.store
    }
}
