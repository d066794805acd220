//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for cache eviction.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks access order for LRU eviction.
///
/// Each touch records a caller-supplied stamp from a monotonically
/// increasing clock, so recency comparisons stay valid across shards
/// sharing one clock. Stamps are unique, which makes eviction order
/// strict: entries touched at the "same time" cannot exist, and entries
/// never touched after insert fall back to insertion order.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Key -> most recent stamp
    stamps: HashMap<String, u64>,
    /// Stamp -> key, ordered oldest first
    order: BTreeMap<u64, String>,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as used at the given stamp.
    ///
    /// The stamp must come from a monotonic counter; reusing a stamp for
    /// a different key would overwrite its slot in the order index.
    pub fn touch(&mut self, key: &str, stamp: u64) {
        if let Some(old) = self.stamps.insert(key.to_string(), stamp) {
            self.order.remove(&old);
        }
        self.order.insert(stamp, key.to_string());
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if the tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (&stamp, _) = self.order.iter().next()?;
        let key = self.order.remove(&stamp)?;
        self.stamps.remove(&key);
        Some(key)
    }

    // == Peek Oldest ==
    /// Returns the least recently used key and its stamp without removing it.
    pub fn peek_oldest(&self) -> Option<(u64, &str)> {
        self.order
            .iter()
            .next()
            .map(|(&stamp, key)| (stamp, key.as_str()))
    }

    /// Returns the oldest key not present in `skip`, with its stamp.
    ///
    /// Used by bound enforcement to walk past victims that are pinned or
    /// currently contended.
    pub fn oldest_excluding<'a>(
        &'a self,
        skip: &std::collections::HashSet<String>,
    ) -> Option<(u64, &'a str)> {
        self.order
            .iter()
            .find(|(_, key)| !skip.contains(key.as_str()))
            .map(|(&stamp, key)| (stamp, key.as_str()))
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // == Contains ==
    /// Checks if a key is being tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.stamps.contains_key(key)
    }

    /// Drops all tracked keys.
    pub fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }
}
