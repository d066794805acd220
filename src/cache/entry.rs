//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support
//! and admission-time size estimation.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::ENTRY_OVERHEAD_BYTES;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// The stored value, already proven serializable at admission
    pub value: Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
    /// Last access timestamp (Unix milliseconds)
    pub last_accessed_at: u64,
    /// Estimated footprint in bytes, biased upward
    pub size_bytes: usize,
    /// Engine sequence number assigned at admission
    pub seq: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry with optional TTL.
    ///
    /// `size_bytes` is the admission-time estimate produced by
    /// [`estimate_entry_size`]; it is never recomputed afterwards.
    pub fn new(value: Value, ttl_seconds: Option<u64>, size_bytes: usize, seq: u64) -> Self {
        let now = current_timestamp_ms();
        Self::with_timestamps(value, now, ttl_seconds, size_bytes, seq)
    }

    /// Creates an entry anchored at an explicit creation time.
    ///
    /// Used by WAL replay so a re-applied SET keeps its original absolute
    /// expiry instead of gaining a fresh lifetime.
    pub fn with_timestamps(
        value: Value,
        created_at: u64,
        ttl_seconds: Option<u64>,
        size_bytes: usize,
        seq: u64,
    ) -> Self {
        let expires_at = ttl_seconds.map(|ttl| created_at + ttl.saturating_mul(1000));
        Self {
            value,
            created_at,
            expires_at,
            last_accessed_at: created_at,
            size_bytes,
            seq,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// Boundary condition: an entry is expired when the current time is
    /// greater than or equal to the expiration time, so a TTL of zero is
    /// expired on the very next access.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Checks expiry against a caller-supplied clock reading.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at.map(|expires| {
            let now = current_timestamp_ms();
            expires.saturating_sub(now)
        })
    }

    /// Remaining TTL in whole seconds, or None if the entry never expires.
    pub fn ttl_remaining(&self) -> Option<u64> {
        self.ttl_remaining_ms().map(|ms| ms / 1000)
    }

    /// Marks the entry as accessed now.
    pub fn touch(&mut self) {
        self.last_accessed_at = current_timestamp_ms();
    }
}

// == Size Estimation ==
/// Estimates the memory footprint of an entry at admission time.
///
/// The estimate is the key length plus the serialized value length plus a
/// fixed bookkeeping overhead. The overhead constant over-counts small
/// entries on purpose: the bound enforcer must never believe the cache is
/// smaller than it really is.
pub fn estimate_entry_size(key: &str, serialized_value_len: usize) -> usize {
    key.len() + serialized_value_len + ENTRY_OVERHEAD_BYTES
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(ttl: Option<u64>) -> CacheEntry {
        CacheEntry::new(json!("test_value"), ttl, 64, 1)
    }

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = entry(None);
        assert_eq!(entry.value, json!("test_value"));
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_creation_with_ttl() {
        let entry = entry(Some(60));
        assert!(entry.expires_at.is_some());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_zero_ttl_expires_on_next_access() {
        // Pinned behavior: ttl=0 is admitted and expired immediately.
        let entry = entry(Some(0));
        assert!(entry.is_expired());
        assert_eq!(entry.ttl_remaining_ms(), Some(0));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = current_timestamp_ms();
        let entry = CacheEntry {
            value: json!("test"),
            created_at: now,
            expires_at: Some(now),
            last_accessed_at: now,
            size_bytes: 0,
            seq: 0,
        };
        assert!(entry.is_expired(), "Entry should be expired at boundary");
    }

    #[test]
    fn test_is_expired_at_explicit_clock() {
        let entry = CacheEntry::with_timestamps(json!(1), 1_000, Some(10), 32, 7);
        assert_eq!(entry.expires_at, Some(11_000));
        assert!(!entry.is_expired_at(10_999));
        assert!(entry.is_expired_at(11_000));
    }

    #[test]
    fn test_ttl_remaining_seconds() {
        let entry = entry(Some(10));
        let remaining = entry.ttl_remaining().unwrap();
        assert!(remaining <= 10);
        assert!(remaining >= 9);
    }

    #[test]
    fn test_ttl_remaining_no_expiration() {
        let entry = entry(None);
        assert!(entry.ttl_remaining().is_none());
        assert!(entry.ttl_remaining_ms().is_none());
    }

    #[test]
    fn test_replay_anchoring_preserves_absolute_expiry() {
        // A record written long ago must come back already expired.
        let entry = CacheEntry::with_timestamps(json!("old"), 1_000, Some(1), 32, 3);
        assert!(entry.is_expired());
    }

    #[test]
    fn test_size_estimate_overhead() {
        let estimate = estimate_entry_size("key", 100);
        assert_eq!(estimate, 3 + 100 + ENTRY_OVERHEAD_BYTES);
        // Even an empty entry costs something.
        assert!(estimate_entry_size("", 0) > 0);
    }

    #[test]
    fn test_touch_updates_access_time() {
        let mut entry = CacheEntry::with_timestamps(json!(1), 1_000, None, 32, 1);
        assert_eq!(entry.last_accessed_at, 1_000);
        entry.touch();
        assert!(entry.last_accessed_at > 1_000);
    }
}
