//! Cache Module
//!
//! Sharded in-memory caching with TTL expiration, LRU eviction, and
//! hierarchical locking. The [`ShardedCache`] façade is the only type
//! collaborators are expected to touch.

mod entry;
mod lock;
mod lru;
mod ring;
mod shard;
mod stats;
mod store;
mod validate;


// Re-export public types
pub use entry::{current_timestamp_ms, estimate_entry_size, CacheEntry};
pub use lock::{KeyGuard, KeyLockRegistry, PointGuard, ShardLockManager};
pub use lru::LruTracker;
pub use ring::ConsistentHashRing;
pub use shard::{EntryState, GetOutcome, Shard, ShardStore};
pub use stats::{MetricsCollector, MetricsSnapshot, RejectReason};
pub use store::ShardedCache;
pub use validate::Validator;

pub(crate) use store::CacheInner;

// == Public Constants ==
/// Maximum allowed key length in characters
pub const MAX_KEY_LENGTH: usize = 1000;

/// Key length ceiling under the paranoia profile
pub const PARANOID_MAX_KEY_LENGTH: usize = 512;

/// Maximum allowed TTL in seconds (one year)
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// TTL ceiling under the paranoia profile (seven days)
pub const PARANOID_MAX_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Item-count bound under the paranoia profile
pub const PARANOID_MAX_ITEMS: usize = 10_000;

/// Memory bound under the paranoia profile
pub const PARANOID_MAX_MEMORY_BYTES: usize = 10 * 1024 * 1024;

/// Single-entry ceiling under the paranoia profile
pub const PARANOID_MAX_ENTRY_BYTES: usize = 256 * 1024;

/// Fixed per-entry bookkeeping overhead added to every size estimate.
/// Deliberately generous so the estimator over-counts, never under-counts.
pub const ENTRY_OVERHEAD_BYTES: usize = 128;
