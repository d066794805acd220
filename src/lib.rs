//! Shardcache - a sharded in-process TTL cache engine
//!
//! Provides an in-memory cache with consistent-hash sharding,
//! hierarchical locking, LRU capacity enforcement, write-ahead-log
//! durability, transactional rollback, and snapshot/restore.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;
pub mod txn;
pub mod wal;

pub use cache::{CacheEntry, ConsistentHashRing, MetricsSnapshot, ShardedCache};
pub use config::{CacheConfig, WalConfig};
pub use error::{CacheError, Result};
pub use txn::{AppliedTransaction, TxnOp};
