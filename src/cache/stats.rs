//! Cache Statistics Module
//!
//! Tracks cache performance metrics: monotonic counters for operations
//! and evictions, rejection counts by reason, and point-in-time gauges.
//! Rates are derived when a snapshot is read, never stored.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Reject Reason ==
/// Why an admission check turned an operation away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Key,
    Value,
    Ttl,
}

// == Metrics Collector ==
/// Lock-free counter block shared by every shard and the sweep loop.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    expired_evictions: AtomicU64,
    capacity_evictions: AtomicU64,
    sweep_cycles: AtomicU64,
    rejected_keys: AtomicU64,
    rejected_values: AtomicU64,
    rejected_ttls: AtomicU64,
    lock_timeouts: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    // == Recorders ==
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired_eviction(&self, count: u64) {
        self.expired_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_capacity_eviction(&self) {
        self.capacity_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep_cycle(&self) {
        self.sweep_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::Key => &self.rejected_keys,
            RejectReason::Value => &self.rejected_values,
            RejectReason::Ttl => &self.rejected_ttls,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Captures the counters together with caller-supplied gauges.
    pub fn snapshot(
        &self,
        total_items: usize,
        memory_bytes: usize,
        per_shard_items: Vec<usize>,
    ) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        MetricsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            expired_evictions: self.expired_evictions.load(Ordering::Relaxed),
            capacity_evictions: self.capacity_evictions.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            rejected_keys: self.rejected_keys.load(Ordering::Relaxed),
            rejected_values: self.rejected_values.load(Ordering::Relaxed),
            rejected_ttls: self.rejected_ttls.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            total_items,
            memory_bytes,
            per_shard_items,
            hit_rate: hit_rate(hits, misses),
        }
    }
}

/// hits / (hits + misses), or 0.0 before any request.
fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Metrics Snapshot ==
/// Point-in-time view of cache performance.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Entries removed because their TTL elapsed
    pub expired_evictions: u64,
    /// Entries removed to satisfy the item/memory bounds
    pub capacity_evictions: u64,
    /// Completed background sweep cycles
    pub sweep_cycles: u64,
    pub rejected_keys: u64,
    pub rejected_values: u64,
    pub rejected_ttls: u64,
    pub lock_timeouts: u64,
    /// Current number of entries across all shards
    pub total_items: usize,
    /// Current estimated memory across all shards
    pub memory_bytes: usize,
    /// Entry count per shard, indexed by shard id
    pub per_shard_items: Vec<usize>,
    /// Derived on read, never stored
    pub hit_rate: f64,
}
