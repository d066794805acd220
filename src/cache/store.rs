//! Cache Store Module
//!
//! The `ShardedCache` façade: validates, journals, routes, locks, and
//! mutates. Control flow for a write is validate -> WAL append (flushed
//! before acknowledgment) -> route via the hash ring -> key lock ->
//! shard mutation -> metrics; a background sweeper independently walks
//! the shards for expiry and bound enforcement.
//!
//! The cache is an explicit owned object: construct it where your
//! dependency wiring lives and hand it out. There is no hidden
//! module-level instance.
//!
//! Cancellation: a `get` future may be dropped at any point. `set` and
//! `delete` futures should be driven to completion; once the WAL append
//! returns, state application happens without an intervening await, so a
//! completed append is never left unapplied by cancellation within one
//! call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::entry::{current_timestamp_ms, estimate_entry_size, CacheEntry};
use crate::cache::lock::{PointGuard, ShardLockManager};
use crate::cache::ring::ConsistentHashRing;
use crate::cache::shard::{EntryState, GetOutcome, Shard};
use crate::cache::stats::{MetricsCollector, MetricsSnapshot, RejectReason};
use crate::cache::validate::Validator;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_sweeper, SweeperHandle};
use crate::txn::SnapshotBlob;
use crate::wal::{ReplayOutcome, WalOp, WriteAheadLog};

// == Sharded Cache ==
/// The cache engine façade.
pub struct ShardedCache {
    pub(crate) inner: Arc<CacheInner>,
    sweeper: parking_lot::Mutex<Option<SweeperHandle>>,
}

/// Shared engine state behind the façade.
pub(crate) struct CacheInner {
    pub(crate) config: CacheConfig,
    ring: ConsistentHashRing,
    pub(crate) locks: ShardLockManager,
    pub(crate) shards: Vec<Shard>,
    pub(crate) wal: Option<WriteAheadLog>,
    pub(crate) metrics: MetricsCollector,
    pub(crate) validator: Validator,
    /// Entries across all shards; incremental, never recomputed by scan
    item_count: AtomicUsize,
    /// Estimated bytes across all shards
    memory_bytes: AtomicUsize,
    /// Shared recency clock; unique stamps make LRU order strict and
    /// comparable across shards
    lru_clock: AtomicU64,
    /// Entry sequence source when the WAL (and its numbering) is off
    entry_seq: AtomicU64,
    shutdown: AtomicBool,
}

impl ShardedCache {
    // == Constructor ==
    /// Builds the engine from configuration, replays any retained WAL
    /// segments against the empty store, and starts the sweeper.
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let config = config.normalized()?;
        let ring = ConsistentHashRing::build(config.shard_count, config.vnodes_per_shard)?;
        let locks = ShardLockManager::new(config.shard_count, config.lock_timeout);
        let shards = (0..config.shard_count).map(Shard::new).collect();
        let validator = Validator::new(&config);

        let (wal, replay) = if config.wal.enabled {
            let (wal, replay) = WriteAheadLog::open(&config.wal).await?;
            (Some(wal), Some(replay))
        } else {
            (None, None)
        };

        let inner = Arc::new(CacheInner {
            config,
            ring,
            locks,
            shards,
            wal,
            metrics: MetricsCollector::new(),
            validator,
            item_count: AtomicUsize::new(0),
            memory_bytes: AtomicUsize::new(0),
            lru_clock: AtomicU64::new(0),
            entry_seq: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        });

        if let Some(replay) = replay {
            inner.apply_replay(replay);
        }

        let sweeper = spawn_sweeper(Arc::clone(&inner), inner.config.sweep_interval);
        info!(
            shards = inner.config.shard_count,
            wal = inner.config.wal.enabled,
            paranoia = inner.config.paranoia,
            "cache engine started"
        );

        Ok(Self {
            inner,
            sweeper: parking_lot::Mutex::new(Some(sweeper)),
        })
    }

    // == Get ==
    /// Retrieves a value by key, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.ensure_running()?;
        self.inner.get(key).await
    }

    // == Set ==
    /// Stores a key-value pair with optional TTL, acknowledging only
    /// after the durability contract is satisfied.
    ///
    /// The value must satisfy `Serialize`; that capability is checked
    /// here, once, and an unserializable value is rejected before any
    /// state or journal is touched.
    pub async fn set<V: Serialize>(&self, key: &str, value: V, ttl: Option<u64>) -> Result<()> {
        self.inner.ensure_running()?;

        if let Err(e) = self.inner.validator.validate_key(key) {
            self.inner.metrics.record_rejection(RejectReason::Key);
            return Err(e);
        }
        let ttl = match self.inner.validator.effective_ttl(ttl) {
            Ok(ttl) => ttl,
            Err(e) => {
                self.inner.metrics.record_rejection(RejectReason::Ttl);
                return Err(e);
            }
        };
        let (value, serialized_len) = match self.inner.validator.admit_value(value) {
            Ok(admitted) => admitted,
            Err(e) => {
                self.inner.metrics.record_rejection(RejectReason::Value);
                return Err(e);
            }
        };

        let shard_id = self.inner.route(key);
        let _guard = self.inner.point_section(shard_id, key).await?;
        self.inner
            .set_with_guard(shard_id, key, value, serialized_len, ttl)
            .await?;
        self.inner
            .enforce_bounds_online(Some(shard_id), Some(key))
            .await;
        Ok(())
    }

    // == Delete ==
    /// Removes an entry; returns whether a live entry was deleted.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.ensure_running()?;
        let shard_id = self.inner.route(key);
        let _guard = self.inner.point_section(shard_id, key).await?;
        self.inner.delete_with_guard(shard_id, key).await
    }

    // == Clear ==
    /// Removes every entry, one shard at a time.
    pub async fn clear(&self) -> Result<()> {
        self.inner.ensure_running()?;
        self.inner.clear().await
    }

    // == Size ==
    /// Current number of entries across all shards.
    pub fn size(&self) -> usize {
        self.inner.item_count.load(Ordering::Relaxed)
    }

    // == Stats ==
    /// Point-in-time metrics snapshot; rates are derived here, not stored.
    pub fn stats(&self) -> MetricsSnapshot {
        self.inner.stats()
    }

    // == Keys ==
    /// All non-expired keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        let now = current_timestamp_ms();
        let mut keys = Vec::new();
        for shard in &self.inner.shards {
            keys.extend(shard.store().read().live_keys(now));
        }
        keys
    }

    // == Snapshot ==
    /// Serializes a point-in-time dump of all entries plus the current
    /// WAL sequence. Shard locks are taken one at a time, never all at
    /// once.
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        self.inner.ensure_running()?;
        let mut entries = Vec::new();
        for shard in &self.inner.shards {
            let _section = self.inner.locks.structural_section(shard.id()).await?;
            entries.extend(shard.store().read().dump());
        }
        let wal_seq = self.inner.current_seq().await;
        SnapshotBlob::new(entries, wal_seq).encode()
    }

    // == Restore ==
    /// Replaces all cache contents with a snapshot and resets sequence
    /// bookkeeping. A blob with an unknown format or version is refused.
    pub async fn restore(&self, blob: &[u8]) -> Result<()> {
        self.inner.ensure_running()?;
        let snapshot = SnapshotBlob::decode(blob)?;
        self.inner.restore_from(snapshot).await
    }

    // == Shutdown ==
    /// Stops the sweeper, drains in-flight operations, and flushes the
    /// WAL. Further operations are rejected. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let sweeper = { self.sweeper.lock().take() };
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        for shard in &self.inner.shards {
            let _drained = self.inner.locks.structural_section(shard.id()).await?;
        }
        if let Some(wal) = &self.inner.wal {
            wal.sync().await?;
        }
        info!("cache engine shut down");
        Ok(())
    }
}

impl CacheInner {
    // == Guards ==
    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(CacheError::Internal("cache is shut down".to_string()));
        }
        Ok(())
    }

    pub(crate) fn route(&self, key: &str) -> usize {
        self.ring.route(key)
    }

    /// Point-section acquisition with lock-timeout accounting.
    pub(crate) async fn point_section(&self, shard_id: usize, key: &str) -> Result<PointGuard> {
        match self.locks.point_section(shard_id, key).await {
            Ok(guard) => Ok(guard),
            Err(e) => {
                if matches!(e, CacheError::LockTimeout(_)) {
                    self.metrics.record_lock_timeout();
                }
                Err(e)
            }
        }
    }

    fn next_stamp(&self) -> u64 {
        self.lru_clock.fetch_add(1, Ordering::Relaxed)
    }

    // == Get Path ==
    pub(crate) async fn get(&self, key: &str) -> Result<Option<Value>> {
        let shard_id = self.route(key);
        let now = current_timestamp_ms();

        // Optimistic path: a consistent snapshot of a non-expired entry
        // can be returned without touching the async lock hierarchy. The
        // promotion afterwards only lands if the same entry is still in
        // place.
        let peeked = self.shards[shard_id].store().read().peek(key, now);
        if let Some((value, seq)) = peeked {
            let stamp = self.next_stamp();
            self.shards[shard_id]
                .store()
                .write()
                .promote_if_current(key, seq, now, stamp);
            self.metrics.record_hit();
            return Ok(Some(value));
        }

        // Locked fallback: resolves miss vs. expired and removes expired
        // entries in line.
        let _guard = self.point_section(shard_id, key).await?;
        let stamp = self.next_stamp();
        let outcome =
            self.shards[shard_id]
                .store()
                .write()
                .get(key, current_timestamp_ms(), stamp);
        match outcome {
            GetOutcome::Hit(value) => {
                self.metrics.record_hit();
                Ok(Some(value))
            }
            GetOutcome::ExpiredRemoved { size_bytes } => {
                self.apply_remove_delta(size_bytes);
                self.metrics.record_expired_eviction(1);
                self.metrics.record_miss();
                Ok(None)
            }
            GetOutcome::Miss => {
                self.metrics.record_miss();
                Ok(None)
            }
        }
    }

    // == Set Path ==
    /// Applies a validated SET. Caller holds the point section.
    pub(crate) async fn set_with_guard(
        &self,
        shard_id: usize,
        key: &str,
        value: Value,
        serialized_len: usize,
        ttl: Option<u64>,
    ) -> Result<()> {
        let size_bytes = estimate_entry_size(key, serialized_len);
        if size_bytes > self.config.max_memory_bytes {
            return Err(CacheError::Capacity(format!(
                "entry of {} bytes can never fit within the {}-byte memory bound",
                size_bytes, self.config.max_memory_bytes
            )));
        }

        let seq = match &self.wal {
            Some(wal) => wal.append_set(key, value.clone(), ttl).await?,
            None => self.entry_seq.fetch_add(1, Ordering::Relaxed),
        };

        // No await between the acknowledged append and the application
        // below.
        let entry = CacheEntry::new(value, ttl, size_bytes, seq);
        let stamp = self.next_stamp();
        let prior = self.shards[shard_id]
            .store()
            .write()
            .put(key.to_string(), entry, stamp);
        self.apply_put_delta(prior.map(|p| p.size_bytes), size_bytes);
        self.metrics.record_set();
        Ok(())
    }

    /// Re-inserts a previously captured entry verbatim (rollback path).
    pub(crate) async fn reinstate_with_guard(
        &self,
        shard_id: usize,
        key: &str,
        entry: CacheEntry,
    ) -> Result<()> {
        if let Some(wal) = &self.wal {
            let remaining_ttl = entry
                .ttl_remaining_ms()
                .map(|ms| ms.div_ceil(1000));
            wal.append_set(key, entry.value.clone(), remaining_ttl).await?;
        }
        let size_bytes = entry.size_bytes;
        let stamp = self.next_stamp();
        let prior = self.shards[shard_id]
            .store()
            .write()
            .put(key.to_string(), entry, stamp);
        self.apply_put_delta(prior.map(|p| p.size_bytes), size_bytes);
        self.metrics.record_set();
        Ok(())
    }

    // == Delete Path ==
    /// Applies a DELETE. Caller holds the point section. An expired
    /// entry counts as absent for the caller but is still removed.
    pub(crate) async fn delete_with_guard(&self, shard_id: usize, key: &str) -> Result<bool> {
        let now = current_timestamp_ms();
        let state = self.shards[shard_id].store().read().state(key, now);
        match state {
            EntryState::Absent => Ok(false),
            EntryState::Expired => {
                if let Some(entry) = self.shards[shard_id].store().write().remove(key) {
                    self.apply_remove_delta(entry.size_bytes);
                    self.metrics.record_expired_eviction(1);
                }
                Ok(false)
            }
            EntryState::Live => {
                if let Some(wal) = &self.wal {
                    wal.append_delete(key).await?;
                }
                if let Some(entry) = self.shards[shard_id].store().write().remove(key) {
                    self.apply_remove_delta(entry.size_bytes);
                }
                self.metrics.record_delete();
                Ok(true)
            }
        }
    }

    /// Clones the raw entry under a key, expired or not.
    pub(crate) fn entry_clone(&self, shard_id: usize, key: &str) -> Option<CacheEntry> {
        self.shards[shard_id].store().read().entry_clone(key)
    }

    // == Clear ==
    pub(crate) async fn clear(&self) -> Result<()> {
        for shard in &self.shards {
            let _section = self.locks.structural_section(shard.id()).await?;
            let (count, bytes) = shard.store().write().clear();
            self.item_count.fetch_sub(count, Ordering::Relaxed);
            self.memory_bytes.fetch_sub(bytes, Ordering::Relaxed);
        }
        // The journal's history describes state that no longer exists;
        // replaying it after a clear would resurrect it.
        if let Some(wal) = &self.wal {
            wal.reset().await?;
        }
        info!("cache cleared");
        Ok(())
    }

    // == Stats ==
    pub(crate) fn stats(&self) -> MetricsSnapshot {
        let per_shard = self
            .shards
            .iter()
            .map(|shard| shard.store().read().len())
            .collect();
        self.metrics.snapshot(
            self.item_count.load(Ordering::Relaxed),
            self.memory_bytes.load(Ordering::Relaxed),
            per_shard,
        )
    }

    // == Counter Deltas ==
    fn apply_put_delta(&self, prior_size: Option<usize>, new_size: usize) {
        match prior_size {
            None => {
                self.item_count.fetch_add(1, Ordering::Relaxed);
                self.memory_bytes.fetch_add(new_size, Ordering::Relaxed);
            }
            Some(old) if new_size >= old => {
                self.memory_bytes.fetch_add(new_size - old, Ordering::Relaxed);
            }
            Some(old) => {
                self.memory_bytes.fetch_sub(old - new_size, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn apply_remove_delta(&self, size_bytes: usize) {
        self.item_count.fetch_sub(1, Ordering::Relaxed);
        self.memory_bytes.fetch_sub(size_bytes, Ordering::Relaxed);
    }

    fn over_bounds(&self) -> bool {
        self.item_count.load(Ordering::Relaxed) > self.config.max_items
            || self.memory_bytes.load(Ordering::Relaxed) > self.config.max_memory_bytes
    }

    // == Bound Enforcement ==
    /// Evicts strictly in LRU order until both bounds hold.
    ///
    /// Victims are taken with non-blocking acquisitions only: a key whose
    /// lock is contended is being actively used and is skipped, and a
    /// shard whose structural lock cannot be shared right now is left to
    /// the sweep. Waiting here could form a cycle with other in-flight
    /// point sections, so this path never waits.
    pub(crate) async fn enforce_bounds_online(
        &self,
        holding_shard: Option<usize>,
        protect: Option<&str>,
    ) {
        let mut skip: HashSet<String> = HashSet::new();
        if let Some(key) = protect {
            skip.insert(key.to_string());
        }

        while self.over_bounds() {
            let candidate = self.oldest_candidate(&skip);
            let Some((shard_id, key)) = candidate else {
                warn!("bounds exceeded but no evictable candidate; deferring to sweep");
                return;
            };
            if !self.try_evict(shard_id, &key, holding_shard) {
                skip.insert(key);
            }
        }
    }

    /// Globally least-recently-used key outside `skip`.
    fn oldest_candidate(&self, skip: &HashSet<String>) -> Option<(usize, String)> {
        let mut candidate: Option<(u64, usize, String)> = None;
        for shard in &self.shards {
            let store = shard.store().read();
            if let Some((stamp, key)) = store.oldest_excluding(skip) {
                let older = candidate
                    .as_ref()
                    .map(|(best, _, _)| stamp < *best)
                    .unwrap_or(true);
                if older {
                    candidate = Some((stamp, shard.id(), key.to_string()));
                }
            }
        }
        candidate.map(|(_, shard_id, key)| (shard_id, key))
    }

    /// Attempts to evict one key without blocking. Returns false when
    /// the victim is contended and should be skipped.
    fn try_evict(&self, shard_id: usize, key: &str, holding_shard: Option<usize>) -> bool {
        let _structural = if holding_shard != Some(shard_id) {
            match self.locks.try_structural_read(shard_id) {
                Some(guard) => Some(guard),
                None => return false,
            }
        } else {
            None
        };
        let Some(_key_guard) = self.locks.try_lock_key(shard_id, key) else {
            return false;
        };

        if let Some(entry) = self.shards[shard_id].store().write().remove(key) {
            self.apply_remove_delta(entry.size_bytes);
            self.metrics.record_capacity_eviction();
            debug!(shard = shard_id, key, "evicted LRU entry for capacity");
        }
        true
    }

    /// Single-threaded bound enforcement for replay and restore, where
    /// no other task can hold locks.
    fn enforce_bounds_exclusive(&self) {
        let skip = HashSet::new();
        while self.over_bounds() {
            let Some((shard_id, key)) = self.oldest_candidate(&skip) else {
                return;
            };
            if let Some(entry) = self.shards[shard_id].store().write().remove(&key) {
                self.apply_remove_delta(entry.size_bytes);
                self.metrics.record_capacity_eviction();
            }
        }
    }

    // == WAL Replay ==
    /// Applies scanned journal records against the empty store. This is
    /// the replay-only path: nothing here re-appends to the WAL, so
    /// applying the same segment twice converges to the same state.
    fn apply_replay(&self, replay: ReplayOutcome) {
        if replay.corrupt_records > 0 {
            warn!(
                corrupt = replay.corrupt_records,
                "rebuilt state is partial: corrupt WAL records were skipped"
            );
        }
        let mut last_seq = 0;
        for record in &replay.records {
            last_seq = last_seq.max(record.seq);
            match record.op {
                WalOp::Set => self.apply_wal_set(record),
                WalOp::Delete | WalOp::Expire => self.apply_wal_delete(record),
            }
        }
        self.entry_seq.store(last_seq + 1, Ordering::Relaxed);
        if !replay.records.is_empty() {
            info!(
                records = replay.records.len(),
                items = self.item_count.load(Ordering::Relaxed),
                "WAL replay complete"
            );
        }
    }

    /// Replay-only SET: anchored at the record's own timestamp so the
    /// entry keeps its original absolute expiry.
    pub(crate) fn apply_wal_set(&self, record: &crate::wal::WalRecord) {
        let value = record.value.clone().unwrap_or(Value::Null);
        let serialized_len = serde_json::to_string(&value)
            .map(|s| s.len())
            .unwrap_or(0);
        let size_bytes = estimate_entry_size(&record.key, serialized_len);
        let entry = CacheEntry::with_timestamps(
            value,
            record.timestamp_ms,
            record.ttl,
            size_bytes,
            record.seq,
        );

        let shard_id = self.route(&record.key);
        let stamp = self.next_stamp();
        let prior = self.shards[shard_id]
            .store()
            .write()
            .put(record.key.clone(), entry, stamp);
        self.apply_put_delta(prior.map(|p| p.size_bytes), size_bytes);
        self.metrics.record_set();
        self.enforce_bounds_exclusive();
    }

    /// Replay-only DELETE/EXPIRE: removing an absent key is a no-op,
    /// not an error.
    pub(crate) fn apply_wal_delete(&self, record: &crate::wal::WalRecord) {
        let shard_id = self.route(&record.key);
        let removed = self.shards[shard_id].store().write().remove(&record.key);
        if let Some(entry) = removed {
            self.apply_remove_delta(entry.size_bytes);
        }
        match record.op {
            WalOp::Expire => self.metrics.record_expired_eviction(1),
            _ => self.metrics.record_delete(),
        }
    }

    // == Restore ==
    pub(crate) async fn restore_from(&self, snapshot: SnapshotBlob) -> Result<()> {
        // Empty out every shard first, one structural section at a time.
        for shard in &self.shards {
            let _section = self.locks.structural_section(shard.id()).await?;
            let (count, bytes) = shard.store().write().clear();
            self.item_count.fetch_sub(count, Ordering::Relaxed);
            self.memory_bytes.fetch_sub(bytes, Ordering::Relaxed);
        }

        let now = current_timestamp_ms();
        let mut restored = 0usize;
        let mut skipped_expired = 0usize;
        let mut relogged = Vec::new();
        for item in snapshot.entries {
            if item.entry.is_expired_at(now) {
                skipped_expired += 1;
                continue;
            }
            let shard_id = self.route(&item.key);
            let stamp = self.next_stamp();
            let size_bytes = item.entry.size_bytes;
            if self.wal.is_some() {
                let remaining_ttl = item.entry.ttl_remaining_ms().map(|ms| ms.div_ceil(1000));
                relogged.push((item.key.clone(), item.entry.value.clone(), remaining_ttl));
            }
            let prior = self.shards[shard_id]
                .store()
                .write()
                .put(item.key, item.entry, stamp);
            self.apply_put_delta(prior.map(|p| p.size_bytes), size_bytes);
            restored += 1;
        }

        // Reset sequence bookkeeping to the snapshot's baseline, then
        // re-log the restored entries so a crash cannot lose them.
        if let Some(wal) = &self.wal {
            wal.reset().await?;
            wal.set_next_seq(snapshot.wal_seq + 1).await;
            wal.append_set_batch(relogged).await?;
        } else {
            self.entry_seq.store(snapshot.wal_seq + 1, Ordering::Relaxed);
        }

        self.enforce_bounds_exclusive();
        info!(restored, skipped_expired, "snapshot restore complete");
        Ok(())
    }

    /// Latest assigned sequence number (journal's when WAL is on).
    pub(crate) async fn current_seq(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.next_seq().await.saturating_sub(1),
            None => self.entry_seq.load(Ordering::Relaxed).saturating_sub(1),
        }
    }

    // == Sweep ==
    /// One sweep cycle: expiry fanned out across shards, then bound
    /// enforcement and WAL retention. Runs on the sweeper task.
    pub(crate) async fn sweep(self: &Arc<Self>) {
        let mut handles = Vec::with_capacity(self.shards.len());
        for shard_id in 0..self.shards.len() {
            let inner = Arc::clone(self);
            handles.push((
                shard_id,
                tokio::spawn(async move { inner.sweep_shard(shard_id).await }),
            ));
            // One large shard must not starve the others of the runtime.
            tokio::task::yield_now().await;
        }

        let mut removed_total = 0usize;
        for (shard_id, handle) in handles {
            match handle.await {
                Ok(Ok(removed)) => removed_total += removed,
                Ok(Err(e)) => {
                    // A failing shard is isolated; the others already ran.
                    warn!(shard = shard_id, error = %e, "sweep failed for shard");
                }
                Err(e) => warn!(shard = shard_id, error = %e, "sweep task panicked"),
            }
        }

        self.enforce_bounds_online(None, None).await;
        if let Some(wal) = &self.wal {
            wal.purge_stale_segments().await;
        }
        self.metrics.record_sweep_cycle();
        if removed_total > 0 {
            info!(removed = removed_total, "sweep removed expired entries");
        } else {
            debug!("sweep found no expired entries");
        }
    }

    async fn sweep_shard(&self, shard_id: usize) -> Result<usize> {
        let _section = self.locks.structural_section(shard_id).await?;
        let now = current_timestamp_ms();
        let expired = self.shards[shard_id].store().read().expired_keys(now);
        if expired.is_empty() {
            return Ok(0);
        }

        // Journal the expiries before applying them.
        if let Some(wal) = &self.wal {
            for key in &expired {
                wal.append_expire(key).await?;
            }
        }

        let mut removed = 0usize;
        {
            let mut store = self.shards[shard_id].store().write();
            for key in &expired {
                if let Some(entry) = store.remove(key) {
                    self.apply_remove_delta(entry.size_bytes);
                    removed += 1;
                }
            }
        }
        self.metrics.record_expired_eviction(removed as u64);
        debug!(shard = shard_id, removed, "shard expiry sweep");
        Ok(removed)
    }
}
