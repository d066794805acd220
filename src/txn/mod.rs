//! Transaction Module
//!
//! Caller-supplied ordered operation batches with rollback, plus the
//! snapshot blob format. A transaction records the prior state of every
//! key it touches; rollback replays the applied subsequence in reverse,
//! synthesizing inverse operations from those priors.
//!
//! Rollback is guaranteed correct only against this engine's own
//! operations since the capture: if an outside caller mutates one of the
//! touched keys inside the window, the outcome for that key is
//! explicitly undefined rather than silently patched over.

mod snapshot;

pub use snapshot::{SnapshotBlob, SnapshotEntry, SNAPSHOT_FORMAT, SNAPSHOT_VERSION};

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::error;

use crate::cache::{CacheEntry, RejectReason, ShardedCache};
use crate::error::Result;

// == Transaction Ops ==
/// One operation in a transaction batch.
#[derive(Debug, Clone)]
pub enum TxnOp {
    Set {
        key: String,
        value: Value,
        ttl: Option<u64>,
    },
    Delete {
        key: String,
    },
}

impl TxnOp {
    fn key(&self) -> &str {
        match self {
            TxnOp::Set { key, .. } => key,
            TxnOp::Delete { key } => key,
        }
    }
}

/// What one applied operation needs for its inverse.
#[derive(Debug, Clone)]
pub struct AppliedOp {
    pub key: String,
    pub shard_id: usize,
    /// Entry state before this operation; None = key was absent
    pub prior: Option<CacheEntry>,
}

/// The applied subsequence of a transaction, in application order.
#[derive(Debug, Default)]
pub struct AppliedTransaction {
    pub(crate) ops: Vec<AppliedOp>,
}

impl AppliedTransaction {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// == Transaction Execution ==
impl ShardedCache {
    /// Applies an ordered batch, grouped by owning shard to minimize
    /// lock acquisitions. On a mid-batch failure the already-applied
    /// prefix is rolled back before the error is returned.
    pub async fn execute_transaction(&self, ops: Vec<TxnOp>) -> Result<AppliedTransaction> {
        self.inner.ensure_running()?;

        // Group by shard; relative order within a shard (and therefore
        // per key) is preserved.
        let mut groups: BTreeMap<usize, Vec<TxnOp>> = BTreeMap::new();
        for op in ops {
            let shard_id = self.inner.route(op.key());
            groups.entry(shard_id).or_default().push(op);
        }

        let mut applied = AppliedTransaction::default();
        for (shard_id, group) in groups {
            for op in group {
                match self.apply_txn_op(shard_id, op).await {
                    Ok(applied_op) => applied.ops.push(applied_op),
                    Err(e) => {
                        if let Err(undo_err) = self.rollback_ops(&applied.ops).await {
                            error!(
                                error = %undo_err,
                                "rollback after failed transaction also failed"
                            );
                        }
                        return Err(e);
                    }
                }
            }
        }
        Ok(applied)
    }

    /// Reverses a previously applied transaction: a prior SET becomes a
    /// restore, a prior absence becomes a delete, and a prior DELETE
    /// becomes a SET of the saved entry.
    pub async fn rollback(&self, txn: AppliedTransaction) -> Result<()> {
        self.inner.ensure_running()?;
        self.rollback_ops(&txn.ops).await
    }

    async fn apply_txn_op(&self, shard_id: usize, op: TxnOp) -> Result<AppliedOp> {
        match op {
            TxnOp::Set { key, value, ttl } => {
                if let Err(e) = self.inner.validator.validate_key(&key) {
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

                let _guard = self.inner.point_section(shard_id, &key).await?;
                let prior = self.inner.entry_clone(shard_id, &key);
                self.inner
                    .set_with_guard(shard_id, &key, value, serialized_len, ttl)
                    .await?;
                self.inner
                    .enforce_bounds_online(Some(shard_id), Some(&key))
                    .await;
                Ok(AppliedOp {
                    key,
                    shard_id,
                    prior,
                })
            }
            TxnOp::Delete { key } => {
                let _guard = self.inner.point_section(shard_id, &key).await?;
                let prior = self.inner.entry_clone(shard_id, &key);
                self.inner.delete_with_guard(shard_id, &key).await?;
                Ok(AppliedOp {
                    key,
                    shard_id,
                    prior,
                })
            }
        }
    }

    async fn rollback_ops(&self, ops: &[AppliedOp]) -> Result<()> {
        for op in ops.iter().rev() {
            let _guard = self.inner.point_section(op.shard_id, &op.key).await?;
            match &op.prior {
                Some(entry) => {
                    self.inner
                        .reinstate_with_guard(op.shard_id, &op.key, entry.clone())
                        .await?;
                }
                None => {
                    self.inner.delete_with_guard(op.shard_id, &op.key).await?;
                }
            }
        }
        Ok(())
    }
}
