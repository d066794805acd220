//! Snapshot Blob Module
//!
//! Versioned point-in-time dump of all cache entries plus the current
//! sequence number. Blobs carry a format/version tag so incompatible
//! state is detected and refused, never silently misread.

use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

/// Format tag written into every snapshot blob.
pub const SNAPSHOT_FORMAT: &str = "shardcache-snapshot";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

// == Snapshot Entry ==
/// One dumped key with its full entry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub entry: CacheEntry,
}

// == Snapshot Blob ==
/// The serialized form of a full cache dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBlob {
    pub format: String,
    pub version: u32,
    /// Human-readable creation time
    pub created_at: String,
    /// Last assigned sequence number at dump time
    pub wal_seq: u64,
    pub entries: Vec<SnapshotEntry>,
}

impl SnapshotBlob {
    pub fn new(entries: Vec<(String, CacheEntry)>, wal_seq: u64) -> Self {
        Self {
            format: SNAPSHOT_FORMAT.to_string(),
            version: SNAPSHOT_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            wal_seq,
            entries: entries
                .into_iter()
                .map(|(key, entry)| SnapshotEntry { key, entry })
                .collect(),
        }
    }

    /// Serializes the blob for handing to the caller.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| CacheError::Internal(format!("snapshot serialization failed: {}", e)))
    }

    /// Parses a blob, refusing unknown formats or versions.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let blob: SnapshotBlob = serde_json::from_slice(bytes)
            .map_err(|e| CacheError::Corruption(format!("unparseable snapshot: {}", e)))?;
        if blob.format != SNAPSHOT_FORMAT {
            return Err(CacheError::Corruption(format!(
                "unknown snapshot format '{}'",
                blob.format
            )));
        }
        if blob.version != SNAPSHOT_VERSION {
            return Err(CacheError::Corruption(format!(
                "unsupported snapshot version {} (expected {})",
                blob.version, SNAPSHOT_VERSION
            )));
        }
        Ok(blob)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blob_roundtrip() {
        let entry = CacheEntry::new(json!({"state": "ok"}), Some(60), 150, 9);
        let blob = SnapshotBlob::new(vec![("job:1".to_string(), entry.clone())], 42);

        let decoded = SnapshotBlob::decode(&blob.encode().unwrap()).unwrap();
        assert_eq!(decoded.wal_seq, 42);
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].key, "job:1");
        assert_eq!(decoded.entries[0].entry, entry);
    }

    #[test]
    fn test_unknown_format_refused() {
        let mut blob = SnapshotBlob::new(vec![], 1);
        blob.format = "other-engine".to_string();
        let bytes = serde_json::to_vec(&blob).unwrap();
        assert!(matches!(
            SnapshotBlob::decode(&bytes),
            Err(CacheError::Corruption(_))
        ));
    }

    #[test]
    fn test_future_version_refused() {
        let mut blob = SnapshotBlob::new(vec![], 1);
        blob.version = SNAPSHOT_VERSION + 1;
        let bytes = serde_json::to_vec(&blob).unwrap();
        assert!(SnapshotBlob::decode(&bytes).is_err());
    }

    #[test]
    fn test_garbage_bytes_refused() {
        assert!(matches!(
            SnapshotBlob::decode(b"definitely not json"),
            Err(CacheError::Corruption(_))
        ));
    }
}
