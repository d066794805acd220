//! WAL Record Module
//!
//! One journal record per mutating operation, serialized as a single
//! JSON line. Every record carries a monotonic sequence number and a
//! CRC32C over the fields that matter for replay (seq, op, key, value,
//! ttl), so torn or tampered records are detected before they are
//! applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, Result};

// == WAL Op ==
/// Kind of mutation being journaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalOp {
    Set,
    Delete,
    /// Removal by the expiry sweep; applied like a delete on replay.
    Expire,
}

impl WalOp {
    /// Stable byte used in checksum input.
    fn code(self) -> u8 {
        match self {
            WalOp::Set => 1,
            WalOp::Delete => 2,
            WalOp::Expire => 3,
        }
    }
}

// == WAL Record ==
/// A single durably journaled operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Strictly monotonic, gapless sequence number
    pub seq: u64,
    pub op: WalOp,
    pub key: String,
    /// Present for SET only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Effective TTL in seconds at set time; None = never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Wall-clock time the record was written (Unix milliseconds)
    pub timestamp_ms: u64,
    /// CRC32C over seq, op, key, value, and ttl
    pub crc: u32,
}

impl WalRecord {
    // == Constructors ==
    pub fn set(seq: u64, key: &str, value: Value, ttl: Option<u64>, timestamp_ms: u64) -> Self {
        Self::finalize(Self {
            seq,
            op: WalOp::Set,
            key: key.to_string(),
            value: Some(value),
            ttl,
            timestamp_ms,
            crc: 0,
        })
    }

    pub fn delete(seq: u64, key: &str, timestamp_ms: u64) -> Self {
        Self::finalize(Self {
            seq,
            op: WalOp::Delete,
            key: key.to_string(),
            value: None,
            ttl: None,
            timestamp_ms,
            crc: 0,
        })
    }

    pub fn expire(seq: u64, key: &str, timestamp_ms: u64) -> Self {
        Self::finalize(Self {
            seq,
            op: WalOp::Expire,
            key: key.to_string(),
            value: None,
            ttl: None,
            timestamp_ms,
            crc: 0,
        })
    }

    fn finalize(mut record: Self) -> Self {
        record.crc = record.compute_crc();
        record
    }

    // == Integrity ==
    /// Computes the checksum over the replay-relevant fields.
    pub fn compute_crc(&self) -> u32 {
        let mut crc = crc32c::crc32c(&self.seq.to_le_bytes());
        crc = crc32c::crc32c_append(crc, &[self.op.code()]);
        crc = crc32c::crc32c_append(crc, self.key.as_bytes());
        if let Some(value) = &self.value {
            let bytes = serde_json::to_vec(value).expect("Value always serializes");
            crc = crc32c::crc32c_append(crc, &bytes);
        }
        if let Some(ttl) = self.ttl {
            crc = crc32c::crc32c_append(crc, &ttl.to_le_bytes());
        }
        crc
    }

    /// Whether the stored checksum matches the record's contents.
    pub fn verify(&self) -> bool {
        self.crc == self.compute_crc()
    }

    // == Wire Format ==
    /// Serializes the record to its JSON line (no trailing newline).
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("WalRecord always serializes")
    }

    /// Parses and integrity-checks one JSON line.
    pub fn decode(line: &str) -> Result<Self> {
        let record: WalRecord = serde_json::from_str(line)
            .map_err(|e| CacheError::Corruption(format!("unparseable WAL record: {}", e)))?;
        if !record.verify() {
            return Err(CacheError::Corruption(format!(
                "checksum mismatch on WAL record seq {}",
                record.seq
            )));
        }
        Ok(record)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_record_roundtrip() {
        let record = WalRecord::set(42, "jobs:status", json!({"state": "ok"}), Some(60), 1000);
        let decoded = WalRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.op, WalOp::Set);
        assert_eq!(decoded.ttl, Some(60));
    }

    #[test]
    fn test_delete_record_has_no_value() {
        let record = WalRecord::delete(7, "gone", 1000);
        let line = record.encode();
        assert!(!line.contains("value"));
        let decoded = WalRecord::decode(&line).unwrap();
        assert_eq!(decoded.op, WalOp::Delete);
        assert!(decoded.value.is_none());
    }

    #[test]
    fn test_expire_record_roundtrip() {
        let record = WalRecord::expire(9, "stale", 2000);
        let decoded = WalRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded.op, WalOp::Expire);
    }

    #[test]
    fn test_checksum_detects_value_tamper() {
        let record = WalRecord::set(1, "key", json!("original"), None, 1000);
        let line = record.encode().replace("original", "tampered");
        assert!(matches!(
            WalRecord::decode(&line),
            Err(CacheError::Corruption(_))
        ));
    }

    #[test]
    fn test_checksum_detects_seq_tamper() {
        let record = WalRecord::set(1, "key", json!("v"), Some(5), 1000);
        let line = record.encode().replace("\"seq\":1", "\"seq\":2");
        assert!(WalRecord::decode(&line).is_err());
    }

    #[test]
    fn test_garbage_line_is_corruption() {
        assert!(matches!(
            WalRecord::decode("not json at all"),
            Err(CacheError::Corruption(_))
        ));
    }

    #[test]
    fn test_ttl_participates_in_checksum() {
        let a = WalRecord::set(1, "key", json!("v"), Some(5), 1000);
        let b = WalRecord::set(1, "key", json!("v"), Some(6), 1000);
        assert_ne!(a.crc, b.crc);
    }
}
