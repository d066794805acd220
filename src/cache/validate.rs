//! Admission Validation Module
//!
//! Key/value/TTL checks applied before any mutation. Validation rejects,
//! it never coerces: a bad input comes back as a `Validation` error with
//! the cache untouched. The paranoia profile swaps in tighter ceilings
//! without changing any check's shape.

use serde::Serialize;
use serde_json::Value;

use crate::cache::{
    MAX_KEY_LENGTH, MAX_TTL_SECS, PARANOID_MAX_KEY_LENGTH, PARANOID_MAX_TTL_SECS,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Validator ==
/// Admission checker built once from the effective configuration.
#[derive(Debug, Clone)]
pub struct Validator {
    max_key_len: usize,
    max_entry_bytes: usize,
    max_ttl_secs: u64,
    default_ttl: Option<u64>,
}

impl Validator {
    // == Constructor ==
    pub fn new(config: &CacheConfig) -> Self {
        let (max_key_len, max_ttl_secs) = if config.paranoia {
            (PARANOID_MAX_KEY_LENGTH, PARANOID_MAX_TTL_SECS)
        } else {
            (MAX_KEY_LENGTH, MAX_TTL_SECS)
        };
        Self {
            max_key_len,
            max_entry_bytes: config.max_entry_bytes,
            max_ttl_secs,
            default_ttl: config.default_ttl,
        }
    }

    // == Key Validation ==
    /// Rejects empty, oversized, and control-character keys.
    pub fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::Validation("key must not be empty".to_string()));
        }
        if key.chars().count() > self.max_key_len {
            return Err(CacheError::Validation(format!(
                "key exceeds maximum length of {} characters",
                self.max_key_len
            )));
        }
        if key.chars().any(|c| c.is_control()) {
            return Err(CacheError::Validation(
                "key must not contain control characters".to_string(),
            ));
        }
        Ok(())
    }

    // == TTL Validation ==
    /// Resolves the effective TTL for an entry.
    ///
    /// An explicit TTL must lie in [0, max]; zero is admitted and means
    /// the entry expires on its next access. A missing TTL falls back to
    /// the configured default (which may be "never expire").
    pub fn effective_ttl(&self, ttl: Option<u64>) -> Result<Option<u64>> {
        match ttl {
            Some(secs) if secs > self.max_ttl_secs => Err(CacheError::Validation(format!(
                "ttl {}s exceeds maximum of {}s",
                secs, self.max_ttl_secs
            ))),
            Some(secs) => Ok(Some(secs)),
            None => Ok(self.default_ttl),
        }
    }

    // == Value Validation ==
    /// Proves the value serializable exactly once, at admission.
    ///
    /// Returns the stored representation plus its serialized length for
    /// size estimation. A value the serializer cannot represent is a
    /// validation failure, not a panic.
    pub fn admit_value<V: Serialize>(&self, value: V) -> Result<(Value, usize)> {
        let value = serde_json::to_value(value)
            .map_err(|e| CacheError::Validation(format!("value is not serializable: {}", e)))?;
        let serialized_len = serde_json::to_string(&value)
            .map_err(|e| CacheError::Validation(format!("value is not serializable: {}", e)))?
            .len();

        if serialized_len > self.max_entry_bytes {
            return Err(CacheError::Validation(format!(
                "value of {} bytes exceeds maximum entry size of {} bytes",
                serialized_len, self.max_entry_bytes
            )));
        }
        Ok((value, serialized_len))
    }
}
