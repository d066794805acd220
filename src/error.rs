//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// Validation and capacity errors surface synchronously before any state
/// is mutated. Durability and lock-timeout errors are never downgraded to
/// a best-effort success.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Input rejected before mutation (bad key, value, or TTL).
    /// The caller must fix the input; retrying unchanged will fail again.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The entry cannot be admitted even after eviction, e.g. a single
    /// entry larger than the memory bound. Non-retryable.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// WAL append or flush failed. The operation was not acknowledged
    /// and must not be treated as durable.
    #[error("Durability failure: {0}")]
    Durability(#[from] std::io::Error),

    /// On-disk state failed an integrity check (bad checksum, unknown
    /// format version). The offending record is skipped, never misread.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Lock acquisition exceeded the configured timeout. Retryable.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Internal invariant breach or use after shutdown.
    #[error("Internal error: {0}")]
    Internal(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::Validation("key too long".to_string());
        assert_eq!(err.to_string(), "Validation failed: key too long");

        let err = CacheError::LockTimeout("key 'a' in shard 3".to_string());
        assert!(err.to_string().starts_with("Lock timeout"));
    }

    #[test]
    fn test_io_error_maps_to_durability() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: CacheError = io.into();
        assert!(matches!(err, CacheError::Durability(_)));
    }
}
