//! Configuration Module
//!
//! Handles loading and managing cache engine configuration from
//! environment variables, plus the stricter "paranoia" profile.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{PARANOID_MAX_ENTRY_BYTES, PARANOID_MAX_ITEMS, PARANOID_MAX_MEMORY_BYTES};
use crate::error::{CacheError, Result};

// == WAL Config ==
/// Durability journal settings.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Whether mutations are journaled before acknowledgment
    pub enabled: bool,
    /// Directory holding WAL segment files
    pub dir: PathBuf,
    /// Segment rotation ceiling in bytes
    pub segment_max_bytes: u64,
    /// How long superseded segments are retained before purging
    pub retention: Duration,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("wal"),
            segment_max_bytes: 10 * 1024 * 1024,
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

// == Cache Config ==
/// Cache engine configuration parameters.
///
/// All values can be configured via environment variables with sensible
/// defaults. The paranoia toggle swaps in much stricter bound constants
/// and tighter validation without changing any algorithm.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of shards; fixed for the process lifetime
    pub shard_count: usize,
    /// Virtual nodes per shard on the hash ring
    pub vnodes_per_shard: usize,
    /// Maximum number of entries across all shards
    pub max_items: usize,
    /// Maximum estimated memory across all shards, in bytes
    pub max_memory_bytes: usize,
    /// Maximum admitted size for a single entry, in bytes
    pub max_entry_bytes: usize,
    /// Default TTL in seconds for entries without explicit TTL;
    /// `None` means such entries never expire
    pub default_ttl: Option<u64>,
    /// Background sweep interval
    pub sweep_interval: Duration,
    /// Lock acquisition timeout
    pub lock_timeout: Duration,
    /// Durability journal settings
    pub wal: WalConfig,
    /// Stricter bounds and validation profile
    pub paranoia: bool,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SHARD_COUNT` - Number of shards (default: 8)
    /// - `VNODES_PER_SHARD` - Virtual nodes per shard (default: 128)
    /// - `MAX_ITEMS` - Maximum cache entries (default: 100000)
    /// - `MAX_MEMORY_BYTES` - Memory bound in bytes (default: 100 MiB)
    /// - `MAX_ENTRY_BYTES` - Single-entry ceiling in bytes (default: 1 MiB)
    /// - `DEFAULT_TTL` - Default TTL in seconds, 0 disables (default: 300)
    /// - `SWEEP_INTERVAL` - Sweep frequency in seconds (default: 30)
    /// - `LOCK_TIMEOUT_MS` - Lock timeout in milliseconds (default: 5000)
    /// - `WAL_ENABLED` - Enable the write-ahead log (default: false)
    /// - `WAL_DIR` - WAL segment directory (default: "wal")
    /// - `WAL_SEGMENT_MAX_BYTES` - Rotation ceiling (default: 10 MiB)
    /// - `WAL_RETENTION_SECS` - Segment retention window (default: 86400)
    /// - `PARANOIA_MODE` - Enable the strict profile (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            shard_count: env_parse("SHARD_COUNT", defaults.shard_count),
            vnodes_per_shard: env_parse("VNODES_PER_SHARD", defaults.vnodes_per_shard),
            max_items: env_parse("MAX_ITEMS", defaults.max_items),
            max_memory_bytes: env_parse("MAX_MEMORY_BYTES", defaults.max_memory_bytes),
            max_entry_bytes: env_parse("MAX_ENTRY_BYTES", defaults.max_entry_bytes),
            default_ttl: match env_parse("DEFAULT_TTL", 300u64) {
                0 => None,
                secs => Some(secs),
            },
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL", 30)),
            lock_timeout: Duration::from_millis(env_parse("LOCK_TIMEOUT_MS", 5000)),
            wal: WalConfig {
                enabled: env_parse("WAL_ENABLED", false),
                dir: PathBuf::from(
                    env::var("WAL_DIR").unwrap_or_else(|_| "wal".to_string()),
                ),
                segment_max_bytes: env_parse(
                    "WAL_SEGMENT_MAX_BYTES",
                    defaults.wal.segment_max_bytes,
                ),
                retention: Duration::from_secs(env_parse("WAL_RETENTION_SECS", 86400)),
            },
            paranoia: env_parse("PARANOIA_MODE", false),
        }
    }

    /// Applies the paranoia clamps and checks structural parameters.
    ///
    /// Returns the effective configuration the engine actually runs with.
    /// An empty shard layout is a fatal configuration error, not a
    /// recoverable condition.
    pub fn normalized(mut self) -> Result<Self> {
        if self.shard_count == 0 {
            return Err(CacheError::Validation(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if self.vnodes_per_shard == 0 {
            return Err(CacheError::Validation(
                "vnodes_per_shard must be at least 1".to_string(),
            ));
        }
        if self.max_items == 0 {
            return Err(CacheError::Validation(
                "max_items must be at least 1".to_string(),
            ));
        }

        if self.paranoia {
            self.max_items = self.max_items.min(PARANOID_MAX_ITEMS);
            self.max_memory_bytes = self.max_memory_bytes.min(PARANOID_MAX_MEMORY_BYTES);
            self.max_entry_bytes = self.max_entry_bytes.min(PARANOID_MAX_ENTRY_BYTES);
        }

        // An entry can never be admitted above the memory bound anyway.
        self.max_entry_bytes = self.max_entry_bytes.min(self.max_memory_bytes);

        Ok(self)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shard_count: 8,
            vnodes_per_shard: 128,
            max_items: 100_000,
            max_memory_bytes: 100 * 1024 * 1024,
            max_entry_bytes: 1024 * 1024,
            default_ttl: Some(300),
            sweep_interval: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
            wal: WalConfig::default(),
            paranoia: false,
        }
    }
}

/// Parses an environment variable, falling back to a default.
fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.shard_count, 8);
        assert_eq!(config.vnodes_per_shard, 128);
        assert_eq!(config.max_items, 100_000);
        assert_eq!(config.default_ttl, Some(300));
        assert!(!config.wal.enabled);
        assert!(!config.paranoia);
    }

    #[test]
    fn test_normalized_rejects_zero_shards() {
        let config = CacheConfig {
            shard_count: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(
            config.normalized(),
            Err(CacheError::Validation(_))
        ));
    }

    #[test]
    fn test_normalized_rejects_zero_vnodes() {
        let config = CacheConfig {
            vnodes_per_shard: 0,
            ..CacheConfig::default()
        };
        assert!(config.normalized().is_err());
    }

    #[test]
    fn test_paranoia_clamps_bounds() {
        let config = CacheConfig {
            max_items: 1_000_000,
            max_memory_bytes: 500 * 1024 * 1024,
            paranoia: true,
            ..CacheConfig::default()
        };
        let effective = config.normalized().unwrap();
        assert_eq!(effective.max_items, PARANOID_MAX_ITEMS);
        assert_eq!(effective.max_memory_bytes, PARANOID_MAX_MEMORY_BYTES);
        assert_eq!(effective.max_entry_bytes, PARANOID_MAX_ENTRY_BYTES);
    }

    #[test]
    fn test_paranoia_keeps_tighter_user_bounds() {
        let config = CacheConfig {
            max_items: 100,
            max_memory_bytes: 1024,
            paranoia: true,
            ..CacheConfig::default()
        };
        let effective = config.normalized().unwrap();
        assert_eq!(effective.max_items, 100);
        assert_eq!(effective.max_memory_bytes, 1024);
    }

    #[test]
    fn test_entry_ceiling_never_exceeds_memory_bound() {
        let config = CacheConfig {
            max_memory_bytes: 4096,
            max_entry_bytes: 1024 * 1024,
            ..CacheConfig::default()
        };
        let effective = config.normalized().unwrap();
        assert_eq!(effective.max_entry_bytes, 4096);
    }
}
