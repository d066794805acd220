//! TTL Sweeper Task
//!
//! Background worker that periodically sweeps every shard for expired
//! entries and re-checks the capacity bounds. The worker has explicit
//! start/stop: it is spawned by the engine constructor and stopped by
//! `shutdown()` through its handle, never abandoned as a free-floating
//! timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheInner;

// == Sweeper Handle ==
/// Control handle for the sweep worker.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the worker to stop and waits for it to finish its
    /// current cycle.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

// == Spawn ==
/// Spawns the periodic sweep worker.
///
/// Each cycle fans out across shards inside `CacheInner::sweep`; a slow
/// or failing shard is isolated there and never stops the worker.
pub(crate) fn spawn_sweeper(inner: Arc<CacheInner>, interval: Duration) -> SweeperHandle {
    let (shutdown, mut stop_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "ttl sweeper started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh cache
        // does not sweep before anything can expire.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    inner.sweep().await;
                }
                _ = stop_rx.changed() => {
                    debug!("ttl sweeper stopping");
                    break;
                }
            }
        }
    });

    SweeperHandle { shutdown, handle }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use crate::cache::ShardedCache;
    use crate::config::CacheConfig;
    use std::time::Duration;

    fn sweeping_config(interval: Duration) -> CacheConfig {
        CacheConfig {
            shard_count: 4,
            vnodes_per_shard: 16,
            sweep_interval: interval,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let cache = ShardedCache::new(sweeping_config(Duration::from_millis(200)))
            .await
            .unwrap();

        cache.set("expire_soon", "value", Some(0)).await.unwrap();
        cache.set("long_lived", "value", Some(3600)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;

        // The sweep, not an access, removed the expired entry.
        let stats = cache.stats();
        assert!(stats.expired_evictions >= 1);
        assert!(stats.sweep_cycles >= 1);
        assert_eq!(cache.size(), 1);
        assert!(cache.get("long_lived").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweeper_preserves_valid_entries() {
        let cache = ShardedCache::new(sweeping_config(Duration::from_millis(100)))
            .await
            .unwrap();

        cache.set("long_lived", "value", Some(3600)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(
            cache.get("long_lived").await.unwrap(),
            Some(serde_json::json!("value"))
        );
    }

    #[tokio::test]
    async fn test_sweeper_stops_with_shutdown() {
        let cache = ShardedCache::new(sweeping_config(Duration::from_millis(100)))
            .await
            .unwrap();

        cache.shutdown().await.unwrap();
        let cycles_at_shutdown = cache.stats().sweep_cycles;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(
            cache.stats().sweep_cycles,
            cycles_at_shutdown,
            "no sweeps after shutdown"
        );
    }
}
