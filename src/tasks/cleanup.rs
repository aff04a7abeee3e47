//! Expiry Sweep Task
//!
//! Background task that periodically purges expired entries from every backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheManager;

/// Spawns a task that calls [`CacheManager::cleanup_expired`] every
/// `cleanup_interval_secs` seconds.
///
/// Reads already treat expired entries as misses; the sweep only reclaims
/// their space. Abort the returned handle on shutdown.
pub fn spawn_cleanup_task(cache: Arc<CacheManager>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep with interval of {} seconds",
            cleanup_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.cleanup_expired().await;
            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{SetOptions, StorageKind};
    use crate::config::Config;

    fn cache() -> Arc<CacheManager> {
        Arc::new(CacheManager::new(&Config::default()))
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let cache = cache();
        for kind in [StorageKind::Memory, StorageKind::Session] {
            cache
                .set("expire_soon", &"value", SetOptions::default().ttl_ms(50).storage(kind))
                .await;
        }

        let handle = spawn_cleanup_task(Arc::clone(&cache), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let stats = cache.stats();
        assert_eq!(stats.backends[&StorageKind::Memory].entries, 0);
        assert_eq!(stats.backends[&StorageKind::Session].entries, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let cache = cache();
        cache
            .set("long_lived", &"value", SetOptions::default().ttl_ms(3_600_000))
            .await;

        let handle = spawn_cleanup_task(Arc::clone(&cache), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(
            cache.get::<String>("long_lived", None).await.as_deref(),
            Some("value")
        );

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let handle = spawn_cleanup_task(cache(), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
