//! Cache Manager Module
//!
//! Façade unifying the four backends behind one API. Selects the backend per
//! call, namespaces keys, serializes payloads and keeps aggregate statistics.
//!
//! Every failure is absorbed here: writes report `false`, reads report `None`.
//! The cache is an optimization, so callers always have the loader to fall
//! back on.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::durable::DurableStore;
use crate::cache::memory::MemoryStore;
use crate::cache::quota::{QuotaStore, StorageArea};
use crate::cache::storage::{BackendSummary, EntryStore, StorageKind, StoredEntry, WriteOutcome};
use crate::cache::{CacheEntry, CacheStats, EntryMetadata, StatsSnapshot};
use crate::config::Config;

static GLOBAL: OnceLock<Arc<CacheManager>> = OnceLock::new();

// == TTL Selection ==
/// Lifetime requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the manager's configured default
    #[default]
    Default,
    /// Never expire by time
    Never,
    /// Expire after this many milliseconds
    Millis(u64),
}

// == Set Options ==
/// Per-call options for [`CacheManager::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub ttl: Ttl,
    /// Backend to write to, None = manager default
    pub storage: Option<StorageKind>,
}

impl SetOptions {
    pub fn ttl_ms(mut self, ttl: u64) -> Self {
        self.ttl = Ttl::Millis(ttl);
        self
    }

    pub fn never_expire(mut self) -> Self {
        self.ttl = Ttl::Never;
        self
    }

    pub fn storage(mut self, storage: StorageKind) -> Self {
        self.storage = Some(storage);
        self
    }
}

type SyncStore = Mutex<Box<dyn EntryStore>>;

// == Cache Manager ==
/// Multi-backend cache façade.
///
/// The same logical key resolves to independent entries in each backend;
/// nothing is shared or invalidated across backends.
pub struct CacheManager {
    prefix: String,
    version: u32,
    default_storage: StorageKind,
    default_ttl: Option<u64>,
    memory: SyncStore,
    local: SyncStore,
    session: SyncStore,
    durable: DurableStore,
    stats: Mutex<CacheStats>,
}

impl CacheManager {
    // == Constructor ==
    /// Creates a manager with the standard backends sized from `config`.
    pub fn new(config: &Config) -> Self {
        let prefix = config.cache_prefix.clone();
        Self::with_stores(
            config,
            Box::new(MemoryStore::new(config.memory_max_entries)),
            Box::new(QuotaStore::new(
                StorageArea::new(config.local_quota_bytes),
                prefix.clone(),
            )),
            Box::new(QuotaStore::new(
                StorageArea::new(config.session_quota_bytes),
                prefix,
            )),
            DurableStore::new(config.durable_path.clone(), config.durable_max_bytes),
        )
    }

    /// Creates a manager over caller-supplied backends.
    pub fn with_stores(
        config: &Config,
        memory: Box<dyn EntryStore>,
        local: Box<dyn EntryStore>,
        session: Box<dyn EntryStore>,
        durable: DurableStore,
    ) -> Self {
        Self {
            prefix: config.cache_prefix.clone(),
            version: config.cache_version,
            default_storage: config.default_storage,
            default_ttl: config.default_ttl_ms,
            memory: Mutex::new(memory),
            local: Mutex::new(local),
            session: Mutex::new(session),
            durable,
            stats: Mutex::new(CacheStats::new()),
        }
    }

    /// Process-wide default instance, built from the environment on first use.
    pub fn global() -> Arc<CacheManager> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(CacheManager::new(&Config::from_env()))))
    }

    /// The key actually used against every backend.
    pub fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn durable(&self) -> &DurableStore {
        &self.durable
    }

    pub fn default_storage(&self) -> StorageKind {
        self.default_storage
    }

    fn resolve(&self, storage: Option<StorageKind>) -> StorageKind {
        storage.unwrap_or(self.default_storage)
    }

    fn resolve_ttl(&self, ttl: Ttl) -> Option<u64> {
        match ttl {
            Ttl::Default => self.default_ttl,
            Ttl::Never => None,
            Ttl::Millis(ms) => Some(ms),
        }
    }

    fn sync_store(&self, kind: StorageKind) -> Option<&SyncStore> {
        match kind {
            StorageKind::Memory => Some(&self.memory),
            StorageKind::Local => Some(&self.local),
            StorageKind::Session => Some(&self.session),
            StorageKind::Durable => None,
        }
    }

    // == Set ==
    /// Wraps `data` in a fresh entry and writes it to the chosen backend.
    ///
    /// Returns `false` on any failure (unserializable data, quota exhausted
    /// after eviction, durable store unavailable).
    pub async fn set<T>(&self, key: &str, data: &T, options: SetOptions) -> bool
    where
        T: Serialize + ?Sized,
    {
        if key.is_empty() {
            warn!("refusing to cache under an empty key");
            return false;
        }

        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "cache payload is not serializable");
                return false;
            }
        };

        let storage = self.resolve(options.storage);
        let ttl = self.resolve_ttl(options.ttl);
        let entry = CacheEntry::new(data, ttl, self.version);
        let ns = self.namespaced(key);

        let stored = match self.sync_store(storage) {
            Some(store) => match on_sync(store, |s| s.set(&ns, entry)) {
                WriteOutcome::Ok => true,
                WriteOutcome::QuotaExceeded => {
                    warn!(key, %storage, "cache write rejected: quota exceeded");
                    false
                }
                WriteOutcome::Failure(reason) => {
                    warn!(key, %storage, %reason, "cache write failed");
                    false
                }
            },
            None => self.durable_set(&ns, &entry).await,
        };

        if stored {
            lock(&self.stats).record_set();
            debug!(key, %storage, ?ttl, "cache set");
        }
        stored
    }

    async fn durable_set(&self, ns: &str, entry: &StoredEntry) -> bool {
        let record = match serde_json::to_value(entry) {
            Ok(record) => record,
            Err(err) => {
                warn!(key = ns, error = %err, "cannot encode durable record");
                return false;
            }
        };

        match self.durable.set(ns, &record, entry.ttl).await {
            Ok(()) => true,
            Err(err) => {
                warn!(key = ns, error = %err, "durable cache write failed");
                false
            }
        }
    }

    // == Get ==
    /// Returns the cached payload, or `None` on a miss.
    ///
    /// Expired entries and entries from another cache version are deleted
    /// and reported as misses. A hit updates the entry's access statistics.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        storage: Option<StorageKind>,
    ) -> Option<T> {
        let storage = self.resolve(storage);
        let ns = self.namespaced(key);

        let value = match self.read_entry(&ns, storage, true).await {
            Some(entry) => match serde_json::from_value(entry.data) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, %storage, error = %err, "cached payload has an unexpected shape");
                    None
                }
            },
            None => None,
        };

        let mut stats = lock(&self.stats);
        if value.is_some() {
            stats.record_hit();
        } else {
            stats.record_miss();
        }
        value
    }

    // == Metadata ==
    /// Peeks at an entry's bookkeeping without counting a hit or a miss.
    pub async fn metadata(&self, key: &str, storage: Option<StorageKind>) -> Option<EntryMetadata> {
        let ns = self.namespaced(key);
        self.read_entry(&ns, self.resolve(storage), false)
            .await
            .map(|entry| entry.metadata())
    }

    /// Loads a live entry, purging it when expired or from another version.
    async fn read_entry(&self, ns: &str, storage: StorageKind, touch: bool) -> Option<StoredEntry> {
        if let Some(store) = self.sync_store(storage) {
            return on_sync(store, |s| {
                let mut entry = s.get(ns)?;
                if !self.is_live(&entry) {
                    s.delete(ns);
                    return None;
                }
                if touch {
                    s.touch(ns);
                    entry.touch();
                }
                Some(entry)
            });
        }

        let read = if touch {
            self.durable.get(ns).await
        } else {
            self.durable.peek(ns).await
        };
        let record = match read {
            Ok(record) => record?,
            Err(err) => {
                warn!(key = ns, error = %err, "durable cache read failed");
                return None;
            }
        };

        // Access columns are maintained by the store, not by the frozen blob
        match serde_json::from_value::<StoredEntry>(record.data) {
            Ok(mut entry) if self.is_live(&entry) => {
                entry.access_count = record.access_count;
                entry.last_accessed = record.last_accessed;
                Some(entry)
            }
            Ok(_) => {
                self.durable_delete(ns).await;
                None
            }
            Err(err) => {
                warn!(key = ns, error = %err, "durable record is not a cache entry");
                self.durable_delete(ns).await;
                None
            }
        }
    }

    fn is_live(&self, entry: &StoredEntry) -> bool {
        entry.version == self.version && !entry.is_expired()
    }

    async fn durable_delete(&self, ns: &str) -> Option<bool> {
        match self.durable.delete(ns).await {
            Ok(removed) => Some(removed),
            Err(err) => {
                warn!(key = ns, error = %err, "durable cache delete failed");
                None
            }
        }
    }

    // == Has ==
    /// Whether a live entry exists. Counts as a read for statistics.
    pub async fn has(&self, key: &str, storage: Option<StorageKind>) -> bool {
        self.get::<Value>(key, storage).await.is_some()
    }

    // == Delete ==
    /// Removes `key` from one backend. Returns `false` only on backend failure.
    pub async fn delete(&self, key: &str, storage: Option<StorageKind>) -> bool {
        let storage = self.resolve(storage);
        let ns = self.namespaced(key);

        let removed = match self.sync_store(storage) {
            Some(store) => Some(on_sync(store, |s| s.delete(&ns))),
            None => self.durable_delete(&ns).await,
        };

        match removed {
            Some(true) => {
                lock(&self.stats).record_delete();
                debug!(key, %storage, "cache delete");
                true
            }
            Some(false) => true,
            None => false,
        }
    }

    // == Clear ==
    /// Clears one backend, or every backend when `storage` is None.
    pub async fn clear(&self, storage: Option<StorageKind>) -> bool {
        let targets: Vec<StorageKind> = match storage {
            Some(kind) => vec![kind],
            None => StorageKind::ALL.to_vec(),
        };

        let mut ok = true;
        for kind in targets {
            let cleared = match self.sync_store(kind) {
                Some(store) => on_sync(store, |s| s.clear()),
                None => match self.durable.clear().await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(error = %err, "durable cache clear failed");
                        false
                    }
                },
            };
            ok &= cleared;
        }

        info!(storage = ?storage, ok, "cache cleared");
        ok
    }

    // == Cleanup Expired ==
    /// Purges expired entries from every backend, returning the total removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        for kind in [StorageKind::Memory, StorageKind::Local, StorageKind::Session] {
            if let Some(store) = self.sync_store(kind) {
                removed += on_sync(store, |s| s.cleanup_expired());
            }
        }

        match self.durable.clean_expired().await {
            Ok(count) => removed += count,
            Err(err) => warn!(error = %err, "durable cleanup failed"),
        }
        removed
    }

    // == Stats ==
    /// Counters, hit rate and per-backend sizes of the synchronous backends.
    ///
    /// Use [`stats_with_durable`](Self::stats_with_durable) to include the
    /// durable backend, which needs to await the database.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::new(&lock(&self.stats), self.sync_summaries())
    }

    /// Like [`stats`](Self::stats), plus a durable summary when the durable
    /// store can be opened.
    pub async fn stats_with_durable(&self) -> StatsSnapshot {
        let mut backends = self.sync_summaries();
        match self.durable.stats().await {
            Ok(durable) => {
                backends.insert(
                    StorageKind::Durable,
                    BackendSummary {
                        entries: durable.total_entries,
                        bytes: durable.total_size_bytes as usize,
                        limit: self.durable.max_bytes() as usize,
                        evictions: self.durable.evictions(),
                    },
                );
            }
            Err(err) => warn!(error = %err, "durable statistics unavailable"),
        }
        StatsSnapshot::new(&lock(&self.stats), backends)
    }

    fn sync_summaries(&self) -> BTreeMap<StorageKind, BackendSummary> {
        let mut backends = BTreeMap::new();
        for kind in [StorageKind::Memory, StorageKind::Local, StorageKind::Session] {
            if let Some(store) = self.sync_store(kind) {
                backends.insert(kind, on_sync(store, |s| s.summary()));
            }
        }
        backends
    }

    /// Zeroes the counters; stored data is untouched.
    pub fn reset_stats(&self) {
        *lock(&self.stats) = CacheStats::new();
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("prefix", &self.prefix)
            .field("version", &self.version)
            .field("default_storage", &self.default_storage)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

/// Runs `op` against a synchronous backend while holding its lock.
///
/// Keeping the guard inside a plain function guarantees it never lives
/// across an await point.
fn on_sync<R>(store: &SyncStore, op: impl FnOnce(&mut dyn EntryStore) -> R) -> R {
    op(&mut **lock(store))
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
