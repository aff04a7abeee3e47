//! Quota-Limited Backend Module
//!
//! A shared text key/value area with a byte quota (the local/session storage
//! model) and the cache backend that lives inside it under a key prefix.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::cache::storage::{BackendSummary, EntryStore, StoredEntry, WriteOutcome};

/// Fraction of the namespaced entries dropped by one eviction pass.
const EVICTION_FRACTION: f64 = 0.25;

// == Storage Area ==
/// Text key/value medium with a byte quota.
///
/// The area can hold keys that do not belong to the cache; the cache only
/// ever enumerates and clears keys under its own prefix.
#[derive(Debug, Clone)]
pub struct StorageArea {
    items: HashMap<String, String>,
    quota_bytes: usize,
    used_bytes: usize,
}

/// Raised by [`StorageArea::set_item`] when a write would exceed the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExceeded;

impl StorageArea {
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            items: HashMap::new(),
            quota_bytes,
            used_bytes: 0,
        }
    }

    pub fn get_item(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set_item(&mut self, key: &str, value: String) -> Result<(), QuotaExceeded> {
        let previous = self.items.get(key).map_or(0, |old| key.len() + old.len());
        let next = self.used_bytes - previous + key.len() + value.len();
        if next > self.quota_bytes {
            return Err(QuotaExceeded);
        }

        self.items.insert(key.to_string(), value);
        self.used_bytes = next;
        Ok(())
    }

    pub fn remove_item(&mut self, key: &str) -> bool {
        match self.items.remove(key) {
            Some(old) => {
                self.used_bytes -= key.len() + old.len();
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.items.keys()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }
}

// == Quota Store ==
/// Cache backend that serializes entries into a [`StorageArea`].
///
/// On a quota failure the oldest quarter of the namespaced entries (by write
/// timestamp) is removed and the write is retried once.
#[derive(Debug)]
pub struct QuotaStore {
    area: StorageArea,
    prefix: String,
    evictions: u64,
}

impl QuotaStore {
    pub fn new(area: StorageArea, prefix: impl Into<String>) -> Self {
        Self {
            area,
            prefix: prefix.into(),
            evictions: 0,
        }
    }

    /// Read access to the underlying area, including foreign keys.
    pub fn area(&self) -> &StorageArea {
        &self.area
    }

    pub fn area_mut(&mut self) -> &mut StorageArea {
        &mut self.area
    }

    fn owns(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    // == Evict Oldest ==
    /// Removes the oldest 25% (rounded up) of the namespaced entries.
    ///
    /// Records that fail to parse sort first so corrupted data goes before
    /// anything readable. Returns how many entries were removed.
    pub fn evict_oldest(&mut self) -> usize {
        let mut owned: Vec<(u64, String)> = self
            .area
            .keys()
            .filter(|key| self.owns(key))
            .map(|key| {
                let timestamp = self
                    .area
                    .get_item(key)
                    .and_then(|raw| serde_json::from_str::<StoredEntry>(raw).ok())
                    .map_or(0, |entry| entry.timestamp);
                (timestamp, key.clone())
            })
            .collect();

        if owned.is_empty() {
            return 0;
        }

        owned.sort();
        let count = (owned.len() as f64 * EVICTION_FRACTION).ceil() as usize;
        for (_, key) in owned.iter().take(count) {
            self.area.remove_item(key);
        }

        self.evictions += count as u64;
        debug!(removed = count, prefix = %self.prefix, "quota eviction pass");
        count
    }
}

impl EntryStore for QuotaStore {
    fn get(&mut self, key: &str) -> Option<StoredEntry> {
        let raw = self.area.get_item(key)?;
        match serde_json::from_str(raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key, error = %err, "dropping corrupted cache record");
                self.area.remove_item(key);
                None
            }
        }
    }

    fn set(&mut self, key: &str, entry: StoredEntry) -> WriteOutcome {
        let serialized = match serde_json::to_string(&entry) {
            Ok(text) => text,
            Err(err) => return WriteOutcome::Failure(err.to_string()),
        };

        if self.area.set_item(key, serialized.clone()).is_ok() {
            return WriteOutcome::Ok;
        }

        self.evict_oldest();
        match self.area.set_item(key, serialized) {
            Ok(()) => WriteOutcome::Ok,
            Err(QuotaExceeded) => {
                warn!(key, "storage quota still exceeded after eviction");
                WriteOutcome::QuotaExceeded
            }
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(mut entry) = self.get(key) {
            entry.touch();
            if let Ok(text) = serde_json::to_string(&entry) {
                // Access stats are best-effort; a full area keeps the old record.
                let _ = self.area.set_item(key, text);
            }
        }
    }

    fn delete(&mut self, key: &str) -> bool {
        self.area.remove_item(key)
    }

    fn clear(&mut self) -> bool {
        for key in self.keys() {
            self.area.remove_item(&key);
        }
        true
    }

    fn keys(&self) -> Vec<String> {
        self.area
            .keys()
            .filter(|key| self.owns(key))
            .cloned()
            .collect()
    }

    fn summary(&self) -> BackendSummary {
        let owned = self.keys();
        let bytes = owned
            .iter()
            .map(|key| key.len() + self.area.get_item(key).map_or(0, str::len))
            .sum();

        BackendSummary {
            entries: owned.len(),
            bytes,
            limit: self.area.quota_bytes(),
            evictions: self.evictions,
        }
    }
}
