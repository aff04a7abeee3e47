//! Memory Backend Module
//!
//! Bounded in-process map with least-recently-accessed eviction.

use std::collections::HashMap;

use tracing::debug;

use crate::cache::storage::{BackendSummary, EntryStore, StoredEntry, WriteOutcome};

// == Memory Store ==
/// In-memory backend bounded by entry count.
///
/// Eviction scans for the smallest `last_accessed`; the bound is small enough
/// that a linear scan beats maintaining a separate ordering structure.
#[derive(Debug)]
pub struct MemoryStore {
    /// Namespaced key to entry
    entries: HashMap<String, StoredEntry>,
    /// Maximum number of entries allowed
    max_entries: usize,
    evictions: u64,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates an empty store holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            evictions: 0,
        }
    }

    // == Evict LRU ==
    /// Removes the entry with the oldest `last_accessed`, returning its key.
    pub fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone())?;

        self.entries.remove(&victim);
        self.evictions += 1;
        debug!(key = %victim, "memory backend evicted least recently accessed entry");
        Some(victim)
    }

    // == Length ==
    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EntryStore for MemoryStore {
    fn get(&mut self, key: &str) -> Option<StoredEntry> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, entry: StoredEntry) -> WriteOutcome {
        let is_overwrite = self.entries.contains_key(key);

        if !is_overwrite && self.entries.len() >= self.max_entries && self.evict_lru().is_none() {
            return WriteOutcome::QuotaExceeded;
        }

        self.entries.insert(key.to_string(), entry);
        WriteOutcome::Ok
    }

    fn touch(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.touch();
        }
    }

    fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn clear(&mut self) -> bool {
        self.entries.clear();
        true
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn summary(&self) -> BackendSummary {
        BackendSummary {
            entries: self.entries.len(),
            bytes: 0,
            limit: self.max_entries,
            evictions: self.evictions,
        }
    }

    fn cleanup_expired(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use serde_json::json;

    fn entry_accessed_at(value: serde_json::Value, last_accessed: u64) -> StoredEntry {
        let mut entry = CacheEntry::new(value, None, 1);
        entry.last_accessed = last_accessed;
        entry
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = MemoryStore::new(10);

        assert!(store.set("k1", CacheEntry::new(json!("v1"), None, 1)).is_ok());
        let entry = store.get("k1").unwrap();

        assert_eq!(entry.data, json!("v1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = MemoryStore::new(10);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_store_overwrite_does_not_evict() {
        let mut store = MemoryStore::new(2);

        store.set("a", entry_accessed_at(json!(1), 1));
        store.set("b", entry_accessed_at(json!(2), 2));
        store.set("a", entry_accessed_at(json!(3), 3));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap().data, json!(3));
        assert_eq!(store.summary().evictions, 0);
    }

    #[test]
    fn test_store_evicts_least_recently_accessed() {
        let mut store = MemoryStore::new(3);

        store.set("a", entry_accessed_at(json!("a"), 30));
        store.set("b", entry_accessed_at(json!("b"), 10));
        store.set("c", entry_accessed_at(json!("c"), 20));
        store.set("d", entry_accessed_at(json!("d"), 40));

        assert_eq!(store.len(), 3);
        assert!(store.get("b").is_none());
        assert!(store.get("a").is_some());
        assert!(store.get("c").is_some());
        assert_eq!(store.summary().evictions, 1);
    }

    #[test]
    fn test_touch_protects_from_eviction() {
        let mut store = MemoryStore::new(2);

        store.set("a", entry_accessed_at(json!("a"), 1));
        store.set("b", entry_accessed_at(json!("b"), 2));
        store.touch("a");
        store.set("c", entry_accessed_at(json!("c"), 3));

        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
        assert_eq!(store.get("a").unwrap().access_count, 1);
    }

    #[test]
    fn test_store_delete_and_clear() {
        let mut store = MemoryStore::new(10);

        store.set("k1", CacheEntry::new(json!(1), None, 1));
        store.set("k2", CacheEntry::new(json!(2), None, 1));

        assert!(store.delete("k1"));
        assert!(!store.delete("k1"));
        assert!(store.clear());
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_cleanup_expired() {
        let mut store = MemoryStore::new(10);

        let mut stale = CacheEntry::new(json!("old"), Some(10), 1);
        stale.timestamp -= 1_000;
        store.set("stale", stale);
        store.set("fresh", CacheEntry::new(json!("new"), Some(60_000), 1));

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.keys(), vec!["fresh".to_string()]);
    }
}
