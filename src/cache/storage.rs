//! Storage Backend Contract
//!
//! Backend selector, typed write outcome and the trait shared by the
//! synchronous backends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheEntry;

/// Entry type held by every backend; payloads are kept as JSON values.
pub type StoredEntry = CacheEntry<Value>;

// == Storage Kind ==
/// Which backend a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Bounded in-process map
    Memory,
    /// Quota-limited text store that outlives a session
    Local,
    /// Quota-limited text store scoped to a session
    Session,
    /// SQLite-backed asynchronous store
    Durable,
}

impl StorageKind {
    pub const ALL: [StorageKind; 4] = [
        StorageKind::Memory,
        StorageKind::Local,
        StorageKind::Session,
        StorageKind::Durable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Memory => "memory",
            StorageKind::Local => "local",
            StorageKind::Session => "session",
            StorageKind::Durable => "durable",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "local" => Ok(StorageKind::Local),
            "session" => Ok(StorageKind::Session),
            "durable" | "indexeddb" => Ok(StorageKind::Durable),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

// == Write Outcome ==
/// Result of a backend write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok,
    /// The store is full even after its eviction pass
    QuotaExceeded,
    /// The write failed for any other reason
    Failure(String),
}

impl WriteOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, WriteOutcome::Ok)
    }
}

// == Backend Summary ==
/// Size summary reported by a backend for aggregate stats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendSummary {
    /// Entries currently stored under the cache namespace
    pub entries: usize,
    /// Bytes consumed, where the backend measures bytes
    pub bytes: usize,
    /// Configured limit (entry count for memory, bytes otherwise)
    pub limit: usize,
    /// Entries removed by eviction passes
    pub evictions: u64,
}

// == Entry Store ==
/// Uniform contract for the synchronous backends.
///
/// Keys arrive already namespaced by the caller. Implementations never panic
/// on ordinary input: failures are reported through the return values.
pub trait EntryStore: Send {
    /// Returns the raw entry, expired or not. Corrupted records read as `None`.
    fn get(&mut self, key: &str) -> Option<StoredEntry>;

    /// Writes an entry, evicting per the backend's policy when full.
    fn set(&mut self, key: &str, entry: StoredEntry) -> WriteOutcome;

    /// Records a successful read against the stored entry.
    fn touch(&mut self, key: &str);

    /// Removes a key, returning whether it existed.
    fn delete(&mut self, key: &str) -> bool;

    /// Removes every entry in the cache namespace.
    fn clear(&mut self) -> bool;

    /// Namespaced keys currently stored.
    fn keys(&self) -> Vec<String>;

    fn summary(&self) -> BackendSummary;

    // == Cleanup Expired ==
    /// Removes all expired entries, returning how many were dropped.
    fn cleanup_expired(&mut self) -> usize {
        let expired: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|key| self.get(key).map_or(false, |entry| entry.is_expired()))
            .collect();

        for key in &expired {
            self.delete(key);
        }
        expired.len()
    }
}
