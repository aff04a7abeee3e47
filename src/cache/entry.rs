//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// Represents a single cache entry with payload and metadata.
///
/// The payload is opaque to the cache; only its serialized form is ever measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    /// The stored payload
    pub data: T,
    /// Creation timestamp (Unix milliseconds)
    pub timestamp: u64,
    /// Lifetime in milliseconds, None = never expires by time
    pub ttl: Option<u64>,
    /// Entry format version
    pub version: u32,
    /// Number of successful reads
    pub access_count: u64,
    /// Last successful read (Unix milliseconds)
    pub last_accessed: u64,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates a new cache entry stamped with the current time.
    ///
    /// # Arguments
    /// * `data` - The payload to store
    /// * `ttl` - Optional TTL in milliseconds
    /// * `version` - Entry format version
    pub fn new(data: T, ttl: Option<u64>, version: u32) -> Self {
        let now = current_timestamp_ms();

        Self {
            data,
            timestamp: now,
            ttl,
            version,
            access_count: 0,
            last_accessed: now,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired only when it has a TTL and strictly more than `ttl`
    /// milliseconds have passed since it was created.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Expiry check against an explicit clock reading.
    pub fn is_expired_at(&self, now: u64) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_sub(self.timestamp) > ttl,
            None => false,
        }
    }

    // == Touch ==
    /// Records a successful read.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = current_timestamp_ms();
    }

    // == Age ==
    /// Milliseconds elapsed since the entry was written.
    pub fn age_ms(&self) -> u64 {
        current_timestamp_ms().saturating_sub(self.timestamp)
    }

    /// Drops the payload, keeping only the bookkeeping fields.
    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            timestamp: self.timestamp,
            ttl: self.ttl,
            version: self.version,
            access_count: self.access_count,
            last_accessed: self.last_accessed,
        }
    }
}

// == Entry Metadata ==
/// Bookkeeping fields of an entry without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub timestamp: u64,
    pub ttl: Option<u64>,
    pub version: u32,
    pub access_count: u64,
    pub last_accessed: u64,
}

impl EntryMetadata {
    /// Milliseconds elapsed since the entry was written.
    pub fn age_ms(&self) -> u64 {
        current_timestamp_ms().saturating_sub(self.timestamp)
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(0)` if the entry has expired
    /// - `Some(remaining_ms)` if the entry has TTL and hasn't expired
    /// - `None` if the entry has no TTL (never expires)
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.ttl.map(|ttl| {
            self.timestamp
                .saturating_add(ttl)
                .saturating_sub(current_timestamp_ms())
        })
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::new("test_value".to_string(), None, 1);

        assert_eq!(entry.data, "test_value");
        assert!(entry.ttl.is_none());
        assert_eq!(entry.access_count, 0);
        assert_eq!(entry.last_accessed, entry.timestamp);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_never_expires_without_ttl() {
        let entry = CacheEntry::new(42u32, None, 1);
        assert!(!entry.is_expired_at(entry.timestamp + u64::MAX / 2));
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new("test_value".to_string(), Some(50), 1);

        assert!(!entry.is_expired());

        sleep(Duration::from_millis(80));

        assert!(entry.is_expired());
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry {
            data: "test".to_string(),
            timestamp: 1_000,
            ttl: Some(100),
            version: 1,
            access_count: 0,
            last_accessed: 1_000,
        };

        // Exactly ttl elapsed is still valid; one more millisecond expires it
        assert!(!entry.is_expired_at(1_100));
        assert!(entry.is_expired_at(1_101));
    }

    #[test]
    fn test_touch_updates_access_stats() {
        let mut entry = CacheEntry::new(1u8, None, 1);
        entry.last_accessed = 0;

        entry.touch();
        entry.touch();

        assert_eq!(entry.access_count, 2);
        assert!(entry.last_accessed >= entry.timestamp);
    }

    #[test]
    fn test_ttl_remaining() {
        let entry = CacheEntry::new("v".to_string(), Some(10_000), 1);

        let remaining = entry.metadata().ttl_remaining_ms().unwrap();
        assert!(remaining <= 10_000);
        assert!(remaining >= 9_000);
        assert!(CacheEntry::new(0, None, 1).metadata().ttl_remaining_ms().is_none());
    }

    #[test]
    fn test_ttl_remaining_saturates_for_huge_ttl() {
        let entry = CacheEntry::new(0, Some(u64::MAX), 1);

        assert!(!entry.is_expired());
        assert_eq!(
            entry.metadata().ttl_remaining_ms(),
            Some(u64::MAX - current_timestamp_ms())
        );
    }

    #[test]
    fn test_serialized_field_names() {
        let entry = CacheEntry {
            data: "x".to_string(),
            timestamp: 5,
            ttl: None,
            version: 2,
            access_count: 3,
            last_accessed: 6,
        };
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["accessCount"], 3);
        assert_eq!(json["lastAccessed"], 6);
        assert!(json["ttl"].is_null());
    }
}
