//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, writes and deletes.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::storage::{BackendSummary, StorageKind};

// == Cache Stats ==
/// Running counters kept by the cache manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (absent, expired or unreadable)
    pub misses: u64,
    /// Number of successful writes
    pub sets: u64,
    /// Number of explicit deletes that removed an entry
    pub deletes: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Hit rate as a percentage.
    ///
    /// Returns hits / (hits + misses) * 100, or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_set(&mut self) {
        self.sets += 1;
    }

    pub fn record_delete(&mut self) {
        self.deletes += 1;
    }
}

// == Stats Snapshot ==
/// Point-in-time view returned by `CacheManager::stats` and `stats_with_durable`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Percentage of reads that hit
    pub hit_rate: f64,
    /// Evictions summed over the backends in `backends`
    pub evictions: u64,
    /// Per-backend size summaries. `CacheManager::stats` covers memory,
    /// local and session; `CacheManager::stats_with_durable` adds durable.
    pub backends: BTreeMap<StorageKind, BackendSummary>,
}

impl StatsSnapshot {
    pub fn new(stats: &CacheStats, backends: BTreeMap<StorageKind, BackendSummary>) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            sets: stats.sets,
            deletes: stats.deletes,
            hit_rate: stats.hit_rate(),
            evictions: backends.values().map(|summary| summary.evictions).sum(),
            backends,
        }
    }
}
