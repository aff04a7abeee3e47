//! Cache Module
//!
//! Multi-tier cache: entry model, the four storage backends and the
//! `CacheManager` façade over them.

mod durable;
mod entry;
mod manager;
mod memory;
mod quota;
mod stats;
mod storage;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use durable::{format_bytes, DurableRecord, DurableStats, DurableStore, DB_VERSION};
pub use entry::{current_timestamp_ms, CacheEntry, EntryMetadata};
pub use manager::{CacheManager, SetOptions, Ttl};
pub(crate) use manager::lock;
pub use memory::MemoryStore;
pub use quota::{QuotaExceeded, QuotaStore, StorageArea};
pub use stats::{CacheStats, StatsSnapshot};
pub use storage::{BackendSummary, EntryStore, StorageKind, StoredEntry, WriteOutcome};
