//! Tiered Cache - a multi-backend client-side data cache
//!
//! Memory, quota-bounded key/value areas and a SQLite-backed durable store
//! behind one façade, with fetch strategies and cache warming on top.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod tasks;
pub mod warming;

pub use cache::{CacheManager, SetOptions, StorageKind, Ttl};
pub use config::Config;
pub use error::{CacheError, Result};
pub use fetch::{ApiQuery, FetchOptions, FetchState, Strategy};
pub use tasks::spawn_cleanup_task;
pub use warming::{CacheWarmer, HoverPrefetcher, IdleSignal, WarmPhase};
