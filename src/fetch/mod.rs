//! Fetch Module
//!
//! Strategy-driven orchestration of a loader against the cache manager.
//!
//! # Strategies
//! - `cache-first`: cache, then loader on a miss
//! - `network-first`: loader, then cache on failure
//! - `cache-only` / `network-only`
//! - `stale-while-revalidate`: cached data now, fresh data in the background

mod options;
mod query;

pub use options::{FetchOptions, Strategy};
pub use query::{ApiQuery, FetchError, FetchState, Loader, Payload};
