//! Fetch Options
//!
//! Strategy selector and per-query options.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::{SetOptions, StorageKind, Ttl};

// == Strategy ==
/// How a query combines the cache with its loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve from cache; load and cache only on a miss
    #[default]
    CacheFirst,
    /// Load first; fall back to cache when the loader fails
    NetworkFirst,
    /// Serve from cache only, never load
    CacheOnly,
    /// Always load; the result is still written to the cache
    NetworkOnly,
    /// Serve cached data marked stale while reloading in the background
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::CacheOnly => "cache-only",
            Strategy::NetworkOnly => "network-only",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache-first" => Ok(Strategy::CacheFirst),
            "network-first" => Ok(Strategy::NetworkFirst),
            "cache-only" => Ok(Strategy::CacheOnly),
            "network-only" => Ok(Strategy::NetworkOnly),
            "stale-while-revalidate" | "swr" => Ok(Strategy::StaleWhileRevalidate),
            other => Err(format!("unknown fetch strategy '{other}'")),
        }
    }
}

// == Fetch Options ==
/// Options for an [`ApiQuery`](super::ApiQuery).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub strategy: Strategy,
    /// Lifetime of entries written by this query
    pub ttl: Ttl,
    /// Backend to use, None = cache manager default
    pub storage: Option<StorageKind>,
    /// Disabled queries do nothing until enabled
    pub enabled: bool,
    /// Revalidate in the background after mounting when the cached value is stale
    pub refetch_on_mount: bool,
    /// Revalidate in the background on focus when the cached value is stale
    pub refetch_on_window_focus: bool,
    /// Age in milliseconds after which a cached value counts as stale
    pub stale_time_ms: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::CacheFirst,
            ttl: Ttl::Default,
            storage: None,
            enabled: true,
            refetch_on_mount: false,
            refetch_on_window_focus: false,
            stale_time_ms: 300_000,
        }
    }
}

impl FetchOptions {
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn storage(mut self, storage: StorageKind) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn ttl_ms(mut self, ttl: u64) -> Self {
        self.ttl = Ttl::Millis(ttl);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_time_ms(mut self, stale_time_ms: u64) -> Self {
        self.stale_time_ms = stale_time_ms;
        self
    }

    pub fn refetch_on_mount(mut self, refetch: bool) -> Self {
        self.refetch_on_mount = refetch;
        self
    }

    pub fn refetch_on_window_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_window_focus = refetch;
        self
    }

    /// Cache write options derived from these fetch options.
    pub fn set_options(&self) -> SetOptions {
        SetOptions {
            ttl: self.ttl,
            storage: self.storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("cache-first".parse::<Strategy>(), Ok(Strategy::CacheFirst));
        assert_eq!("SWR".parse::<Strategy>(), Ok(Strategy::StaleWhileRevalidate));
        assert!("cache-maybe".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_strategy_serde_names() {
        let json = serde_json::to_string(&Strategy::StaleWhileRevalidate).unwrap();
        assert_eq!(json, "\"stale-while-revalidate\"");
        let back: Strategy = serde_json::from_str("\"network-only\"").unwrap();
        assert_eq!(back, Strategy::NetworkOnly);
    }

    #[test]
    fn test_defaults() {
        let options = FetchOptions::default();
        assert_eq!(options.strategy, Strategy::CacheFirst);
        assert!(options.enabled);
        assert!(!options.refetch_on_mount);
        assert!(!options.refetch_on_window_focus);
        assert_eq!(options.set_options(), SetOptions::default());
    }
}
