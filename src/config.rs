//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::StorageKind;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace prefix prepended to every logical key
    pub cache_prefix: String,
    /// Entry format version; entries written with another version are discarded
    pub cache_version: u32,
    /// Backend used when a call does not name one
    pub default_storage: StorageKind,
    /// Default TTL in milliseconds, None = entries never expire by default
    pub default_ttl_ms: Option<u64>,
    /// Maximum number of entries held by the memory backend
    pub memory_max_entries: usize,
    /// Byte quota of the local storage area
    pub local_quota_bytes: usize,
    /// Byte quota of the session storage area
    pub session_quota_bytes: usize,
    /// SQLite file for the durable backend, None = in-memory database
    pub durable_path: Option<PathBuf>,
    /// Maximum bytes the durable backend may consume
    pub durable_max_bytes: u64,
    /// Periodic warm-cache refresh interval in seconds
    pub refresh_interval: u64,
    /// Background expired-entry cleanup interval in seconds
    pub cleanup_interval: u64,
    /// Fallback delay before deferred warming runs, in milliseconds
    pub deferred_delay_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_PREFIX` - Key namespace (default: `app_cache_`)
    /// - `CACHE_VERSION` - Entry format version (default: 1)
    /// - `DEFAULT_STORAGE` - `memory`, `local`, `session` or `durable` (default: memory)
    /// - `DEFAULT_TTL_MS` - Default TTL in ms, 0 disables expiry (default: 300000)
    /// - `MEMORY_MAX_ENTRIES` - Memory backend bound (default: 100)
    /// - `LOCAL_QUOTA_BYTES` / `SESSION_QUOTA_BYTES` - Storage area quotas (default: 5 MiB)
    /// - `DURABLE_PATH` - SQLite file path (default: in-memory)
    /// - `DURABLE_MAX_BYTES` - Durable quota (default: 50 MiB)
    /// - `REFRESH_INTERVAL_SECS` - Warm-cache refresh period (default: 1800)
    /// - `CLEANUP_INTERVAL_SECS` - Expired-entry sweep period (default: 60)
    /// - `DEFERRED_DELAY_MS` - Deferred warming fallback delay (default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let default_ttl_ms = match env_or("DEFAULT_TTL_MS", 300_000u64) {
            0 => None,
            ttl => Some(ttl),
        };

        Self {
            cache_prefix: env::var("CACHE_PREFIX").unwrap_or(defaults.cache_prefix),
            cache_version: env_or("CACHE_VERSION", defaults.cache_version),
            default_storage: env_or("DEFAULT_STORAGE", defaults.default_storage),
            default_ttl_ms,
            memory_max_entries: env_or("MEMORY_MAX_ENTRIES", defaults.memory_max_entries),
            local_quota_bytes: env_or("LOCAL_QUOTA_BYTES", defaults.local_quota_bytes),
            session_quota_bytes: env_or("SESSION_QUOTA_BYTES", defaults.session_quota_bytes),
            durable_path: env::var("DURABLE_PATH").ok().map(PathBuf::from),
            durable_max_bytes: env_or("DURABLE_MAX_BYTES", defaults.durable_max_bytes),
            refresh_interval: env_or("REFRESH_INTERVAL_SECS", defaults.refresh_interval),
            cleanup_interval: env_or("CLEANUP_INTERVAL_SECS", defaults.cleanup_interval),
            deferred_delay_ms: env_or("DEFERRED_DELAY_MS", defaults.deferred_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_prefix: "app_cache_".to_string(),
            cache_version: 1,
            default_storage: StorageKind::Memory,
            default_ttl_ms: Some(300_000),
            memory_max_entries: 100,
            local_quota_bytes: 5 * 1024 * 1024,
            session_quota_bytes: 5 * 1024 * 1024,
            durable_path: None,
            durable_max_bytes: 50 * 1024 * 1024,
            refresh_interval: 1800,
            cleanup_interval: 60,
            deferred_delay_ms: 2000,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
