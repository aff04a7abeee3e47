//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache backends.
///
/// The `CacheManager` façade absorbs all of these and reports `false`/`None`;
/// they only surface to callers that talk to a backend directly.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The durable store could not be opened
    #[error("Durable storage unavailable: {0}")]
    Unavailable(String),

    /// A durable-store transaction failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload could not be serialized or stored JSON is corrupted
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not enough quota left even after eviction
    #[error("Quota exceeded: needed {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    /// A blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),

    /// Key is empty or too long
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        CacheError::Task(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
