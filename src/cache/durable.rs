//! Durable Backend Module
//!
//! Asynchronous SQLite-backed record store with quota accounting and
//! least-recently-accessed eviction.
//!
//! Every operation runs on tokio's blocking pool against a single shared
//! connection. The connection is opened lazily by [`DurableStore::init`] and
//! memoized, so concurrent callers never open duplicate handles.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::cache::entry::current_timestamp_ms;
use crate::error::{CacheError, Result};

/// Schema version stored in `PRAGMA user_version`.
pub const DB_VERSION: i64 = 1;

/// Fraction of records dropped by one eviction pass.
const EVICTION_FRACTION: f64 = 0.25;

const SCHEMA: &str = r#"
DROP TABLE IF EXISTS cache_entries;

CREATE TABLE cache_entries (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    ttl INTEGER,
    size INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed INTEGER NOT NULL
);

CREATE INDEX idx_cache_entries_timestamp ON cache_entries(timestamp);
CREATE INDEX idx_cache_entries_size ON cache_entries(size);
CREATE INDEX idx_cache_entries_ttl ON cache_entries(ttl);
CREATE INDEX idx_cache_entries_last_accessed ON cache_entries(last_accessed);
"#;

/// Expiry predicate shared by every query; `?1` is the current time.
const EXPIRED: &str = "ttl IS NOT NULL AND ?1 - timestamp > ttl";

/// Connection handle shared with blocking tasks.
pub type SharedConnection = Arc<Mutex<Connection>>;

// == Durable Stats ==
/// Aggregate view of the durable store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableStats {
    pub total_entries: usize,
    /// Human-readable total, e.g. `"1.50 MB"`
    pub total_size: String,
    pub total_size_bytes: u64,
    /// Entries past their TTL that have not been purged yet
    pub expired_count: usize,
    pub max_size: String,
    /// Percentage of `max_size` in use, two decimals
    pub usage_percent: String,
}

// == Durable Record ==
/// A stored payload together with the row's bookkeeping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DurableRecord {
    pub data: Value,
    pub timestamp: u64,
    pub ttl: Option<u64>,
    pub access_count: u64,
    pub last_accessed: u64,
}

// == Durable Store ==
/// SQLite record store keyed by `key`, indexed by `timestamp`, `size`, `ttl`.
#[derive(Debug)]
pub struct DurableStore {
    /// Database file, None = private in-memory database
    path: Option<PathBuf>,
    /// Maximum bytes of payload this store may hold
    max_bytes: u64,
    conn: OnceCell<SharedConnection>,
    evictions: Arc<AtomicU64>,
}

impl DurableStore {
    // == Constructor ==
    /// Creates an unopened store. Nothing touches disk until [`init`](Self::init).
    pub fn new(path: Option<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path,
            max_bytes,
            conn: OnceCell::new(),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory(max_bytes: u64) -> Self {
        Self::new(None, max_bytes)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Records removed by quota eviction since this store was created.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    // == Init ==
    /// Opens the database and creates the schema on first use or version bump.
    ///
    /// Idempotent. A failed open is not memoized, so every later operation
    /// retries and reports the same `Unavailable` error.
    pub async fn init(&self) -> Result<SharedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| {
                let path = self.path.clone();
                async move {
                    let conn = tokio::task::spawn_blocking(move || open_database(path)).await??;
                    Ok::<_, CacheError>(Arc::new(Mutex::new(conn)))
                }
            })
            .await?;
        Ok(Arc::clone(conn))
    }

    /// Runs `op` on the blocking pool with the locked connection.
    async fn with_conn<R, F>(&self, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
    {
        let shared = self.init().await?;
        tokio::task::spawn_blocking(move || {
            let mut conn = shared
                .lock()
                .map_err(|_| CacheError::Task("database lock poisoned".to_string()))?;
            op(&mut conn)
        })
        .await?
    }

    // == Set ==
    /// Writes `data` under `key`, evicting least-recently-accessed records
    /// first when the quota would be exceeded.
    pub async fn set(&self, key: &str, data: &Value, ttl: Option<u64>) -> Result<()> {
        let serialized = serde_json::to_string(data)?;
        let size = serialized.len() as u64;
        let key = key.to_string();
        let max_bytes = self.max_bytes;
        let evictions = Arc::clone(&self.evictions);
        // SQLite integers are signed; anything larger never expires in practice
        let ttl = ttl.map(|t| i64::try_from(t).unwrap_or(i64::MAX));

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let available = available_bytes(&tx, &key, max_bytes)?;
            if size > available {
                let removed = evict_lru(&tx)?;
                evictions.fetch_add(removed as u64, Ordering::Relaxed);
                info!(removed, needed = size, available, "durable store evicted entries");

                let available = available_bytes(&tx, &key, max_bytes)?;
                if size > available {
                    return Err(CacheError::QuotaExceeded {
                        needed: size,
                        available,
                    });
                }
            }

            let now = current_timestamp_ms() as i64;
            tx.execute(
                "INSERT OR REPLACE INTO cache_entries
                    (key, data, timestamp, ttl, size, access_count, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?3)",
                params![key, serialized, now, ttl, size as i64],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // == Get ==
    /// Returns the record, purging it instead if its TTL has elapsed.
    ///
    /// A hit increments `access_count` and refreshes `last_accessed`; the
    /// returned record already reflects the update.
    pub async fn get(&self, key: &str) -> Result<Option<DurableRecord>> {
        let key = key.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let row: Option<(String, i64, Option<i64>, i64)> = tx
                .query_row(
                    "SELECT data, timestamp, ttl, access_count FROM cache_entries WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let Some((raw, timestamp, ttl, access_count)) = row else {
                return Ok(None);
            };

            let now = current_timestamp_ms() as i64;
            if ttl.map_or(false, |ttl| now - timestamp > ttl) {
                tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                tx.commit()?;
                debug!(key = %key, "durable entry expired");
                return Ok(None);
            }

            let data = match serde_json::from_str(&raw) {
                Ok(data) => data,
                Err(err) => {
                    warn!(key = %key, error = %err, "dropping corrupted durable record");
                    tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                    tx.commit()?;
                    return Ok(None);
                }
            };

            tx.execute(
                "UPDATE cache_entries
                 SET access_count = access_count + 1, last_accessed = ?2
                 WHERE key = ?1",
                params![key, now],
            )?;
            tx.commit()?;
            Ok(Some(DurableRecord {
                data,
                timestamp: timestamp.max(0) as u64,
                ttl: ttl.map(|ttl| ttl.max(0) as u64),
                access_count: access_count.max(0) as u64 + 1,
                last_accessed: now.max(0) as u64,
            }))
        })
        .await
    }

    /// Reads a live record without touching access statistics or purging.
    pub async fn peek(&self, key: &str) -> Result<Option<DurableRecord>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let now = current_timestamp_ms() as i64;
            let row: Option<(String, i64, Option<i64>, i64, i64)> = conn
                .query_row(
                    &format!(
                        "SELECT data, timestamp, ttl, access_count, last_accessed
                         FROM cache_entries WHERE key = ?2 AND NOT ({EXPIRED})"
                    ),
                    params![now, key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )
                .optional()?;

            let Some((raw, timestamp, ttl, access_count, last_accessed)) = row else {
                return Ok(None);
            };
            Ok(Some(DurableRecord {
                data: serde_json::from_str(&raw)?,
                timestamp: timestamp.max(0) as u64,
                ttl: ttl.map(|ttl| ttl.max(0) as u64),
                access_count: access_count.max(0) as u64,
                last_accessed: last_accessed.max(0) as u64,
            }))
        })
        .await
    }

    // == Delete ==
    /// Removes a record, returning whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            Ok(removed > 0)
        })
        .await
    }

    // == Clear ==
    /// Removes every record.
    pub async fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache_entries", [])?;
            Ok(())
        })
        .await
    }

    /// All stored keys, oldest write first.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM cache_entries ORDER BY timestamp, key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }

    // == Clean Expired ==
    /// Deletes every record whose TTL has elapsed, returning the count removed.
    pub async fn clean_expired(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let now = current_timestamp_ms() as i64;
            let removed = conn.execute(
                &format!("DELETE FROM cache_entries WHERE {EXPIRED}"),
                params![now],
            )?;
            Ok(removed)
        })
        .await
    }

    // == Stats ==
    /// Aggregates entry count, byte usage and pending-expiry count.
    pub async fn stats(&self) -> Result<DurableStats> {
        let max_bytes = self.max_bytes;
        self.with_conn(move |conn| {
            let now = current_timestamp_ms() as i64;
            let (total_entries, total_bytes): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM cache_entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let expired_count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM cache_entries WHERE {EXPIRED}"),
                params![now],
                |row| row.get(0),
            )?;

            let usage = if max_bytes == 0 {
                0.0
            } else {
                total_bytes as f64 / max_bytes as f64 * 100.0
            };

            Ok(DurableStats {
                total_entries: total_entries as usize,
                total_size: format_bytes(total_bytes as u64),
                total_size_bytes: total_bytes as u64,
                expired_count: expired_count as usize,
                max_size: format_bytes(max_bytes),
                usage_percent: format!("{usage:.2}"),
            })
        })
        .await
    }
}

// == Helpers ==
fn open_database(path: Option<PathBuf>) -> Result<Connection> {
    let conn = match &path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CacheError::Unavailable(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
            Connection::open(path)
        }
        None => Connection::open_in_memory(),
    }
    .map_err(|e| CacheError::Unavailable(format!("failed to open cache database: {e}")))?;

    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < DB_VERSION {
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", DB_VERSION)?;
        info!(from = version, to = DB_VERSION, "durable cache schema created");
    }

    Ok(conn)
}

/// Bytes still free for `key`, crediting the size of any record it replaces.
fn available_bytes(conn: &Connection, key: &str, max_bytes: u64) -> Result<u64> {
    let (total, existing): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(size), 0),
                COALESCE(SUM(CASE WHEN key = ?1 THEN size ELSE 0 END), 0)
         FROM cache_entries",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let used = (total - existing).max(0) as u64;
    Ok(max_bytes.saturating_sub(used))
}

/// Drops the 25% (rounded up) least recently accessed records.
fn evict_lru(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
    let to_remove = (count as f64 * EVICTION_FRACTION).ceil() as i64;
    if to_remove == 0 {
        return Ok(0);
    }

    let removed = conn.execute(
        "DELETE FROM cache_entries WHERE key IN (
            SELECT key FROM cache_entries ORDER BY last_accessed ASC, timestamp ASC LIMIT ?1
         )",
        params![to_remove],
    )?;
    Ok(removed)
}

/// Formats a byte count with binary units, e.g. `1536` -> `"1.50 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} Bytes")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
