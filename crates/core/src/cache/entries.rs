//! Key-value entry operations on the cache store.
//!
//! Keys arriving here are already hashed. Records are stored as JSON text with
//! their bookkeeping columns (size, timestamps, access counters) alongside so
//! eviction and expiry never need to decode a record.

use super::connection::CacheStore;
use super::payload::CacheRecord;
use crate::Error;
use crate::config::EvictionPolicy;
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use tokio_rusqlite::{params, params_from_iter};

/// Outcome of writing an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    pub stored: bool,
    pub evicted: u64,
}

impl CacheStore {
    /// Read a live record, bumping its access bookkeeping.
    ///
    /// An expired record is deleted and reported as absent.
    pub async fn get_entry(&self, key: &str, now: f64) -> Result<Option<CacheRecord>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheRecord>, Error> {
                let row: Option<(String, f64, i64)> = conn
                    .query_row(
                        "SELECT record, created_at, ttl_seconds FROM cache_entries WHERE key = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                let Some((raw, created_at, ttl_seconds)) = row else {
                    return Ok(None);
                };

                if now - created_at > ttl_seconds as f64 {
                    conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                    return Ok(None);
                }

                conn.execute(
                    "UPDATE cache_entries SET accessed_at = ?2, access_count = access_count + 1 WHERE key = ?1",
                    params![key, now],
                )?;

                Ok(Some(serde_json::from_str(&raw)?))
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace a record, then evict until the store fits `max_size_bytes`.
    ///
    /// The entry just written is never chosen as an eviction victim. A record
    /// larger than the whole budget is refused and any older value under the
    /// same key is dropped with it.
    pub async fn put_entry(
        &self, key: &str, record: &CacheRecord, now: f64, max_size_bytes: u64, policy: EvictionPolicy,
    ) -> Result<PutOutcome, Error> {
        let key = key.to_string();
        let raw = serde_json::to_string(record)?;
        let created_at = record.created_at;
        let ttl_seconds = record.ttl_seconds as i64;
        let budget = max_size_bytes as i64;

        self.conn
            .call(move |conn| -> Result<PutOutcome, Error> {
                let size = raw.len() as i64;
                let tx = conn.transaction()?;

                if size > budget {
                    tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                    tx.commit()?;
                    return Ok(PutOutcome { stored: false, evicted: 0 });
                }

                tx.execute(
                    "INSERT INTO cache_entries (key, record, size_bytes, created_at, ttl_seconds, accessed_at, access_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
                     ON CONFLICT(key) DO UPDATE SET
                        record = excluded.record,
                        size_bytes = excluded.size_bytes,
                        created_at = excluded.created_at,
                        ttl_seconds = excluded.ttl_seconds,
                        accessed_at = excluded.accessed_at,
                        access_count = 0",
                    params![key, raw, size, created_at, ttl_seconds, now],
                )?;

                let evicted = evict_over_budget(&tx, &key, budget, policy)?;
                tx.commit()?;
                Ok(PutOutcome { stored: true, evicted })
            })
            .await
            .map_err(Error::from)
    }

    /// Returns whether a row was removed.
    pub async fn delete_entry(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                Ok(conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])? > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every record whose TTL elapsed before `now`.
    pub async fn prune_expired(&self, now: f64) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE ?1 - created_at > ttl_seconds",
                    params![now],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn clear_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> { Ok(conn.execute("DELETE FROM cache_entries", [])? as u64) })
            .await
            .map_err(Error::from)
    }

    /// Total stored bytes and entry count.
    pub async fn entry_totals(&self) -> Result<(u64, u64), Error> {
        self.conn
            .call(|conn| -> Result<(u64, u64), Error> {
                let (size, count): (i64, i64) = conn.query_row(
                    "SELECT COALESCE(SUM(size_bytes), 0), COUNT(*) FROM cache_entries",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok((size.max(0) as u64, count.max(0) as u64))
            })
            .await
            .map_err(Error::from)
    }
}

fn evict_over_budget(
    tx: &rusqlite::Transaction<'_>, keep: &str, budget: i64, policy: EvictionPolicy,
) -> Result<u64, Error> {
    let mut total: i64 = tx.query_row("SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries", [], |row| row.get(0))?;
    if total <= budget {
        return Ok(0);
    }

    let order = match policy {
        EvictionPolicy::Lru => "accessed_at ASC",
        EvictionPolicy::Lfu => "access_count ASC, accessed_at ASC",
    };
    let sql = format!("SELECT key, size_bytes FROM cache_entries WHERE key != ?1 ORDER BY {order}");

    let mut victims = Vec::new();
    {
        let mut stmt = tx.prepare(&sql)?;
        let mut rows = stmt.query(params![keep])?;
        while total > budget {
            let Some(row) = rows.next()? else { break };
            let key: String = row.get(0)?;
            let size: i64 = row.get(1)?;
            total -= size;
            victims.push(key);
        }
    }

    if victims.is_empty() {
        return Ok(0);
    }

    let placeholders = vec!["?"; victims.len()].join(",");
    let deleted = tx.execute(
        &format!("DELETE FROM cache_entries WHERE key IN ({placeholders})"),
        params_from_iter(victims.iter()),
    )?;
    tracing::debug!(evicted = deleted, ?policy, "cache eviction");
    Ok(deleted as u64)
}
