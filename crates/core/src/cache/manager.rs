//! Error-absorbing cache front used by every pipeline stage.
//!
//! A cache failure must never fail a fetch or a summary, so every store error
//! is logged and degraded to a miss (reads) or `false` (writes).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::connection::CacheStore;
use super::keys::CacheKeyBuilder;
use super::payload::{CachePayload, CacheRecord};
use crate::config::CacheSettings;

/// Point-in-time cache usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, schemars::JsonSchema)]
pub struct CacheStats {
    pub size_bytes: u64,
    /// `size_bytes` as a percentage of the configured maximum.
    pub usage_percent: f64,
    pub entry_count: u64,
}

/// Disk-backed cache with TTL expiry and size-bounded eviction.
#[derive(Clone, Debug)]
pub struct CacheManager {
    store: Option<CacheStore>,
    settings: CacheSettings,
}

impl CacheManager {
    /// Open the store under `settings.directory`.
    ///
    /// A disabled cache, or one whose store cannot be opened, runs in pass-through
    /// mode: every read misses and every write is dropped.
    pub async fn open(settings: CacheSettings) -> Self {
        if !settings.enabled {
            return Self::disabled(settings);
        }

        match CacheStore::open_dir(&settings.directory).await {
            Ok(store) => {
                tracing::info!(directory = %settings.directory.display(), "cache opened");
                Self { store: Some(store), settings }
            }
            Err(e) => {
                tracing::warn!(error = %e, directory = %settings.directory.display(), "cache unavailable, running without it");
                Self::disabled(settings)
            }
        }
    }

    /// In-memory store with the given limits. The `directory` setting is ignored.
    pub async fn open_in_memory(settings: CacheSettings) -> Self {
        if !settings.enabled {
            return Self::disabled(settings);
        }
        match CacheStore::open_in_memory().await {
            Ok(store) => Self { store: Some(store), settings },
            Err(e) => {
                tracing::warn!(error = %e, "in-memory cache unavailable");
                Self::disabled(settings)
            }
        }
    }

    pub fn disabled(settings: CacheSettings) -> Self {
        Self { store: None, settings }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.settings.default_ttl_secs)
    }

    /// Look up a logical key. Expired entries are removed and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<CachePayload> {
        self.get_record(key).await.map(|record| record.value)
    }

    /// Like [`get`](Self::get) but keeps the HTTP validators stored with the value.
    pub async fn get_record(&self, key: &str) -> Option<CacheRecord> {
        let store = self.store.as_ref()?;
        match store.get_entry(&CacheKeyBuilder::storage_key(key), unix_now()).await {
            Ok(Some(record)) => {
                tracing::debug!(key, "cache hit");
                Some(record)
            }
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                None
            }
        }
    }

    /// Store a value. `ttl` falls back to the configured default.
    pub async fn set(
        &self, key: &str, value: CachePayload, ttl: Option<Duration>, etag: Option<String>,
        last_modified: Option<String>,
    ) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };

        let now = unix_now();
        let record = CacheRecord {
            value,
            created_at: now,
            ttl_seconds: ttl.map_or(self.settings.default_ttl_secs, |d| d.as_secs()),
            etag,
            last_modified,
        };

        match store
            .put_entry(
                &CacheKeyBuilder::storage_key(key),
                &record,
                now,
                self.settings.max_size_bytes,
                self.settings.eviction_policy,
            )
            .await
        {
            Ok(outcome) => {
                if !outcome.stored {
                    tracing::warn!(key, limit = self.settings.max_size_bytes, "cache entry larger than cache, skipped");
                }
                outcome.stored
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache write failed");
                false
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?.into_json()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match serde_json::to_value(value) {
            Ok(json) => self.set(key, CachePayload::Json(json), ttl, None, None).await,
            Err(e) => {
                tracing::warn!(key, error = %e, "value not serializable for cache");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        store
            .delete_entry(&CacheKeyBuilder::storage_key(key))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(key, error = %e, "cache delete failed");
                false
            })
    }

    /// Remove expired entries.
    ///
    /// The count is a lower bound: entries expiring while the prune runs, or
    /// removed lazily by concurrent reads, are not included.
    pub async fn prune(&self) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        match store.prune_expired(unix_now()).await {
            Ok(count) => {
                tracing::info!(pruned = count, "cache pruned");
                count
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache prune failed");
                0
            }
        }
    }

    pub async fn clear(&self) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        store.clear_entries().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cache clear failed");
            0
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let (size_bytes, entry_count) = match self.store.as_ref() {
            Some(store) => store.entry_totals().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cache stats failed");
                (0, 0)
            }),
            None => (0, 0),
        };

        let usage_percent = if self.settings.max_size_bytes == 0 {
            0.0
        } else {
            size_bytes as f64 / self.settings.max_size_bytes as f64 * 100.0
        };

        CacheStats { size_bytes, usage_percent, entry_count }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionPolicy;
    use serde::Deserialize;

    fn settings(max_size_bytes: u64, policy: EvictionPolicy) -> CacheSettings {
        CacheSettings { max_size_bytes, eviction_policy: policy, ..Default::default() }
    }

    async fn manager() -> CacheManager {
        CacheManager::open_in_memory(settings(1_000_000, EvictionPolicy::Lru)).await
    }

    #[tokio::test]
    async fn test_round_trip_each_payload_kind() {
        let cache = manager().await;

        let bytes = vec![0u8, 255, 10, 13, 0];
        assert!(cache.set("b", CachePayload::Binary(bytes.clone()), None, None, None).await);
        assert!(cache.set("t", CachePayload::Text("héllo".into()), None, None, None).await);
        assert!(cache.set("j", CachePayload::Json(serde_json::json!({"a": [1, 2]})), None, None, None).await);

        assert_eq!(cache.get("b").await, Some(CachePayload::Binary(bytes)));
        assert_eq!(cache.get("t").await, Some(CachePayload::Text("héllo".into())));
        assert_eq!(cache.get("j").await, Some(CachePayload::Json(serde_json::json!({"a": [1, 2]}))));
    }

    #[tokio::test]
    async fn test_validators_kept() {
        let cache = manager().await;
        cache
            .set("k", CachePayload::Text("v".into()), None, Some("\"abc\"".into()), Some("Tue".into()))
            .await;
        let record = cache.get_record("k").await.unwrap();
        assert_eq!(record.etag.as_deref(), Some("\"abc\""));
        assert_eq!(record.last_modified.as_deref(), Some("Tue"));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = manager().await;
        cache
            .set("k", CachePayload::Text("v".into()), Some(Duration::from_secs(1)), None, None)
            .await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Page {
            title: String,
            words: u32,
        }

        let cache = manager().await;
        let page = Page { title: "Intro".into(), words: 42 };
        assert!(cache.set_json("page", &page, None).await);
        assert_eq!(cache.get_json::<Page>("page").await, Some(page));
        assert!(cache.get_json::<Vec<u8>>("page").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = manager().await;
        cache.set("a", CachePayload::Text("1".into()), None, None, None).await;
        cache.set("b", CachePayload::Text("2".into()), None, None, None).await;

        assert!(cache.delete("a").await);
        assert!(!cache.delete("a").await);
        assert_eq!(cache.clear().await, 1);
        assert_eq!(cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_prune_removes_expired() {
        let cache = manager().await;
        cache.set("short", CachePayload::Text("x".into()), Some(Duration::ZERO), None, None).await;
        cache.set("long", CachePayload::Text("y".into()), None, None, None).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.prune().await >= 1);
        assert_eq!(cache.stats().await.entry_count, 1);
    }

    #[tokio::test]
    async fn test_stats_usage() {
        let cache = CacheManager::open_in_memory(settings(10_000, EvictionPolicy::Lru)).await;
        cache.set("a", CachePayload::Text("x".repeat(100)), None, None, None).await;
        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert!(stats.size_bytes > 100);
        assert!(stats.usage_percent > 1.0 && stats.usage_percent < 100.0);
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_read() {
        // Each record is ~100 bytes of JSON; room for two.
        let cache = CacheManager::open_in_memory(settings(260, EvictionPolicy::Lru)).await;
        let value = || CachePayload::Text("v".repeat(20));

        cache.set("a", value(), None, None, None).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set("b", value(), None, None, None).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("a").await.is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;

        cache.set("c", value(), None, None, None).await;

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
        assert!(cache.stats().await.size_bytes <= 260);
    }

    #[tokio::test]
    async fn test_lfu_evicts_least_frequently_read() {
        let cache = CacheManager::open_in_memory(settings(260, EvictionPolicy::Lfu)).await;
        let value = || CachePayload::Text("v".repeat(20));

        cache.set("a", value(), None, None, None).await;
        cache.set("b", value(), None, None, None).await;
        for _ in 0..3 {
            cache.get("a").await;
        }
        cache.get("b").await;

        cache.set("c", value(), None, None, None).await;

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_is_pass_through() {
        let cache = CacheManager::open(CacheSettings { enabled: false, ..Default::default() }).await;
        assert!(!cache.is_enabled());
        assert!(!cache.set("k", CachePayload::Text("v".into()), None, None, None).await);
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.prune().await, 0);
        assert_eq!(cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CacheSettings { directory: dir.path().to_path_buf(), ..Default::default() };

        let cache = CacheManager::open(settings.clone()).await;
        cache.set("k", CachePayload::Text("disk".into()), None, None, None).await;
        drop(cache);

        let reopened = CacheManager::open(settings).await;
        assert_eq!(reopened.get("k").await, Some(CachePayload::Text("disk".into())));
    }
}
