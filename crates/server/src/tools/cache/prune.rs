//! cache_prune tool implementation.
//!
//! Removes expired entries, or every entry when `clear` is set.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sieve_core::{CacheManager, Error};

/// Parameters for the cache_prune tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CachePruneParams {
    /// Drop every entry instead of only expired ones.
    #[serde(default)]
    pub clear: bool,
}

/// Output from the cache_prune tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePruneOutput {
    /// Entries removed. For expiry pruning this is a lower bound.
    pub deleted: u64,
}

pub async fn prune_impl(cache: &CacheManager, params: CachePruneParams) -> Result<CallToolResult, McpError> {
    let deleted = if params.clear { cache.clear().await } else { cache.prune().await };
    tracing::info!(deleted, clear = params.clear, "cache pruned");

    let json = serde_json::to_string_pretty(&CachePruneOutput { deleted })
        .map_err(|e| Error::Serialization(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::text_of;
    use sieve_core::CachePayload;
    use sieve_core::config::CacheSettings;
    use std::time::Duration;

    async fn seeded() -> CacheManager {
        let cache = CacheManager::open_in_memory(CacheSettings::default()).await;
        cache.set("a", CachePayload::Text("kept".into()), None, None, None).await;
        cache
            .set("b", CachePayload::Text("expired".into()), Some(Duration::ZERO), None, None)
            .await;
        cache
    }

    fn deleted(result: &CallToolResult) -> u64 {
        serde_json::from_str::<CachePruneOutput>(&text_of(result)).unwrap().deleted
    }

    #[tokio::test]
    async fn test_prune_removes_only_expired() {
        let cache = seeded().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = prune_impl(&cache, CachePruneParams::default()).await.unwrap();
        assert_eq!(deleted(&result), 1);
        assert!(cache.get("a").await.is_some());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let cache = seeded().await;
        let result = prune_impl(&cache, CachePruneParams { clear: true }).await.unwrap();
        assert_eq!(deleted(&result), 2);
        assert_eq!(cache.stats().await.entry_count, 0);
    }
}
