//! cache_stats tool implementation.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;
use sieve_core::{CacheManager, CacheStats, Error};

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsOutput {
    /// False when the store could not be opened and the cache runs disabled.
    pub enabled: bool,
    #[serde(flatten)]
    pub stats: CacheStats,
}

pub async fn stats_impl(cache: &CacheManager) -> Result<CallToolResult, McpError> {
    let output = CacheStatsOutput { enabled: cache.is_enabled(), stats: cache.stats().await };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::Serialization(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
