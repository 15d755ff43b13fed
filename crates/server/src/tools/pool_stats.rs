//! pool_stats tool implementation.
//!
//! Reports connection and browser pool occupancy plus per-operation metrics.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;
use sieve_client::{Pipeline, PoolStats};
use sieve_core::Error;
use sieve_core::metrics::OperationStats;

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatsOutput {
    pub connections: PoolStats,
    /// Absent when rendering is disabled.
    pub browser: Option<PoolStats>,
    pub operations: Vec<OperationStats>,
}

pub fn pool_stats_impl(pipeline: &Pipeline) -> Result<CallToolResult, McpError> {
    let output = PoolStatsOutput {
        connections: pipeline.pool().stats(),
        browser: pipeline.browser().map(|b| b.stats()),
        operations: pipeline.metrics().snapshot(),
    };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::Serialization(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{TestBackend, state, text_of};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_idle_pipeline_stats() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), &[], Arc::new(TestBackend::default())).await;

        let result = pool_stats_impl(&state.pipeline).unwrap();
        let output: serde_json::Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(output["connections"]["active"], 0);
        assert!(output["browser"].is_null());
        assert_eq!(output["operations"], serde_json::json!([]));
    }
}
