//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::tools::{CachePruneParams, SummarizeParams, pool_stats_impl, prune_impl, stats_impl, summarize_impl};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use sieve_client::Pipeline;
use sieve_core::Authenticator;

/// Long-lived components shared by every tool call.
pub struct AppState {
    pub pipeline: Pipeline,
    pub auth: Authenticator,
}

/// The main MCP server handler for sieve.
#[derive(Clone)]
pub struct SieveServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl SieveServer {
    /// Create a new server handler.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state, tool_router: Self::tool_router() }
    }

    /// Fetch, extract, chunk and summarize a batch of locations.
    ///
    /// Per-location failures are reported inline; the call fails only for bad
    /// input, authentication, or a summarization error.
    #[tool(
        description = "Summarize one or more URLs or local files together. Optional `query` focuses the summary. Returns the summary and a status per location."
    )]
    async fn summarize(&self, params: Parameters<SummarizeParams>) -> Result<CallToolResult, McpError> {
        summarize_impl(&self.state, params.0).await
    }

    #[tool(description = "Report cache size, usage against the configured bound, and entry count.")]
    async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        stats_impl(self.state.pipeline.cache()).await
    }

    #[tool(description = "Remove expired cache entries, or every entry when `clear` is true. Returns the number removed.")]
    async fn cache_prune(&self, params: Parameters<CachePruneParams>) -> Result<CallToolResult, McpError> {
        prune_impl(self.state.pipeline.cache(), params.0).await
    }

    #[tool(description = "Report connection and browser pool occupancy and per-operation latency metrics.")]
    async fn pool_stats(&self) -> Result<CallToolResult, McpError> {
        pool_stats_impl(&self.state.pipeline)
    }
}

impl ServerHandler for SieveServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "sieve".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{TestBackend, state};

    #[tokio::test]
    async fn test_all_tools_registered() {
        let dir = tempfile::tempdir().unwrap();
        let server = SieveServer::new(Arc::new(state(dir.path(), &[], Arc::new(TestBackend::default())).await));

        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, ["cache_prune", "cache_stats", "pool_stats", "summarize"]);
    }
}
