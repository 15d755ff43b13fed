//! sieve server entry point.
//!
//! This is the main binary that boots the MCP server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use sieve_client::Pipeline;
use sieve_core::{AppConfig, Authenticator};
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    if let Err(e) = config.require_summarizer_key() {
        tracing::warn!(error = %e, "no summarizer API key; backend calls will be unauthenticated");
    }

    tracing::info!("Starting sieve server on stdio transport");

    let state = Arc::new(handler::AppState {
        pipeline: Pipeline::from_config(&config).await,
        auth: Authenticator::from_settings(&config.auth),
    });
    let handler = handler::SieveServer::new(state.clone());
    let server = serve_server(handler, stdio()).await?;

    server.waiting().await?;

    state.pipeline.shutdown().await;
    Ok(())
}
