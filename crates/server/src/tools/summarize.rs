//! summarize tool implementation.
//!
//! Runs the whole pipeline over a batch of locations and returns the summary
//! together with a status for every location.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sieve_client::LocationStatus;
use sieve_core::{Authenticator, Error};

use crate::handler::AppState;

/// Input parameters for the summarize tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummarizeParams {
    /// URLs, absolute paths or `file://` URLs to summarize together.
    pub locations: Vec<String>,

    /// Optional question to focus the summary on.
    #[serde(default)]
    pub query: Option<String>,

    /// API key (`Bearer <key>` or bare). Required when keys are configured.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Output structure for the summarize tool.
#[derive(Debug, Clone, Serialize)]
pub struct SummarizeOutput {
    /// Absent when every location failed.
    pub summary: Option<String>,
    /// One entry per requested location, in request order.
    pub statuses: Vec<LocationStatus>,
}

/// Reject the call unless auth is off or the token is valid and within budget.
pub fn authorize(auth: &Authenticator, token: Option<&str>) -> Result<(), Error> {
    if !auth.is_enabled() {
        return Ok(());
    }
    let token = token.ok_or(Error::Unauthenticated)?;
    match auth.authenticate(token)? {
        Some(record) => {
            tracing::debug!(key = %record.name, "request authenticated");
            Ok(())
        }
        None => Err(Error::Unauthenticated),
    }
}

pub async fn summarize_impl(state: &AppState, params: SummarizeParams) -> Result<CallToolResult, McpError> {
    authorize(&state.auth, params.auth_token.as_deref())?;

    let batch = state.pipeline.summarize(&params.locations, params.query.as_deref()).await?;
    let summary = match batch.stream {
        Some(stream) => Some(stream.into_text().await?),
        None => None,
    };

    let output = SummarizeOutput { summary, statuses: batch.statuses };
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
    async fn test_summarize_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "# Notes\n\nThe pool keeps one shared client.\n").unwrap();

        let backend = Arc::new(TestBackend::default());
        let state = state(dir.path(), &[], backend.clone()).await;
        let params = SummarizeParams {
            locations: vec![file.display().to_string(), dir.path().join("nope.md").display().to_string()],
            query: None,
            auth_token: None,
        };

        let result = summarize_impl(&state, params).await.unwrap();
        let output: serde_json::Value = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(output["summary"], "short summary");
        assert_eq!(output["statuses"][0]["status"], "ok");
        assert_eq!(output["statuses"][0]["fetch_method"], "filesystem");
        assert_eq!(output["statuses"][1]["status"], "failed");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_locations_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), &[], Arc::new(TestBackend::default())).await;
        let params = SummarizeParams { locations: Vec::new(), query: None, auth_token: None };
        let err = summarize_impl(&state, params).await.unwrap_err();
        assert!(err.message.contains("INVALID_INPUT"));
    }

    #[tokio::test]
    async fn test_auth_enforced_when_keys_configured() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), &["k1"], Arc::new(TestBackend::default())).await;

        let missing = SummarizeParams { locations: vec!["/x".into()], query: None, auth_token: None };
        let err = summarize_impl(&state, missing).await.unwrap_err();
        assert!(err.message.contains("UNAUTHENTICATED"));

        let wrong = SummarizeParams { locations: vec!["/x".into()], query: None, auth_token: Some("k2".into()) };
        assert!(summarize_impl(&state, wrong).await.is_err());

        assert!(authorize(&state.auth, Some("Bearer k1")).is_ok());
    }

    #[test]
    fn test_authorize_open_when_no_keys() {
        let auth = Authenticator::new(1, std::time::Duration::from_secs(60));
        assert!(authorize(&auth, None).is_ok());
    }
}
