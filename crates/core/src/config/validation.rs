//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for the first rule that fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fetch = &self.fetch;
        if fetch.user_agent.is_empty() {
            return Err(invalid("fetch.user_agent", "must not be empty"));
        }
        if fetch.max_bytes == 0 || fetch.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("fetch.max_bytes", "must be between 1 byte and 50MB"));
        }
        if fetch.timeout_ms < 100 || fetch.timeout_ms > 300_000 {
            return Err(invalid("fetch.timeout_ms", "must be between 100ms and 5 minutes (300000ms)"));
        }
        if fetch.max_concurrent == 0 {
            return Err(invalid("fetch.max_concurrent", "must be at least 1"));
        }
        if fetch.max_file_size == 0 {
            return Err(invalid("fetch.max_file_size", "must be greater than 0"));
        }
        if fetch.filesystem_enabled && fetch.allowed_directories.is_empty() {
            tracing::warn!("filesystem fetch enabled with no allowed_directories; every local path will be rejected");
        }

        if self.pool.max_connections == 0 {
            return Err(invalid("pool.max_connections", "must be at least 1"));
        }
        if self.pool.connect_timeout_ms == 0 || self.pool.pool_wait_timeout_ms == 0 {
            return Err(invalid("pool", "timeouts must be greater than 0"));
        }

        if self.browser.enabled && self.browser.pool_size == 0 {
            return Err(invalid("browser.pool_size", "must be at least 1 when the browser is enabled"));
        }

        let chunker = &self.chunker;
        if chunker.chunk_size == 0 {
            return Err(invalid("chunker.chunk_size", "must be greater than 0"));
        }
        if chunker.min_chunk_size > chunker.chunk_size || chunker.chunk_size > chunker.max_chunk_size {
            return Err(invalid(
                "chunker.chunk_size",
                "must satisfy min_chunk_size <= chunk_size <= max_chunk_size",
            ));
        }
        if chunker.chunk_overlap >= chunker.chunk_size {
            return Err(invalid("chunker.chunk_overlap", "must be smaller than chunk_size"));
        }

        let summarizer = &self.summarizer;
        if summarizer.model.is_empty() {
            return Err(invalid("summarizer.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&summarizer.temperature) {
            return Err(invalid("summarizer.temperature", "must be between 0.0 and 2.0"));
        }
        if summarizer.max_tokens == 0 {
            return Err(invalid("summarizer.max_tokens", "must be greater than 0"));
        }
        if summarizer.map_concurrency == 0 {
            return Err(invalid("summarizer.map_concurrency", "must be at least 1"));
        }
        if url::Url::parse(&summarizer.endpoint).is_err() {
            return Err(invalid("summarizer.endpoint", "must be an absolute URL"));
        }

        if self.cache.max_size_bytes == 0 {
            return Err(invalid("cache.max_size_bytes", "must be greater than 0"));
        }
        if self.cache.default_ttl_secs == 0 {
            return Err(invalid("cache.default_ttl_secs", "must be greater than 0"));
        }

        if self.auth.window_seconds == 0 {
            return Err(invalid("auth.window_seconds", "must be greater than 0"));
        }
        if self.auth.api_keys.iter().any(|k| k.trim().is_empty()) {
            return Err(invalid("auth.api_keys", "keys must not be blank"));
        }

        Ok(())
    }
}
