//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SIEVE_*, nested sections split on `__`)
//! 2. TOML config file (if SIEVE_CONFIG_FILE set)
//! 3. Built-in defaults

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod sections;
mod validation;

pub use sections::{
    AuthSettings, BrowserSettings, CacheSettings, ChunkStrategy, ChunkerSettings, EvictionPolicy, FetchSettings,
    PoolSettings, SummarizerSettings,
};
pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SIEVE_*), e.g. `SIEVE_CHUNKER__CHUNK_SIZE=256`
/// 2. TOML config file (if SIEVE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub browser: BrowserSettings,

    #[serde(default)]
    pub chunker: ChunkerSettings,

    #[serde(default)]
    pub summarizer: SummarizerSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub auth: AuthSettings,
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SIEVE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        Self::extract(figment.merge(
            Env::prefixed("SIEVE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        ))
    }

    /// Load from a TOML string layered over the defaults. Used by tests and
    /// embedders that carry their own config source.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that a backend key is present before talking to a hosted model.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the summarizer API key is not set.
    pub fn require_summarizer_key(&self) -> Result<&str, ConfigError> {
        self.summarizer.api_key.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "summarizer.api_key".into(),
            hint: "Set SIEVE_SUMMARIZER__API_KEY environment variable".into(),
        })
    }
}
