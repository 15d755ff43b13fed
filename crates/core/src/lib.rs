//! Core types and shared functionality for sieve.
//!
//! This crate provides:
//! - Cache manager with SQLite backend and key builder
//! - Unified error types
//! - Layered configuration
//! - API key authentication and rate limiting
//! - Operation metrics

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;

pub use auth::{ApiKeyRecord, Authenticator};
pub use cache::{CacheKeyBuilder, CacheManager, CachePayload, CacheStats};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use metrics::{MetricsCollector, Outcome};
