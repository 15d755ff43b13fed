//! SQLite-backed key-value cache shared by the fetch, extract and summarize stages.
//!
//! This module provides a persistent cache using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Readable logical keys hashed with SHA-256 for storage
//! - Tagged text / JSON / binary payloads
//! - Lazy TTL expiry plus explicit pruning
//! - Size-bounded LRU or LFU eviction
//! - Automatic schema migrations and WAL mode

pub mod connection;
pub mod entries;
pub mod keys;
pub mod manager;
pub mod migrations;
pub mod payload;

pub use crate::Error;

pub use connection::CacheStore;
pub use keys::CacheKeyBuilder;
pub use manager::{CacheManager, CacheStats};
pub use payload::{CachePayload, CacheRecord};
