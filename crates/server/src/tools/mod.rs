//! MCP tool implementations.
//!
//! This module contains all tools exposed by the sieve server.

pub mod cache;
pub mod pool_stats;
pub mod summarize;

pub use cache::{CachePruneParams, prune_impl, stats_impl};
pub use pool_stats::pool_stats_impl;
pub use summarize::{SummarizeParams, summarize_impl};
