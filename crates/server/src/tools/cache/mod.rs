//! Cache-related MCP tools.
//!
//! This module provides tools for inspecting and pruning the SQLite cache.

pub mod prune;
pub mod stats;

pub use prune::{CachePruneParams, prune_impl};
pub use stats::stats_impl;
