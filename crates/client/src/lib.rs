//! Client code for sieve.
//!
//! This crate provides the fetch → extract → chunk → summarize pipeline and
//! the pooled resources it runs on, shared by the server.

pub mod browser;
pub mod chunk;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod pool;
pub mod summarize;

pub use browser::{BrowserInstance, BrowserLauncher, BrowserPool, RenderError, RenderedPage};
pub use chunk::{Chunk, ChunkMetadata, Chunker};
pub use extract::{ContentExtractor, ContentKind, ExtractedContent, HtmdExtractor, TextExtractor};
pub use fetch::{FetchMethod, FetchResult, FetchTarget, Fetcher};
pub use pipeline::{BatchSummary, LocationStatus, Pipeline};
pub use pool::{ConnectionPool, PoolStats};
pub use summarize::{OpenAiBackend, SummaryBackend, SummaryRequest, SummaryStream, Summarizer};
