//! Batch orchestration: fetch, extract and chunk every location, then stream
//! one summary over everything that succeeded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::browser::BrowserPool;
use crate::chunk::{Chunk, Chunker};
use crate::extract::{ContentExtractor, ContentKind};
use crate::fetch::{FetchMethod, Fetcher};
use crate::pool::ConnectionPool;
use crate::summarize::{OpenAiBackend, SummaryBackend, SummaryStream, Summarizer};
use sieve_core::config::{AppConfig, BrowserSettings};
use sieve_core::metrics::{MetricsCollector, Outcome};
use sieve_core::{CacheManager, Error};

/// Per-location outcome of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LocationStatus {
    Ok {
        location: String,
        title: Option<String>,
        fetch_method: FetchMethod,
        content_kind: ContentKind,
        chunks: usize,
    },
    Failed {
        location: String,
        error: String,
    },
}

impl LocationStatus {
    pub fn location(&self) -> &str {
        match self {
            LocationStatus::Ok { location, .. } | LocationStatus::Failed { location, .. } => location,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, LocationStatus::Ok { .. })
    }
}

/// Statuses in input order, plus the summary stream when anything succeeded.
#[derive(Debug)]
pub struct BatchSummary {
    pub statuses: Vec<LocationStatus>,
    pub stream: Option<SummaryStream>,
}

/// Every component, wired once and shared across requests.
pub struct Pipeline {
    fetcher: Fetcher,
    extractor: ContentExtractor,
    chunker: Chunker,
    summarizer: Summarizer,
    cache: CacheManager,
    pool: Arc<ConnectionPool>,
    metrics: Arc<MetricsCollector>,
}

impl Pipeline {
    /// Open the cache and build every pool from configuration.
    ///
    /// The cache degrades to disabled mode if its store cannot be opened.
    pub async fn from_config(config: &AppConfig) -> Self {
        let cache = CacheManager::open(config.cache.clone()).await;
        Self::new(config, cache, browser_pool(&config.browser))
    }

    /// Wire components around an existing cache and optional browser pool,
    /// summarizing with the configured OpenAI-compatible backend.
    pub fn new(config: &AppConfig, cache: CacheManager, browser: Option<BrowserPool>) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let pool = Arc::new(ConnectionPool::new(config.pool.clone(), &config.fetch));

        let fetcher = Fetcher::new(config.fetch.clone(), pool.clone(), browser, cache.clone(), metrics.clone())
            .with_browser_acquire_timeout(config.browser.acquire_timeout());
        let extractor = ContentExtractor::new(
            cache.clone(),
            Duration::from_secs(config.fetch.extract_cache_ttl_secs),
            metrics.clone(),
        );
        let backend = Arc::new(OpenAiBackend::new(pool.clone(), &config.summarizer));
        let summarizer = Summarizer::new(backend, cache.clone(), config.summarizer.clone(), metrics.clone());

        tracing::info!(
            cache = cache.is_enabled(),
            browser = fetcher.browser().is_some(),
            model = %config.summarizer.model,
            "pipeline ready"
        );

        Self {
            fetcher,
            extractor,
            chunker: Chunker::new(config.chunker.clone()),
            summarizer,
            cache,
            pool,
            metrics,
        }
    }

    /// Swap the summarization backend.
    pub fn with_backend(mut self, backend: Arc<dyn SummaryBackend>) -> Self {
        self.summarizer = self.summarizer.with_backend(backend);
        self
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn extractor(&self) -> &ContentExtractor {
        &self.extractor
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn browser(&self) -> Option<&BrowserPool> {
        self.fetcher.browser()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Summarize `locations` together, optionally focused on `query`.
    ///
    /// Locations are prepared concurrently (bounded by the fetcher's limit).
    /// Individual failures are reported in [`BatchSummary::statuses`] and do
    /// not fail the batch.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when `locations` is empty.
    pub async fn summarize(&self, locations: &[String], query: Option<&str>) -> Result<BatchSummary, Error> {
        self.summarize_with_cancel(locations, query, &CancellationToken::new()).await
    }

    /// [`summarize`](Self::summarize) whose preparation stops when `cancel`
    /// fires. Drop the returned stream to stop summarization itself.
    pub async fn summarize_with_cancel(
        &self, locations: &[String], query: Option<&str>, cancel: &CancellationToken,
    ) -> Result<BatchSummary, Error> {
        if locations.is_empty() {
            return Err(Error::InvalidInput("at least one location is required".into()));
        }

        let started = Instant::now();
        let prepared = join_all(locations.iter().map(|location| self.prepare(location, cancel))).await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut statuses = Vec::with_capacity(locations.len());
        let mut chunks = Vec::new();
        for (location, outcome) in locations.iter().zip(prepared) {
            match outcome {
                Ok((status, doc_chunks)) => {
                    statuses.push(status);
                    chunks.extend(doc_chunks);
                }
                Err(e) => {
                    tracing::warn!(location = %location, error = %e, "location failed");
                    statuses.push(LocationStatus::Failed { location: location.clone(), error: e.to_string() });
                }
            }
        }

        let succeeded = statuses.iter().filter(|s| s.is_ok()).count();
        let outcome = if succeeded > 0 { Outcome::Success } else { Outcome::Failure };
        self.metrics.record("pipeline", "prepare", started.elapsed(), outcome);
        tracing::info!(
            locations = locations.len(),
            succeeded,
            chunks = chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch prepared"
        );

        let stream = (!chunks.is_empty()).then(|| self.summarizer.summarize(chunks, query));
        Ok(BatchSummary { statuses, stream })
    }

    async fn prepare(&self, location: &str, cancel: &CancellationToken) -> Result<(LocationStatus, Vec<Chunk>), Error> {
        let fetched = self.fetcher.fetch_with_cancel(location, cancel).await?;
        let content = self.extractor.extract(&fetched).await?;
        let chunks = self.chunker.chunk(&content.text, Some(content.location.as_str()));

        let status = LocationStatus::Ok {
            location: location.to_string(),
            title: content.title,
            fetch_method: fetched.fetch_method,
            content_kind: content.content_kind,
            chunks: chunks.len(),
        };
        Ok((status, chunks))
    }

    /// Close the connection pool and every browser instance.
    pub async fn shutdown(&self) {
        self.pool.close().await;
        if let Some(browser) = self.fetcher.browser() {
            browser.shutdown().await;
        }
        tracing::info!("pipeline shut down");
    }
}

#[cfg(feature = "render")]
fn browser_pool(settings: &BrowserSettings) -> Option<BrowserPool> {
    use crate::browser::ChromiumLauncher;

    settings
        .enabled
        .then(|| BrowserPool::new(Arc::new(ChromiumLauncher::new(settings)), settings))
}

#[cfg(not(feature = "render"))]
fn browser_pool(settings: &BrowserSettings) -> Option<BrowserPool> {
    if settings.enabled {
        tracing::warn!("browser.enabled is set but this build has no `render` feature; rendering disabled");
    }
    None
}
