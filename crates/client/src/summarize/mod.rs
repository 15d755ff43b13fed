//! Streaming, cache-aware summarization.
//!
//! ### Strategy
//! - below `map_reduce_threshold` total tokens: one streamed call over all chunks
//! - otherwise map each chunk with bounded, order-preserving concurrency, then
//!   stream a single reduce call over the partial summaries
//!
//! ### Stream
//! - [`SummaryStream`] is fed by a spawned producer over a bounded channel
//! - dropping it cancels the producer, which drops any in-flight backend call
//!
//! ### Caching
//! - keyed on a hash of the chunk texts plus query, model, temperature and
//!   max tokens; a hit replays the whole summary as one fragment

pub mod backend;
pub mod prompt;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use sieve_core::cache::{CacheKeyBuilder, CachePayload};
use sieve_core::config::SummarizerSettings;
use sieve_core::metrics::{MetricsCollector, Outcome};
use sieve_core::{CacheManager, Error};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

pub use backend::{FragmentStream, OpenAiBackend, SummaryBackend, SummaryRequest};
pub use prompt::{MAX_QUERY_CHARS, sanitize_query};

use crate::chunk::Chunk;

/// Fragments buffered between the producer and a slow consumer.
const CHANNEL_CAPACITY: usize = 32;

/// A finite, single-pass stream of summary text fragments.
///
/// Concatenating every `Ok` item gives the full summary. An `Err` item ends
/// the stream.
#[derive(Debug)]
pub struct SummaryStream {
    rx: mpsc::Receiver<Result<String, Error>>,
    _cancel: DropGuard,
}

impl SummaryStream {
    fn channel() -> (Self, mpsc::Sender<Result<String, Error>>, CancellationToken) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        (Self { rx, _cancel: token.clone().drop_guard() }, tx, token)
    }

    /// Drain the stream into the complete summary.
    pub async fn into_text(self) -> Result<String, Error> {
        let fragments: Vec<String> = self.try_collect().await?;
        Ok(fragments.concat())
    }
}

impl Stream for SummaryStream {
    type Item = Result<String, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Why a backend attempt failed, and whether the caller already saw output.
struct AttemptError {
    error: Error,
    emitted: bool,
}

#[derive(Clone)]
pub struct Summarizer {
    backend: Arc<dyn SummaryBackend>,
    cache: CacheManager,
    settings: SummarizerSettings,
    metrics: Arc<MetricsCollector>,
}

impl Summarizer {
    pub fn new(
        backend: Arc<dyn SummaryBackend>, cache: CacheManager, settings: SummarizerSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { backend, cache, settings, metrics }
    }

    /// Start summarizing `chunks`, optionally focused on `query`.
    ///
    /// Must be called inside a tokio runtime. Failures, including an empty
    /// chunk list, arrive as the stream's final item.
    pub fn summarize(&self, chunks: Vec<Chunk>, query: Option<&str>) -> SummaryStream {
        let (stream, tx, cancel) = SummaryStream::channel();
        let this = self.clone();
        let query = query.map(str::to_string);

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("summary stream dropped, producer stopped");
                    return;
                }
                outcome = this.run(&chunks, query.as_deref(), &tx) => outcome,
            };
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "summarization failed");
                let _ = tx.send(Err(e)).await;
            }
        });

        stream
    }

    async fn run(
        &self, chunks: &[Chunk], query: Option<&str>, tx: &mpsc::Sender<Result<String, Error>>,
    ) -> Result<(), Error> {
        if chunks.is_empty() {
            return Err(Error::InvalidInput("nothing to summarize".into()));
        }

        let query = query.and_then(sanitize_query);
        let key = self.cache_key(chunks, query.as_deref());
        if let Some(CachePayload::Text(text)) = self.cache.get(&key).await {
            tracing::debug!(chars = text.len(), "summary served from cache");
            let _ = tx.send(Ok(text)).await;
            return Ok(());
        }

        let started = Instant::now();
        let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
        let (operation, prompt) = if total_tokens < self.settings.map_reduce_threshold {
            ("single", prompt::single_prompt(chunks, query.as_deref()))
        } else {
            tracing::debug!(chunks = chunks.len(), total_tokens, "map-reduce summarization");
            let partials = self.map(chunks, query.as_deref()).await?;
            ("reduce", prompt::reduce_prompt(&partials, query.as_deref()))
        };

        let result = self.emit(&self.request(prompt), tx).await;
        self.metrics
            .record("summarize", operation, started.elapsed(), Outcome::from_result(&result));
        let text = result?;

        self.cache
            .set(
                &key,
                CachePayload::Text(text),
                Some(Duration::from_secs(self.settings.cache_ttl_secs)),
                None,
                None,
            )
            .await;
        Ok(())
    }

    fn cache_key(&self, chunks: &[Chunk], query: Option<&str>) -> String {
        let hash = CacheKeyBuilder::content_hash(chunks.iter().map(|c| c.text.as_str()));
        CacheKeyBuilder::summary(
            &hash,
            query,
            [
                ("max_tokens", self.settings.max_tokens.to_string()),
                ("model", self.settings.model.clone()),
                ("temperature", format!("{:.2}", self.settings.temperature)),
            ],
        )
    }

    fn request(&self, prompt: String) -> SummaryRequest {
        SummaryRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            prompt,
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// Same settings and cache, different backend.
    pub fn with_backend(mut self, backend: Arc<dyn SummaryBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Per-chunk summaries, in chunk order.
    async fn map(&self, chunks: &[Chunk], query: Option<&str>) -> Result<Vec<String>, Error> {
        let total = chunks.len();
        let requests: Vec<SummaryRequest> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| self.request(prompt::map_prompt(chunk, i + 1, total, query)))
            .collect();

        stream::iter(requests.into_iter().map(|request| async move {
            let started = Instant::now();
            let result = self.complete(&request).await;
            self.metrics.record("summarize", "map", started.elapsed(), Outcome::from_result(&result));
            result
        }))
        .buffered(self.settings.map_concurrency.max(1))
        .try_collect()
        .await
    }

    /// Non-streaming completion with retries.
    async fn complete(&self, request: &SummaryRequest) -> Result<String, Error> {
        let mut attempt = 0u32;
        loop {
            let error = match self.backend.complete(request).await {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => return Err(Error::Provider("backend returned an empty summary".into())),
                Err(e) => e,
            };
            if !error.is_transient() || attempt >= self.settings.max_retries {
                return Err(provider(error));
            }
            attempt += 1;
            tracing::warn!(attempt, error = %error, "summary backend failed, retrying");
            tokio::time::sleep(self.settings.retry_delay()).await;
        }
    }

    /// Send the final summary to the caller, retrying transient failures
    /// until the first fragment has gone out.
    async fn emit(&self, request: &SummaryRequest, tx: &mpsc::Sender<Result<String, Error>>) -> Result<String, Error> {
        if !self.settings.streaming_enabled {
            let text = self.complete(request).await?;
            tx.send(Ok(text.clone())).await.map_err(|_| Error::Cancelled)?;
            return Ok(text);
        }

        let mut attempt = 0u32;
        loop {
            let AttemptError { error, emitted } = match self.stream_once(request, tx).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };
            let retry = !emitted && error.is_transient() && attempt < self.settings.max_retries;
            if !retry {
                return Err(provider(error));
            }
            attempt += 1;
            tracing::warn!(attempt, error = %error, "summary stream failed, retrying");
            tokio::time::sleep(self.settings.retry_delay()).await;
        }
    }

    async fn stream_once(
        &self, request: &SummaryRequest, tx: &mpsc::Sender<Result<String, Error>>,
    ) -> Result<String, AttemptError> {
        let mut fragments = self
            .backend
            .stream(request)
            .await
            .map_err(|error| AttemptError { error, emitted: false })?;

        let mut text = String::new();
        // Leading whitespace is held back so an empty summary is never emitted.
        let mut held = String::new();
        let mut emitted = false;
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment.map_err(|error| AttemptError { error, emitted })?;
            text.push_str(&fragment);

            let out = if emitted {
                fragment
            } else {
                held.push_str(&fragment);
                if held.trim().is_empty() {
                    continue;
                }
                std::mem::take(&mut held)
            };
            tx.send(Ok(out))
                .await
                .map_err(|_| AttemptError { error: Error::Cancelled, emitted: true })?;
            emitted = true;
        }

        if !emitted {
            return Err(AttemptError { error: Error::Provider("backend returned an empty summary".into()), emitted });
        }
        Ok(text)
    }
}

fn provider(error: Error) -> Error {
    match error {
        Error::Provider(_) | Error::Cancelled => error,
        other => Error::Provider(other.to_string()),
    }
}
