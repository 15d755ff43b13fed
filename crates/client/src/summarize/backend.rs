//! Summarization backends.
//!
//! [`SummaryBackend`] is the seam the summarizer talks to. [`OpenAiBackend`]
//! speaks the OpenAI-compatible `/chat/completions` API over the shared
//! connection pool, with server-sent events for streaming.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sieve_core::Error;
use sieve_core::config::SummarizerSettings;

use crate::pool::ConnectionPool;

/// Ordered text fragments from a streaming completion.
pub type FragmentStream = BoxStream<'static, Result<String, Error>>;

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRequest {
    pub system: String,
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Full completion in one response.
    async fn complete(&self, request: &SummaryRequest) -> Result<String, Error>;

    /// Completion as it is generated. Backends without streaming support
    /// yield the full completion as a single fragment.
    async fn stream(&self, request: &SummaryRequest) -> Result<FragmentStream, Error> {
        let text = self.complete(request).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiBackend {
    pool: Arc<ConnectionPool>,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(pool: Arc<ConnectionPool>, settings: &SummarizerSettings) -> Self {
        Self {
            pool,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            timeout: settings.timeout(),
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }

    async fn send(&self, request: &SummaryRequest, stream: bool) -> Result<reqwest::Response, Error> {
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage { role: "system", content: &request.system },
                ChatMessage { role: "user", content: &request.prompt },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        };

        let http = self.pool.client().await?;
        let mut builder = http.post(self.url()).json(&body).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| classify(&self.url(), e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let err = Error::HttpStatus { status: status.as_u16(), url: self.url() };
        if err.is_transient() {
            return Err(err);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(Error::Provider(format!("{status}: {}", detail.chars().take(200).collect::<String>())))
    }
}

#[async_trait]
impl SummaryBackend for OpenAiBackend {
    async fn complete(&self, request: &SummaryRequest) -> Result<String, Error> {
        let response = self.send(request, false).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("malformed completion: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Provider("completion has no content".into()))
    }

    async fn stream(&self, request: &SummaryRequest) -> Result<FragmentStream, Error> {
        let response = self.send(request, true).await?;
        Ok(sse_fragments(Box::pin(response.bytes_stream())))
    }
}

fn classify(url: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::FetchTimeout(url.to_string())
    } else {
        Error::Network(err.to_string())
    }
}

struct SseState<S> {
    body: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, Error>>,
    done: bool,
}

impl<S> SseState<S> {
    fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.line(&String::from_utf8_lossy(&line));
            if self.done {
                return;
            }
        }
    }

    fn line(&mut self, line: &str) {
        let Some(data) = line.trim_end().strip_prefix("data:") else {
            // Comments, `event:` and `id:` lines carry nothing we use.
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        if data.is_empty() {
            return;
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                let text: String = chunk.choices.into_iter().filter_map(|c| c.delta.content).collect();
                if !text.is_empty() {
                    self.pending.push_back(Ok(text));
                }
            }
            Err(e) => {
                self.pending.push_back(Err(Error::Provider(format!("malformed stream event: {e}"))));
                self.done = true;
            }
        }
    }
}

/// Parse an SSE body into content fragments.
///
/// Lines are split on raw bytes, so multi-byte characters that straddle body
/// chunks are decoded intact.
pub(crate) fn sse_fragments<S, B>(body: S) -> FragmentStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = SseState { body, buffer: Vec::new(), pending: VecDeque::new(), done: false };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => state.feed(bytes.as_ref()),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(Error::Network(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    let rest = std::mem::take(&mut state.buffer);
                    state.line(&String::from_utf8_lossy(&rest));
                }
            }
        }
    })
    .boxed()
}
