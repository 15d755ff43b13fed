//! Readable content extraction.
//!
//! Turns a [`FetchResult`] into normalized text plus metadata. The HTML path
//! goes through a swappable [`TextExtractor`]; Markdown and plain text are
//! normalized in place and source code is wrapped in a fenced block.
//!
//! ### Dispatch
//! - declared media type first, then file extension, then content sniffing
//! - bytes that are not text are rejected rather than guessed at
//!
//! ### Caching
//! - results are cached under `extract:{location}` with the extractor name and
//!   a digest of the fetched bytes, so refetched content is re-extracted

pub mod html;
pub mod normalize;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sieve_core::cache::CacheKeyBuilder;
use sieve_core::metrics::{MetricsCollector, Outcome};
use sieve_core::{CacheManager, Error};

pub use html::HtmdExtractor;
pub use normalize::{fence_code, normalize_text, word_count};

use crate::fetch::FetchResult;

/// Broad class of a document, decided before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Html,
    Markdown,
    PlainText,
    SourceCode,
    Unknown,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Html => "html",
            ContentKind::Markdown => "markdown",
            ContentKind::PlainText => "plain_text",
            ContentKind::SourceCode => "source_code",
            ContentKind::Unknown => "unknown",
        }
    }
}

/// Normalized text for one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub location: String,
    pub title: Option<String>,
    pub text: String,
    pub content_kind: ContentKind,
    pub metadata: BTreeMap<String, String>,
}

/// Output of an HTML extraction engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HtmlDocument {
    pub title: Option<String>,
    pub markdown: String,
    /// Value of `<html lang>`, lowercased.
    pub language: Option<String>,
}

/// Stable seam for the HTML extraction engine.
pub trait TextExtractor: Send + Sync {
    /// Short identifier, part of the extract cache key.
    fn name(&self) -> &'static str;

    fn extract_html(&self, html: &str) -> Result<HtmlDocument, Error>;
}

/// Cache-aware extractor with content-type dispatch.
#[derive(Clone)]
pub struct ContentExtractor {
    engine: Arc<dyn TextExtractor>,
    cache: CacheManager,
    ttl: Duration,
    metrics: Arc<MetricsCollector>,
}

impl ContentExtractor {
    pub fn new(cache: CacheManager, ttl: Duration, metrics: Arc<MetricsCollector>) -> Self {
        Self::with_engine(Arc::new(HtmdExtractor::new()), cache, ttl, metrics)
    }

    pub fn with_engine(
        engine: Arc<dyn TextExtractor>, cache: CacheManager, ttl: Duration, metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { engine, cache, ttl, metrics }
    }

    /// Extract readable text from fetched bytes, serving from cache when the
    /// same bytes were extracted before.
    ///
    /// # Errors
    ///
    /// `ExtractFailed` when the content is binary, empty after extraction, or
    /// the HTML engine fails.
    pub async fn extract(&self, fetched: &FetchResult) -> Result<ExtractedContent, Error> {
        let digest = hex::encode(Sha256::digest(&fetched.content));
        let key = CacheKeyBuilder::extract(
            &fetched.location,
            [("content", &digest[..16]), ("extractor", self.engine.name())],
        );
        if let Some(hit) = self.cache.get_json::<ExtractedContent>(&key).await {
            tracing::debug!(location = %fetched.location, "extraction served from cache");
            return Ok(hit);
        }

        let started = Instant::now();
        let result = self.extract_uncached(fetched);
        self.metrics.record("extract", "extract", started.elapsed(), Outcome::from_result(&result));

        let content = result?;
        tracing::debug!(
            location = %content.location,
            kind = content.content_kind.as_str(),
            chars = content.text.len(),
            "extracted"
        );
        self.cache.set_json(&key, &content, Some(self.ttl)).await;
        Ok(content)
    }

    fn extract_uncached(&self, fetched: &FetchResult) -> Result<ExtractedContent, Error> {
        let kind = classify(fetched);
        if kind == ContentKind::Unknown {
            return Err(Error::ExtractFailed(format!(
                "{}: unsupported content type {}",
                fetched.location,
                fetched.content_type.as_deref().unwrap_or("(none)")
            )));
        }

        let raw = String::from_utf8_lossy(&fetched.content);
        let mut metadata = base_metadata(fetched);
        let (title, text) = match kind {
            ContentKind::Html => {
                let doc = self.engine.extract_html(&raw)?;
                if let Some(lang) = doc.language {
                    metadata.insert("language".into(), lang);
                }
                (doc.title, normalize_text(&doc.markdown))
            }
            ContentKind::Markdown => (markdown_title(&raw), normalize_text(&raw)),
            ContentKind::SourceCode => {
                let language = source_language(fetched);
                if let Some(lang) = language {
                    metadata.insert("language".into(), lang.to_string());
                }
                (file_name(&fetched.location), fence_code(&raw, language))
            }
            ContentKind::PlainText | ContentKind::Unknown => (None, normalize_text(&raw)),
        };

        if text.trim().is_empty() {
            return Err(Error::ExtractFailed(format!("{}: no readable text", fetched.location)));
        }

        metadata.insert("word_count".into(), word_count(&text).to_string());
        metadata.insert("content_kind".into(), kind.as_str().into());

        Ok(ExtractedContent { location: fetched.location.clone(), title, text, content_kind: kind, metadata })
    }
}

fn base_metadata(fetched: &FetchResult) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if let Some(ct) = &fetched.content_type {
        metadata.insert("content_type".into(), ct.clone());
    }
    metadata.insert("fetch_method".into(), fetched.fetch_method.as_str().into());
    metadata.insert("status_code".into(), fetched.status_code.to_string());
    metadata.insert("final_location".into(), fetched.final_location.clone());
    metadata
}

/// Decide how to treat fetched bytes.
pub fn classify(fetched: &FetchResult) -> ContentKind {
    if looks_binary(&fetched.content) {
        return ContentKind::Unknown;
    }

    if let Some(kind) = fetched.mime().as_deref().and_then(kind_for_mime) {
        return kind;
    }

    if let Some(kind) = extension(&fetched.final_location).as_deref().and_then(kind_for_extension) {
        return kind;
    }

    sniff(&fetched.content)
}

fn kind_for_mime(mime: &str) -> Option<ContentKind> {
    match mime {
        "text/html" | "application/xhtml+xml" => Some(ContentKind::Html),
        "text/markdown" | "text/x-markdown" => Some(ContentKind::Markdown),
        "text/plain" | "text/csv" => Some(ContentKind::PlainText),
        "application/json" | "application/xml" | "text/xml" | "text/css" | "text/javascript"
        | "application/javascript" => Some(ContentKind::SourceCode),
        m if m.starts_with("text/x-") => Some(ContentKind::SourceCode),
        // Generic types say nothing; fall through to extension and sniffing.
        _ => None,
    }
}

fn kind_for_extension(ext: &str) -> Option<ContentKind> {
    match ext {
        "html" | "htm" | "xhtml" => Some(ContentKind::Html),
        "md" | "markdown" | "mdx" => Some(ContentKind::Markdown),
        "txt" | "text" | "log" | "rst" | "csv" => Some(ContentKind::PlainText),
        e if language_for_extension(e).is_some() => Some(ContentKind::SourceCode),
        _ => None,
    }
}

fn sniff(content: &[u8]) -> ContentKind {
    let head = String::from_utf8_lossy(&content[..content.len().min(512)]).trim_start().to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        ContentKind::Html
    } else if head.starts_with('#') {
        ContentKind::Markdown
    } else if std::str::from_utf8(content).is_ok() {
        ContentKind::PlainText
    } else {
        ContentKind::Unknown
    }
}

/// NUL bytes in the first block mean the payload is not text.
fn looks_binary(content: &[u8]) -> bool {
    content[..content.len().min(8192)].contains(&0)
}

fn extension(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn file_name(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    Path::new(path).file_name().and_then(|n| n.to_str()).map(str::to_string)
}

fn source_language(fetched: &FetchResult) -> Option<&'static str> {
    extension(&fetched.final_location)
        .as_deref()
        .and_then(language_for_extension)
        .or_else(|| match fetched.mime().as_deref() {
            Some("application/json") => Some("json"),
            Some("application/xml" | "text/xml") => Some("xml"),
            Some("text/css") => Some("css"),
            Some("text/javascript" | "application/javascript") => Some("javascript"),
            Some(m) => m.strip_prefix("text/x-").and_then(language_for_extension),
            None => None,
        })
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "rs" | "rust" => "rust",
        "py" | "python" => "python",
        "js" | "mjs" | "cjs" | "javascript" => "javascript",
        "ts" | "tsx" | "typescript" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" | "c++" => "cpp",
        "rb" | "ruby" => "ruby",
        "sh" | "bash" | "shellscript" => "bash",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "xml" => "xml",
        "css" => "css",
        "sql" => "sql",
        _ => return None,
    })
}

/// First ATX heading of a Markdown document.
fn markdown_title(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
