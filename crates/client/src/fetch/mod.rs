//! Multi-strategy fetcher: network, headless browser, local filesystem.
//!
//! ### Method selection
//! - Absolute paths and `file://` URLs are read from disk after allow-list checks
//! - Everything else is canonicalized and fetched over the shared connection pool
//!
//! ### Network politeness & resilience
//! - Fetch and cache `robots.txt` per origin (24h cache)
//! - Retry transient failures with a fixed delay
//! - Fall back to the browser pool for bot walls and JavaScript shells
//! - Max redirects and max body bytes are configurable
//!
//! ### Caching
//! - Results are cached under `fetch:{location}`; filesystem security checks
//!   run before the cache is consulted

pub mod filesystem;
pub mod heuristics;
pub mod robots;
pub mod target;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use filesystem::{PathGuard, content_type_for};
pub use robots::{RobotsCache, RobotsError};
pub use target::{FetchMethod, FetchTarget, UrlError, canonicalize};

use crate::browser::BrowserPool;
use crate::pool::ConnectionPool;
use sieve_core::cache::CacheKeyBuilder;
use sieve_core::config::FetchSettings;
use sieve_core::metrics::{MetricsCollector, Outcome};
use sieve_core::{CacheManager, Error};

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,text/plain;q=0.8,*/*;q=0.5";

/// Raw content for one location. Cached as JSON with the body in base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    /// The location as requested (canonicalized for URLs).
    pub location: String,
    #[serde(with = "sieve_core::cache::payload::base64_bytes")]
    pub content: Vec<u8>,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub status_code: u16,
    pub fetch_method: FetchMethod,
    /// Where the content actually came from (after redirects or symlinks).
    pub final_location: String,
    pub fetch_ms: u64,
}

impl FetchResult {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Media type without parameters, lowercased.
    pub fn mime(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|m| m.trim().to_ascii_lowercase())
    }

    pub fn is_html(&self) -> bool {
        self.mime().is_some_and(|m| m == "text/html" || m == "application/xhtml+xml")
    }
}

/// Fetches locations through the cache, the connection pool and the browser pool.
pub struct Fetcher {
    settings: FetchSettings,
    pool: Arc<ConnectionPool>,
    browser: Option<BrowserPool>,
    browser_acquire_timeout: Duration,
    cache: CacheManager,
    robots: RobotsCache,
    guard: PathGuard,
    limiter: Arc<Semaphore>,
    metrics: Arc<MetricsCollector>,
}

impl Fetcher {
    pub fn new(
        settings: FetchSettings, pool: Arc<ConnectionPool>, browser: Option<BrowserPool>, cache: CacheManager,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            robots: RobotsCache::new(settings.user_agent.clone()),
            guard: PathGuard::new(&settings.allowed_directories, settings.max_file_size),
            limiter: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            browser_acquire_timeout: Duration::from_secs(30),
            settings,
            pool,
            browser,
            cache,
            metrics,
        }
    }

    pub fn with_browser_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.browser_acquire_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn browser(&self) -> Option<&BrowserPool> {
        self.browser.as_ref()
    }

    /// Fetch a location, serving from cache when possible.
    ///
    /// # Errors
    ///
    /// Security errors for disallowed local paths (never retried), not-found
    /// style errors for bad files or URLs, and transient network errors once
    /// retries and browser fallback are exhausted.
    pub async fn fetch(&self, location: &str) -> Result<FetchResult, Error> {
        let target = FetchTarget::resolve(location)?;

        if let FetchTarget::Filesystem(path) = &target {
            if !self.settings.filesystem_enabled {
                return Err(Error::FilesystemDisabled);
            }
            self.guard.check(path).await?;
        }

        let key = CacheKeyBuilder::fetch(&target.location(), [("max_bytes", self.settings.max_bytes.to_string())]);
        if let Some(hit) = self.cache.get_json::<FetchResult>(&key).await {
            tracing::debug!(location = %target, "fetch served from cache");
            return Ok(hit);
        }

        let _slot = self
            .limiter
            .acquire()
            .await
            .map_err(|_| Error::PoolExhausted("fetch limiter closed".into()))?;

        let started = Instant::now();
        let (operation, result) = match &target {
            FetchTarget::Filesystem(path) => ("filesystem", filesystem::read_file(&self.guard, path).await),
            FetchTarget::Network(url) => ("network", self.fetch_network(url).await),
        };
        self.metrics.record("fetch", operation, started.elapsed(), Outcome::from_result(&result));

        let result = result?;
        tracing::debug!(
            location = %target,
            method = result.fetch_method.as_str(),
            status = result.status_code,
            bytes = result.content.len(),
            fetch_ms = result.fetch_ms,
            "fetched"
        );

        self.cache
            .set_json(&key, &result, Some(Duration::from_secs(self.settings.cache_ttl_secs)))
            .await;
        Ok(result)
    }

    /// [`fetch`](Self::fetch) that stops when `cancel` fires.
    ///
    /// The in-flight fetch is dropped before `Error::Cancelled` is returned, so
    /// its connection slot or browser lease is already back in its pool.
    pub async fn fetch_with_cancel(&self, location: &str, cancel: &CancellationToken) -> Result<FetchResult, Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(location, "fetch cancelled");
                Err(Error::Cancelled)
            }
            result = self.fetch(location) => result,
        }
    }

    fn can_fall_back(&self) -> bool {
        self.settings.browser_fallback && self.browser.is_some()
    }

    async fn fetch_network(&self, url: &Url) -> Result<FetchResult, Error> {
        if self.settings.respect_robots {
            let http = self.pool.client().await?;
            self.robots.check(&http, url).await?;
        }

        let fallback = self.can_fall_back();
        let mut attempt = 0u32;
        let result = loop {
            let result = self.http_get(url).await;
            let retry = match &result {
                // Bot walls go straight to the browser instead of being retried.
                Err(e) if fallback && is_bot_wall_error(e) => false,
                Err(e) => e.is_transient() && attempt < self.settings.max_retries,
                Ok(_) => false,
            };
            if !retry {
                break result;
            }
            attempt += 1;
            if let Err(e) = &result {
                tracing::warn!(url = %url, attempt, error = %e, "transient fetch failure, retrying");
            }
            tokio::time::sleep(self.settings.retry_delay()).await;
        };

        match result {
            Ok(response) if fallback && response.is_html() => {
                if !heuristics::looks_like_js_shell(&response.text(), self.settings.min_text_chars) {
                    return Ok(response);
                }
                tracing::debug!(url = %url, "response looks like a JavaScript shell, rendering");
                match self.render(url).await {
                    Ok(rendered) => Ok(rendered),
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "browser fallback failed, keeping raw response");
                        Ok(response)
                    }
                }
            }
            Err(e) if fallback && (e.is_transient() || is_bot_wall_error(&e)) => {
                tracing::info!(url = %url, error = %e, "network fetch failed, falling back to browser");
                self.render(url).await.map_err(|render_err| {
                    tracing::warn!(url = %url, error = %render_err, "browser fallback failed");
                    e
                })
            }
            other => other,
        }
    }

    async fn http_get(&self, url: &Url) -> Result<FetchResult, Error> {
        let started = Instant::now();
        let http = self.pool.acquire().await?;

        let mut response = http
            .get(url.as_str())
            .header(header::ACCEPT, ACCEPT)
            .timeout(self.settings.timeout())
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(Error::HttpStatus { status, url: url.to_string() });
        }

        let limit = self.settings.max_bytes;
        if let Some(len) = response.content_length()
            && len as usize > limit
        {
            return Err(Error::FetchTooLarge(format!("{len} bytes exceeds {limit}")));
        }

        let final_location = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        let content_type = headers.get(header::CONTENT_TYPE.as_str()).cloned();

        let mut content = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| classify(url, e))? {
            if content.len() + chunk.len() > limit {
                return Err(Error::FetchTooLarge(format!("body exceeds {limit} bytes")));
            }
            content.extend_from_slice(&chunk);
        }

        Ok(FetchResult {
            location: url.to_string(),
            content,
            content_type,
            headers,
            status_code: status,
            fetch_method: FetchMethod::Network,
            final_location,
            fetch_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn render(&self, url: &Url) -> Result<FetchResult, Error> {
        let Some(browser) = &self.browser else {
            return Err(Error::RenderDisabled);
        };

        let started = Instant::now();
        let page = match browser.acquire(self.browser_acquire_timeout).await {
            Ok(lease) => {
                let page = lease.render(url).await;
                browser.release(lease).await;
                page
            }
            Err(e) => Err(e),
        };
        self.metrics.record("fetch", "browser", started.elapsed(), Outcome::from_result(&page));
        let page = page?;

        Ok(FetchResult {
            location: url.to_string(),
            content: page.html.into_bytes(),
            content_type: Some("text/html; charset=utf-8".into()),
            headers: BTreeMap::new(),
            status_code: 200,
            fetch_method: FetchMethod::Browser,
            final_location: page.final_url.to_string(),
            fetch_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn is_bot_wall_error(err: &Error) -> bool {
    matches!(err, Error::HttpStatus { status, .. } if heuristics::is_bot_wall(*status))
}

fn classify(url: &Url, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::FetchTimeout(url.to_string())
    } else {
        Error::Network(format!("{url}: {err}"))
    }
}
