//! robots.txt compliance with per-host caching.
//!
//! Rules are fetched once per origin through the shared pooled client and kept
//! for 24 hours.

use robotstxt_rs::RobotsTxt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use url::{Position, Url};

/// Default TTL for robots.txt cache (24 hours).
const ROBOTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum size of robots.txt to fetch (1MB).
const MAX_ROBOTS_SIZE: usize = 1024 * 1024;

/// Timeout for the robots.txt request itself.
const ROBOTS_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for robots.txt operations.
#[derive(Debug, thiserror::Error)]
pub enum RobotsError {
    #[error("robots.txt disallowed: {path} (robots_url: {robots_url})")]
    Disallowed { path: String, robots_url: String },

    #[error("invalid robots.txt origin for {0}")]
    InvalidOrigin(String),
}

impl From<RobotsError> for sieve_core::Error {
    fn from(err: RobotsError) -> Self {
        match err {
            RobotsError::Disallowed { .. } => sieve_core::Error::RobotsDisallowed(err.to_string()),
            RobotsError::InvalidOrigin(url) => sieve_core::Error::InvalidUrl(url),
        }
    }
}

struct CachedRobots {
    robots: RobotsTxt,
    fetched_at: Instant,
}

impl CachedRobots {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > ROBOTS_TTL
    }
}

/// In-memory cache of parsed robots.txt files keyed by origin.
pub struct RobotsCache {
    cache: RwLock<HashMap<String, CachedRobots>>,
    user_agent: String,
}

impl RobotsCache {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self { cache: RwLock::new(HashMap::new()), user_agent: user_agent.into() }
    }

    /// Check a URL against its origin's robots.txt, fetching it on first use.
    ///
    /// An unreachable or missing robots.txt allows everything.
    pub async fn check(&self, http: &reqwest::Client, url: &Url) -> Result<(), RobotsError> {
        let robots_url = url
            .join("/robots.txt")
            .map_err(|_| RobotsError::InvalidOrigin(url.to_string()))?
            .to_string();

        let allowed = match self.cached_verdict(&robots_url, url).await {
            Some(allowed) => {
                tracing::debug!(robots_url, allowed, "robots.txt cache hit");
                allowed
            }
            None => {
                let robots = self.fetch_robots(http, &robots_url).await;
                let allowed = robots.can_fetch(&self.user_agent, request_path(url));
                let mut cache = self.cache.write().await;
                cache.retain(|_, cached| !cached.is_expired());
                cache.insert(robots_url.clone(), CachedRobots { robots, fetched_at: Instant::now() });
                allowed
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(RobotsError::Disallowed { path: url.path().to_string(), robots_url })
        }
    }

    async fn cached_verdict(&self, robots_url: &str, url: &Url) -> Option<bool> {
        let cache = self.cache.read().await;
        let cached = cache.get(robots_url).filter(|c| !c.is_expired())?;
        Some(cached.robots.can_fetch(&self.user_agent, request_path(url)))
    }

    async fn fetch_robots(&self, http: &reqwest::Client, robots_url: &str) -> RobotsTxt {
        match self.download(http, robots_url).await {
            Ok(body) => RobotsTxt::parse(&body),
            Err(reason) => {
                tracing::debug!(robots_url, reason, "robots.txt unavailable, allowing all");
                RobotsTxt::parse("")
            }
        }
    }

    async fn download(&self, http: &reqwest::Client, robots_url: &str) -> Result<String, String> {
        let response = http
            .get(robots_url)
            .header("User-Agent", &self.user_agent)
            .timeout(ROBOTS_TIMEOUT)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("status {status}"));
        }
        if response.content_length().is_some_and(|len| len as usize > MAX_ROBOTS_SIZE) {
            return Err("robots.txt too large".into());
        }

        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        if bytes.len() > MAX_ROBOTS_SIZE {
            return Err("robots.txt too large".into());
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Clear expired entries from the cache.
    ///
    /// Also runs whenever a new origin's rules are stored.
    pub async fn cleanup_expired(&self) {
        self.cache.write().await.retain(|_, cached| !cached.is_expired());
    }
}

/// Path plus query, the part of a URL robots.txt rules match against.
fn request_path(url: &Url) -> &str {
    &url[Position::BeforePath..Position::AfterQuery]
}
