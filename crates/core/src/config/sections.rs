//! Per-stage configuration sections.
//!
//! Each section deserializes with field-level defaults so a partial TOML file
//! or a single environment variable only overrides what it names.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fetcher settings: timeouts, retries, politeness, filesystem access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// User-Agent string for HTTP requests and robots.txt matching.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whole-request timeout in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between retry attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Maximum simultaneous fetches; excess requests queue.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Whether to respect robots.txt rules.
    #[serde(default = "default_true")]
    pub respect_robots: bool,

    /// Fall back to the headless browser for JS shells and bot walls.
    #[serde(default = "default_true")]
    pub browser_fallback: bool,

    /// Whether local paths may be fetched at all.
    #[serde(default = "default_true")]
    pub filesystem_enabled: bool,

    /// Directory roots local fetches must stay inside.
    #[serde(default)]
    pub allowed_directories: Vec<PathBuf>,

    /// Maximum local file size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum network response body in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Maximum redirects followed per request.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Visible-text floor under which an HTML page counts as a JS shell.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,

    /// TTL for cached fetch results in seconds.
    #[serde(default = "default_fetch_ttl")]
    pub cache_ttl_secs: u64,

    /// TTL for cached extraction results in seconds.
    #[serde(default = "default_extract_ttl")]
    pub extract_cache_ttl_secs: u64,
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_ms: default_fetch_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_concurrent: default_max_concurrent(),
            respect_robots: true,
            browser_fallback: true,
            filesystem_enabled: true,
            allowed_directories: Vec::new(),
            max_file_size: default_max_file_size(),
            max_bytes: default_max_bytes(),
            max_redirects: default_max_redirects(),
            min_text_chars: default_min_text_chars(),
            cache_ttl_secs: default_fetch_ttl(),
            extract_cache_ttl_secs: default_extract_ttl(),
        }
    }
}

/// Shared HTTP connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Total concurrent connection cap.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle keep-alive connections retained per host.
    #[serde(default = "default_keepalive_per_host")]
    pub max_keepalive_per_host: usize,

    /// Seconds an idle keep-alive connection survives.
    #[serde(default = "default_keepalive_expiry_secs")]
    pub keepalive_expiry_secs: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// How long a caller waits for a free connection slot.
    #[serde(default = "default_pool_wait_timeout_ms")]
    pub pool_wait_timeout_ms: u64,
}

impl PoolSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// reqwest has no separate write timeout; the request as a whole is
    /// bounded by read + write.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms + self.write_timeout_ms)
    }

    pub fn keepalive_expiry(&self) -> Duration {
        Duration::from_secs(self.keepalive_expiry_secs)
    }

    pub fn pool_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_wait_timeout_ms)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_keepalive_per_host: default_keepalive_per_host(),
            keepalive_expiry_secs: default_keepalive_expiry_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            pool_wait_timeout_ms: default_pool_wait_timeout_ms(),
        }
    }
}

/// Headless browser pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Whether rendered mode (headless browser) is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Fixed number of browser instances.
    #[serde(default = "default_browser_pool_size")]
    pub pool_size: usize,

    /// How long a caller waits for a free instance.
    #[serde(default = "default_browser_acquire_ms")]
    pub acquire_timeout_ms: u64,

    /// Per-page render timeout.
    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Time given to client-side scripts after navigation.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl BrowserSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            pool_size: default_browser_pool_size(),
            acquire_timeout_ms: default_browser_acquire_ms(),
            render_timeout_ms: default_render_timeout_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

/// Chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Fixed,
    Semantic,
    Hierarchical,
    Adaptive,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Fixed => "fixed",
            ChunkStrategy::Semantic => "semantic",
            ChunkStrategy::Hierarchical => "hierarchical",
            ChunkStrategy::Adaptive => "adaptive",
        }
    }
}

/// Text chunker settings. Sizes are in tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerSettings {
    #[serde(default = "default_strategy")]
    pub strategy: ChunkStrategy,

    /// Target tokens per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Tokens repeated from the end of one chunk at the start of the next.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Keep fenced code blocks inside a single chunk.
    #[serde(default = "default_true")]
    pub preserve_code_blocks: bool,

    /// Apply `chunk_overlap` to semantic/hierarchical/adaptive output too.
    #[serde(default)]
    pub overlap_non_fixed: bool,

    /// Let the adaptive strategy pick a target from the document shape.
    #[serde(default = "default_true")]
    pub adaptive_enabled: bool,

    /// Adaptive target for code-heavy documents.
    #[serde(default = "default_code_chunk_size")]
    pub code_chunk_size: usize,

    /// Adaptive target for dense prose.
    #[serde(default = "default_dense_chunk_size")]
    pub dense_chunk_size: usize,
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            preserve_code_blocks: true,
            overlap_non_fixed: false,
            adaptive_enabled: true,
            code_chunk_size: default_code_chunk_size(),
            dense_chunk_size: default_dense_chunk_size(),
        }
    }
}

/// Summarization backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerSettings {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion token budget per backend call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_true")]
    pub streaming_enabled: bool,

    /// Total chunk tokens at or above which map-reduce is used.
    #[serde(default = "default_map_reduce_threshold")]
    pub map_reduce_threshold: usize,

    /// Parallel per-chunk calls in the map phase.
    #[serde(default = "default_map_concurrency")]
    pub map_concurrency: usize,

    /// OpenAI-compatible API base, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer key for the backend.
    ///
    /// Set via SIEVE_SUMMARIZER__API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_backend_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// TTL for cached summaries in seconds.
    #[serde(default = "default_summary_ttl")]
    pub cache_ttl_secs: u64,
}

impl SummarizerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            streaming_enabled: true,
            map_reduce_threshold: default_map_reduce_threshold(),
            map_concurrency: default_map_concurrency(),
            endpoint: default_endpoint(),
            api_key: None,
            timeout_ms: default_backend_timeout_ms(),
            max_retries: default_backend_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            cache_ttl_secs: default_summary_ttl(),
        }
    }
}

/// Size-based eviction policy for the cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used.
    Lru,
    /// Least frequently used, ties broken by recency.
    Lfu,
}

/// Disk cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding the SQLite store.
    #[serde(default = "default_cache_dir")]
    pub directory: PathBuf,

    /// TTL used when a caller passes none.
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    /// Upper bound on stored record bytes.
    #[serde(default = "default_cache_max_size")]
    pub max_size_bytes: u64,

    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
            default_ttl_secs: default_cache_ttl(),
            max_size_bytes: default_cache_max_size(),
            eviction_policy: default_eviction_policy(),
        }
    }
}

/// API key provisioning and rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Keys accepted at the service boundary. Empty means open access.
    ///
    /// Set via SIEVE_AUTH__API_KEYS environment variable.
    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default = "default_rate_limit")]
    pub default_rate_limit_per_minute: u32,

    /// Sliding window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_seconds: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            default_rate_limit_per_minute: default_rate_limit(),
            window_seconds: default_window_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    "sieve/0.1".into()
}

fn default_fetch_timeout_ms() -> u64 {
    20_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_concurrent() -> usize {
    8
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_max_redirects() -> usize {
    5
}

fn default_min_text_chars() -> usize {
    200
}

fn default_fetch_ttl() -> u64 {
    3_600
}

fn default_extract_ttl() -> u64 {
    86_400
}

fn default_max_connections() -> usize {
    100
}

fn default_keepalive_per_host() -> usize {
    20
}

fn default_keepalive_expiry_secs() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_write_timeout_ms() -> u64 {
    30_000
}

fn default_pool_wait_timeout_ms() -> u64 {
    5_000
}

fn default_browser_pool_size() -> usize {
    2
}

fn default_browser_acquire_ms() -> u64 {
    30_000
}

fn default_render_timeout_ms() -> u64 {
    30_000
}

fn default_settle_ms() -> u64 {
    1_500
}

fn default_strategy() -> ChunkStrategy {
    ChunkStrategy::Hierarchical
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_min_chunk_size() -> usize {
    64
}

fn default_max_chunk_size() -> usize {
    1_024
}

fn default_code_chunk_size() -> usize {
    768
}

fn default_dense_chunk_size() -> usize {
    384
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1_024
}

fn default_map_reduce_threshold() -> usize {
    6_000
}

fn default_map_concurrency() -> usize {
    4
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".into()
}

fn default_backend_timeout_ms() -> u64 {
    120_000
}

fn default_backend_retries() -> u32 {
    2
}

fn default_summary_ttl() -> u64 {
    7 * 86_400
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./.sieve-cache")
}

fn default_cache_ttl() -> u64 {
    3_600
}

fn default_cache_max_size() -> u64 {
    512 * 1024 * 1024
}

fn default_eviction_policy() -> EvictionPolicy {
    EvictionPolicy::Lru
}

fn default_rate_limit() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}
