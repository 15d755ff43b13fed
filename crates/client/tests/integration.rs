//! End-to-end behaviour over a mock HTTP server and a temporary filesystem.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sieve_client::browser::{BrowserInstance, BrowserLauncher, BrowserPool, RenderError, RenderedPage};
use sieve_client::summarize::{SummaryBackend, SummaryRequest};
use sieve_client::{ConnectionPool, FetchMethod, Fetcher, LocationStatus, Pipeline};
use sieve_core::config::{AppConfig, CacheSettings, FetchSettings, PoolSettings};
use sieve_core::{CacheManager, Error, MetricsCollector};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARTICLE: &str = "<html lang=\"en\"><head><title>Release notes</title></head><body>\
<nav>Home | Docs</nav><article><h1>Release notes</h1>\
<p>The cache now evicts least frequently used entries when the size bound is reached.</p>\
<p>Chunking keeps fenced code blocks intact across chunk boundaries.</p></article></body></html>";

fn fetch_settings() -> FetchSettings {
    FetchSettings { respect_robots: false, retry_delay_ms: 1, ..FetchSettings::default() }
}

async fn fetcher_with(settings: FetchSettings, cache: CacheManager, browser: Option<BrowserPool>) -> Fetcher {
    let pool = Arc::new(ConnectionPool::new(PoolSettings::default(), &settings));
    Fetcher::new(settings, pool, browser, cache, Arc::new(MetricsCollector::new()))
        .with_browser_acquire_timeout(Duration::from_secs(1))
}

async fn fetcher(settings: FetchSettings) -> Fetcher {
    fetcher_with(settings, CacheManager::disabled(CacheSettings::default()), None).await
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
}

#[tokio::test]
async fn test_second_fetch_served_from_disk_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .respond_with(html(ARTICLE))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::open(CacheSettings { directory: dir.path().to_path_buf(), ..CacheSettings::default() }).await;
    assert!(cache.is_enabled());
    let fetcher = fetcher_with(fetch_settings(), cache, None).await;

    let url = format!("{}/notes", server.uri());
    let first = fetcher.fetch(&url).await.unwrap();
    let second = fetcher.fetch(&url).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.fetch_method, FetchMethod::Network);
    assert!(second.is_html());
}

#[tokio::test]
async fn test_transient_failures_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET")).and(path("/flaky")).respond_with(html(ARTICLE)).mount(&server).await;

    let fetched = fetcher(fetch_settings()).await.fetch(&format!("{}/flaky", server.uri())).await.unwrap();
    assert_eq!(fetched.status_code, 200);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_client_errors_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher(fetch_settings()).await.fetch(&format!("{}/gone", server.uri())).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
}

#[tokio::test]
async fn test_retries_exhausted_reports_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let settings = FetchSettings { max_retries: 2, ..fetch_settings() };
    let err = fetcher(settings).await.fetch(&format!("{}/down", server.uri())).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_cancelled_fetch_releases_connection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html(ARTICLE).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let fetcher = Arc::new(fetcher(fetch_settings()).await);
    let cancel = CancellationToken::new();
    let task = {
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();
        let url = format!("{}/slow", server.uri());
        tokio::spawn(async move { fetcher.fetch_with_cancel(&url, &cancel).await })
    };

    for _ in 0..200 {
        if fetcher.pool().stats().active == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(fetcher.pool().stats().active, 1);

    cancel.cancel();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(fetcher.pool().stats().active, 0);
}

#[tokio::test]
async fn test_robots_disallow_blocks_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/report"))
        .respond_with(html(ARTICLE))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET")).and(path("/public")).respond_with(html(ARTICLE)).mount(&server).await;

    let fetcher = fetcher(FetchSettings { respect_robots: true, ..fetch_settings() }).await;
    let err = fetcher.fetch(&format!("{}/private/report", server.uri())).await.unwrap_err();
    assert!(matches!(err, Error::RobotsDisallowed(_)));
    let err = fetcher.fetch(&format!("{}/private/report?page=2", server.uri())).await.unwrap_err();
    assert!(matches!(err, Error::RobotsDisallowed(_)));

    assert!(fetcher.fetch(&format!("{}/public", server.uri())).await.is_ok());
}

#[tokio::test]
async fn test_filesystem_allow_list() {
    let root = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("notes.md"), "# Notes\n\nInside the root.").unwrap();
    std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();

    let settings = FetchSettings { allowed_directories: vec![root.path().to_path_buf()], ..fetch_settings() };
    let fetcher = fetcher(settings.clone()).await;

    let inside = fetcher.fetch(&root.path().join("notes.md").display().to_string()).await.unwrap();
    assert_eq!(inside.fetch_method, FetchMethod::Filesystem);
    assert_eq!(inside.text(), "# Notes\n\nInside the root.");

    let escaped = format!("{}/../{}/secret.txt", root.path().display(), outside.path().file_name().unwrap().to_string_lossy());
    assert!(matches!(fetcher.fetch(&escaped).await, Err(Error::PathNotAllowed(_))));

    let direct = outside.path().join("secret.txt").display().to_string();
    assert!(matches!(fetcher.fetch(&direct).await, Err(Error::PathNotAllowed(_))));

    let missing = root.path().join("missing.md").display().to_string();
    assert!(matches!(fetcher.fetch(&missing).await, Err(Error::NotFound(_))));

    let disabled = self::fetcher(FetchSettings { filesystem_enabled: false, ..settings }).await;
    let location = root.path().join("notes.md").display().to_string();
    assert!(matches!(disabled.fetch(&location).await, Err(Error::FilesystemDisabled)));
}

struct StaticPage;

#[async_trait]
impl BrowserInstance for StaticPage {
    async fn render(&self, url: &Url, _timeout: Duration) -> Result<RenderedPage, RenderError> {
        Ok(RenderedPage { html: ARTICLE.to_string(), final_url: url.clone(), render_time_ms: 1 })
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(self: Box<Self>) {}
}

#[derive(Default)]
struct StaticLauncher {
    launches: AtomicUsize,
}

#[async_trait]
impl BrowserLauncher for StaticLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserInstance>, RenderError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticPage))
    }
}

#[tokio::test]
async fn test_bot_wall_falls_back_to_browser() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/walled"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let launcher = Arc::new(StaticLauncher::default());
    let browser = BrowserPool::with_size(launcher.clone(), 1, Duration::from_secs(5));
    let fetcher = fetcher_with(fetch_settings(), CacheManager::disabled(CacheSettings::default()), Some(browser)).await;

    let fetched = fetcher.fetch(&format!("{}/walled", server.uri())).await.unwrap();
    assert_eq!(fetched.fetch_method, FetchMethod::Browser);
    assert!(fetched.text().contains("Release notes"));
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_javascript_shell_is_rendered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app"))
        .respond_with(html("<html><body><div id=\"root\"></div><script src=\"/app.js\"></script></body></html>"))
        .mount(&server)
        .await;

    let browser = BrowserPool::with_size(Arc::new(StaticLauncher::default()), 1, Duration::from_secs(5));
    let fetcher = fetcher_with(fetch_settings(), CacheManager::disabled(CacheSettings::default()), Some(browser)).await;

    let fetched = fetcher.fetch(&format!("{}/app", server.uri())).await.unwrap();
    assert_eq!(fetched.fetch_method, FetchMethod::Browser);
}

struct BrokenPage;

#[async_trait]
impl BrowserInstance for BrokenPage {
    async fn render(&self, _url: &Url, _timeout: Duration) -> Result<RenderedPage, RenderError> {
        Err(RenderError::Navigation("net::ERR_ABORTED".into()))
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(self: Box<Self>) {}
}

struct BrokenLauncher;

#[async_trait]
impl BrowserLauncher for BrokenLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserInstance>, RenderError> {
        Ok(Box::new(BrokenPage))
    }
}

#[tokio::test]
async fn test_failed_render_recorded_in_metrics() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/walled")).respond_with(ResponseTemplate::new(403)).mount(&server).await;

    let settings = fetch_settings();
    let metrics = Arc::new(MetricsCollector::new());
    let pool = Arc::new(ConnectionPool::new(PoolSettings::default(), &settings));
    let browser = BrowserPool::with_size(Arc::new(BrokenLauncher), 1, Duration::from_secs(5));
    let fetcher = Fetcher::new(
        settings,
        pool,
        Some(browser),
        CacheManager::disabled(CacheSettings::default()),
        metrics.clone(),
    )
    .with_browser_acquire_timeout(Duration::from_secs(1));

    let err = fetcher.fetch(&format!("{}/walled", server.uri())).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 403, .. }));

    let render = metrics
        .snapshot()
        .into_iter()
        .find(|op| op.component == "fetch" && op.operation == "browser")
        .unwrap();
    assert_eq!(render.count, 1);
    assert_eq!(render.errors, 1);
}

/// Records every prompt and answers with a fixed summary.
#[derive(Default)]
struct RecordingBackend {
    prompts: Mutex<Vec<String>>,
}

impl RecordingBackend {
    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl SummaryBackend for RecordingBackend {
    async fn complete(&self, request: &SummaryRequest) -> Result<String, Error> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok("Eviction is now LFU and code fences stay whole.".into())
    }
}

async fn pipeline(root: &std::path::Path, backend: Arc<RecordingBackend>) -> Pipeline {
    let config = AppConfig {
        fetch: FetchSettings { allowed_directories: vec![root.to_path_buf()], ..fetch_settings() },
        ..AppConfig::default()
    };
    let cache = CacheManager::open_in_memory(CacheSettings::default()).await;
    Pipeline::new(&config, cache, None).with_backend(backend)
}

#[tokio::test]
async fn test_pipeline_summarizes_batch_with_inline_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .respond_with(html(ARTICLE))
        .expect(1)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("guide.md"), "# Guide\n\nRun `sieve-mcp` over stdio.\n").unwrap();

    let backend = Arc::new(RecordingBackend::default());
    let pipeline = pipeline(root.path(), backend.clone()).await;
    let url = format!("{}/notes", server.uri());
    let locations = vec![
        url.clone(),
        root.path().join("guide.md").display().to_string(),
        root.path().join("absent.md").display().to_string(),
    ];

    let batch = pipeline.summarize(&locations, Some("what changed?")).await.unwrap();
    assert_eq!(batch.statuses.len(), 3);
    assert!(matches!(
        &batch.statuses[0],
        LocationStatus::Ok { title: Some(title), fetch_method: FetchMethod::Network, .. } if title == "Release notes"
    ));
    assert!(matches!(&batch.statuses[1], LocationStatus::Ok { fetch_method: FetchMethod::Filesystem, .. }));
    assert!(matches!(&batch.statuses[2], LocationStatus::Failed { error, .. } if error.contains("NOT_FOUND")));

    let summary = batch.stream.unwrap().into_text().await.unwrap();
    assert_eq!(summary, "Eviction is now LFU and code fences stay whole.");
    assert_eq!(backend.calls(), 1);

    let prompt = backend.prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains(&format!("## Source: {url}")));
    assert!(prompt.contains("sieve-mcp"));
    assert!(!prompt.contains("Home | Docs"));

    // Fetch, extraction and summary all come from cache the second time.
    let again = pipeline.summarize(&locations, Some("what changed?")).await.unwrap();
    assert_eq!(again.stream.unwrap().into_text().await.unwrap(), summary);
    assert_eq!(backend.calls(), 1);

    let stats = pipeline.cache().stats().await;
    assert!(stats.entry_count > 0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_pipeline_all_failed_has_no_stream() {
    let root = tempfile::tempdir().unwrap();
    let backend = Arc::new(RecordingBackend::default());
    let pipeline = pipeline(root.path(), backend.clone()).await;

    let batch = pipeline
        .summarize(&["/definitely/not/allowed.txt".to_string()], None)
        .await
        .unwrap();
    assert!(batch.stream.is_none());
    assert!(matches!(&batch.statuses[0], LocationStatus::Failed { error, .. } if error.contains("PATH_NOT_ALLOWED")));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_pipeline_cancelled_preparation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html(ARTICLE).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let pipeline = pipeline(root.path(), Arc::new(RecordingBackend::default())).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = pipeline
        .summarize_with_cancel(&[format!("{}/slow", server.uri())], None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(pipeline.pool().stats().active, 0);
}
