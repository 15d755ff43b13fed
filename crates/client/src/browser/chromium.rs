//! Headless Chrome/Chromium instances via chromiumoxide.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use url::Url;

use super::{BrowserInstance, BrowserLauncher, RenderError, RenderedPage};
use sieve_core::config::BrowserSettings;

/// Launches headless Chromium processes.
pub struct ChromiumLauncher {
    settle: Duration,
}

impl ChromiumLauncher {
    pub fn new(settings: &BrowserSettings) -> Self {
        Self { settle: Duration::from_millis(settings.settle_ms) }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserInstance>, RenderError> {
        Ok(Box::new(ChromiumInstance::start(self.settle).await?))
    }
}

struct ChromiumInstance {
    browser: Browser,
    handler: JoinHandle<()>,
    settle: Duration,
}

impl ChromiumInstance {
    async fn start(settle: Duration) -> Result<Self, RenderError> {
        let config = BrowserConfig::builder().build().map_err(RenderError::BrowserLaunch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::BrowserLaunch(e.to_string()))?;

        // The CDP handler must be polled for the browser to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                    break;
                }
            }
        });

        Ok(Self { browser, handler, settle })
    }

    async fn render_page(&self, page: &Page, url: &Url) -> Result<RenderedPage, RenderError> {
        let start = Instant::now();
        page.goto(url.as_str())
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        // Give client-side scripts time to populate the DOM.
        tokio::time::sleep(self.settle).await;

        let html = page
            .content()
            .await
            .map_err(|e| RenderError::ContentRetrieval(e.to_string()))?;

        let page_url = page
            .url()
            .await
            .map_err(|e| RenderError::ContentRetrieval(e.to_string()))?;

        let final_url = Url::parse(page_url.as_deref().unwrap_or(url.as_str()))
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        Ok(RenderedPage { html, final_url, render_time_ms: start.elapsed().as_millis() as u64 })
    }
}

#[async_trait]
impl BrowserInstance for ChromiumInstance {
    async fn render(&self, url: &Url, timeout: Duration) -> Result<RenderedPage, RenderError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        let rendered = tokio::time::timeout(timeout, self.render_page(&page, url))
            .await
            .map_err(|_| RenderError::Timeout(timeout.as_millis() as u64))
            .and_then(|result| result);

        // Close the tab whatever the outcome.
        if let Err(e) = page.close().await {
            tracing::debug!("failed to close tab: {e}");
        }
        rendered
    }

    async fn is_healthy(&self) -> bool {
        !self.handler.is_finished() && self.browser.version().await.is_ok()
    }

    async fn close(self: Box<Self>) {
        let mut this = *self;
        if let Err(e) = this.browser.close().await {
            tracing::warn!("failed to close browser cleanly: {e}");
        }
        if let Err(e) = this.browser.wait().await {
            tracing::warn!("failed to wait for browser exit: {e}");
        }
        this.handler.abort();
    }
}
