//! Fixed-size pool of headless browser instances.
//!
//! Instances are launched lazily into free slots, health-checked when handed
//! back, and replaced in the background when a health check fails. A lease that is
//! dropped without [`BrowserPool::release`] (a cancelled render, say) is
//! recycled by a spawned task so its slot is never lost.

#[cfg(feature = "render")]
mod chromium;

#[cfg(feature = "render")]
pub use chromium::ChromiumLauncher;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::pool::{PoolStats, Waiting};
use sieve_core::Error;
use sieve_core::config::BrowserSettings;

/// Errors that can occur during page rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Failed to launch or connect to browser.
    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),

    /// Failed to navigate to URL.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Failed to get page content.
    #[error("content retrieval failed: {0}")]
    ContentRetrieval(String),

    /// Timeout waiting for page to load.
    #[error("render timeout after {0}ms")]
    Timeout(u64),

    /// Browser closed unexpectedly.
    #[error("browser closed unexpectedly")]
    BrowserClosed,
}

impl From<RenderError> for Error {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Timeout(ms) => Error::FetchTimeout(format!("render exceeded {ms}ms")),
            RenderError::BrowserLaunch(e) => Error::BrowserUnavailable(e),
            other => Error::RenderFailed(other.to_string()),
        }
    }
}

/// Result of rendering a page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Rendered HTML content.
    pub html: String,

    /// Final URL after redirects.
    pub final_url: Url,

    /// Time taken to render in milliseconds.
    pub render_time_ms: u64,
}

/// One running browser.
#[async_trait]
pub trait BrowserInstance: Send + Sync {
    async fn render(&self, url: &Url, timeout: Duration) -> Result<RenderedPage, RenderError>;

    /// Cheap liveness check run every time the instance is handed back.
    async fn is_healthy(&self) -> bool;

    async fn close(self: Box<Self>);
}

/// Starts browser instances for the pool.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserInstance>, RenderError>;
}

struct Shared {
    launcher: Arc<dyn BrowserLauncher>,
    size: usize,
    render_timeout: Duration,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn BrowserInstance>>>,
    replacement_failure: Mutex<Option<String>>,
    waiting: Arc<AtomicUsize>,
}

impl Shared {
    fn idle(&self) -> MutexGuard<'_, Vec<Box<dyn BrowserInstance>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failure(&self) -> MutexGuard<'_, Option<String>> {
        self.replacement_failure.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size browser pool.
#[derive(Clone)]
pub struct BrowserPool {
    shared: Arc<Shared>,
}

/// Exclusive use of one browser instance.
pub struct BrowserLease {
    instance: Option<Box<dyn BrowserInstance>>,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared>,
}

impl BrowserLease {
    /// Render `url` with the pool's render timeout.
    pub async fn render(&self, url: &Url) -> Result<RenderedPage, Error> {
        let instance = self.instance.as_ref().ok_or(RenderError::BrowserClosed)?;
        Ok(instance.render(url, self.shared.render_timeout).await?)
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        let (Some(instance), Some(permit)) = (self.instance.take(), self.permit.take()) else {
            return;
        };
        let shared = self.shared.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("browser lease dropped without release, recycling in background");
                handle.spawn(recycle(shared, instance, permit));
            }
            Err(_) => drop(permit),
        }
    }
}

impl BrowserPool {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: &BrowserSettings) -> Self {
        Self::with_size(launcher, settings.pool_size, settings.render_timeout())
    }

    pub fn with_size(launcher: Arc<dyn BrowserLauncher>, size: usize, render_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                launcher,
                size,
                render_timeout,
                slots: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(Vec::with_capacity(size)),
                replacement_failure: Mutex::new(None),
                waiting: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Lease an instance, waiting up to `timeout` for one to free up.
    ///
    /// # Errors
    ///
    /// - `Error::BrowserUnavailable` if a background replacement failed since the
    ///   last acquire (reported once), a launch fails, or the pool is shut down
    /// - `Error::PoolExhausted` if every instance stays leased past `timeout`
    pub async fn acquire(&self, timeout: Duration) -> Result<BrowserLease, Error> {
        if let Some(reason) = self.shared.failure().take() {
            return Err(Error::BrowserUnavailable(format!("browser replacement failed: {reason}")));
        }

        let started = Instant::now();
        let permit = {
            let _waiting = Waiting::enter(&self.shared.waiting);
            tokio::time::timeout(timeout, self.shared.slots.clone().acquire_owned()).await
        };

        let permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::BrowserUnavailable("browser pool shut down".into())),
            Err(_) => {
                return Err(Error::PoolExhausted(format!(
                    "no browser instance free after {}ms",
                    timeout.as_millis()
                )));
            }
        };

        let reused = self.shared.idle().pop();
        let instance = match reused {
            Some(instance) => instance,
            None => {
                tracing::info!("launching browser instance");
                self.shared.launcher.launch().await?
            }
        };

        tracing::debug!(wait_ms = started.elapsed().as_millis() as u64, "browser leased");
        Ok(BrowserLease { instance: Some(instance), permit: Some(permit), shared: self.shared.clone() })
    }

    /// Hand an instance back. Unhealthy instances are closed and replaced in
    /// the background.
    pub async fn release(&self, mut lease: BrowserLease) {
        if let (Some(instance), Some(permit)) = (lease.instance.take(), lease.permit.take()) {
            recycle(lease.shared.clone(), instance, permit).await;
        }
    }

    /// Close every idle instance and refuse further acquires.
    pub async fn shutdown(&self) {
        self.shared.slots.close();
        let idle: Vec<_> = self.shared.idle().drain(..).collect();
        let count = idle.len();
        for instance in idle {
            instance.close().await;
        }
        tracing::info!(closed = count, "browser pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.shared.size;
        let active = if self.shared.slots.is_closed() {
            0
        } else {
            total.saturating_sub(self.shared.slots.available_permits())
        };
        PoolStats { total, active, idle: total - active, waiting: self.shared.waiting.load(Ordering::SeqCst) }
    }
}

async fn recycle(shared: Arc<Shared>, instance: Box<dyn BrowserInstance>, permit: OwnedSemaphorePermit) {
    if shared.slots.is_closed() {
        instance.close().await;
        return;
    }

    if instance.is_healthy().await {
        shared.idle().push(instance);
        drop(permit);
        return;
    }

    tracing::warn!("browser instance failed health check, replacing");
    instance.close().await;

    tokio::spawn(async move {
        // The slot stays taken until the replacement is in place.
        let _permit = permit;
        match shared.launcher.launch().await {
            Ok(fresh) => shared.idle().push(fresh),
            Err(e) => {
                tracing::warn!(error = %e, "browser replacement failed");
                *shared.failure() = Some(e.to_string());
            }
        }
    });
}
