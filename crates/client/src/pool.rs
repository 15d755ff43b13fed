//! Shared HTTP connection pool.
//!
//! One `reqwest::Client` (and therefore one hyper connection pool) serves every
//! network fetch. The client is built lazily on first use and rebuilt after
//! [`ConnectionPool::close`]. Connection slots are handed out as RAII leases so a
//! fetch that completes, fails or is cancelled always gives its slot back.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use reqwest::Client;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore, TryAcquireError};

use sieve_core::Error;
use sieve_core::config::{FetchSettings, PoolSettings};

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
}

/// Lazily built HTTP client plus a bounded set of connection slots.
pub struct ConnectionPool {
    settings: PoolSettings,
    user_agent: String,
    max_redirects: usize,
    client: RwLock<Option<Client>>,
    slots: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    builds: AtomicU64,
}

/// A connection slot plus the shared client. The slot is returned on drop.
pub struct PooledClient {
    client: Client,
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

/// Counts a caller blocked on a pool for exactly as long as it waits.
pub(crate) struct Waiting(Arc<AtomicUsize>);

impl Waiting {
    pub(crate) fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for Waiting {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConnectionPool {
    /// Create the pool. No connection is opened and no client is built yet.
    pub fn new(settings: PoolSettings, fetch: &FetchSettings) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_connections));
        Self {
            user_agent: fetch.user_agent.clone(),
            max_redirects: fetch.max_redirects,
            client: RwLock::new(None),
            slots,
            waiting: Arc::new(AtomicUsize::new(0)),
            builds: AtomicU64::new(0),
            settings,
        }
    }

    /// Lease a connection slot, waiting up to `pool_wait_timeout` for one.
    ///
    /// # Errors
    ///
    /// `Error::PoolExhausted` when no slot frees up in time.
    pub async fn acquire(&self) -> Result<PooledClient, Error> {
        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(Error::PoolExhausted("connection pool closed".into())),
            Err(TryAcquireError::NoPermits) => {
                let _waiting = Waiting::enter(&self.waiting);
                let wait = self.settings.pool_wait_timeout();
                match tokio::time::timeout(wait, self.slots.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(Error::PoolExhausted("connection pool closed".into())),
                    Err(_) => {
                        tracing::warn!(wait_ms = wait.as_millis() as u64, "connection pool exhausted");
                        return Err(Error::PoolExhausted(format!(
                            "no connection slot free after {}ms",
                            wait.as_millis()
                        )));
                    }
                }
            }
        };

        let client = self.client().await?;
        Ok(PooledClient { client, _permit: permit })
    }

    /// The shared client without taking a slot.
    pub async fn client(&self) -> Result<Client, Error> {
        {
            let guard = self.client.read().await;
            if let Some(client) = guard.as_ref() {
                return Ok(client.clone());
            }
        }

        let mut guard = self.client.write().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = self.build()?;
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Drop the client; the next acquire builds a fresh one.
    ///
    /// Outstanding leases keep their clone of the old client until they finish.
    pub async fn close(&self) {
        let mut guard = self.client.write().await;
        if guard.take().is_some() {
            tracing::info!("connection pool closed");
        }
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.settings.max_connections;
        let active = total.saturating_sub(self.slots.available_permits());
        PoolStats { total, active, idle: total - active, waiting: self.waiting.load(Ordering::SeqCst) }
    }

    fn build(&self) -> Result<Client, Error> {
        let client = Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.settings.connect_timeout())
            .read_timeout(self.settings.read_timeout())
            .timeout(self.settings.request_timeout())
            .pool_max_idle_per_host(self.settings.max_keepalive_per_host)
            .pool_idle_timeout(self.settings.keepalive_expiry())
            .redirect(reqwest::redirect::Policy::limited(self.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        let generation = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, max_connections = self.settings.max_connections, "http client built");
        Ok(client)
    }
}
