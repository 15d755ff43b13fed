//! API key authentication with a per-key sliding-window rate limit.
//!
//! State lives in process memory, so limits are per process: several server
//! processes sharing a key each grant the full budget.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;

use crate::Error;
use crate::config::AuthSettings;

/// A provisioned credential. Records are disabled, never removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiKeyRecord {
    #[serde(skip_serializing)]
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub rate_limit_per_minute: u32,
    pub enabled: bool,
}

#[derive(Default)]
struct State {
    keys: HashMap<String, ApiKeyRecord>,
    windows: HashMap<String, VecDeque<Instant>>,
}

/// Validates bearer tokens and enforces request budgets.
pub struct Authenticator {
    window: Duration,
    default_limit: u32,
    state: Mutex<State>,
}

impl Authenticator {
    pub fn new(default_limit: u32, window: Duration) -> Self {
        Self { window, default_limit, state: Mutex::new(State::default()) }
    }

    /// Load the statically configured keys.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let auth = Self::new(settings.default_rate_limit_per_minute, Duration::from_secs(settings.window_seconds));
        {
            let mut state = auth.lock();
            for (i, key) in settings.api_keys.iter().enumerate() {
                let key = key.trim().to_string();
                let record = ApiKeyRecord {
                    key: key.clone(),
                    name: format!("configured-{}", i + 1),
                    created_at: Utc::now(),
                    rate_limit_per_minute: settings.default_rate_limit_per_minute,
                    enabled: true,
                };
                state.keys.insert(key, record);
            }
        }
        tracing::info!(keys = settings.api_keys.len(), "authenticator initialised");
        auth
    }

    /// False when no key was ever provisioned; callers then run open.
    pub fn is_enabled(&self) -> bool {
        !self.lock().keys.is_empty()
    }

    /// Provision a new key with a 256-bit random secret.
    pub fn add_key(&self, name: &str, rate_limit_per_minute: Option<u32>) -> String {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        let key = hex::encode(secret);

        let record = ApiKeyRecord {
            key: key.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
            rate_limit_per_minute: rate_limit_per_minute.unwrap_or(self.default_limit),
            enabled: true,
        };
        self.lock().keys.insert(key.clone(), record);
        tracing::info!(name, "api key added");
        key
    }

    /// Permanently disable a key. Returns false for unknown keys.
    pub fn revoke(&self, key: &str) -> bool {
        let mut state = self.lock();
        let Some(record) = state.keys.get_mut(key) else {
            return false;
        };
        record.enabled = false;
        tracing::info!(name = %record.name, "api key revoked");
        state.windows.remove(key);
        true
    }

    /// Check a token and, when it is valid and within budget, count the request.
    ///
    /// Accepts `Bearer <key>` or the bare key. Unknown and disabled keys yield
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// `Error::RateLimited` when the key's window is full. The rejected request
    /// is not counted.
    pub fn authenticate(&self, token: &str) -> Result<Option<ApiKeyRecord>, Error> {
        self.authenticate_at(token, Instant::now())
    }

    pub fn authenticate_at(&self, token: &str, now: Instant) -> Result<Option<ApiKeyRecord>, Error> {
        let key = bare_token(token);
        let mut state = self.lock();

        let record = match state.keys.get(key) {
            Some(record) if record.enabled => record.clone(),
            _ => return Ok(None),
        };

        let window = self.window;
        let timestamps = state.windows.entry(key.to_string()).or_default();
        while timestamps.front().is_some_and(|t| now.saturating_duration_since(*t) >= window) {
            timestamps.pop_front();
        }

        if timestamps.len() >= record.rate_limit_per_minute as usize {
            tracing::warn!(name = %record.name, limit = record.rate_limit_per_minute, "rate limit exceeded");
            return Err(Error::RateLimited {
                name: record.name,
                limit: record.rate_limit_per_minute,
                window_secs: window.as_secs(),
            });
        }

        timestamps.push_back(now);
        Ok(Some(record))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bare_token(token: &str) -> &str {
    let token = token.trim();
    token
        .strip_prefix("Bearer ")
        .or_else(|| token.strip_prefix("bearer "))
        .unwrap_or(token)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited(limit: u32) -> (Authenticator, String) {
        let auth = Authenticator::new(limit, Duration::from_secs(60));
        let key = auth.add_key("ci", None);
        (auth, key)
    }

    #[test]
    fn test_n_requests_then_rejected() {
        let (auth, key) = limited(3);
        let t0 = Instant::now();

        for i in 0..3 {
            let now = t0 + Duration::from_millis(i * 10);
            assert!(auth.authenticate_at(&key, now).unwrap().is_some());
        }

        let err = auth.authenticate_at(&key, t0 + Duration::from_millis(40)).unwrap_err();
        assert!(matches!(err, Error::RateLimited { limit: 3, .. }));
    }

    #[test]
    fn test_window_slides() {
        let (auth, key) = limited(2);
        let t0 = Instant::now();

        auth.authenticate_at(&key, t0).unwrap();
        auth.authenticate_at(&key, t0 + Duration::from_secs(30)).unwrap();
        assert!(auth.authenticate_at(&key, t0 + Duration::from_secs(59)).is_err());

        // The first request has left the window; the second has not.
        assert!(auth.authenticate_at(&key, t0 + Duration::from_secs(60)).unwrap().is_some());
        assert!(auth.authenticate_at(&key, t0 + Duration::from_secs(61)).is_err());
    }

    #[test]
    fn test_rejection_not_counted() {
        let (auth, key) = limited(1);
        let t0 = Instant::now();

        auth.authenticate_at(&key, t0).unwrap();
        for s in 1..50 {
            assert!(auth.authenticate_at(&key, t0 + Duration::from_secs(s)).is_err());
        }
        assert!(auth.authenticate_at(&key, t0 + Duration::from_secs(60)).unwrap().is_some());
    }

    #[test]
    fn test_bearer_prefix_accepted() {
        let (auth, key) = limited(10);
        assert!(auth.authenticate(&format!("Bearer {key}")).unwrap().is_some());
        assert!(auth.authenticate(&format!("  {key} ")).unwrap().is_some());
    }

    #[test]
    fn test_unknown_and_revoked_keys() {
        let (auth, key) = limited(10);
        assert!(auth.authenticate("nope").unwrap().is_none());

        assert!(auth.revoke(&key));
        assert!(auth.authenticate(&key).unwrap().is_none());
        assert!(!auth.revoke("nope"));
    }

    #[test]
    fn test_generated_keys_are_random_hex() {
        let auth = Authenticator::new(5, Duration::from_secs(60));
        let a = auth.add_key("a", None);
        let b = auth.add_key("b", Some(1));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_settings() {
        let settings = AuthSettings { api_keys: vec!["alpha".into()], ..Default::default() };
        let auth = Authenticator::from_settings(&settings);
        assert!(auth.is_enabled());

        let record = auth.authenticate("Bearer alpha").unwrap().unwrap();
        assert_eq!(record.rate_limit_per_minute, settings.default_rate_limit_per_minute);

        assert!(!Authenticator::from_settings(&AuthSettings::default()).is_enabled());
    }
}
