//! Deterministic cache key construction.
//!
//! Logical keys are readable strings (`fetch:https://…`); the store only ever
//! sees their SHA-256 digest.

use sha2::{Digest, Sha256};

/// Builds logical cache keys for each pipeline stage.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// `fetch:{url}[:k=v,...]`
    pub fn fetch<I, K, V>(url: &str, params: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        with_params(format!("fetch:{url}"), params)
    }

    /// `extract:{url}[:k=v,...]`
    pub fn extract<I, K, V>(url: &str, config: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        with_params(format!("extract:{url}"), config)
    }

    /// `summary:{content_hash}[:query=...][:k=v,...]`
    pub fn summary<I, K, V>(content_hash: &str, query: Option<&str>, config: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut key = format!("summary:{content_hash}");
        if let Some(q) = query {
            key.push_str(":query=");
            key.push_str(q);
        }
        with_params(key, config)
    }

    /// SHA-256 over the concatenated texts, so identical content from different
    /// locations shares one key.
    pub fn content_hash<'a>(texts: impl IntoIterator<Item = &'a str>) -> String {
        let mut hasher = Sha256::new();
        for text in texts {
            hasher.update(text.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Fixed-length store key for a logical key.
    pub fn storage_key(logical: &str) -> String {
        hex::encode(Sha256::digest(logical.as_bytes()))
    }
}

fn with_params<I, K, V>(mut key: String, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(K, V)> = params.into_iter().collect();
    if pairs.is_empty() {
        return key;
    }
    pairs.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));

    let joined = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    key.push(':');
    key.push_str(&joined);
    key
}
