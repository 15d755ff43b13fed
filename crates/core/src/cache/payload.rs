//! Stored value shapes.
//!
//! Values are tagged explicitly (`{"kind": "binary", "data": "<base64>"}`) so
//! decoding matches on the tag instead of guessing from the JSON shape.

use serde::{Deserialize, Serialize};

/// A cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum CachePayload {
    Text(String),
    Json(serde_json::Value),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl CachePayload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CachePayload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            CachePayload::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CachePayload::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl From<String> for CachePayload {
    fn from(s: String) -> Self {
        CachePayload::Text(s)
    }
}

impl From<Vec<u8>> for CachePayload {
    fn from(b: Vec<u8>) -> Self {
        CachePayload::Binary(b)
    }
}

/// The persisted record around a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub value: CachePayload,
    /// Unix seconds with sub-second precision.
    pub created_at: f64,
    pub ttl_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl CacheRecord {
    pub fn is_expired_at(&self, now: f64) -> bool {
        now - self.created_at > self.ttl_seconds as f64
    }
}

/// Serde adapter storing bytes as standard base64 text.
pub mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
