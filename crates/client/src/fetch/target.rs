//! Location classification and URL canonicalization.
//!
//! A caller-supplied location is resolved exactly once into a [`FetchTarget`];
//! everything downstream matches on the variant instead of re-inspecting the
//! string.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty location")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for sieve_core::Error {
    fn from(err: UrlError) -> Self {
        match err {
            UrlError::Empty => sieve_core::Error::InvalidInput("empty location".into()),
            other => sieve_core::Error::InvalidUrl(other.to_string()),
        }
    }
}

/// How a fetch obtained its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMethod {
    Network,
    Browser,
    Filesystem,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Network => "network",
            FetchMethod::Browser => "browser",
            FetchMethod::Filesystem => "filesystem",
        }
    }
}

/// Where a location points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    /// Absolute path, or a `file://` URL converted to one.
    Filesystem(PathBuf),
    /// Canonicalized http(s) URL.
    Network(Url),
}

impl FetchTarget {
    /// Classify a location string.
    ///
    /// Absolute paths and `file://` URLs go to the filesystem; anything else is
    /// canonicalized as a web URL, with `https` assumed when no scheme is given.
    pub fn resolve(location: &str) -> Result<Self, UrlError> {
        let trimmed = location.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }

        if trimmed.get(..7).is_some_and(|scheme| scheme.eq_ignore_ascii_case("file://")) {
            let url = Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
            let path = url
                .to_file_path()
                .map_err(|_| UrlError::InvalidUrl(format!("{trimmed} is not a local file URL")))?;
            return Ok(FetchTarget::Filesystem(path));
        }

        if Path::new(trimmed).is_absolute() {
            return Ok(FetchTarget::Filesystem(PathBuf::from(trimmed)));
        }

        canonicalize(trimmed).map(FetchTarget::Network)
    }

    /// Stable textual form used in cache keys and result metadata.
    pub fn location(&self) -> String {
        match self {
            FetchTarget::Filesystem(path) => path.display().to_string(),
            FetchTarget::Network(url) => url.to_string(),
        }
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location())
    }
}

/// Canonicalize a web URL for consistent caching.
///
/// Trims whitespace, defaults the scheme to `https`, lowercases the host and
/// drops the fragment. The query string is kept as given.
pub fn canonicalize(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let with_scheme = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };
    let mut url = Url::parse(&with_scheme).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(url.scheme().to_string()));
    }

    // `url` already lowercases registered domains; this covers hosts it leaves alone.
    if let Some(host) = url.host_str().map(str::to_lowercase) {
        url.set_host(Some(&host)).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }
    url.set_fragment(None);

    Ok(url)
}
