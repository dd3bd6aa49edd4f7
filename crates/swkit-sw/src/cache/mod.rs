//! Named cache stores.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (by name)
//!             └── Request → Response
//! ```
//!
//! Every operation is asynchronous and may suspend. Implementations are
//! expected to be atomic per key; callers do no locking of their own.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use futures::FutureExt;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use swkit_net::{Request, Response};
use thiserror::Error;
use url::Url;

pub mod disk;
pub mod memory;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Cache store errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rejected by cache: {0}")]
    Rejected(String),

    #[error("Cache {0} has been deleted")]
    Deleted(String),

    #[error("Corrupt cache entry: {0}")]
    InvalidEntry(String),
}

/// A stored request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the key, fragment removed).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, repeats kept.
    pub headers: Vec<(String, String)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Build the entry to store for `request`.
    ///
    /// Only GET requests are storable, and partial content is refused.
    pub fn from_exchange(request: &Request, response: &Response) -> Result<Self, CacheError> {
        if !request.is_read() {
            return Err(CacheError::Rejected(format!(
                "{} {} is not a GET request",
                request.method, request.url
            )));
        }
        if response.status == StatusCode::PARTIAL_CONTENT {
            return Err(CacheError::Rejected(format!(
                "partial response for {}",
                request.url
            )));
        }

        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Ok(Self {
            url: request.cache_key(),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        })
    }

    /// Rebuild the response this entry holds.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let url = Url::parse(&self.url).map_err(|e| CacheError::InvalidEntry(e.to_string()))?;
        let status =
            StatusCode::from_u16(self.status).map_err(|e| CacheError::InvalidEntry(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Ok(Response {
            url,
            status,
            headers,
            body: self.body.clone().into(),
        })
    }
}

/// Only GET requests ever match a stored entry.
pub(crate) fn lookup_key(request: &Request) -> Option<String> {
    request.is_read().then(|| request.cache_key())
}

/// One named store.
pub trait Cache: Send + Sync {
    /// The store name.
    fn name(&self) -> &str;

    /// Find the stored response for a request.
    fn match_request<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>>;

    /// Store a response for a request, replacing any previous one.
    fn put<'a>(
        &'a self,
        request: &'a Request,
        response: Response,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Remove the entry for a request.
    fn delete<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Keys (URLs) of every stored entry.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>>;
}

/// The set of named stores for one origin.
pub trait CacheStorage: Send + Sync {
    /// Open a store, creating it if absent.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn Cache>, CacheError>>;

    /// Check whether a store exists.
    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Delete a store. Returns whether it existed.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Names of all stores.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>>;

    /// Search every store, in name order, for a response to `request`.
    fn match_request<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        async move {
            for name in self.keys().await? {
                if let Some(response) = self.open(&name).await?.match_request(request).await? {
                    return Ok(Some(response));
                }
            }
            Ok(None)
        }
        .boxed()
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
