//! # SwKit Net
//!
//! Request/response model and the network boundary used by the SwKit caching
//! worker.
//!
//! ## Design Goals
//!
//! 1. **Buffered bodies**: a response body is read from the wire once and held
//!    as [`Bytes`], so handing one copy to the caller and one to a cache store
//!    is a cheap clone rather than a second read.
//! 2. **Pluggable network**: everything that needs the network goes through the
//!    [`Fetcher`] trait; [`ResourceLoader`] is the reqwest-backed implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = Some(body);
        request
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this is a plain read (GET).
    pub fn is_read(&self) -> bool {
        self.method == Method::GET
    }

    /// Key under which a cache store files this request: the URL without
    /// its fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Create a response.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get content-type from headers.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The network: anything able to turn a request into a response.
pub trait Fetcher: Send + Sync {
    /// Perform the request against the network.
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>>;
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        (**self).fetch(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("text/html"),
            )
            .timeout(Duration::from_secs(10));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert!(request.is_read());
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_post_is_not_a_read() {
        let url = Url::parse("https://example.com/form").unwrap();
        let request = Request::post(url, Bytes::from_static(b"a=1"));
        assert!(!request.is_read());
        assert_eq!(request.body.as_deref(), Some(&b"a=1"[..]));
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let url = Url::parse("https://example.com/posts/a?x=1#comments").unwrap();
        assert_eq!(
            Request::get(url).cache_key(),
            "https://example.com/posts/a?x=1"
        );
    }

    #[test]
    fn test_response_clone_shares_body() {
        let url = Url::parse("https://example.com/app.js").unwrap();
        let response = Response::new(url, StatusCode::OK, "console.log(1)").with_header(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("text/javascript"),
        );
        let copy = response.clone();

        assert_eq!(copy.text().unwrap(), "console.log(1)");
        assert_eq!(response.text().unwrap(), "console.log(1)");
        assert_eq!(copy.content_type(), Some("text/javascript"));
        assert!(response.ok());
    }

    #[test]
    fn test_response_json() {
        #[derive(serde::Deserialize)]
        struct Conf {
            purge: bool,
        }

        let url = Url::parse("https://example.com/swconf.json").unwrap();
        let response = Response::new(url, StatusCode::OK, r#"{"purge": true}"#);
        assert!(response.json::<Conf>().unwrap().purge);
    }
}
