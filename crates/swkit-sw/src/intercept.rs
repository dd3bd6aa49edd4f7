//! Per-request routing: cache first, then network, then store.

use std::sync::Arc;

use swkit_net::{Fetcher, Request, Response};
use tracing::{debug, trace, warn};

use crate::cache::{Cache, CacheError, CacheStorage};
use crate::config::PolicyConfiguration;
use crate::keepalive::KeepAlive;
use crate::ServiceWorkerError;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Served from the store without touching the network.
    Cache,
    /// Fetched from the network. `stored` is set when a copy was handed to
    /// the store.
    Network { stored: bool },
}

/// The answer to one intercepted request.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: Response,
    pub source: ResponseSource,
}

impl FetchOutcome {
    pub fn from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

/// Decides, for every request a page makes, how it is answered.
pub struct FetchInterceptor {
    policy: Arc<PolicyConfiguration>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl FetchInterceptor {
    pub fn new(
        policy: Arc<PolicyConfiguration>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            policy,
            storage,
            fetcher,
        }
    }

    /// Answer one request.
    ///
    /// A store hit is returned as is. On a miss the network is asked; a
    /// storable response is copied into the store in the background (tracked
    /// by `keep_alive`) while the original goes back to the caller. A
    /// network failure on a miss is returned to the caller.
    pub async fn handle(
        &self,
        request: Request,
        keep_alive: &KeepAlive,
    ) -> Result<FetchOutcome, ServiceWorkerError> {
        if let Some(response) = self.lookup(&request).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(FetchOutcome {
                response,
                source: ResponseSource::Cache,
            });
        }

        trace!(url = %request.url, method = %request.method, "Cache miss");
        let response = self.fetcher.fetch(request.clone()).await.map_err(|e| {
            debug!(url = %request.url, error = %e, "Network fetch failed");
            e
        })?;

        if !self.should_store(&request) {
            return Ok(FetchOutcome {
                response,
                source: ResponseSource::Network { stored: false },
            });
        }

        let copy = response.clone();
        let storage = Arc::clone(&self.storage);
        let cache_name = self.policy.cache_name.clone();
        keep_alive.wait_until(async move {
            let url = request.url.clone();
            match put_entry(storage.as_ref(), &cache_name, &request, copy).await {
                Ok(()) => debug!(url = %url, cache = %cache_name, "Stored response"),
                Err(e) => warn!(url = %url, cache = %cache_name, error = %e, "Store write failed"),
            }
        });

        Ok(FetchOutcome {
            response,
            source: ResponseSource::Network { stored: true },
        })
    }

    /// Whether a network response to this request goes into the store.
    pub fn should_store(&self, request: &Request) -> bool {
        if self.policy.purge || !request.is_read() {
            return false;
        }

        match self.policy.verify_url(request.url.as_str()) {
            Ok(cacheable) => cacheable,
            Err(e) => {
                warn!(error = %e, "Unverifiable URL treated as non-cacheable");
                false
            }
        }
    }

    async fn lookup(&self, request: &Request) -> Option<Response> {
        match self.lookup_current(request).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed; using network");
                None
            }
        }
    }

    async fn lookup_current(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        let name = &self.policy.cache_name;
        if !self.storage.has(name).await? {
            return Ok(None);
        }
        self.storage.open(name).await?.match_request(request).await
    }
}

async fn put_entry(
    storage: &dyn CacheStorage,
    cache_name: &str,
    request: &Request,
    response: Response,
) -> Result<(), CacheError> {
    let cache: Arc<dyn Cache> = storage.open(cache_name).await?;
    cache.put(request, response).await
}
