//! reqwest-backed network fetcher.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use swkit_common::{with_timeout, SwKitError};
use tracing::{debug, info, trace};

use crate::{Fetcher, NetError, Request, Response};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Upper bound for a request that sets no timeout of its own.
    /// `None` leaves requests unbounded.
    pub default_timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("SwKit/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: None,
            max_redirects: 10,
        }
    }
}

/// Fetches requests from the network.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    /// Loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    async fn execute(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if let Some(body) = request.body.clone() {
            req_builder = req_builder.body(body);
        }

        let limit = request.timeout.or(self.config.default_timeout);

        let response = with_timeout(limit, || async move {
            let response = req_builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let url = response.url().clone();
            let body = response.bytes().await?;
            Ok::<_, NetError>(Response {
                url,
                status,
                headers,
                body,
            })
        })
        .await
        .map_err(|e| match e {
            SwKitError::Timeout(limit) => NetError::Timeout(limit),
            other => NetError::RequestFailed(other.to_string()),
        })??;

        trace!(
            url = %response.url,
            status = %response.status,
            body_len = response.body.len(),
            "Response received"
        );

        Ok(response)
    }
}

impl Fetcher for ResourceLoader {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        self.execute(request).boxed()
    }
}
