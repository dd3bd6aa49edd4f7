//! Worker policy configuration.
//!
//! The policy is loaded once, before any lifecycle event runs, from a JSON
//! document shaped like:
//!
//! ```json
//! {
//!   "cacheName": "site-20240101",
//!   "resources": ["/", "/assets/css/style.css"],
//!   "allowHosts": ["cdn.example.com"],
//!   "denyPaths": ["/api/"],
//!   "purge": false
//! }
//! ```
//!
//! Every field must be present and no other field may appear; a document
//! that does not have exactly this shape fails to load. The policy is never
//! mutated afterwards; components share it through an `Arc`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use swkit_net::{Fetcher, NetError, Request};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::verify::authority;

/// Errors raised while loading or consulting the policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read policy from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed policy: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid policy: {0}")]
    Invalid(String),

    #[error("Failed to fetch policy: {0}")]
    Fetch(#[from] NetError),

    #[error("Policy resource {url} returned status {status}")]
    Unavailable { url: Url, status: http::StatusCode },

    #[error("Malformed URL {url}: {source}")]
    MalformedUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Immutable caching policy for one running worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyConfiguration {
    /// Name of the store owned by this worker version.
    pub cache_name: String,

    /// Resources pre-fetched on install, absolute or relative to the worker
    /// origin.
    pub resources: Vec<String>,

    /// Hosts (`host` or `host:port`) whose responses may be stored.
    pub allow_hosts: Vec<String>,

    /// Path prefixes that are never stored.
    pub deny_paths: Vec<String>,

    /// Disable caching and tear down every store.
    pub purge: bool,
}

impl PolicyConfiguration {
    /// Parse and validate a JSON policy document.
    pub fn from_json_str(json: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load the policy from a file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading policy");

        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PolicyError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json_str(&json)
    }

    /// Load the policy from a network resource.
    pub async fn fetch_from(fetcher: &dyn Fetcher, url: Url) -> Result<Self, PolicyError> {
        debug!(url = %url, "Fetching policy");

        let response = fetcher.fetch(Request::get(url.clone())).await?;
        if !response.ok() {
            return Err(PolicyError::Unavailable {
                url,
                status: response.status,
            });
        }

        let json = response.text()?;
        Self::from_json_str(&json)
    }

    /// The effective policy for a worker running at `origin`.
    ///
    /// Unless purging, the origin's own host is allowed so same-origin
    /// requests are always cacheable.
    pub fn for_origin(mut self, origin: &Url) -> Self {
        if self.purge {
            info!(cache = %self.cache_name, "Purge mode enabled; caching disabled");
            return self;
        }

        if let Some(host) = authority(origin) {
            if !self.allow_hosts.contains(&host) {
                debug!(host = %host, "Allowing worker origin");
                self.allow_hosts.push(host);
            }
        }
        self
    }

    /// Resolve the install-time resources against the worker origin.
    pub fn resource_urls(&self, origin: &Url) -> Result<Vec<Url>, PolicyError> {
        self.resources
            .iter()
            .map(|resource| {
                origin
                    .join(resource)
                    .map_err(|source| PolicyError::MalformedUrl {
                        url: resource.clone(),
                        source,
                    })
            })
            .collect()
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if self.cache_name.trim().is_empty() {
            return Err(PolicyError::Invalid("cacheName must not be empty".into()));
        }
        if self.allow_hosts.iter().any(|h| h.is_empty()) {
            return Err(PolicyError::Invalid("allowHosts contains an empty host".into()));
        }
        if self.deny_paths.iter().any(|p| p.is_empty()) {
            // An empty prefix would deny every path.
            return Err(PolicyError::Invalid("denyPaths contains an empty prefix".into()));
        }
        Ok(())
    }
}
