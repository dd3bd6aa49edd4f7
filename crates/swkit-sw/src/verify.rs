//! URL allow/deny verification.

use tracing::trace;
use url::Url;

use crate::config::{PolicyConfiguration, PolicyError};

/// `host[:port]` as it appears in the URL authority. Default ports are
/// elided, matching how a page reports its own host.
pub fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

impl PolicyConfiguration {
    /// True iff the URL is http(s) and its authority is exactly one of the
    /// allowed hosts.
    pub fn host_allowed(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        // Credentials sit in front of the host, so the authority does not
        // start with an allowed host.
        if !url.username().is_empty() || url.password().is_some() {
            return false;
        }

        match authority(url) {
            Some(host) => self.allow_hosts.iter().any(|allowed| *allowed == host),
            None => false,
        }
    }

    /// False iff the URL path starts with any denied prefix.
    pub fn path_allowed(&self, url: &Url) -> bool {
        let path = url.path();
        !self.deny_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Whether a response for this URL may be stored.
    pub fn is_cacheable(&self, url: &Url) -> bool {
        let cacheable = self.host_allowed(url) && self.path_allowed(url);
        trace!(url = %url, cacheable, "Verified URL");
        cacheable
    }

    /// Verify a raw URL string. Unparseable input is an error, never a
    /// verdict.
    pub fn verify_url(&self, url: &str) -> Result<bool, PolicyError> {
        let parsed = Url::parse(url).map_err(|source| PolicyError::MalformedUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(self.is_cacheable(&parsed))
    }
}
