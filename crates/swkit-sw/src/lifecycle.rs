//! Install and activate handling for the named cache store.

use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use swkit_net::{Fetcher, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{Cache, CacheStorage};
use crate::config::PolicyConfiguration;
use crate::ServiceWorkerError;

/// What install did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Number of resources written to the store.
    pub precached: usize,
    /// Install was a no-op because the policy purges.
    pub skipped: bool,
}

/// What activate did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stores that were deleted.
    pub deleted: Vec<String>,
    /// Stores that were kept.
    pub retained: Vec<String>,
    /// Stores whose deletion failed.
    pub failed: Vec<String>,
}

/// Owns the cache store's install/activate behaviour for one worker version.
pub struct CacheLifecycle {
    policy: Arc<PolicyConfiguration>,
    origin: Url,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl CacheLifecycle {
    pub fn new(
        policy: Arc<PolicyConfiguration>,
        origin: Url,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            policy,
            origin,
            storage,
            fetcher,
        }
    }

    /// Pre-fetch every configured resource into the store.
    ///
    /// All resources are fetched before anything is written; one failed
    /// fetch or non-2xx response fails the whole install.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        if self.policy.purge {
            info!("Purging: install skipped, no store created");
            return Ok(InstallReport {
                precached: 0,
                skipped: true,
            });
        }

        let urls = self.policy.resource_urls(&self.origin)?;
        let cache = self.storage.open(&self.policy.cache_name).await?;

        debug!(cache = %self.policy.cache_name, count = urls.len(), "Pre-fetching resources");
        let fetched = try_join_all(urls.into_iter().map(|url| self.precache_fetch(url))).await?;

        for (request, response) in fetched.iter() {
            cache.put(request, response.clone()).await?;
        }

        info!(
            cache = %self.policy.cache_name,
            precached = fetched.len(),
            "Install complete"
        );
        Ok(InstallReport {
            precached: fetched.len(),
            skipped: false,
        })
    }

    async fn precache_fetch(&self, url: Url) -> Result<(Request, Response), ServiceWorkerError> {
        let request = Request::get(url.clone());
        let response = self
            .fetcher
            .fetch(request.clone())
            .await
            .map_err(|source| ServiceWorkerError::PrecacheFetch {
                url: url.clone(),
                source,
            })?;

        if !response.ok() {
            return Err(ServiceWorkerError::PrecacheStatus {
                url,
                status: response.status,
            });
        }
        Ok((request, response))
    }

    /// Delete every store but the current one, or every store when purging.
    ///
    /// Deletions run concurrently and a failed deletion does not stop the
    /// others.
    pub async fn activate(&self) -> ActivateReport {
        let mut report = ActivateReport::default();

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not enumerate stores; nothing collected");
                return report;
            }
        };

        let (stale, retained): (Vec<String>, Vec<String>) = names
            .into_iter()
            .partition(|name| self.policy.purge || *name != self.policy.cache_name);
        report.retained = retained;

        let results = join_all(stale.into_iter().map(|name| async move {
            let result = self.storage.delete(&name).await;
            (name, result)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(_) => {
                    info!(cache = %name, "Deleted store");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete store");
                    report.failed.push(name);
                }
            }
        }

        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            purge = self.policy.purge,
            "Activate complete"
        );
        report
    }
}
