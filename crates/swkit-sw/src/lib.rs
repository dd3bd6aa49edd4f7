//! # SwKit Service Worker
//!
//! An offline caching worker: it answers every request a page makes from a
//! named cache store when it can, falls back to the network otherwise, and
//! opportunistically stores what it fetched.
//!
//! ## Features
//!
//! - **Policy**: immutable [`PolicyConfiguration`] loaded once at startup
//! - **Verification**: allow-listed hosts, denied path prefixes
//! - **Lifecycle**: all-or-nothing pre-fetch on install, stale store
//!   collection (or full purge) on activate
//! - **Interception**: cache-first, then network, then store
//! - **Control channel**: `SKIP_WAITING` activates a waiting update at once
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRegistration
//!     ├── waiting (ServiceWorker)
//!     └── active  (ServiceWorker)
//!             ├── CacheLifecycle    install / activate
//!             ├── FetchInterceptor  fetch
//!             ├── ControlMessage    message
//!             └── KeepAlive         pending store writes
//!
//! CacheStorage (memory or disk)
//!     └── Cache
//!             └── Request → Response
//! ```

use http::StatusCode;
use swkit_net::NetError;
use thiserror::Error;
use url::Url;

pub mod cache;
pub mod config;
pub mod control;
pub mod intercept;
pub mod keepalive;
pub mod lifecycle;
pub mod verify;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{
    Cache, CacheEntry, CacheError, CacheStorage, DiskCacheStorage, MemoryCacheStorage,
};
pub use config::{PolicyConfiguration, PolicyError};
pub use control::{ControlMessage, SKIP_WAITING};
pub use intercept::{FetchInterceptor, FetchOutcome, ResponseSource};
pub use keepalive::KeepAlive;
pub use lifecycle::{ActivateReport, CacheLifecycle, InstallReport};
pub use worker::{
    ServiceWorker, ServiceWorkerEvent, ServiceWorkerId, ServiceWorkerRegistration,
    ServiceWorkerState,
};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed: could not fetch {url}: {source}")]
    PrecacheFetch {
        url: Url,
        #[source]
        source: NetError,
    },

    #[error("Install failed: {url} returned status {status}")]
    PrecacheStatus { url: Url, status: StatusCode },

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("State error: {0}")]
    StateError(String),
}
