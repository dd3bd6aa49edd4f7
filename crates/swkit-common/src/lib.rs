//! # SwKit Common
//!
//! Error type, logging setup and timeout helper shared by the SwKit caching
//! worker crates.

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod timeout;

pub use logging::{init_logging, LogConfig};
pub use timeout::with_timeout;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error for SwKit front-ends. Each variant wraps the failing
/// crate's own error as its source.
#[derive(Error, Debug)]
pub enum SwKitError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: BoxError,
    },

    /// Cache store errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: BoxError,
    },

    /// Worker lifecycle errors (install, activate).
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        message: String,
        #[source]
        source: BoxError,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: BoxError,
    },

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl SwKitError {
    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Create a lifecycle error with source.
    pub fn lifecycle_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// Result type alias for SwKit operations.
pub type Result<T> = std::result::Result<T, SwKitError>;
