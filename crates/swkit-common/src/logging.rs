//! Logging setup for SwKit binaries.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The HTTP stack underneath the loader is chatty at debug; it stays at warn
/// unless a filter asks otherwise.
const HTTP_STACK: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the SwKit crates.
    pub level: Level,
    /// Include source file location.
    pub include_location: bool,
    /// Custom filter string (e.g., "swkit_sw=trace,reqwest=debug").
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_location: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Debug output for the worker, with source locations.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            filter: None,
        }
    }

    /// Set a custom filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn default_directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        std::iter::once(level.as_str())
            .chain(HTTP_STACK.iter().copied())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Build the directive filter: an explicit filter wins, then `RUST_LOG`,
    /// then the configured level with the HTTP stack quieted.
    pub fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_directives());
        match self.filter {
            Some(ref custom) => EnvFilter::try_new(custom).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Initialize logging with the given configuration.
///
/// Calling this twice is harmless; the second subscriber is discarded.
pub fn init_logging(config: LogConfig) {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_log_config_debug() {
        let config = LogConfig::debug();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.include_location);
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_default_directives_quiet_http_stack() {
        let directives = LogConfig::debug().default_directives();
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("hyper=warn"));
    }

    #[test]
    fn test_explicit_filter_is_used() {
        let config = LogConfig::default().with_filter("swkit_sw=trace");
        assert_eq!(config.env_filter().to_string(), "swkit_sw=trace");
    }

    #[test]
    fn test_invalid_filter_falls_back_to_level() {
        let config = LogConfig {
            level: Level::WARN,
            ..LogConfig::default().with_filter("swkit_sw=[")
        };
        assert_eq!(config.env_filter().max_level_hint(), Some(LevelFilter::WARN));
    }
}
