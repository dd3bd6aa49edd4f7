//! Command-line harness for the SwKit offline caching worker.
//!
//! ## Usage
//!
//! ```bash
//! # Which URLs would the worker store?
//! swkit check --config sw-config.json --origin https://example.com/ \
//!     https://example.com/index.html https://cdn.other.net/lib.js
//!
//! # Install, activate and fetch through a worker backed by a disk store
//! swkit run --config sw-config.json --origin https://example.com/ \
//!     --store .swkit/ https://example.com/ https://example.com/app.js
//!
//! # List the stores in a directory
//! swkit caches --store .swkit/
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use swkit_common::{init_logging, LogConfig, Result, SwKitError};
use swkit_net::{Fetcher, LoaderConfig, Request, ResourceLoader};
use swkit_sw::{
    CacheError, CacheStorage, DiskCacheStorage, PolicyConfiguration, PolicyError, ResponseSource,
    ServiceWorkerRegistration,
};
use tracing::{debug, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "swkit")]
#[command(about = "Drive the SwKit offline caching worker from the command line")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether each URL may be stored under the policy
    Check {
        /// Policy file, or an http(s) URL to fetch it from
        #[arg(short, long)]
        config: String,
        /// Origin the worker runs at
        #[arg(short, long)]
        origin: Url,
        /// URLs to verify
        urls: Vec<String>,
    },

    /// Register a worker against a disk store and fetch through it
    Run {
        /// Policy file, or an http(s) URL to fetch it from
        #[arg(short, long)]
        config: String,
        /// Origin the worker runs at
        #[arg(short, long)]
        origin: Url,
        /// Store directory
        #[arg(short, long, default_value = ".swkit")]
        store: PathBuf,
        /// Message to post after the fetches (e.g. SKIP_WAITING)
        #[arg(short, long)]
        message: Option<String>,
        /// URLs to fetch
        urls: Vec<Url>,
    },

    /// List the stores in a directory
    Caches {
        /// Store directory
        #[arg(short, long, default_value = ".swkit")]
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default().with_filter("warn")
    });

    match cli.command {
        Commands::Check {
            config,
            origin,
            urls,
        } => {
            if urls.is_empty() {
                return Err(SwKitError::InvalidArgument("no URLs to check".into()));
            }
            let fetcher = loader()?;
            let policy = load_policy(&fetcher, &config)
                .await
                .map_err(|e| SwKitError::config_with_source("could not load policy", e))?
                .for_origin(&origin);

            let (lines, all_valid) = check_urls(&policy, &urls);
            for line in lines {
                println!("{}", line);
            }
            if !all_valid {
                std::process::exit(1);
            }
        }

        Commands::Run {
            config,
            origin,
            store,
            message,
            urls,
        } => {
            run(&config, origin, store, message, urls).await?;
        }

        Commands::Caches { store } => {
            list_caches(store)
                .await
                .map_err(|e| SwKitError::cache_with_source("could not read stores", e))?;
        }
    }

    Ok(())
}

fn loader() -> Result<ResourceLoader> {
    ResourceLoader::new(LoaderConfig::default())
        .map_err(|e| SwKitError::network_with_source("could not build HTTP client", e))
}

async fn list_caches(store: PathBuf) -> std::result::Result<(), CacheError> {
    let storage = DiskCacheStorage::new(store).await?;
    for name in storage.keys().await? {
        let entries = storage.open(&name).await?.keys().await?.len();
        println!("{}\t{} entries", name, entries);
    }
    Ok(())
}

/// Read the policy from a file path, or fetch it when given an http(s) URL.
async fn load_policy(
    fetcher: &dyn Fetcher,
    config: &str,
) -> std::result::Result<PolicyConfiguration, PolicyError> {
    match Url::parse(config) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            PolicyConfiguration::fetch_from(fetcher, url).await
        }
        _ => PolicyConfiguration::from_path(config).await,
    }
}

/// One line per URL, plus whether every URL parsed.
fn check_urls(policy: &PolicyConfiguration, urls: &[String]) -> (Vec<String>, bool) {
    let mut all_valid = true;
    let lines = urls
        .iter()
        .map(|url| match policy.verify_url(url) {
            Ok(true) => format!("cache   {}", url),
            Ok(false) => format!("bypass  {}", url),
            Err(e) => {
                all_valid = false;
                format!("error   {}: {}", url, e)
            }
        })
        .collect();
    (lines, all_valid)
}

async fn run(
    config: &str,
    origin: Url,
    store: PathBuf,
    message: Option<String>,
    urls: Vec<Url>,
) -> Result<()> {
    let fetcher: Arc<dyn Fetcher> = Arc::new(loader()?);
    let policy = load_policy(fetcher.as_ref(), config)
        .await
        .map_err(|e| SwKitError::config_with_source("could not load policy", e))?;
    let storage = Arc::new(
        DiskCacheStorage::new(store)
            .await
            .map_err(|e| SwKitError::cache_with_source("could not open store directory", e))?,
    );

    let (registration, mut events) =
        ServiceWorkerRegistration::new(origin, storage, Arc::clone(&fetcher));

    let id = registration
        .register(policy)
        .await
        .map_err(|e| SwKitError::lifecycle_with_source("install failed", e))?;
    println!("Registered {} ({})", id, registration.scope());
    registration.client_connected().await;

    for url in urls {
        match registration.fetch(Request::get(url.clone())).await {
            Ok(outcome) => {
                let source = match outcome.source {
                    ResponseSource::Cache => "hit",
                    ResponseSource::Network { stored: true } => "miss (stored)",
                    ResponseSource::Network { stored: false } => "miss",
                };
                println!("{}  {}  {}", outcome.response.status.as_u16(), source, url);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Fetch failed");
                println!("ERR  {}: {}", url, e);
            }
        }
    }

    if let Some(message) = message {
        let posted = registration
            .post_message(&serde_json::Value::String(message))
            .await
            .map_err(|e| SwKitError::lifecycle_with_source("activation failed", e))?;
        debug!(message = ?posted, "Message delivered");
    }

    registration
        .client_closed()
        .await
        .map_err(|e| SwKitError::lifecycle_with_source("activation failed", e))?;
    registration.shutdown().await;

    while let Ok(event) = events.try_recv() {
        debug!(event = ?event, "Worker event");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_urls() {
        let policy = PolicyConfiguration::from_json_str(
            r#"{
                "cacheName": "v1",
                "resources": [],
                "allowHosts": [],
                "denyPaths": [],
                "purge": false
            }"#,
        )
        .unwrap()
        .for_origin(&Url::parse("https://example.com/").unwrap());

        let urls = vec![
            "https://example.com/app.js".to_string(),
            "https://other.net/".to_string(),
        ];
        let (lines, all_valid) = check_urls(&policy, &urls);
        assert!(all_valid);
        assert_eq!(lines[0], "cache   https://example.com/app.js");
        assert_eq!(lines[1], "bypass  https://other.net/");

        let (lines, all_valid) = check_urls(&policy, &["not a url".to_string()]);
        assert!(!all_valid);
        assert!(lines[0].starts_with("error   not a url"));
    }

    #[tokio::test]
    async fn test_load_policy_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sw-config.json");
        std::fs::write(
            &path,
            r#"{
                "cacheName": "v3",
                "resources": [],
                "allowHosts": [],
                "denyPaths": [],
                "purge": true
            }"#,
        )
        .unwrap();

        let fetcher = loader().unwrap();
        let policy = load_policy(&fetcher, path.to_str().unwrap()).await.unwrap();
        assert_eq!(policy.cache_name, "v3");
        assert!(policy.purge);
    }

    #[tokio::test]
    async fn test_load_policy_missing_file() {
        let fetcher = loader().unwrap();
        let err = load_policy(&fetcher, "/nonexistent/sw-config.json")
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Io { .. }));
    }

    #[tokio::test]
    async fn test_list_caches_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        list_caches(dir.path().join("stores")).await.unwrap();
        assert!(dir.path().join("stores").is_dir());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "swkit",
            "-v",
            "run",
            "--config",
            "sw.json",
            "--origin",
            "https://example.com/",
            "--message",
            "SKIP_WAITING",
            "https://example.com/",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                store,
                message,
                urls,
                ..
            } => {
                assert_eq!(store, PathBuf::from(".swkit"));
                assert_eq!(message.as_deref(), Some("SKIP_WAITING"));
                assert_eq!(urls.len(), 1);
            }
            _ => panic!("expected run"),
        }
    }
}
