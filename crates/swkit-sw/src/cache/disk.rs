//! Durable cache storage backed by a directory.
//!
//! Each named store is one JSON file, `<percent-encoded name>.json`, holding
//! every entry. Writes go to a temporary file that is renamed into place, so
//! a reader never sees a half-written store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use swkit_net::{Request, Response};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{lookup_key, Cache, CacheEntry, CacheError, CacheStorage};

const EXTENSION: &str = "json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    entries: HashMap<String, CacheEntry>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A named store persisted to one file.
#[derive(Debug)]
pub struct DiskCache {
    name: String,
    path: PathBuf,
    /// Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
    deleted: AtomicBool,
}

impl DiskCache {
    async fn load(&self) -> Result<StoreFile, CacheError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreFile::default()),
            Err(e) => Err(io_error(&self.path)(e)),
        }
    }

    async fn save(&self, store: &StoreFile) -> Result<(), CacheError> {
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec(store)?;
        tokio::fs::write(&tmp, bytes).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_error(&self.path))
    }

    fn ensure_live(&self) -> Result<(), CacheError> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(CacheError::Deleted(self.name.clone()));
        }
        Ok(())
    }
}

impl Cache for DiskCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_request<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        async move {
            let Some(key) = lookup_key(request) else {
                return Ok(None);
            };
            let _guard = self.lock.lock().await;
            let store = self.load().await?;
            store.entries.get(&key).map(CacheEntry::to_response).transpose()
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        request: &'a Request,
        response: Response,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        async move {
            let entry = CacheEntry::from_exchange(request, &response)?;
            let _guard = self.lock.lock().await;
            self.ensure_live()?;

            let mut store = self.load().await?;
            trace!(cache = %self.name, url = %entry.url, "Storing entry");
            store.entries.insert(entry.url.clone(), entry);
            self.save(&store).await
        }
        .boxed()
    }

    fn delete<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move {
            let Some(key) = lookup_key(request) else {
                return Ok(false);
            };
            let _guard = self.lock.lock().await;
            self.ensure_live()?;

            let mut store = self.load().await?;
            if store.entries.remove(&key).is_none() {
                return Ok(false);
            }
            self.save(&store).await?;
            Ok(true)
        }
        .boxed()
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        async move {
            let _guard = self.lock.lock().await;
            Ok(self.load().await?.entries.into_keys().collect())
        }
        .boxed()
    }
}

/// Cache storage rooted at a directory.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    open: Mutex<HashMap<String, Arc<DiskCache>>>,
}

impl DiskCacheStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(io_error(&root))?;
        debug!(root = %root.display(), "Disk cache storage ready");

        Ok(Self {
            root,
            open: Mutex::new(HashMap::new()),
        })
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENSION}", urlencoding::encode(name)))
    }
}

impl CacheStorage for DiskCacheStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn Cache>, CacheError>> {
        async move {
            let mut open = self.open.lock().await;
            if let Some(cache) = open.get(name) {
                return Ok(cache.clone() as Arc<dyn Cache>);
            }

            let cache = Arc::new(DiskCache {
                name: name.to_string(),
                path: self.path_for(name),
                lock: Mutex::new(()),
                deleted: AtomicBool::new(false),
            });

            // The store exists from the moment it is opened.
            if !tokio::fs::try_exists(&cache.path)
                .await
                .map_err(io_error(&cache.path))?
            {
                cache.save(&StoreFile::default()).await?;
            }

            open.insert(name.to_string(), cache.clone());
            Ok(cache as Arc<dyn Cache>)
        }
        .boxed()
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move {
            let path = self.path_for(name);
            tokio::fs::try_exists(&path).await.map_err(io_error(&path))
        }
        .boxed()
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move {
            let mut open = self.open.lock().await;
            let handle = open.remove(name);
            // Hold the store's own lock so an in-flight write finishes first.
            let _guard = match &handle {
                Some(cache) => {
                    let guard = cache.lock.lock().await;
                    cache.deleted.store(true, Ordering::Release);
                    Some(guard)
                }
                None => None,
            };

            let path = self.path_for(name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(io_error(&path)(e)),
            }
        }
        .boxed()
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        async move {
            let mut names = Vec::new();
            let mut dir = tokio::fs::read_dir(&self.root)
                .await
                .map_err(io_error(&self.root))?;

            while let Some(item) = dir.next_entry().await.map_err(io_error(&self.root))? {
                let path = item.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match urlencoding::decode(stem) {
                    Ok(name) => names.push(name.into_owned()),
                    Err(e) => debug!(path = %path.display(), error = %e, "Skipping foreign file"),
                }
            }

            names.sort();
            Ok(names)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use url::Url;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn ok(request: &Request, body: &'static str) -> Response {
        Response::new(request.url.clone(), StatusCode::OK, body)
    }

    #[tokio::test]
    async fn test_open_creates_store() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();

        assert!(!storage.has("site-v1").await.unwrap());
        storage.open("site-v1").await.unwrap();
        assert!(storage.has("site-v1").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["site-v1"]);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let request = get("https://example.com/index.html");

        {
            let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
            let cache = storage.open("site-v1").await.unwrap();
            cache.put(&request, ok(&request, "<html>")).await.unwrap();
        }

        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.open("site-v1").await.unwrap();
        let hit = cache.match_request(&request).await.unwrap().unwrap();
        assert_eq!(hit.text().unwrap(), "<html>");
        assert_eq!(
            cache.keys().await.unwrap(),
            vec!["https://example.com/index.html"]
        );
    }

    #[tokio::test]
    async fn test_names_are_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();

        storage.open("chirpy/2024 v1").await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["chirpy/2024 v1"]);
        assert!(storage.delete("chirpy/2024 v1").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_store() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        storage.open("old").await.unwrap();

        assert!(storage.delete("old").await.unwrap());
        assert!(!storage.delete("old").await.unwrap());
        assert!(!storage.has("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_to_deleted_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.open("v1").await.unwrap();
        storage.delete("v1").await.unwrap();

        let request = get("https://example.com/late.js");
        let err = cache.put(&request, ok(&request, "x")).await.unwrap_err();
        assert!(matches!(err, CacheError::Deleted(_)));
        assert!(!storage.has("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.open("v1").await.unwrap();
        let request = get("https://example.com/a.css");
        cache.put(&request, ok(&request, "a")).await.unwrap();

        assert!(cache.delete(&request).await.unwrap());
        assert!(cache.match_request(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("README.txt"), "hi")
            .await
            .unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
    }
}
