//! In-process cache storage.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashMap;
use swkit_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::trace;

use super::{lookup_key, Cache, CacheEntry, CacheError, CacheStorage};

/// A named store held in memory.
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Cache for MemoryCache {
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
            match self.entries.read().await.get(&key) {
                Some(entry) => entry.to_response().map(Some),
                None => Ok(None),
            }
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
            trace!(cache = %self.name, url = %entry.url, "Storing entry");
            self.entries.write().await.insert(entry.url.clone(), entry);
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move {
            let Some(key) = lookup_key(request) else {
                return Ok(false);
            };
            Ok(self.entries.write().await.remove(&key).is_some())
        }
        .boxed()
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        async move { Ok(self.entries.read().await.keys().cloned().collect()) }.boxed()
    }
}

/// Cache storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle to a store, if it exists.
    pub async fn get(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.caches.read().await.get(name).cloned()
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn Cache>, CacheError>> {
        async move {
            let mut caches = self.caches.write().await;
            let cache = caches
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryCache::new(name)))
                .clone();
            Ok(cache as Arc<dyn Cache>)
        }
        .boxed()
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move { Ok(self.caches.read().await.contains_key(name)) }.boxed()
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move { Ok(self.caches.write().await.remove(name).is_some()) }.boxed()
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        async move {
            let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
            names.sort();
            Ok(names)
        }
        .boxed()
    }
}
