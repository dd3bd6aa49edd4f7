//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::{HashMap, HashSet};
use http::StatusCode;
use swkit_net::{Fetcher, NetError, Request, Response};
use tokio::sync::Notify;

use crate::cache::{Cache, CacheError, CacheStorage, MemoryCacheStorage};
use crate::config::PolicyConfiguration;

pub(crate) fn policy(cache_name: &str) -> PolicyConfiguration {
    PolicyConfiguration {
        cache_name: cache_name.to_string(),
        resources: Vec::new(),
        allow_hosts: Vec::new(),
        deny_paths: Vec::new(),
        purge: false,
    }
}

#[derive(Clone)]
enum Route {
    Respond(StatusCode, &'static str),
    Fail,
    Hang,
}

/// A network with a fixed routing table. Unknown URLs fail as if offline.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    routes: HashMap<String, Route>,
    offline: AtomicBool,
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(mut self, url: &str, status: StatusCode, body: &'static str) -> Self {
        self.routes
            .insert(url.to_string(), Route::Respond(status, body));
        self
    }

    pub(crate) fn fail(mut self, url: &str) -> Self {
        self.routes.insert(url.to_string(), Route::Fail);
        self
    }

    /// Requests to `url` never complete.
    pub(crate) fn hang(mut self, url: &str) -> Self {
        self.routes.insert(url.to_string(), Route::Hang);
        self
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_for(&self, url: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(request.url.to_string());

        let route = if self.offline.load(Ordering::SeqCst) {
            Route::Fail
        } else {
            self.routes
                .get(request.url.as_str())
                .cloned()
                .unwrap_or(Route::Fail)
        };

        async move {
            match route {
                Route::Respond(status, body) => Ok(Response::new(request.url, status, body)),
                Route::Fail => Err(NetError::RequestFailed(format!(
                    "no route to {}",
                    request.url
                ))),
                Route::Hang => futures::future::pending().await,
            }
        }
        .boxed()
    }
}

/// Memory storage with injectable failures.
#[derive(Default)]
pub(crate) struct FlakyStorage {
    inner: MemoryCacheStorage,
    fail_delete: HashSet<String>,
    fail_writes: bool,
    write_gate: Option<Arc<Notify>>,
}

impl FlakyStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_delete_of(mut self, name: &str) -> Self {
        self.fail_delete.insert(name.to_string());
        self
    }

    pub(crate) fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Hold every write until the gate is notified.
    pub(crate) fn gate_writes(mut self, gate: Arc<Notify>) -> Self {
        self.write_gate = Some(gate);
        self
    }

    pub(crate) async fn entries(&self, name: &str) -> usize {
        match self.inner.get(name).await {
            Some(cache) => cache.len().await,
            None => 0,
        }
    }
}

struct FlakyCache {
    inner: Arc<dyn Cache>,
    fail_writes: bool,
    write_gate: Option<Arc<Notify>>,
}

impl Cache for FlakyCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn match_request<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Option<Response>, CacheError>> {
        self.inner.match_request(request)
    }

    fn put<'a>(
        &'a self,
        request: &'a Request,
        response: Response,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        async move {
            if let Some(gate) = &self.write_gate {
                gate.notified().await;
            }
            if self.fail_writes {
                return Err(CacheError::Rejected("disk full".into()));
            }
            self.inner.put(request, response).await
        }
        .boxed()
    }

    fn delete<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<bool, CacheError>> {
        self.inner.delete(request)
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        self.inner.keys()
    }
}

impl CacheStorage for FlakyStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn Cache>, CacheError>> {
        async move {
            let inner = self.inner.open(name).await?;
            Ok(Arc::new(FlakyCache {
                inner,
                fail_writes: self.fail_writes,
                write_gate: self.write_gate.clone(),
            }) as Arc<dyn Cache>)
        }
        .boxed()
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        self.inner.has(name)
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        if self.fail_delete.contains(name) {
            let name = name.to_string();
            return async move {
                Err(CacheError::Io {
                    path: name.into(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
                })
            }
            .boxed();
        }
        self.inner.delete(name)
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, CacheError>> {
        self.inner.keys()
    }
}
