//! Worker versions and the registration that hosts them.
//!
//! A [`ServiceWorkerRegistration`] owns at most one active and one waiting
//! [`ServiceWorker`]. A new version installs beside the active one and
//! waits until every controlled client has closed, or until it is told to
//! `SKIP_WAITING`. Activation holds the registration's write lock, so no
//! fetch is dispatched while stale stores are being collected. Fetches
//! already dispatched finish against the worker that accepted them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use swkit_net::{Fetcher, Request};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::PolicyConfiguration;
use crate::control::ControlMessage;
use crate::intercept::{FetchInterceptor, FetchOutcome, ResponseSource};
use crate::keepalive::KeepAlive;
use crate::lifecycle::{ActivateReport, CacheLifecycle, InstallReport};
use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, not yet installed.
    Parsed,
    /// Pre-fetching resources.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Collecting stale stores.
    Activating,
    /// Active and answering fetches.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

impl Default for ServiceWorkerState {
    fn default() -> Self {
        Self::Parsed
    }
}

/// One version of the worker, bound to one policy.
///
/// Shared between the registration and the fetches it dispatched, so its
/// state lives behind interior mutability.
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    status: std::sync::Mutex<Status>,
    policy: Arc<PolicyConfiguration>,
    lifecycle: CacheLifecycle,
    interceptor: FetchInterceptor,
    keep_alive: KeepAlive,
    skip_waiting: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
struct Status {
    state: ServiceWorkerState,
    changed_at: Instant,
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("cache_name", &self.policy.cache_name)
            .field("skip_waiting", &self.skip_waiting_requested())
            .finish()
    }
}

impl ServiceWorker {
    /// Create a worker for `origin`. The origin's host is added to the
    /// policy's allowed hosts unless the policy purges.
    pub fn new(
        policy: PolicyConfiguration,
        origin: Url,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let policy = Arc::new(policy.for_origin(&origin));
        Self {
            id: ServiceWorkerId::new(),
            status: std::sync::Mutex::new(Status {
                state: ServiceWorkerState::Parsed,
                changed_at: Instant::now(),
            }),
            lifecycle: CacheLifecycle::new(
                Arc::clone(&policy),
                origin,
                Arc::clone(&storage),
                Arc::clone(&fetcher),
            ),
            interceptor: FetchInterceptor::new(Arc::clone(&policy), storage, fetcher),
            policy,
            keep_alive: KeepAlive::new(),
            skip_waiting: AtomicBool::new(false),
        }
    }

    fn status(&self) -> Status {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ServiceWorkerState {
        self.status().state
    }

    pub fn state_changed_at(&self) -> Instant {
        self.status().changed_at
    }

    pub fn policy(&self) -> &PolicyConfiguration {
        &self.policy
    }

    fn set_state(&self, state: ServiceWorkerState) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        debug!(worker = %self.id, from = ?status.state, to = ?state, "State change");
        *status = Status {
            state,
            changed_at: Instant::now(),
        };
    }

    fn expect_state(&self, expected: ServiceWorkerState) -> Result<(), ServiceWorkerError> {
        let state = self.state();
        if state != expected {
            return Err(ServiceWorkerError::StateError(format!(
                "{} is {:?}, expected {:?}",
                self.id, state, expected
            )));
        }
        Ok(())
    }

    /// Run the install step. A failure leaves the worker redundant.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        self.expect_state(ServiceWorkerState::Parsed)?;
        self.set_state(ServiceWorkerState::Installing);

        match self.lifecycle.install().await {
            Ok(report) => {
                self.set_state(ServiceWorkerState::Installed);
                Ok(report)
            }
            Err(e) => {
                warn!(worker = %self.id, error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Run the activate step.
    pub async fn activate(&self) -> Result<ActivateReport, ServiceWorkerError> {
        self.expect_state(ServiceWorkerState::Installed)?;
        self.set_state(ServiceWorkerState::Activating);
        let report = self.lifecycle.activate().await;
        self.set_state(ServiceWorkerState::Activated);
        Ok(report)
    }

    /// Answer a fetch. Only an activated worker handles fetches.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchOutcome, ServiceWorkerError> {
        self.expect_state(ServiceWorkerState::Activated)?;
        self.serve(request).await
    }

    /// Answer a fetch that was dispatched while this worker was active. It
    /// runs to completion even if the worker is replaced meanwhile.
    async fn serve(&self, request: Request) -> Result<FetchOutcome, ServiceWorkerError> {
        self.interceptor.handle(request, &self.keep_alive).await
    }

    /// Handle a message posted by a page.
    pub fn handle_message(&self, data: &Value) -> Option<ControlMessage> {
        let message = ControlMessage::parse(data)?;
        match message {
            ControlMessage::SkipWaiting => self.request_skip_waiting(),
        }
        Some(message)
    }

    fn request_skip_waiting(&self) {
        debug!(worker = %self.id, "Skip waiting requested");
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Wait for outstanding background work.
    pub async fn settle(&self) {
        self.keep_alive.settle().await;
    }

    fn make_redundant(&self) {
        self.set_state(ServiceWorkerState::Redundant);
    }
}

/// Registration events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A worker changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A new version started installing.
    UpdateFound { worker_id: ServiceWorkerId },
    /// Clients are now controlled by a different worker.
    ControllerChange { worker_id: ServiceWorkerId },
}

#[derive(Default)]
struct Slots {
    installing: Option<ServiceWorkerId>,
    /// `SKIP_WAITING` arrived while a version was still installing.
    skip_waiting_pending: bool,
    waiting: Option<Arc<ServiceWorker>>,
    active: Option<Arc<ServiceWorker>>,
    clients: usize,
}

/// Hosts the worker versions for one origin.
pub struct ServiceWorkerRegistration {
    scope: Url,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    slots: RwLock<Slots>,
    install_lock: Mutex<()>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerRegistration {
    /// Create a registration.
    pub fn new(
        scope: Url,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                scope,
                storage,
                fetcher,
                slots: RwLock::new(Slots::default()),
                install_lock: Mutex::new(()),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker: &ServiceWorker) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id: worker.id,
            new_state: worker.state(),
        });
    }

    /// Install a new worker version for `policy`.
    ///
    /// On success the worker waits, and is activated right away when no
    /// worker is active yet, no client is connected, or `SKIP_WAITING` was
    /// posted while it installed. On failure the current active worker and
    /// its store are left untouched.
    pub async fn register(
        &self,
        policy: PolicyConfiguration,
    ) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let _installing = self.install_lock.lock().await;

        let worker = Arc::new(ServiceWorker::new(
            policy,
            self.scope.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.fetcher),
        ));
        let id = worker.id;
        info!(worker = %id, cache = %worker.policy().cache_name, "Registering worker");
        self.slots.write().await.installing = Some(id);
        self.emit(ServiceWorkerEvent::UpdateFound { worker_id: id });

        // The slots lock is not held here; fetches and messages proceed.
        let result = worker.install().await;
        self.emit_state(&worker);

        let mut guard = self.slots.write().await;
        let slots = &mut *guard;
        slots.installing = None;
        let skip_waiting = std::mem::take(&mut slots.skip_waiting_pending);
        let report = result?;
        debug!(worker = %id, precached = report.precached, skipped = report.skipped, "Installed");

        if skip_waiting {
            worker.request_skip_waiting();
        }
        if let Some(replaced) = slots.waiting.replace(Arc::clone(&worker)) {
            replaced.make_redundant();
            self.emit_state(&replaced);
        }

        if slots.active.is_none() || slots.clients == 0 || worker.skip_waiting_requested() {
            self.activate_locked(slots).await?;
        } else {
            info!(worker = %id, clients = slots.clients, "Waiting for clients to close");
        }
        Ok(id)
    }

    async fn activate_locked(
        &self,
        slots: &mut Slots,
    ) -> Result<Option<ActivateReport>, ServiceWorkerError> {
        let Some(next) = slots.waiting.take() else {
            return Ok(None);
        };

        if let Some(previous) = slots.active.take() {
            previous.settle().await;
            previous.make_redundant();
            self.emit_state(&previous);
        }

        let report = next.activate().await?;
        info!(worker = %next.id, deleted = report.deleted.len(), "Worker activated");
        self.emit_state(&next);
        self.emit(ServiceWorkerEvent::ControllerChange { worker_id: next.id });
        slots.active = Some(next);
        Ok(Some(report))
    }

    /// Activate the waiting worker, if any, regardless of clients.
    pub async fn activate_waiting(&self) -> Result<Option<ActivateReport>, ServiceWorkerError> {
        let mut slots = self.slots.write().await;
        self.activate_locked(&mut slots).await
    }

    /// Deliver a page message. It goes to the waiting worker when there is
    /// one, otherwise to the active worker. `SKIP_WAITING` sent to a
    /// waiting worker activates it immediately; sent while a version is
    /// installing, it is applied to that version once it is installed.
    pub async fn post_message(
        &self,
        data: &Value,
    ) -> Result<Option<ControlMessage>, ServiceWorkerError> {
        let mut guard = self.slots.write().await;
        let slots = &mut *guard;

        let (message, activate) = match slots.waiting.as_ref() {
            Some(waiting) => {
                let message = waiting.handle_message(data);
                (message, waiting.skip_waiting_requested())
            }
            None => {
                let message = match slots.active.as_ref() {
                    Some(active) => active.handle_message(data),
                    None => ControlMessage::parse(data),
                };
                if let (Some(id), Some(ControlMessage::SkipWaiting)) = (slots.installing, message) {
                    debug!(worker = %id, "Skip waiting deferred until install completes");
                    slots.skip_waiting_pending = true;
                }
                (message, false)
            }
        };

        if activate {
            self.activate_locked(slots).await?;
        }
        Ok(message)
    }

    /// A page controlled by this registration opened.
    pub async fn client_connected(&self) -> usize {
        let mut slots = self.slots.write().await;
        slots.clients += 1;
        slots.clients
    }

    /// A page closed. Closing the last one activates a waiting worker.
    pub async fn client_closed(&self) -> Result<Option<ActivateReport>, ServiceWorkerError> {
        let mut slots = self.slots.write().await;
        slots.clients = slots.clients.saturating_sub(1);
        if slots.clients == 0 && slots.waiting.is_some() {
            return self.activate_locked(&mut slots).await;
        }
        Ok(None)
    }

    /// Answer a request through the active worker. Without one, the
    /// request goes straight to the network.
    ///
    /// The slots lock is only held to pick the worker, so a slow network
    /// never blocks activation or client bookkeeping.
    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, ServiceWorkerError> {
        let active = {
            let slots = self.slots.read().await;
            match slots.active.as_ref() {
                Some(worker) => {
                    worker.expect_state(ServiceWorkerState::Activated)?;
                    Some(Arc::clone(worker))
                }
                None => None,
            }
        };

        match active {
            Some(worker) => worker.serve(request).await,
            None => {
                let response = self.fetcher.fetch(request).await?;
                Ok(FetchOutcome {
                    response,
                    source: ResponseSource::Network { stored: false },
                })
            }
        }
    }

    pub async fn installing_id(&self) -> Option<ServiceWorkerId> {
        self.slots.read().await.installing
    }

    pub async fn active_id(&self) -> Option<ServiceWorkerId> {
        self.slots.read().await.active.as_ref().map(|w| w.id)
    }

    pub async fn waiting_id(&self) -> Option<ServiceWorkerId> {
        self.slots.read().await.waiting.as_ref().map(|w| w.id)
    }

    pub async fn clients(&self) -> usize {
        self.slots.read().await.clients
    }

    /// Wait for every worker's background work to finish.
    pub async fn shutdown(&self) {
        let workers: Vec<Arc<ServiceWorker>> = {
            let slots = self.slots.read().await;
            slots.active.iter().chain(slots.waiting.iter()).cloned().collect()
        };
        for worker in workers {
            worker.settle().await;
        }
        debug!(scope = %self.scope, "Registration settled");
    }
}
