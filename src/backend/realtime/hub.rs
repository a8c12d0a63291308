/**
 * Live Hub
 *
 * Owns every live-sync component and exposes the operations the transport
 * and HTTP handlers need: connecting and disconnecting sessions, managing
 * subscriptions and locks, and serving records through the coalescer.
 *
 * # Pipeline
 *
 * ```text
 * ChangeListener (per tenant) ──mpsc──▶ pump task ──▶ ChangeDispatcher
 *                                                       ├─ SubscriptionManager::resolve
 *                                                       ├─ FetchCoalescer
 *                                                       └─ EventSessionRegistry::dispatch
 * ```
 *
 * All listeners feed one channel and a single pump task drains it, so the
 * messages of one tenant are handled in the order they were received.
 *
 * # Teardown
 *
 * `disconnect` unregisters the session, drops its subscriptions and releases
 * its locks. Fetches still in flight for the session complete normally and
 * their deliveries become no-ops. A handler that was already replaced by a
 * reconnect under the same key tears nothing down: the subscriptions and
 * locks under that key belong to the replacement now.
 */
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::catalog::{Catalog, RouteTable};
use crate::backend::error::BackendError;
use crate::backend::fetch::{FetchCoalescer, QueryExecutor};
use crate::backend::listener::{Backoff, ListenerSupervisor, NotificationSource};
use crate::backend::locks::{Lock, LockError, LockManager, LockOptions, LockStore, UnlockCriteria};
use crate::backend::realtime::dispatcher::ChangeDispatcher;
use crate::backend::sessions::{DeliveryFn, EventSession, EventSessionRegistry};
use crate::backend::subscriptions::{SubscriptionManager, Unsubscribe};
use crate::backend::tenants::{TenantDiff, TenantRegistry};
use crate::shared::{ChangeKind, ChangeMessage, EventKey, MetadataStream, SubscribeOptions, SubscriptionId, SubscriptionTarget};

/// Tunables of the live-sync pipeline
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Notification channel listened on in every tenant database
    pub channel: String,
    pub backoff: Backoff,
    /// Distinct record keys fetched at once
    pub fetch_concurrency: usize,
    /// Default lock lifetime; `None` disables expiry
    pub lock_ttl: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel: "featherlive".to_string(),
            backoff: Backoff::default(),
            fetch_concurrency: 8,
            lock_ttl: Some(Duration::from_secs(1800)),
        }
    }
}

/// External collaborators of the hub
pub struct HubParts {
    pub tenants: TenantRegistry,
    pub source: Arc<dyn NotificationSource>,
    pub executor: Arc<dyn QueryExecutor>,
    pub lock_store: Arc<dyn LockStore>,
    pub catalog: Arc<dyn Catalog>,
}

/// What a disconnect cleaned up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownReport {
    pub session_removed: bool,
    pub subscriptions_removed: usize,
    pub locks_released: u64,
}

pub struct LiveHub {
    config: HubConfig,
    tenants: TenantRegistry,
    sessions: EventSessionRegistry,
    subscriptions: SubscriptionManager,
    coalescer: FetchCoalescer,
    locks: LockManager,
    routes: RouteTable,
    supervisor: ListenerSupervisor,
    dispatcher: ChangeDispatcher,
    sink: mpsc::UnboundedSender<ChangeMessage>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<ChangeMessage>>>,
}

impl LiveHub {
    pub fn new(parts: HubParts, config: HubConfig) -> Self {
        let (sink, inbox) = mpsc::unbounded_channel();
        let sessions = EventSessionRegistry::new();
        let subscriptions = SubscriptionManager::new();
        let coalescer = FetchCoalescer::new(parts.executor, config.fetch_concurrency);
        let routes = RouteTable::new();
        let supervisor = ListenerSupervisor::new(parts.source, config.channel.clone(), sink.clone(), config.backoff);
        let locks = LockManager::new(parts.lock_store, config.lock_ttl);

        let dispatcher = ChangeDispatcher {
            tenants: parts.tenants.clone(),
            sessions: sessions.clone(),
            subscriptions: subscriptions.clone(),
            coalescer: coalescer.clone(),
            catalog: parts.catalog,
            routes: routes.clone(),
            supervisor: supervisor.clone(),
        };

        Self {
            config,
            tenants: parts.tenants,
            sessions,
            subscriptions,
            coalescer,
            locks,
            routes,
            supervisor,
            dispatcher,
            sink,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    /// Start a listener per known tenant and the dispatch pump
    ///
    /// Returns the pump task, or `None` if the hub was already started.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let mut inbox = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        for tenant in self.tenants.list() {
            self.supervisor.start(tenant);
        }

        let dispatcher = self.dispatcher.clone();
        Some(tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                dispatcher.handle(message).await;
            }
            tracing::info!("[Router] Change pump stopped");
        }))
    }

    /// Periodically purge expired locks on every tenant
    pub fn spawn_lock_sweep(&self, every: Duration) -> JoinHandle<()> {
        let locks = self.locks.clone();
        let tenants = self.tenants.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                locks.sweep_expired(&tenants.names()).await;
            }
        })
    }

    /// Inject a change as if a tenant channel had delivered it
    pub fn publish(&self, message: ChangeMessage) -> Result<(), BackendError> {
        self.sink
            .send(message)
            .map_err(|_| BackendError::state("change pump is not running"))
    }

    /// Register a live session; hand the returned handler to `disconnect`
    pub fn connect(
        &self,
        event_key: EventKey,
        session_id: impl Into<String>,
        fetch: bool,
        deliver: DeliveryFn,
    ) -> Arc<EventSession> {
        self.sessions.register(event_key, session_id, fetch, deliver)
    }

    /// Tear a session down
    pub async fn disconnect(&self, session: &Arc<EventSession>) -> TeardownReport {
        let event_key = &session.event_key;
        if !self.sessions.unregister_session(session) {
            tracing::info!("[Sessions] {} already replaced or gone, nothing to tear down", event_key);
            return TeardownReport::default();
        }

        let subscriptions_removed = self
            .subscriptions
            .unsubscribe(&Unsubscribe::Owner(event_key.clone()))
            .len();
        let locks_released = self.locks.release_session(event_key).await;

        let report = TeardownReport {
            session_removed: true,
            subscriptions_removed,
            locks_released,
        };
        tracing::info!("[Sessions] Tore down {}: {:?}", event_key, report);
        report
    }

    pub fn subscribe(
        &self,
        tenant: &str,
        event_key: &EventKey,
        target: SubscriptionTarget,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, BackendError> {
        target.validate()?;
        self.tenants.find(tenant)?;
        if !self.sessions.contains(event_key) {
            return Err(BackendError::UnknownSession(event_key.clone()));
        }
        Ok(self.subscriptions.subscribe(tenant, event_key, target, options))
    }

    /// Remove a subscription owned by `event_key`; `false` if it had none such
    pub fn unsubscribe(&self, event_key: &EventKey, subscription_id: SubscriptionId) -> bool {
        match self.subscriptions.get(&subscription_id) {
            Some(subscription) if &subscription.event_key == event_key => !self
                .subscriptions
                .unsubscribe(&Unsubscribe::Id(subscription_id))
                .is_empty(),
            _ => false,
        }
    }

    pub async fn lock(
        &self,
        tenant: &str,
        record_id: &str,
        username: &str,
        event_key: &EventKey,
        options: LockOptions,
    ) -> Result<Lock, BackendError> {
        self.tenants.find(tenant)?;
        let had_session = self.sessions.contains(event_key);

        let lock = self.locks.lock(tenant, record_id, username, event_key, options).await?;

        // Teardown may have run while the store was busy; don't leave an orphan.
        if had_session && !self.sessions.contains(event_key) {
            self.locks.release_session(event_key).await;
            return Err(LockError::SessionClosed(event_key.clone()).into());
        }
        Ok(lock)
    }

    pub async fn unlock(&self, tenant: &str, criteria: &UnlockCriteria) -> Result<u64, BackendError> {
        self.tenants.find(tenant)?;
        Ok(self.locks.unlock(tenant, criteria).await?)
    }

    pub async fn lock_holder(&self, tenant: &str, record_id: &str) -> Result<Option<Lock>, BackendError> {
        self.tenants.find(tenant)?;
        Ok(self.locks.holder(tenant, record_id).await?)
    }

    /// Load a record through a registered data route
    pub async fn fetch_record(&self, tenant: &str, path: &str, id: &str) -> Result<Arc<Value>, BackendError> {
        let route = self
            .routes
            .lookup(tenant, path)
            .ok_or_else(|| BackendError::RouteNotFound {
                tenant: tenant.to_string(),
                path: path.to_string(),
            })?;
        let feather = route.feather.ok_or_else(|| BackendError::RouteNotFound {
            tenant: tenant.to_string(),
            path: path.to_string(),
        })?;

        Ok(self.coalescer.fetch(&feather, id, tenant).await?)
    }

    /// Reload tenants, then tell Tenant-stream subscribers what changed
    pub async fn reload_tenants(&self) -> Result<TenantDiff, BackendError> {
        let diff = self.dispatcher.reload_tenants().await?;

        let added = diff.added.iter().map(|t| (t.name(), ChangeKind::Create));
        let removed = diff.removed.iter().map(|t| (t.name(), ChangeKind::Delete));
        for (name, change) in removed.chain(added) {
            let data = serde_json::json!({ "name": name });
            let message = ChangeMessage::metadata(name, MetadataStream::Tenant, name, change, Some(data));
            self.dispatcher.notify(&message);
        }
        Ok(diff)
    }

    /// Stop every listener
    pub async fn shutdown(&self) {
        self.supervisor.shutdown_all().await;
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn tenants(&self) -> &TenantRegistry {
        &self.tenants
    }

    pub fn sessions(&self) -> &EventSessionRegistry {
        &self.sessions
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn coalescer(&self) -> &FetchCoalescer {
        &self.coalescer
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn supervisor(&self) -> &ListenerSupervisor {
        &self.supervisor
    }

    pub fn dispatcher(&self) -> &ChangeDispatcher {
        &self.dispatcher
    }
}
