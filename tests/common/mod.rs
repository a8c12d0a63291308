//! Common test utilities and helpers
//!
//! This module provides shared fixtures for the integration tests:
//! - A notification source driven by the test, one feed per tenant
//! - A query executor that counts calls and can hold fetches in flight
//! - A hub wired to in-memory lock and catalog stores
//! - A session recorder collecting delivered notifications

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use featherlive::backend::catalog::MemoryCatalog;
use featherlive::backend::fetch::{FetchError, QueryExecutor};
use featherlive::backend::listener::{Backoff, ChannelError, NotificationSource, NotificationStream, RawNotification};
use featherlive::backend::locks::MemoryLockStore;
use featherlive::backend::realtime::{HubConfig, HubParts, LiveHub};
use featherlive::backend::sessions::{DeliveryFn, EventSession};
use featherlive::backend::tenants::{Tenant, TenantConfig, TenantRegistry, TenantSource};
use featherlive::shared::{ChangeMessage, EventKey, Notification};

type Feed = mpsc::UnboundedSender<Result<RawNotification, ChannelError>>;

/// Notification source whose channels are fed by the test
#[derive(Default)]
pub struct FakeSource {
    feeds: Mutex<HashMap<String, Feed>>,
    connects: Mutex<HashMap<String, usize>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish `message` on its tenant's channel; `false` if no listener is connected
    pub fn emit(&self, message: &ChangeMessage) -> bool {
        let payload = message.to_wire().unwrap();
        self.emit_raw(&message.tenant, &payload)
    }

    pub fn emit_raw(&self, tenant: &str, payload: &str) -> bool {
        let feeds = self.feeds.lock().unwrap();
        match feeds.get(tenant) {
            Some(feed) => feed
                .send(Ok(RawNotification {
                    channel: "featherlive".to_string(),
                    payload: payload.to_string(),
                }))
                .is_ok(),
            None => false,
        }
    }

    /// Fail the tenant's current connection
    pub fn drop_connection(&self, tenant: &str) {
        if let Some(feed) = self.feeds.lock().unwrap().remove(tenant) {
            let _ = feed.send(Err(ChannelError::Receive("connection reset".to_string())));
        }
    }

    pub fn connects(&self, tenant: &str) -> usize {
        self.connects.lock().unwrap().get(tenant).copied().unwrap_or(0)
    }

    /// Wait until the tenant has connected at least `count` times
    pub async fn wait_for_connects(&self, tenant: &str, count: usize) {
        wait_until(|| self.connects(tenant) >= count && self.feeds.lock().unwrap().contains_key(tenant)).await;
    }
}

struct FakeStream(mpsc::UnboundedReceiver<Result<RawNotification, ChannelError>>);

#[async_trait]
impl NotificationStream for FakeStream {
    async fn recv(&mut self) -> Result<RawNotification, ChannelError> {
        self.0.recv().await.unwrap_or(Err(ChannelError::Closed))
    }
}

#[async_trait]
impl NotificationSource for FakeSource {
    async fn connect(&self, tenant: &Tenant, _channel: &str) -> Result<Box<dyn NotificationStream>, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().insert(tenant.name().to_string(), tx);
        *self
            .connects
            .lock()
            .unwrap()
            .entry(tenant.name().to_string())
            .or_insert(0) += 1;
        Ok(Box::new(FakeStream(rx)))
    }
}

/// Executor returning `{"id", "feather", "tenant", "version"}` rows
///
/// Unknown ids listed in `missing` fail with `NotFound`. While gated, every
/// fetch waits for [`release`](Self::release).
pub struct CountingExecutor {
    calls: AtomicUsize,
    gate: Option<Semaphore>,
    missing: Mutex<Vec<String>>,
}

impl CountingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: None,
            missing: Mutex::new(Vec::new()),
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
            missing: Mutex::new(Vec::new()),
        })
    }

    pub fn release(&self, fetches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(fetches);
        }
    }

    pub fn mark_missing(&self, id: &str) {
        self.missing.lock().unwrap().push(id.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn fetch_row(&self, tenant: &str, feather: &str, id: &str) -> Result<Value, FetchError> {
        let version = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.missing.lock().unwrap().iter().any(|m| m == id) {
            return Err(FetchError::NotFound {
                feather: feather.to_string(),
                id: id.to_string(),
            });
        }
        Ok(json!({ "id": id, "feather": feather, "tenant": tenant, "version": version }))
    }
}

/// A hub wired to fakes, with handles on every fake
pub struct TestHub {
    pub hub: Arc<LiveHub>,
    pub source: Arc<FakeSource>,
    pub executor: Arc<CountingExecutor>,
    pub lock_store: MemoryLockStore,
    pub catalog: Arc<MemoryCatalog>,
}

pub fn tenant_configs(names: &[&str]) -> Vec<TenantConfig> {
    names
        .iter()
        .map(|name| TenantConfig::new(*name, format!("postgres://localhost/{}", name)))
        .collect()
}

pub fn test_config() -> HubConfig {
    HubConfig {
        backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(5)),
        ..HubConfig::default()
    }
}

/// Build a hub over static tenants (must run inside a tokio runtime)
pub fn build_hub(tenants: &[&str], executor: Arc<CountingExecutor>) -> TestHub {
    build_hub_from(TenantSource::Static(tenant_configs(tenants)), executor, test_config())
}

pub fn build_hub_from(source: TenantSource, executor: Arc<CountingExecutor>, config: HubConfig) -> TestHub {
    let tenants = TenantRegistry::new(source);
    tenants.reload().unwrap();

    let notifications = FakeSource::new();
    let lock_store = MemoryLockStore::new();
    let catalog = Arc::new(MemoryCatalog::new());
    let parts = HubParts {
        tenants,
        source: notifications.clone(),
        executor: executor.clone(),
        lock_store: Arc::new(lock_store.clone()),
        catalog: catalog.clone(),
    };

    TestHub {
        hub: Arc::new(LiveHub::new(parts, config)),
        source: notifications,
        executor,
        lock_store,
        catalog,
    }
}

/// Collects what the hub delivers to one session
pub struct Recorder {
    /// Handler installed for the session, as the socket would hold it
    pub session: Arc<EventSession>,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Recorder {
    /// Register a session under `key` and start recording its deliveries
    pub fn connect(hub: &LiveHub, key: &str, fetch: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let deliver: DeliveryFn = Arc::new(move |notification| {
            let _ = tx.send(notification);
        });
        let session = hub.connect(EventKey::new(key), format!("session-{}", key), fetch, deliver);
        Self { session, rx }
    }

    /// Next notification, failing the test after a second
    pub async fn next(&mut self) -> Notification {
        tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("delivery channel closed")
    }

    /// Assert nothing arrives within a short window
    pub async fn assert_quiet(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.rx.recv()).await;
        assert!(next.is_err(), "unexpected notification: {:?}", next);
    }
}

/// Poll `condition` until it holds, failing the test after a second
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
