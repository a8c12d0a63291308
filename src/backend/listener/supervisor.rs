/**
 * Listener Supervisor
 *
 * Owns the listener handle of every tenant. Starting a tenant that already
 * has a listener is a no-op, so each tenant has at most one listener no
 * matter how often the tenant list is reloaded. Stopping one tenant's
 * listener leaves the others running.
 */
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::backend::listener::change_listener::{Backoff, ChangeListener, ListenerHandle, ListenerStatus};
use crate::backend::listener::source::NotificationSource;
use crate::backend::tenants::{Tenant, TenantDiff};
use crate::shared::ChangeMessage;

#[derive(Clone)]
pub struct ListenerSupervisor {
    source: Arc<dyn NotificationSource>,
    channel: String,
    sink: mpsc::UnboundedSender<ChangeMessage>,
    backoff: Backoff,
    handles: Arc<Mutex<HashMap<String, ListenerHandle>>>,
}

impl ListenerSupervisor {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        channel: impl Into<String>,
        sink: mpsc::UnboundedSender<ChangeMessage>,
        backoff: Backoff,
    ) -> Self {
        Self {
            source,
            channel: channel.into(),
            sink,
            backoff,
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start listening on `tenant`; `false` if it already has a listener
    pub fn start(&self, tenant: Arc<Tenant>) -> bool {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if handles.contains_key(tenant.name()) {
            tracing::debug!("[Listener] Tenant {} already has a listener", tenant.name());
            return false;
        }

        let name = tenant.name().to_string();
        let listener = ChangeListener::new(
            tenant,
            self.source.clone(),
            self.channel.clone(),
            self.sink.clone(),
            self.backoff,
        );
        handles.insert(name.clone(), listener.spawn());
        tracing::info!("[Listener] Started listener for tenant {}", name);
        true
    }

    /// Stop the listener of `tenant`; `false` if it had none
    pub async fn stop(&self, tenant: &str) -> bool {
        let handle = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tenant);

        match handle {
            Some(handle) => {
                handle.shutdown().await;
                tracing::info!("[Listener] Stopped listener for tenant {}", tenant);
                true
            }
            None => false,
        }
    }

    /// Apply a tenant reload: stop removed tenants, then start added ones
    pub async fn apply(&self, diff: &TenantDiff) {
        for tenant in &diff.removed {
            self.stop(tenant.name()).await;
        }
        for tenant in &diff.added {
            self.start(tenant.clone());
        }
    }

    /// Tenants with a listener, ordered by name
    pub fn running(&self) -> Vec<String> {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = handles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn status(&self, tenant: &str) -> Option<ListenerStatus> {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.get(tenant).map(ListenerHandle::status)
    }

    pub fn statuses(&self) -> BTreeMap<String, ListenerStatus> {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles
            .iter()
            .map(|(name, handle)| (name.clone(), handle.status()))
            .collect()
    }

    /// Stop every listener
    pub async fn shutdown_all(&self) {
        let handles: Vec<ListenerHandle> = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            handles.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::listener::source::{ChannelError, NotificationStream};
    use crate::backend::tenants::TenantConfig;
    use async_trait::async_trait;

    /// Source that accepts connections and never delivers anything
    struct SilentSource;

    struct SilentStream;

    #[async_trait]
    impl NotificationStream for SilentStream {
        async fn recv(&mut self) -> Result<crate::backend::listener::RawNotification, ChannelError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl NotificationSource for SilentSource {
        async fn connect(&self, _tenant: &Tenant, _channel: &str) -> Result<Box<dyn NotificationStream>, ChannelError> {
            Ok(Box::new(SilentStream))
        }
    }

    fn tenant(name: &str) -> Arc<Tenant> {
        Arc::new(Tenant::connect_lazy(TenantConfig::new(name, format!("postgres://localhost/{name}"))).unwrap())
    }

    fn supervisor() -> ListenerSupervisor {
        let (tx, _rx) = mpsc::unbounded_channel();
        ListenerSupervisor::new(Arc::new(SilentSource), "featherlive", tx, Backoff::default())
    }

    #[tokio::test]
    async fn test_one_listener_per_tenant() {
        let supervisor = supervisor();
        assert!(supervisor.start(tenant("acme")));
        assert!(!supervisor.start(tenant("acme")));
        assert!(supervisor.start(tenant("globex")));
        assert_eq!(supervisor.running(), vec!["acme".to_string(), "globex".to_string()]);
        supervisor.shutdown_all().await;
        assert!(supervisor.running().is_empty());
    }

    #[tokio::test]
    async fn test_stop_leaves_others_running() {
        let supervisor = supervisor();
        supervisor.start(tenant("acme"));
        supervisor.start(tenant("globex"));

        assert!(supervisor.stop("acme").await);
        assert!(!supervisor.stop("acme").await);
        assert_eq!(supervisor.running(), vec!["globex".to_string()]);
        assert!(supervisor.status("globex").is_some());
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_apply_restarts_changed_tenant() {
        let supervisor = supervisor();
        let old = tenant("acme");
        supervisor.start(old.clone());

        let diff = TenantDiff {
            added: vec![tenant("acme"), tenant("initech")],
            removed: vec![old],
        };
        supervisor.apply(&diff).await;
        assert_eq!(supervisor.running(), vec!["acme".to_string(), "initech".to_string()]);
        supervisor.shutdown_all().await;
    }
}
