/**
 * Change Dispatcher
 *
 * Consumes decoded change messages and turns them into session
 * notifications.
 *
 * # Record Changes
 *
 * A record change naming a table instead of a feather (the database trigger
 * falls back to the table name) is first mapped to the feather the catalog
 * knows for that table.
 *
 * For every subscription the message resolves to:
 * - deletes are signalled with `deleted: true` and no data;
 * - merge subscriptions get the delta carried by the message;
 * - sessions registered with `fetch = false` get a bare signal;
 * - everything else waits on one coalesced re-fetch of the row.
 *
 * # Metadata Changes
 *
 * Metadata streams first apply their process-wide side effect (catalog and
 * route updates for feathers, route table updates for routes, a tenant
 * reload for tenants) and then notify each subscribed session once, skipping
 * the session that caused the change.
 */
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::catalog::{Catalog, Feather, RouteEntry, RouteTable};
use crate::backend::fetch::{FetchCoalescer, FetchError};
use crate::backend::listener::ListenerSupervisor;
use crate::backend::sessions::EventSessionRegistry;
use crate::backend::subscriptions::SubscriptionManager;
use crate::backend::tenants::{TenantDiff, TenantError, TenantRegistry};
use crate::shared::{ChangeKind, ChangeMessage, ChangePayload, EventKey, MetadataStream, Notification, SubscriptionId};

/// `data` of a Route metadata change
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteDefinition {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    feather: Option<String>,
    #[serde(default)]
    module: Option<String>,
    #[serde(default, alias = "isReadOnly")]
    read_only: bool,
}

/// Routes change messages to sessions
#[derive(Clone)]
pub struct ChangeDispatcher {
    pub(crate) tenants: TenantRegistry,
    pub(crate) sessions: EventSessionRegistry,
    pub(crate) subscriptions: SubscriptionManager,
    pub(crate) coalescer: FetchCoalescer,
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) routes: RouteTable,
    pub(crate) supervisor: ListenerSupervisor,
}

impl ChangeDispatcher {
    /// Apply side effects for `message`, then notify its subscribers
    pub async fn handle(&self, mut message: ChangeMessage) {
        if let ChangePayload::Record { feather, .. } = &mut message.payload {
            if let Some(name) = self.feather_for_table(&message.tenant, feather).await {
                *feather = name;
            }
        }

        match &message.payload {
            ChangePayload::Record { .. } => {}
            ChangePayload::Metadata {
                stream: MetadataStream::Feather,
                name,
                change,
                data,
            } => self.apply_feather(&message.tenant, name, *change, data.as_ref()).await,
            ChangePayload::Metadata {
                stream: MetadataStream::Route,
                name,
                change,
                data,
            } => self.apply_route(&message.tenant, name, *change, data.as_ref()),
            ChangePayload::Metadata {
                stream: MetadataStream::Tenant,
                ..
            } => {
                if let Err(e) = self.reload_tenants().await {
                    tracing::warn!("[Router] Tenant reload failed: {}", e);
                }
            }
        }

        self.notify(&message);
    }

    /// Deliver `message` to its subscribers without applying side effects
    pub fn notify(&self, message: &ChangeMessage) {
        match &message.payload {
            ChangePayload::Record {
                feather,
                id,
                change,
                data,
                ..
            } => self.notify_record(message, feather, id, *change, data.as_ref()),
            ChangePayload::Metadata { change, data, .. } => {
                self.notify_metadata(message, *change, data.as_ref())
            }
        }
    }

    fn notify_record(&self, message: &ChangeMessage, feather: &str, id: &str, change: ChangeKind, delta: Option<&Value>) {
        let mut waiting: Vec<(EventKey, SubscriptionId)> = Vec::new();

        for subscription in self.subscriptions.resolve(message) {
            let Some(wants_fetch) = self.sessions.wants_fetch(&subscription.event_key) else {
                tracing::debug!("[Router] Subscription {} has no live session", subscription.id);
                continue;
            };

            let notification = if change == ChangeKind::Delete {
                Notification::signal(subscription.id, change)
            } else if subscription.merge {
                Notification::new(subscription.id, change, delta.cloned().unwrap_or(Value::Null))
            } else if !wants_fetch {
                Notification::signal(subscription.id, change)
            } else {
                waiting.push((subscription.event_key, subscription.id));
                continue;
            };

            self.sessions.dispatch(&subscription.event_key, notification);
        }

        if waiting.is_empty() {
            return;
        }

        let sessions = self.sessions.clone();
        let subscriptions = self.subscriptions.clone();
        let (tenant, record) = (message.tenant.clone(), format!("{}/{}", feather, id));
        self.coalescer.request_fetch(
            feather,
            id,
            &message.tenant,
            Box::new(move |result| {
                let row = match result {
                    Ok(row) => Some(row),
                    Err(FetchError::NotFound { .. }) => {
                        tracing::debug!("[Fetch] {} on {} no longer exists", record, tenant);
                        None
                    }
                    Err(e) => {
                        tracing::warn!("[Fetch] Sending bare signal for {} on {}: {}", record, tenant, e);
                        None
                    }
                };

                for (event_key, subscription_id) in waiting {
                    // The subscription may have been dropped while the row was loading.
                    if subscriptions.get(&subscription_id).is_none() {
                        continue;
                    }
                    let notification = match &row {
                        Some(row) => Notification::new(subscription_id, change, (**row).clone()),
                        None => Notification::signal(subscription_id, change),
                    };
                    sessions.dispatch(&event_key, notification);
                }
            }),
        );
    }

    fn notify_metadata(&self, message: &ChangeMessage, change: ChangeKind, data: Option<&Value>) {
        let mut notified: HashSet<EventKey> = HashSet::new();

        for subscription in self.subscriptions.resolve(message) {
            if !notified.insert(subscription.event_key.clone()) {
                continue;
            }
            let Some(wants_fetch) = self.sessions.wants_fetch(&subscription.event_key) else {
                continue;
            };

            let notification = match data {
                Some(data) if wants_fetch && change != ChangeKind::Delete => {
                    Notification::new(subscription.id, change, data.clone())
                }
                _ => Notification::signal(subscription.id, change),
            };
            self.sessions.dispatch(&subscription.event_key, notification);
        }
    }

    /// Feather name for `name` when it is a known table rather than a feather
    async fn feather_for_table(&self, tenant: &str, name: &str) -> Option<String> {
        if self.catalog.feather(tenant, name).await.is_some() {
            return None;
        }
        let feather = self.catalog.feather_for_table(tenant, name).await?;
        tracing::trace!("[Router] Table {} on {} maps to feather {}", name, tenant, feather.name);
        Some(feather.name)
    }

    async fn apply_feather(&self, tenant: &str, name: &str, change: ChangeKind, data: Option<&Value>) {
        if change == ChangeKind::Delete {
            self.catalog.remove(tenant, name).await;
            let dropped = self.routes.unregister_feather(tenant, name);
            tracing::info!("[Router] Feather {} removed on {} ({} route(s) dropped)", name, tenant, dropped.len());
            return;
        }

        let feather = match Feather::from_definition(name, data) {
            Ok(feather) => feather,
            Err(e) => {
                tracing::warn!("[Router] Ignoring feather change on {}: {}", tenant, e);
                return;
            }
        };

        let route = RouteEntry::for_feather(tenant, &feather);
        let previous = self.catalog.upsert(tenant, feather).await;

        match route {
            Some(entry) => {
                // A renamed plural leaves the old path behind.
                if let Some(old_path) = previous.as_ref().and_then(Feather::route_path) {
                    if old_path != entry.path {
                        self.routes.unregister(tenant, &old_path);
                    }
                }
                self.routes.register(entry);
            }
            None => {
                self.routes.unregister_feather(tenant, name);
            }
        }
    }

    fn apply_route(&self, tenant: &str, name: &str, change: ChangeKind, data: Option<&Value>) {
        let definition: RouteDefinition = match data {
            None | Some(Value::Null) => RouteDefinition::default(),
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(definition) => definition,
                Err(e) => {
                    tracing::warn!("[Router] Ignoring route change {} on {}: {}", name, tenant, e);
                    return;
                }
            },
        };
        let path = definition.path.unwrap_or_else(|| name.to_string());

        if change == ChangeKind::Delete {
            self.routes.unregister(tenant, &path);
            return;
        }

        self.routes.register(RouteEntry {
            tenant: tenant.to_string(),
            path,
            feather: definition.feather,
            module: definition.module,
            read_only: definition.read_only,
            registered_at: chrono::Utc::now(),
        });
    }

    /// Re-read the tenant list and start or stop listeners accordingly
    pub async fn reload_tenants(&self) -> Result<TenantDiff, TenantError> {
        let diff = self.tenants.reload()?;
        self.supervisor.apply(&diff).await;

        for tenant in &diff.removed {
            if !self.tenants.contains(tenant.name()) {
                self.routes.unregister_tenant(tenant.name());
            }
        }
        Ok(diff)
    }
}
