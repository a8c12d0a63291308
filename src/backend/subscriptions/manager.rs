/**
 * Subscription Manager
 *
 * Tracks which sessions are interested in which records, queries and
 * metadata streams, and answers the routing question for each incoming
 * change message: which subscriptions should hear about it.
 *
 * # Routing Rules
 *
 * - A record change addressed to explicit subscription ids goes to exactly
 *   those ids (unknown or foreign-tenant ids are ignored).
 * - Otherwise a record change matches subscriptions on that exact record id
 *   and subscriptions on the record's feather (its owning query).
 * - A metadata change matches subscriptions on that stream, minus the
 *   originating session. Tenant-stream subscriptions match regardless of
 *   the tenant they were registered under, since the tenant list is
 *   process-wide.
 */
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::shared::{
    ChangeMessage, ChangePayload, EventKey, MetadataStream, SubscribeOptions, SubscriptionId,
    SubscriptionTarget,
};

/// A session's registered interest
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub event_key: EventKey,
    pub tenant: String,
    pub target: SubscriptionTarget,
    pub merge: bool,
    pub created_at: DateTime<Utc>,
}

/// What to remove in [`SubscriptionManager::unsubscribe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsubscribe {
    /// A single subscription
    Id(SubscriptionId),
    /// Every subscription owned by an event key
    Owner(EventKey),
}

type TargetKey = (String, SubscriptionTarget);

#[derive(Debug, Default)]
struct SubscriptionTable {
    by_id: HashMap<SubscriptionId, Subscription>,
    by_owner: HashMap<EventKey, HashSet<SubscriptionId>>,
    by_target: HashMap<TargetKey, HashSet<SubscriptionId>>,
}

impl SubscriptionTable {
    fn insert(&mut self, subscription: Subscription) {
        self.by_owner
            .entry(subscription.event_key.clone())
            .or_default()
            .insert(subscription.id);
        self.by_target
            .entry((subscription.tenant.clone(), subscription.target.clone()))
            .or_default()
            .insert(subscription.id);
        self.by_id.insert(subscription.id, subscription);
    }

    fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let subscription = self.by_id.remove(id)?;

        if let Some(ids) = self.by_owner.get_mut(&subscription.event_key) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_owner.remove(&subscription.event_key);
            }
        }

        let target_key = (subscription.tenant.clone(), subscription.target.clone());
        if let Some(ids) = self.by_target.get_mut(&target_key) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_target.remove(&target_key);
            }
        }

        Some(subscription)
    }

    fn collect_target(&self, tenant: &str, target: SubscriptionTarget, out: &mut Vec<Subscription>) {
        if let Some(ids) = self.by_target.get(&(tenant.to_string(), target)) {
            out.extend(ids.iter().filter_map(|id| self.by_id.get(id)).cloned());
        }
    }
}

/// Registry of subscriptions and change routing
#[derive(Debug, Clone, Default)]
pub struct SubscriptionManager {
    table: Arc<RwLock<SubscriptionTable>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest of `event_key` in `target` on `tenant`
    pub fn subscribe(
        &self,
        tenant: &str,
        event_key: &EventKey,
        target: SubscriptionTarget,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let subscription = Subscription {
            id: SubscriptionId::new(),
            event_key: event_key.clone(),
            tenant: tenant.to_string(),
            target,
            merge: options.merge,
            created_at: Utc::now(),
        };
        let id = subscription.id;

        tracing::debug!(
            "[Subscriptions] {} subscribed to {:?} on {} as {} (merge={})",
            event_key,
            subscription.target,
            tenant,
            id,
            subscription.merge
        );

        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscription);
        id
    }

    /// Remove one subscription or all subscriptions of an event key
    pub fn unsubscribe(&self, which: &Unsubscribe) -> Vec<Subscription> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let removed: Vec<Subscription> = match which {
            Unsubscribe::Id(id) => table.remove(id).into_iter().collect(),
            Unsubscribe::Owner(event_key) => {
                let ids: Vec<SubscriptionId> = table
                    .by_owner
                    .get(event_key)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default();
                ids.iter().filter_map(|id| table.remove(id)).collect()
            }
        };

        if !removed.is_empty() {
            tracing::debug!("[Subscriptions] Removed {} subscription(s) for {:?}", removed.len(), which);
        }
        removed
    }

    /// Subscriptions a change message should be delivered to
    pub fn resolve(&self, message: &ChangeMessage) -> Vec<Subscription> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let mut matches = Vec::new();

        match &message.payload {
            ChangePayload::Record {
                feather,
                id,
                subscriptions,
                ..
            } => {
                if !subscriptions.is_empty() {
                    matches.extend(
                        subscriptions
                            .iter()
                            .filter_map(|sid| table.by_id.get(sid))
                            .filter(|s| s.tenant == message.tenant)
                            .cloned(),
                    );
                } else {
                    table.collect_target(&message.tenant, SubscriptionTarget::Record(id.clone()), &mut matches);
                    table.collect_target(&message.tenant, SubscriptionTarget::Query(feather.clone()), &mut matches);
                }
            }
            ChangePayload::Metadata {
                stream: MetadataStream::Tenant,
                ..
            } => {
                let target = SubscriptionTarget::Metadata(MetadataStream::Tenant);
                for ((_, t), ids) in &table.by_target {
                    if *t == target {
                        matches.extend(ids.iter().filter_map(|id| table.by_id.get(id)).cloned());
                    }
                }
            }
            ChangePayload::Metadata { stream, .. } => {
                table.collect_target(&message.tenant, SubscriptionTarget::Metadata(*stream), &mut matches);
            }
        }

        if let (ChangePayload::Metadata { .. }, Some(origin)) = (&message.payload, &message.origin) {
            matches.retain(|s| &s.event_key != origin);
        }

        matches.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        matches.dedup_by_key(|s| s.id);
        matches
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(id)
            .cloned()
    }

    /// Number of subscriptions owned by `event_key`
    pub fn count_for(&self, event_key: &EventKey) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_owner
            .get(event_key)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
