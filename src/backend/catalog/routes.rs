/**
 * Dynamic Route Table
 *
 * Feathers with a plural name and module routes announced on the Route
 * metadata stream are served under `/data/{tenant}/{path}`. The axum router
 * itself is static; the data handler consults this table, so registering a
 * route here is what makes it reachable.
 */
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::backend::catalog::Feather;

/// A registered route
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub tenant: String,
    pub path: String,
    /// Feather served by this route (module routes may have none)
    pub feather: Option<String>,
    pub module: Option<String>,
    pub read_only: bool,
    pub registered_at: DateTime<Utc>,
}

impl RouteEntry {
    /// Route for a feather, if the feather has a plural name
    pub fn for_feather(tenant: &str, feather: &Feather) -> Option<Self> {
        Some(Self {
            tenant: tenant.to_string(),
            path: feather.route_path()?,
            feather: Some(feather.name.clone()),
            module: feather.module.clone(),
            read_only: feather.read_only,
            registered_at: Utc::now(),
        })
    }

    fn same_target(&self, other: &RouteEntry) -> bool {
        self.feather == other.feather && self.module == other.module && self.read_only == other.read_only
    }
}

/// Outcome of [`RouteTable::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    Registered,
    Updated,
    Unchanged,
}

/// Table of dynamically registered routes
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Arc<RwLock<BTreeMap<(String, String), RouteEntry>>>,
    registrations: Arc<AtomicU64>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a route
    ///
    /// Re-registering an identical route is not counted as a registration.
    pub fn register(&self, entry: RouteEntry) -> RouteChange {
        let key = (entry.tenant.clone(), entry.path.clone());
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);

        let change = match routes.get(&key) {
            Some(existing) if existing.same_target(&entry) => return RouteChange::Unchanged,
            Some(_) => RouteChange::Updated,
            None => RouteChange::Registered,
        };

        tracing::info!("[Routes] {:?} /data/{}/{}", change, entry.tenant, entry.path);
        routes.insert(key, entry);
        self.registrations.fetch_add(1, Ordering::Relaxed);
        change
    }

    pub fn unregister(&self, tenant: &str, path: &str) -> Option<RouteEntry> {
        let removed = self
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(tenant.to_string(), path.to_string()));
        if removed.is_some() {
            tracing::info!("[Routes] Unregistered /data/{}/{}", tenant, path);
        }
        removed
    }

    /// Drop every route serving `feather` on `tenant`
    pub fn unregister_feather(&self, tenant: &str, feather: &str) -> Vec<RouteEntry> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<(String, String)> = routes
            .iter()
            .filter(|((t, _), entry)| t == tenant && entry.feather.as_deref() == Some(feather))
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter().filter_map(|key| routes.remove(key)).collect()
    }

    /// Drop every route of a tenant
    pub fn unregister_tenant(&self, tenant: &str) -> usize {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let before = routes.len();
        routes.retain(|(t, _), _| t != tenant);
        before - routes.len()
    }

    pub fn lookup(&self, tenant: &str, path: &str) -> Option<RouteEntry> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(tenant.to_string(), path.to_string()))
            .cloned()
    }

    pub fn list(&self) -> Vec<RouteEntry> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of registrations performed since startup
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::Relaxed)
    }
}
