/**
 * Server Initialization
 *
 * This module builds the live-sync hub from configuration and wires it into
 * the Axum router.
 *
 * # Initialization Process
 *
 * 1. Load tenants from the tenant file (or the `DATABASE_URL` fallback)
 * 2. Build the Postgres-backed collaborators (notification source, query
 *    executor, lock store) and the in-memory catalog
 * 3. Start one change listener per tenant and the dispatch pump
 * 4. Start the periodic lock expiry sweep
 * 5. Create the router
 *
 * # Error Handling
 *
 * A tenant file that cannot be read is logged and the server starts with
 * no tenants; `POST /api/tenants/reload` picks the file up later. A tenant
 * whose listener cannot connect retries in the background without holding
 * up the others.
 */

use axum::Router;
use std::sync::Arc;

use crate::backend::catalog::MemoryCatalog;
use crate::backend::fetch::PgQueryExecutor;
use crate::backend::listener::PgNotificationSource;
use crate::backend::locks::PgLockStore;
use crate::backend::realtime::{HubParts, LiveHub};
use crate::backend::routes::router::create_router;
use crate::backend::server::config::ServerConfig;
use crate::backend::server::state::AppState;
use crate::backend::tenants::TenantRegistry;

/// Build the hub backed by the tenants' Postgres databases
pub fn build_hub(config: &ServerConfig) -> Arc<LiveHub> {
    let tenants = TenantRegistry::new(config.tenant_source());
    match tenants.reload() {
        Ok(diff) => tracing::info!("Loaded {} tenant(s): {:?}", diff.added.len(), diff.added_names()),
        Err(e) => tracing::error!("Failed to load tenants: {}", e),
    }

    let catalog = Arc::new(MemoryCatalog::new());
    let parts = HubParts {
        tenants: tenants.clone(),
        source: Arc::new(PgNotificationSource),
        executor: Arc::new(PgQueryExecutor::new(tenants.clone(), catalog.clone())),
        lock_store: Arc::new(PgLockStore::new(tenants)),
        catalog,
    };

    Arc::new(LiveHub::new(parts, config.hub_config()))
}

/// Create and configure the Axum application
///
/// Starts the hub's background tasks and returns the router serving it.
pub async fn create_app(config: ServerConfig) -> Router<()> {
    tracing::info!("Initializing featherlive server");

    let hub = build_hub(&config);
    if hub.start().is_some() {
        tracing::info!("Change listeners started for {:?}", hub.supervisor().running());
    }
    if config.lock_ttl.is_some() {
        hub.spawn_lock_sweep(config.lock_sweep);
    }

    let app = create_router(AppState::new(hub, config));
    tracing::info!("Router configured");
    app
}
