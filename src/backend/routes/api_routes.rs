/**
 * API Route Handlers
 *
 * HTTP endpoints around the live-sync hub for operators and for clients
 * that do not hold an event channel.
 *
 * # Routes
 *
 * ## Tenants
 * - `GET /api/tenants` - Known tenants and the state of their listeners
 * - `POST /api/tenants/reload` - Re-read the tenant file, start/stop listeners
 *
 * ## Routes
 * - `GET /api/routes` - Dynamically registered data routes
 * - `GET /data/{tenant}/{path}/{id}` - A record served through the coalescer
 *
 * ## Locks
 * - `POST /api/{tenant}/locks` - Acquire a lock
 * - `GET /api/{tenant}/locks/{record_id}` - Current holder, or `null`
 * - `DELETE /api/{tenant}/locks/{record_id}?username=` - Release a lock
 */

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::catalog::RouteEntry;
use crate::backend::error::BackendError;
use crate::backend::listener::ListenerStatus;
use crate::backend::locks::{Lock, LockOptions, UnlockCriteria};
use crate::backend::realtime::LiveHub;
use crate::backend::server::state::AppState;
use crate::backend::tenants::config::database_name_from_url;
use crate::shared::EventKey;

/// Tenant as listed by `GET /api/tenants`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub name: String,
    pub database: Option<String>,
    pub added_at: DateTime<Utc>,
    /// `connecting`, `listening`, `backoff`, `stopped` or `none`
    pub listener: String,
    pub sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    pub record_id: String,
    pub username: String,
    pub event_key: String,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UnlockQuery {
    pub username: String,
}

fn listener_label(status: Option<ListenerStatus>) -> String {
    match status {
        Some(ListenerStatus::Connecting) => "connecting",
        Some(ListenerStatus::Listening) => "listening",
        Some(ListenerStatus::Backoff { .. }) => "backoff",
        Some(ListenerStatus::Stopped) => "stopped",
        None => "none",
    }
    .to_string()
}

async fn list_tenants(State(hub): State<Arc<LiveHub>>) -> Json<Vec<TenantSummary>> {
    let sessions = hub.sessions().len();
    let tenants = hub
        .tenants()
        .list()
        .into_iter()
        .map(|tenant| TenantSummary {
            name: tenant.name().to_string(),
            database: database_name_from_url(&tenant.config().database_url),
            added_at: tenant.added_at(),
            listener: listener_label(hub.supervisor().status(tenant.name())),
            sessions,
        })
        .collect();
    Json(tenants)
}

async fn reload_tenants(State(hub): State<Arc<LiveHub>>) -> Result<Json<ReloadSummary>, BackendError> {
    let diff = hub.reload_tenants().await?;
    Ok(Json(ReloadSummary {
        added: diff.added_names(),
        removed: diff.removed_names(),
    }))
}

async fn list_routes(State(hub): State<Arc<LiveHub>>) -> Json<Vec<RouteEntry>> {
    Json(hub.routes().list())
}

async fn get_record(
    State(hub): State<Arc<LiveHub>>,
    Path((tenant, path, id)): Path<(String, String, String)>,
) -> Result<Json<Value>, BackendError> {
    let row = hub.fetch_record(&tenant, &path, &id).await?;
    Ok(Json(row.as_ref().clone()))
}

async fn acquire_lock(
    State(hub): State<Arc<LiveHub>>,
    Path(tenant): Path<String>,
    Json(request): Json<LockRequest>,
) -> Result<(StatusCode, Json<Lock>), BackendError> {
    if request.event_key.trim().is_empty() {
        return Err(BackendError::handler(StatusCode::BAD_REQUEST, "eventKey is required"));
    }
    let options = LockOptions {
        ttl: request.ttl_secs.map(Duration::from_secs),
    };
    let lock = hub
        .lock(
            &tenant,
            &request.record_id,
            &request.username,
            &EventKey::new(request.event_key),
            options,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(lock)))
}

async fn get_lock(
    State(hub): State<Arc<LiveHub>>,
    Path((tenant, record_id)): Path<(String, String)>,
) -> Result<Json<Option<Lock>>, BackendError> {
    Ok(Json(hub.lock_holder(&tenant, &record_id).await?))
}

async fn release_lock(
    State(hub): State<Arc<LiveHub>>,
    Path((tenant, record_id)): Path<(String, String)>,
    Query(query): Query<UnlockQuery>,
) -> Result<Json<Value>, BackendError> {
    let criteria = UnlockCriteria::Record {
        record_id,
        username: query.username,
    };
    let released = hub.unlock(&tenant, &criteria).await?;
    Ok(Json(json!({ "released": released })))
}

/// Configure API routes
///
/// # Arguments
///
/// * `router` - The router to add routes to
///
/// # Returns
///
/// Router with API and data routes configured
pub fn configure_api_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/api/tenants", get(list_tenants))
        .route("/api/tenants/reload", post(reload_tenants))
        .route("/api/routes", get(list_routes))
        .route("/api/{tenant}/locks", post(acquire_lock))
        .route("/api/{tenant}/locks/{record_id}", get(get_lock).delete(release_lock))
        .route("/data/{tenant}/{path}/{id}", get(get_record))
}
