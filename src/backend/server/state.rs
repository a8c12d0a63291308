/**
 * Application State Management
 *
 * This module defines the application state structure and implements the
 * `FromRef` traits for Axum state extraction.
 *
 * # Architecture
 *
 * `AppState` holds:
 * - the `LiveHub`, which owns tenants, sessions, subscriptions, the fetch
 *   coalescer, locks and listeners
 * - the server configuration it was built from
 *
 * Both are behind `Arc`, so cloning the state per request is cheap.
 *
 * # Example
 *
 * ```rust,ignore
 * use featherlive::backend::realtime::LiveHub;
 * use axum::extract::State;
 * use std::sync::Arc;
 *
 * async fn handler(State(hub): State<Arc<LiveHub>>) {
 *     let tenants = hub.tenants().names();
 * }
 * ```
 */

use axum::extract::FromRef;
use std::sync::Arc;

use crate::backend::realtime::LiveHub;
use crate::backend::server::config::ServerConfig;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<LiveHub>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(hub: Arc<LiveHub>, config: ServerConfig) -> Self {
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for Arc<LiveHub> {
    fn from_ref(state: &AppState) -> Self {
        state.hub.clone()
    }
}

impl FromRef<AppState> for Arc<ServerConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
