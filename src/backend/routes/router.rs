/**
 * Router Configuration
 *
 * This module provides the main router creation function that combines
 * all route configurations into a single Axum router.
 *
 * # Route Order
 *
 * 1. Event channel (`GET /events/{event_key}`)
 * 2. API and data routes
 * 3. Health check
 * 4. Fallback handler (404)
 *
 * Requests are traced with `tower_http::trace::TraceLayer`.
 */

use axum::{http::StatusCode, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::backend::routes::api_routes::configure_api_routes;
use crate::backend::server::state::AppState;
use crate::backend::transport::handle_event_channel;

/// Create the Axum router with all routes configured
///
/// # Arguments
///
/// * `app_state` - Application state holding the hub and configuration
///
/// # Returns
///
/// Configured Axum Router ready to serve requests
pub fn create_router(app_state: AppState) -> Router<()> {
    let router = Router::new().route("/events/{event_key}", get(handle_event_channel));

    // Add API routes
    let router = configure_api_routes(router);

    let router = router.route("/health", get(|| async { "ok" }));

    // Fallback handler for 404
    let router = router.fallback(|| async {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Not Found", "status": 404 })),
        )
    });

    router.layer(TraceLayer::new_for_http()).with_state(app_state)
}
