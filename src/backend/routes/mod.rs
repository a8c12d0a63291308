//! Route Configuration Module
//!
//! This module configures all HTTP routes for the backend server.
//!
//! # Architecture
//!
//! - **`router`** - Main router creation and route assembly
//! - **`api_routes`** - Tenant, route, data and lock endpoints
//!
//! # Module Structure
//!
//! ```text
//! routes/
//! ├── mod.rs          - Module exports and documentation
//! ├── router.rs       - Main router creation
//! └── api_routes.rs   - API endpoint handlers
//! ```
//!
//! # Route Types
//!
//! ## Event Channel
//!
//! - `GET /events/{event_key}` - WebSocket upgrade (`?fetch=false` for bare signals)
//!
//! ## API Routes
//!
//! - `GET /api/tenants` - Tenants and listener state
//! - `POST /api/tenants/reload` - Reload the tenant file
//! - `GET /api/routes` - Registered data routes
//! - `POST /api/{tenant}/locks` - Acquire a record lock
//! - `GET /api/{tenant}/locks/{record_id}` - Current lock holder
//! - `DELETE /api/{tenant}/locks/{record_id}` - Release a record lock
//!
//! ## Data Routes
//!
//! - `GET /data/{tenant}/{path}/{id}` - Record through a registered feather route

/// Main router creation
pub mod router;

/// API endpoint handlers
pub mod api_routes;

// Re-export commonly used functions
pub use router::create_router;
