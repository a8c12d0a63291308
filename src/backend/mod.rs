//! Backend Module
//!
//! This module contains all server-side code for featherlive: the tenant
//! listeners, the dispatch pipeline that turns database notifications into
//! session notifications, record locks, and the Axum surface in front of it.
//!
//! This module is only compiled when the `ssr` feature is enabled.
//!
//! # Architecture
//!
//! - **`tenants`** - Tenant configuration and the tenant registry
//! - **`listener`** - One reconnecting change listener per tenant
//! - **`sessions`** - Event sessions keyed by event key
//! - **`subscriptions`** - Subscriptions per event session
//! - **`catalog`** - Feather definitions and dynamically registered routes
//! - **`fetch`** - Coalesced record fetches
//! - **`locks`** - Record locks tied to event sessions
//! - **`realtime`** - The dispatcher and the hub that owns everything above
//! - **`transport`** - WebSocket event channel
//! - **`routes`** - HTTP route configuration and router assembly
//! - **`server`** - Server initialization, application state, configuration
//! - **`error`** - Backend-specific error types
//!
//! # Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs          - Module exports and documentation
//! ├── tenants/        - Tenant registry
//! ├── listener/       - Change listeners and their supervisor
//! ├── sessions/       - Event session registry
//! ├── subscriptions/  - Subscription manager
//! ├── catalog/        - Feathers and routes
//! ├── fetch/          - Fetch coalescer and query executor
//! ├── locks/          - Lock manager and lock stores
//! ├── realtime/       - Dispatcher and LiveHub
//! ├── transport/      - WebSocket handling
//! ├── routes/         - Route configuration
//! ├── server/         - Server initialization and state
//! └── error/          - Error types
//! ```
//!
//! # Data Flow
//!
//! ```text
//! Postgres NOTIFY ──► ChangeListener ──► mpsc ──► ChangeDispatcher
//!                                                   │
//!                      FetchCoalescer ◄─────────────┤
//!                                                   ▼
//!                   SubscriptionManager ──► EventSessionRegistry ──► WebSocket
//! ```
//!
//! # Thread Safety
//!
//! Registries hold their state behind `std::sync::RwLock`/`Mutex` and never
//! call out to a session while a lock is held. Per-tenant ordering comes from
//! the single dispatch pump draining the listener channel.

/// Tenant registry
pub mod tenants;

/// Per-tenant change listeners
pub mod listener;

/// Event sessions
pub mod sessions;

/// Subscriptions per event session
pub mod subscriptions;

/// Feather catalog and data routes
pub mod catalog;

/// Coalesced record fetches
pub mod fetch;

/// Record locks
pub mod locks;

/// Change dispatch and the hub
pub mod realtime;

/// WebSocket event channel
pub mod transport;

/// Route configuration
pub mod routes;

/// Server setup and configuration
pub mod server;

/// Backend error types
pub mod error;

/// Re-export commonly used types
pub use error::BackendError;
pub use realtime::{HubConfig, HubParts, LiveHub};
pub use server::{create_app, ServerConfig};
