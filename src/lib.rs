//! featherlive - Live-sync change distribution
//!
//! featherlive listens to the notification channels of many tenant
//! databases and pushes the resulting changes to connected browser sessions,
//! re-fetching the changed record once no matter how many sessions watch it.
//! It also hands out record locks that live exactly as long as the session
//! holding them.
//!
//! # Module Structure
//!
//! - **`shared`** - Wire types shared with clients
//!   - Event keys, subscription targets, change messages
//!   - Notifications and protocol frames
//!   - Error types
//!
//! - **`backend`** - Server-side code (only compiled with `ssr` feature)
//!   - Tenant registry and per-tenant change listeners
//!   - Session, subscription and lock management
//!   - Fetch coalescing
//!   - Axum WebSocket and HTTP surface
//!
//! # Feature Flags
//!
//! - **`ssr`** (default) - Enables the backend, its database and server stack
//!
//! # Usage
//!
//! ```rust,no_run
//! use featherlive::backend::server::{create_app, ServerConfig};
//!
//! # async fn example() {
//! let app = create_app(ServerConfig::from_env()).await;
//! // Use app with axum::serve
//! # }
//! ```
//!
//! # Thread Safety
//!
//! All server state is shared through `Arc` and guarded by `RwLock`/`Mutex`.
//! Session callbacks run outside those locks.

/// Shared types and data structures
pub mod shared;

/// Backend server-side code
#[cfg(feature = "ssr")]
pub mod backend;
