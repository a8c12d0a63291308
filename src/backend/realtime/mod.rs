//! Real-time Module
//!
//! Wires the change pipeline together: listeners feed decoded change
//! messages to the dispatcher, which resolves subscriptions, coalesces
//! re-fetches and pushes notifications to sessions.
//!
//! - **`dispatcher`** - Side effects and notification routing per change
//! - **`hub`** - Owner of every live-sync component and the session-facing API
//!
//! # Module Structure
//!
//! ```text
//! realtime/
//! ├── mod.rs        - Module exports and documentation
//! ├── dispatcher.rs - ChangeDispatcher
//! └── hub.rs        - LiveHub, HubConfig, HubParts
//! ```

/// Change message dispatch
pub mod dispatcher;

/// Live-sync hub
pub mod hub;

pub use dispatcher::ChangeDispatcher;
pub use hub::{HubConfig, HubParts, LiveHub, TeardownReport};
