//! Listener Module
//!
//! Per-tenant change listening.
//!
//! # Module Structure
//!
//! ```text
//! listener/
//! ├── mod.rs              - Module exports
//! ├── source.rs           - NotificationSource seam and the Postgres LISTEN source
//! ├── change_listener.rs  - Listener task with reconnect backoff
//! └── supervisor.rs       - Exactly one listener per tenant
//! ```

pub mod change_listener;
pub mod source;
pub mod supervisor;

pub use change_listener::{Backoff, ChangeListener, ListenerHandle, ListenerStatus};
pub use source::{ChannelError, NotificationSource, NotificationStream, PgNotificationSource, RawNotification};
pub use supervisor::ListenerSupervisor;
