//! Shared Module
//!
//! This module contains the wire types exchanged between the server core and
//! the browser sessions it keeps synchronized. Nothing in here touches the
//! database or the async runtime, so these types can be reused by any client
//! that speaks the same JSON protocol.
//!
//! # Overview
//!
//! - **`subscription`** - Event keys, subscription ids and subscription targets
//! - **`change`** - Change messages decoded from tenant notification channels
//! - **`notification`** - The `{subscription, data}` object pushed to sessions
//! - **`protocol`** - Client request frames and server replies
//! - **`error`** - Errors raised while decoding or validating the above

/// Subscription identifiers and targets
pub mod subscription;

/// Change messages produced by tenant listeners
pub mod change;

/// Notifications delivered to sessions
pub mod notification;

/// Client/server frames carried over the duplex channel
pub mod protocol;

/// Shared error types
pub mod error;

/// Re-export commonly used types for convenience
pub use change::{ChangeKind, ChangeMessage, ChangePayload};
pub use error::SharedError;
pub use notification::{Notification, SubscriptionNotice};
pub use protocol::{ClientFrame, ClientRequest, ServerReply};
pub use subscription::{EventKey, MetadataStream, SubscribeOptions, SubscriptionId, SubscriptionTarget};
