//! Locks Module
//!
//! Record-level advisory locks. A lock names the record, the user holding it
//! and the event key of the session that took it. Lock state lives in the
//! tenant's database so every server process sees the same holder.
//!
//! # Module Structure
//!
//! ```text
//! locks/
//! ├── mod.rs      - Lock, LockError and unlock criteria
//! ├── store.rs    - LockStore trait, in-memory and Postgres stores
//! └── manager.rs  - LockManager: TTLs, session ownership, teardown release
//! ```

/// Lock persistence
pub mod store;

/// Lock manager
pub mod manager;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::shared::EventKey;

pub use manager::{LockManager, LockOptions};
pub use store::{AcquireOutcome, LockStore, MemoryLockStore, PgLockStore};

/// An advisory lock on one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub record_id: String,
    pub username: String,
    pub event_key: EventKey,
    pub acquired_at: DateTime<Utc>,
    /// `None` means the lock never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl Lock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether `other` was requested by the same session and user
    pub fn same_holder(&self, other: &Lock) -> bool {
        self.event_key == other.event_key && self.username == other.username
    }
}

/// How an unlock request selects locks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockCriteria {
    /// The lock on `record_id`, if `username` holds it
    Record { record_id: String, username: String },
    /// Every lock owned by a session
    EventKey(EventKey),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Record '{record_id}' is locked by {holder}")]
    Held {
        record_id: String,
        holder: String,
        event_key: EventKey,
    },

    #[error("Invalid lock request: {0}")]
    Invalid(String),

    #[error("Unknown tenant '{0}'")]
    UnknownTenant(String),

    /// The requesting session closed while the lock was being taken
    #[error("Session {0} closed")]
    SessionClosed(EventKey),

    #[error("Lock store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for LockError {
    fn from(err: sqlx::Error) -> Self {
        LockError::Store(err.to_string())
    }
}
