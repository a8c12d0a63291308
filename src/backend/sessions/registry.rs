/**
 * Event Session Registry
 *
 * Process-wide table of live sessions keyed by event key. The transport
 * registers a session when a client opens its duplex channel and removes it
 * when the channel closes.
 *
 * # Delivery
 *
 * Each session carries a delivery callback. Callbacks run inline on the
 * dispatching task, so they must hand the notification off (typically into
 * an unbounded channel feeding the socket writer) and return immediately.
 *
 * # Races With Teardown
 *
 * A notification may be in flight for a session that has just been torn
 * down. Dispatching to an unknown key is therefore a silent no-op, logged at
 * debug level only.
 *
 * A client reconnecting under the same key replaces its old handler before
 * the old socket notices it is dead. Teardown therefore names the exact
 * handler it installed (`unregister_session`), and leaves a newer handler
 * under the same key alone.
 */
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::shared::{EventKey, Notification};

/// Callback that hands a notification to a session's transport
pub type DeliveryFn = Arc<dyn Fn(Notification) + Send + Sync>;

/// One live client channel
pub struct EventSession {
    pub event_key: EventKey,
    /// Transport-level session the channel belongs to
    pub session_id: String,
    /// `false` when the client only wants bare change signals
    pub fetch: bool,
    pub connected_at: DateTime<Utc>,
    deliver: DeliveryFn,
}

impl EventSession {
    pub fn new(event_key: EventKey, session_id: impl Into<String>, fetch: bool, deliver: DeliveryFn) -> Self {
        Self {
            event_key,
            session_id: session_id.into(),
            fetch,
            connected_at: Utc::now(),
            deliver,
        }
    }

    pub fn deliver(&self, notification: Notification) {
        (self.deliver)(notification)
    }
}

impl fmt::Debug for EventSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSession")
            .field("event_key", &self.event_key)
            .field("session_id", &self.session_id)
            .field("fetch", &self.fetch)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

/// Registry of active sessions
#[derive(Clone, Default)]
pub struct EventSessionRegistry {
    sessions: Arc<RwLock<HashMap<EventKey, Arc<EventSession>>>>,
}

impl EventSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session handler
    ///
    /// Only one session may exist per event key; registering a key again
    /// replaces the previous handler. Returns the installed handler, which
    /// is what `unregister_session` expects back on teardown.
    pub fn register(
        &self,
        event_key: EventKey,
        session_id: impl Into<String>,
        fetch: bool,
        deliver: DeliveryFn,
    ) -> Arc<EventSession> {
        let session = Arc::new(EventSession::new(event_key.clone(), session_id, fetch, deliver));
        let previous = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_key.clone(), session.clone());

        if previous.is_some() {
            tracing::warn!("[Sessions] Event key {} re-registered, previous handler replaced", event_key);
        } else {
            tracing::debug!("[Sessions] Registered event key {} (fetch={})", event_key, fetch);
        }
        session
    }

    /// Remove whatever handler `event_key` has; safe to call more than once
    pub fn unregister(&self, event_key: &EventKey) -> Option<Arc<EventSession>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event_key);

        if removed.is_some() {
            tracing::debug!("[Sessions] Unregistered event key {}", event_key);
        }
        removed
    }

    /// Remove `session` if it is still the handler for its key; safe to call more than once
    ///
    /// Returns `false` when the key is gone or now belongs to a newer handler.
    pub fn unregister_session(&self, session: &Arc<EventSession>) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(&session.event_key) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&session.event_key);
                drop(sessions);
                tracing::debug!("[Sessions] Unregistered event key {}", session.event_key);
                true
            }
            Some(_) => {
                drop(sessions);
                tracing::debug!(
                    "[Sessions] Stale handler for {} left the newer one in place",
                    session.event_key
                );
                false
            }
            None => false,
        }
    }

    /// Deliver a notification to a session
    ///
    /// Returns `false` when no session is registered under `event_key`.
    pub fn dispatch(&self, event_key: &EventKey, notification: Notification) -> bool {
        // Clone the handle out so the callback never runs under the lock.
        let session = self.get(event_key);
        match session {
            Some(session) => {
                session.deliver(notification);
                true
            }
            None => {
                tracing::debug!("[Sessions] Dropping notification for unknown event key {}", event_key);
                false
            }
        }
    }

    pub fn get(&self, event_key: &EventKey) -> Option<Arc<EventSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_key)
            .cloned()
    }

    /// Whether the session wants re-fetched payloads; `None` if it is gone
    pub fn wants_fetch(&self, event_key: &EventKey) -> Option<bool> {
        self.get(event_key).map(|session| session.fetch)
    }

    pub fn contains(&self, event_key: &EventKey) -> bool {
        self.get(event_key).is_some()
    }

    pub fn keys(&self) -> Vec<EventKey> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
