/**
 * Lock Manager
 *
 * Grants and releases record locks on behalf of sessions and remembers the
 * locks this process granted, so that session teardown can release
 * everything the session held. The index mirrors the store: unlocks and
 * expiry sweeps drop the entries they remove.
 */
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::backend::locks::store::{AcquireOutcome, LockStore};
use crate::backend::locks::{Lock, LockError, UnlockCriteria};
use crate::shared::EventKey;

/// Per-request lock options
#[derive(Debug, Clone, Copy, Default)]
pub struct LockOptions {
    /// Overrides the manager's default TTL; `Some(Duration::ZERO)` never expires
    pub ttl: Option<Duration>,
}

/// Grants record locks and releases them on teardown
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    default_ttl: Option<Duration>,
    /// Locks granted here, keyed by (tenant, record id)
    held: Arc<Mutex<HashMap<(String, String), Lock>>>,
}

impl LockManager {
    /// `default_ttl` of `None` means locks never expire unless a request asks
    pub fn new(store: Arc<dyn LockStore>, default_ttl: Option<Duration>) -> Self {
        Self {
            store,
            default_ttl: default_ttl.filter(|ttl| !ttl.is_zero()),
            held: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lock `record_id` on `tenant` for `username` in session `event_key`
    ///
    /// # Returns
    ///
    /// The lock now held. Re-locking a record the same session and user
    /// already hold succeeds and refreshes its expiry.
    ///
    /// # Errors
    ///
    /// `LockError::Held` naming the current holder if someone else holds it.
    /// The existing lock is not modified.
    pub async fn lock(
        &self,
        tenant: &str,
        record_id: &str,
        username: &str,
        event_key: &EventKey,
        options: LockOptions,
    ) -> Result<Lock, LockError> {
        if record_id.is_empty() {
            return Err(LockError::Invalid("record id is empty".to_string()));
        }
        if username.is_empty() {
            return Err(LockError::Invalid("username is empty".to_string()));
        }

        let now = Utc::now();
        let ttl = match options.ttl {
            Some(ttl) if ttl.is_zero() => None,
            Some(ttl) => Some(ttl),
            None => self.default_ttl,
        };
        let expires_at = match ttl {
            Some(ttl) => Some(
                now + chrono::Duration::from_std(ttl)
                    .map_err(|_| LockError::Invalid(format!("lock ttl {:?} out of range", ttl)))?,
            ),
            None => None,
        };

        let candidate = Lock {
            record_id: record_id.to_string(),
            username: username.to_string(),
            event_key: event_key.clone(),
            acquired_at: now,
            expires_at,
        };

        match self.store.acquire(tenant, &candidate, now).await? {
            AcquireOutcome::Acquired(lock) => {
                self.held
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert((tenant.to_string(), record_id.to_string()), lock.clone());
                tracing::info!("[Locks] {} locked {}/{} ({})", username, tenant, record_id, event_key);
                Ok(lock)
            }
            AcquireOutcome::Held(holder) => {
                tracing::debug!(
                    "[Locks] {} denied {}/{}: held by {}",
                    username,
                    tenant,
                    record_id,
                    holder.username
                );
                Err(LockError::Held {
                    record_id: holder.record_id,
                    holder: holder.username,
                    event_key: holder.event_key,
                })
            }
        }
    }

    /// Release locks matching `criteria`; releasing nothing is not an error
    pub async fn unlock(&self, tenant: &str, criteria: &UnlockCriteria) -> Result<u64, LockError> {
        let released = self.store.release(tenant, criteria).await?;
        // Nothing matching `criteria` is left in the store now.
        self.forget(tenant, |lock| match criteria {
            UnlockCriteria::Record { record_id, username } => {
                &lock.record_id == record_id && &lock.username == username
            }
            UnlockCriteria::EventKey(key) => &lock.event_key == key,
        });
        if released > 0 {
            tracing::info!("[Locks] Released {} lock(s) on {} ({:?})", released, tenant, criteria);
        }
        Ok(released)
    }

    /// Release every lock owned by `event_key`
    ///
    /// Called on session teardown. Store failures are logged per tenant and
    /// do not stop the remaining tenants from being released.
    pub async fn release_session(&self, event_key: &EventKey) -> u64 {
        let tenants: BTreeSet<String> = {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            let tenants = held
                .iter()
                .filter(|(_, lock)| &lock.event_key == event_key)
                .map(|((tenant, _), _)| tenant.clone())
                .collect();
            held.retain(|_, lock| &lock.event_key != event_key);
            tenants
        };

        let criteria = UnlockCriteria::EventKey(event_key.clone());
        let mut released = 0;
        for tenant in tenants {
            match self.store.release(&tenant, &criteria).await {
                Ok(count) => released += count,
                Err(e) => tracing::error!("[Locks] Failed to release locks of {} on {}: {}", event_key, tenant, e),
            }
        }

        if released > 0 {
            tracing::info!("[Locks] Released {} lock(s) held by {}", released, event_key);
        }
        released
    }

    /// Current holder of `record_id`, ignoring expired locks
    pub async fn holder(&self, tenant: &str, record_id: &str) -> Result<Option<Lock>, LockError> {
        self.store.holder(tenant, record_id, Utc::now()).await
    }

    /// Purge expired locks on every given tenant
    pub async fn sweep_expired(&self, tenants: &[String]) -> u64 {
        let now = Utc::now();
        let mut purged = 0;
        for tenant in tenants {
            match self.store.purge_expired(tenant, now).await {
                Ok(count) => {
                    purged += count;
                    self.forget(tenant, |lock| lock.is_expired(now));
                }
                Err(e) => tracing::warn!("[Locks] Expiry sweep failed on {}: {}", tenant, e),
            }
        }
        if purged > 0 {
            tracing::info!("[Locks] Purged {} expired lock(s)", purged);
        }
        purged
    }

    /// Number of sessions currently owning at least one lock
    pub fn owner_count(&self) -> usize {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.values().map(|lock| &lock.event_key).collect::<HashSet<_>>().len()
    }

    /// Number of locks this process granted and has not seen released
    pub fn tracked(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn forget(&self, tenant: &str, released: impl Fn(&Lock) -> bool) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(t, _), lock| t != tenant || !released(lock));
    }
}
