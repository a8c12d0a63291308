/**
 * Lock Storage
 *
 * Lock rows are kept per tenant. Acquisition is a single conditional write:
 * it succeeds when the record is unlocked, when the same session and user
 * already hold it (the expiry is refreshed), or when the current lock has
 * expired. Otherwise the current holder is reported and left untouched.
 */
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::locks::{Lock, LockError, UnlockCriteria};
use crate::backend::tenants::TenantRegistry;
use crate::shared::EventKey;

/// Result of an acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The candidate (or a refreshed version of it) is now the lock
    Acquired(Lock),
    /// Someone else holds the record; this is their lock
    Held(Lock),
}

/// Shared lock persistence
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Try to make `candidate` the lock on its record
    async fn acquire(&self, tenant: &str, candidate: &Lock, now: DateTime<Utc>) -> Result<AcquireOutcome, LockError>;

    /// Delete matching locks, returning how many were removed
    async fn release(&self, tenant: &str, criteria: &UnlockCriteria) -> Result<u64, LockError>;

    /// Current unexpired lock on a record
    async fn holder(&self, tenant: &str, record_id: &str, now: DateTime<Utc>) -> Result<Option<Lock>, LockError>;

    /// Delete every lock that expired at or before `now`
    async fn purge_expired(&self, tenant: &str, now: DateTime<Utc>) -> Result<u64, LockError>;
}

/// Lock store held in process memory
///
/// Only suitable for a single server process.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    locks: Arc<Mutex<HashMap<(String, String), Lock>>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored lock of a tenant, expired ones included
    pub fn snapshot(&self, tenant: &str) -> Vec<Lock> {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<Lock> = locks
            .iter()
            .filter(|((t, _), _)| t == tenant)
            .map(|(_, lock)| lock.clone())
            .collect();
        out.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        out
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(&self, tenant: &str, candidate: &Lock, now: DateTime<Utc>) -> Result<AcquireOutcome, LockError> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (tenant.to_string(), candidate.record_id.clone());

        let granted = match locks.get(&key) {
            Some(existing) if existing.same_holder(candidate) && !existing.is_expired(now) => Lock {
                acquired_at: existing.acquired_at,
                ..candidate.clone()
            },
            Some(existing) if !existing.is_expired(now) => {
                return Ok(AcquireOutcome::Held(existing.clone()));
            }
            _ => candidate.clone(),
        };

        locks.insert(key, granted.clone());
        Ok(AcquireOutcome::Acquired(granted))
    }

    async fn release(&self, tenant: &str, criteria: &UnlockCriteria) -> Result<u64, LockError> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|(t, _), lock| {
            t != tenant
                || match criteria {
                    UnlockCriteria::Record { record_id, username } => {
                        &lock.record_id != record_id || &lock.username != username
                    }
                    UnlockCriteria::EventKey(key) => &lock.event_key != key,
                }
        });
        Ok((before - locks.len()) as u64)
    }

    async fn holder(&self, tenant: &str, record_id: &str, now: DateTime<Utc>) -> Result<Option<Lock>, LockError> {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(locks
            .get(&(tenant.to_string(), record_id.to_string()))
            .filter(|lock| !lock.is_expired(now))
            .cloned())
    }

    async fn purge_expired(&self, tenant: &str, now: DateTime<Utc>) -> Result<u64, LockError> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|(t, _), lock| t != tenant || !lock.is_expired(now));
        Ok((before - locks.len()) as u64)
    }
}

#[derive(sqlx::FromRow)]
struct LockRow {
    record_id: String,
    username: String,
    event_key: String,
    acquired_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl From<LockRow> for Lock {
    fn from(row: LockRow) -> Self {
        Lock {
            record_id: row.record_id,
            username: row.username,
            event_key: EventKey::new(row.event_key),
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
        }
    }
}

/// DDL for the lock table; every statement is `IF NOT EXISTS`
///
/// Run as plain SQL rather than through the sqlx migrator: tenant databases
/// belong to their applications, which may keep their own `_sqlx_migrations`.
const LOCK_SCHEMA: &str = include_str!("../../../migrations/20260101000001_featherlive_lock.sql");

/// Lock store backed by the `featherlive_lock` table of each tenant database
#[derive(Debug, Clone)]
pub struct PgLockStore {
    tenants: TenantRegistry,
    schema_ready: Arc<Mutex<HashSet<String>>>,
}

impl PgLockStore {
    pub fn new(tenants: TenantRegistry) -> Self {
        Self {
            tenants,
            schema_ready: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Pool of `tenant`, with the lock table created on first use
    async fn pool(&self, tenant: &str) -> Result<sqlx::PgPool, LockError> {
        let pool = self
            .tenants
            .find(tenant)
            .map_err(|_| LockError::UnknownTenant(tenant.to_string()))?
            .pool()
            .clone();

        let ready = self
            .schema_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(tenant);
        if !ready {
            tracing::info!("[Locks] Ensuring lock table for tenant {}", tenant);
            sqlx::raw_sql(LOCK_SCHEMA)
                .execute(&pool)
                .await
                .map_err(|e| LockError::Store(format!("creating lock table failed for {}: {}", tenant, e)))?;
            self.schema_ready
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(tenant.to_string());
        }

        Ok(pool)
    }

    async fn current(pool: &sqlx::PgPool, record_id: &str, now: DateTime<Utc>) -> Result<Option<Lock>, LockError> {
        let row = sqlx::query_as::<_, LockRow>(
            r#"
            SELECT record_id, username, event_key, acquired_at, expires_at
            FROM featherlive_lock
            WHERE record_id = $1 AND (expires_at IS NULL OR expires_at > $2)
            "#,
        )
        .bind(record_id)
        .bind(now)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(Lock::from))
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn acquire(&self, tenant: &str, candidate: &Lock, now: DateTime<Utc>) -> Result<AcquireOutcome, LockError> {
        let pool = self.pool(tenant).await?;

        // The holder may release between the failed upsert and the lookup;
        // one retry covers that window.
        for _ in 0..2 {
            let granted = sqlx::query_as::<_, LockRow>(
                r#"
                INSERT INTO featherlive_lock (record_id, username, event_key, acquired_at, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (record_id) DO UPDATE SET
                    username = EXCLUDED.username,
                    event_key = EXCLUDED.event_key,
                    acquired_at = CASE
                        WHEN featherlive_lock.event_key = EXCLUDED.event_key
                         AND featherlive_lock.username = EXCLUDED.username
                         AND (featherlive_lock.expires_at IS NULL OR featherlive_lock.expires_at > $6)
                        THEN featherlive_lock.acquired_at
                        ELSE EXCLUDED.acquired_at
                    END,
                    expires_at = EXCLUDED.expires_at
                WHERE (featherlive_lock.event_key = EXCLUDED.event_key
                       AND featherlive_lock.username = EXCLUDED.username)
                   OR (featherlive_lock.expires_at IS NOT NULL AND featherlive_lock.expires_at <= $6)
                RETURNING record_id, username, event_key, acquired_at, expires_at
                "#,
            )
            .bind(&candidate.record_id)
            .bind(&candidate.username)
            .bind(candidate.event_key.as_str())
            .bind(candidate.acquired_at)
            .bind(candidate.expires_at)
            .bind(now)
            .fetch_optional(&pool)
            .await?;

            if let Some(row) = granted {
                return Ok(AcquireOutcome::Acquired(row.into()));
            }
            if let Some(holder) = Self::current(&pool, &candidate.record_id, now).await? {
                return Ok(AcquireOutcome::Held(holder));
            }
        }

        Err(LockError::Store(format!(
            "lock on '{}' changed hands repeatedly during acquisition",
            candidate.record_id
        )))
    }

    async fn release(&self, tenant: &str, criteria: &UnlockCriteria) -> Result<u64, LockError> {
        let pool = self.pool(tenant).await?;

        let result = match criteria {
            UnlockCriteria::Record { record_id, username } => {
                sqlx::query("DELETE FROM featherlive_lock WHERE record_id = $1 AND username = $2")
                    .bind(record_id)
                    .bind(username)
                    .execute(&pool)
                    .await?
            }
            UnlockCriteria::EventKey(key) => {
                sqlx::query("DELETE FROM featherlive_lock WHERE event_key = $1")
                    .bind(key.as_str())
                    .execute(&pool)
                    .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn holder(&self, tenant: &str, record_id: &str, now: DateTime<Utc>) -> Result<Option<Lock>, LockError> {
        let pool = self.pool(tenant).await?;
        Self::current(&pool, record_id, now).await
    }

    async fn purge_expired(&self, tenant: &str, now: DateTime<Utc>) -> Result<u64, LockError> {
        let pool = self.pool(tenant).await?;
        let result = sqlx::query("DELETE FROM featherlive_lock WHERE expires_at IS NOT NULL AND expires_at <= $1")
            .bind(now)
            .execute(&pool)
            .await?;
        Ok(result.rows_affected())
    }
}
