/**
 * Server Configuration
 *
 * This module loads server configuration from environment variables, with
 * defaults suitable for local development.
 *
 * # Variables
 *
 * | Variable                  | Default        |
 * |---------------------------|----------------|
 * | `SERVER_PORT`             | `3000`         |
 * | `TENANTS_FILE`            | `tenants.toml` |
 * | `NOTIFY_CHANNEL`          | `featherlive`  |
 * | `LOCK_TTL_SECS`           | `1800` (`0` = never expire) |
 * | `LOCK_SWEEP_SECS`         | `60`           |
 * | `FETCH_CONCURRENCY`       | `8`            |
 * | `LISTENER_BACKOFF_MS`     | `1000`         |
 * | `LISTENER_MAX_BACKOFF_MS` | `60000`        |
 * | `DATABASE_URL`            | unset          |
 *
 * # Error Handling
 *
 * Unparseable values are logged and replaced by their default; they never
 * prevent server startup.
 */

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backend::listener::Backoff;
use crate::backend::realtime::HubConfig;
use crate::backend::tenants::config::database_name_from_url;
use crate::backend::tenants::{TenantConfig, TenantSource};

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub tenants_file: PathBuf,
    pub notify_channel: String,
    /// `None` when locks never expire
    pub lock_ttl: Option<Duration>,
    pub lock_sweep: Duration,
    pub fetch_concurrency: usize,
    pub backoff: Backoff,
    /// Fallback single-tenant database when the tenant file is absent
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            tenants_file: PathBuf::from("tenants.toml"),
            notify_channel: "featherlive".to_string(),
            lock_ttl: Some(Duration::from_secs(1800)),
            lock_sweep: Duration::from_secs(60),
            fetch_concurrency: 8,
            backoff: Backoff::default(),
            database_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let lock_ttl_secs = parse_var(&lookup, "LOCK_TTL_SECS", 1800u64);
        let backoff_ms = parse_var(&lookup, "LISTENER_BACKOFF_MS", 1000u64).max(1);
        let max_backoff_ms = parse_var(&lookup, "LISTENER_MAX_BACKOFF_MS", 60_000u64);

        Self {
            port: parse_var(&lookup, "SERVER_PORT", defaults.port),
            tenants_file: lookup("TENANTS_FILE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.tenants_file),
            notify_channel: lookup("NOTIFY_CHANNEL")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.notify_channel),
            lock_ttl: (lock_ttl_secs > 0).then(|| Duration::from_secs(lock_ttl_secs)),
            lock_sweep: Duration::from_secs(parse_var(&lookup, "LOCK_SWEEP_SECS", 60u64).max(1)),
            fetch_concurrency: parse_var(&lookup, "FETCH_CONCURRENCY", defaults.fetch_concurrency).max(1),
            backoff: Backoff::new(Duration::from_millis(backoff_ms), Duration::from_millis(max_backoff_ms)),
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
        }
    }

    /// Where tenants are read from
    ///
    /// The tenant file wins. Without one, `DATABASE_URL` becomes a single
    /// tenant named after its database.
    pub fn tenant_source(&self) -> TenantSource {
        if self.tenants_file.exists() {
            return TenantSource::File(self.tenants_file.clone());
        }

        match &self.database_url {
            Some(url) => {
                let name = database_name_from_url(url).unwrap_or_else(|| "default".to_string());
                tracing::info!(
                    "{} not found, serving DATABASE_URL as tenant '{}'",
                    self.tenants_file.display(),
                    name
                );
                TenantSource::Static(vec![TenantConfig::new(name, url.clone())])
            }
            None => {
                tracing::warn!(
                    "{} not found and DATABASE_URL not set. No tenants will be served until a reload.",
                    self.tenants_file.display()
                );
                TenantSource::File(self.tenants_file.clone())
            }
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            channel: self.notify_channel.clone(),
            backoff: self.backoff,
            fetch_concurrency: self.fetch_concurrency,
            lock_ttl: self.lock_ttl,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {}={:?}, using default {:?}", key, raw, default);
            default
        }),
    }
}
