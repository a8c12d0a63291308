/**
 * Tenant Registry
 *
 * Holds every known tenant and its connection pool for the lifetime of the
 * process. `reload()` re-reads the configuration source and reports which
 * tenants appeared and disappeared so the caller can start or stop the
 * matching change listeners.
 *
 * # Pools
 *
 * Pools are created lazily: no connection is opened until a listener, a
 * fetch or a lock actually needs one. A tenant whose URL cannot even be
 * parsed into pool options is skipped like any other malformed entry.
 */
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use crate::backend::tenants::config::{parse_tenant_file, TenantConfig};
use crate::backend::tenants::TenantError;

/// Where tenant configuration comes from
#[derive(Debug, Clone)]
pub enum TenantSource {
    /// A TOML tenant file, re-read on every reload
    File(PathBuf),
    /// A fixed list (single-database deployments and tests)
    Static(Vec<TenantConfig>),
}

impl TenantSource {
    fn read(&self) -> Result<Vec<TenantConfig>, TenantError> {
        match self {
            Self::Static(configs) => Ok(configs.clone()),
            Self::File(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| TenantError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                let parsed = parse_tenant_file(&contents)?;
                for skipped in &parsed.skipped {
                    tracing::warn!("[Tenants] Skipping tenant entry in {}: {}", path.display(), skipped);
                }
                Ok(parsed.tenants)
            }
        }
    }
}

/// One tenant database
#[derive(Debug)]
pub struct Tenant {
    config: TenantConfig,
    pool: PgPool,
    added_at: DateTime<Utc>,
}

impl Tenant {
    /// Build a tenant with a lazily connecting pool
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect_lazy(config: TenantConfig) -> Result<Self, TenantError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .connect_lazy(&config.database_url)
            .map_err(|e| TenantError::Pool {
                tenant: config.name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            config,
            pool,
            added_at: Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }
}

/// Tenants that appeared or disappeared during a reload
///
/// A tenant whose connection parameters changed shows up in both lists so
/// its listener is restarted against the new database.
#[derive(Debug, Default)]
pub struct TenantDiff {
    pub added: Vec<Arc<Tenant>>,
    pub removed: Vec<Arc<Tenant>>,
}

impl TenantDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn added_names(&self) -> Vec<String> {
        self.added.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn removed_names(&self) -> Vec<String> {
        self.removed.iter().map(|t| t.name().to_string()).collect()
    }
}

/// Registry of all tenants served by this process
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    source: Arc<TenantSource>,
    tenants: Arc<RwLock<BTreeMap<String, Arc<Tenant>>>>,
}

impl TenantRegistry {
    /// Create an empty registry; call [`reload`](Self::reload) to populate it
    pub fn new(source: TenantSource) -> Self {
        Self {
            source: Arc::new(source),
            tenants: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// All known tenants, ordered by name
    pub fn list(&self) -> Vec<Arc<Tenant>> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        tenants.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        tenants.keys().cloned().collect()
    }

    pub fn find(&self, name: &str) -> Result<Arc<Tenant>, TenantError> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        tenants
            .get(name)
            .cloned()
            .ok_or_else(|| TenantError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        tenants.contains_key(name)
    }

    /// Re-read the configuration source and swap in the new tenant set
    ///
    /// If the source itself cannot be read the registry is left untouched.
    pub fn reload(&self) -> Result<TenantDiff, TenantError> {
        let configs = self.source.read()?;

        let current = {
            let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
            tenants.clone()
        };

        let mut next = BTreeMap::new();
        let mut diff = TenantDiff::default();

        for config in configs {
            match current.get(&config.name) {
                Some(existing) if existing.config() == &config => {
                    next.insert(config.name.clone(), existing.clone());
                }
                _ => match Tenant::connect_lazy(config) {
                    Ok(tenant) => {
                        let tenant = Arc::new(tenant);
                        diff.added.push(tenant.clone());
                        next.insert(tenant.name().to_string(), tenant);
                    }
                    Err(e) => {
                        tracing::warn!("[Tenants] Skipping tenant: {}", e);
                    }
                },
            }
        }

        for (name, tenant) in &current {
            let kept = next
                .get(name)
                .map(|t| Arc::ptr_eq(t, tenant))
                .unwrap_or(false);
            if !kept {
                diff.removed.push(tenant.clone());
            }
        }

        *self.tenants.write().unwrap_or_else(PoisonError::into_inner) = next;

        if !diff.is_empty() {
            tracing::info!(
                "[Tenants] Reloaded: added {:?}, removed {:?}",
                diff.added_names(),
                diff.removed_names()
            );
        }

        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tenants(file: &mut tempfile::NamedTempFile, names: &[&str]) {
        let file = file.as_file_mut();
        file.set_len(0).unwrap();
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(0)).unwrap();
        for name in names {
            writeln!(
                file,
                "[[tenant]]\nname = \"{name}\"\ndatabase_url = \"postgres://app@localhost/{name}\"\n"
            )
            .unwrap();
        }
        file.flush().unwrap();
    }

    #[tokio::test]
    async fn test_find_and_list() {
        let registry = TenantRegistry::new(TenantSource::Static(vec![
            TenantConfig::new("acme", "postgres://localhost/acme"),
            TenantConfig::new("globex", "postgres://localhost/globex"),
        ]));
        let diff = registry.reload().unwrap();
        assert_eq!(diff.added.len(), 2);
        assert_eq!(registry.names(), vec!["acme".to_string(), "globex".to_string()]);
        assert_eq!(registry.find("acme").unwrap().name(), "acme");
        assert!(matches!(registry.find("initech"), Err(TenantError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reload_reports_diff() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_tenants(&mut file, &["acme", "globex"]);

        let registry = TenantRegistry::new(TenantSource::File(file.path().to_path_buf()));
        registry.reload().unwrap();
        let acme_before = registry.find("acme").unwrap();

        write_tenants(&mut file, &["acme", "initech"]);
        let diff = registry.reload().unwrap();

        assert_eq!(diff.added_names(), vec!["initech".to_string()]);
        assert_eq!(diff.removed_names(), vec!["globex".to_string()]);
        assert!(Arc::ptr_eq(&acme_before, &registry.find("acme").unwrap()));
    }

    #[tokio::test]
    async fn test_unchanged_reload_is_empty() {
        let registry = TenantRegistry::new(TenantSource::Static(vec![TenantConfig::new(
            "acme",
            "postgres://localhost/acme",
        )]));
        registry.reload().unwrap();
        assert!(registry.reload().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_file_keeps_registry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_tenants(&mut file, &["acme"]);
        let path = file.path().to_path_buf();
        let registry = TenantRegistry::new(TenantSource::File(path));
        registry.reload().unwrap();

        drop(file);
        assert!(matches!(registry.reload(), Err(TenantError::Io { .. })));
        assert!(registry.contains("acme"));
    }
}
