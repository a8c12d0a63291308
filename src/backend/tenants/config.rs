/**
 * Tenant Configuration
 *
 * Tenants are declared in a TOML file as a list of `[[tenant]]` tables:
 *
 * ```toml
 * [[tenant]]
 * name = "acme"
 * database_url = "postgres://app@db/acme"
 * max_connections = 8
 * ```
 *
 * Each entry is validated on its own. A malformed entry is reported and
 * skipped; the remaining tenants are still loaded. Only a file that is not
 * valid TOML at all fails the whole load.
 */
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::backend::tenants::TenantError;

/// Default pool size when an entry does not set `max_connections`
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection parameters for one tenant database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant identifier (the database name clients address)
    pub name: String,
    /// Postgres connection URL
    pub database_url: String,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl TenantConfig {
    pub fn new(name: impl Into<String>, database_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database_url: database_url.into(),
            max_connections: None,
        }
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("tenant name cannot be empty".to_string());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("tenant name '{}' contains invalid characters", self.name));
        }
        if !(self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://"))
        {
            return Err(format!(
                "tenant '{}' database_url must be a postgres:// URL",
                self.name
            ));
        }
        if self.max_connections == Some(0) {
            return Err(format!("tenant '{}' max_connections must be positive", self.name));
        }
        Ok(())
    }
}

/// Result of parsing a tenant file
#[derive(Debug, Default)]
pub struct ParsedTenants {
    pub tenants: Vec<TenantConfig>,
    /// Entries that were rejected, in file order
    pub skipped: Vec<TenantError>,
}

/// Parse the contents of a tenant file
pub fn parse_tenant_file(contents: &str) -> Result<ParsedTenants, TenantError> {
    let document: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| TenantError::config(e.to_string()))?;

    let mut parsed = ParsedTenants::default();
    let entries = match document.get("tenant") {
        None => return Ok(parsed),
        Some(toml::Value::Array(entries)) => entries,
        Some(_) => return Err(TenantError::config("`tenant` must be an array of tables")),
    };

    let mut seen = HashSet::new();
    for (index, entry) in entries.iter().enumerate() {
        let config = match entry.clone().try_into::<TenantConfig>() {
            Ok(config) => config,
            Err(e) => {
                parsed.skipped.push(TenantError::invalid_entry(index, e.to_string()));
                continue;
            }
        };

        if let Err(reason) = config.validate() {
            parsed.skipped.push(TenantError::invalid_entry(index, reason));
            continue;
        }

        if !seen.insert(config.name.clone()) {
            parsed.skipped.push(TenantError::invalid_entry(
                index,
                format!("duplicate tenant '{}'", config.name),
            ));
            continue;
        }

        parsed.tenants.push(config);
    }

    Ok(parsed)
}

/// Derive a tenant name from the database segment of a connection URL
///
/// `postgres://user@host:5432/acme?sslmode=disable` becomes `acme`.
pub fn database_name_from_url(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest)?;
    let path = without_scheme.split_once('/').map(|(_, path)| path)?;
    let name = path.split(['?', '#']).next().unwrap_or_default();
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_file() {
        let contents = r#"
            [[tenant]]
            name = "acme"
            database_url = "postgres://app@localhost/acme"

            [[tenant]]
            name = "globex"
            database_url = "postgresql://app@localhost/globex"
            max_connections = 2
        "#;
        let parsed = parse_tenant_file(contents).unwrap();
        assert_eq!(parsed.tenants.len(), 2);
        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.tenants[0].max_connections(), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(parsed.tenants[1].max_connections(), 2);
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let contents = r#"
            [[tenant]]
            name = "acme"
            database_url = "postgres://app@localhost/acme"

            [[tenant]]
            name = "broken"

            [[tenant]]
            name = "mysql"
            database_url = "mysql://localhost/x"

            [[tenant]]
            name = "acme"
            database_url = "postgres://app@localhost/other"
        "#;
        let parsed = parse_tenant_file(contents).unwrap();
        assert_eq!(parsed.tenants.len(), 1);
        assert_eq!(parsed.tenants[0].name, "acme");
        assert_eq!(parsed.skipped.len(), 3);
    }

    #[test]
    fn test_invalid_toml_fails_whole_file() {
        assert!(matches!(
            parse_tenant_file("[[tenant"),
            Err(TenantError::Config { .. })
        ));
    }

    #[test]
    fn test_empty_file_has_no_tenants() {
        let parsed = parse_tenant_file("").unwrap();
        assert!(parsed.tenants.is_empty());
    }

    #[test]
    fn test_database_name_from_url() {
        assert_eq!(
            database_name_from_url("postgres://u:p@host:5432/acme?sslmode=disable"),
            Some("acme".to_string())
        );
        assert_eq!(database_name_from_url("postgres://host"), None);
        assert_eq!(database_name_from_url("not a url"), None);
    }
}
