/**
 * Query Executor
 *
 * Loads the current row of a record as JSON. The coalescer is its only
 * caller. The Postgres implementation resolves the feather to its backing
 * table through the catalog and selects the row with `to_jsonb`.
 */
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::backend::catalog::{snake_case, Catalog};
use crate::backend::tenants::TenantRegistry;

/// Why a fetch did not produce a row
///
/// Cloneable because one failure is handed to every waiter of a key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Record {feather}/{id} not found")]
    NotFound { feather: String, id: String },

    #[error("Unknown tenant '{0}'")]
    UnknownTenant(String),

    #[error("Invalid table name '{0}'")]
    InvalidTable(String),

    #[error("Query failed: {0}")]
    Query(String),

    /// The fetch task ended without producing a result
    #[error("Fetch aborted: {0}")]
    Aborted(String),
}

/// Loads a single record
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch_row(&self, tenant: &str, feather: &str, id: &str) -> Result<Value, FetchError>;
}

/// Quote a table name after checking it is a plain identifier
///
/// `schema.table` is accepted and quoted per part.
pub fn quote_table(table: &str) -> Result<String, FetchError> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !part.starts_with(|c: char| c.is_ascii_digit())
    };

    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| valid_part(p)) {
        return Err(FetchError::InvalidTable(table.to_string()));
    }
    Ok(parts
        .iter()
        .map(|p| format!("\"{}\"", p))
        .collect::<Vec<_>>()
        .join("."))
}

/// Executor backed by the tenant's Postgres pool
#[derive(Clone)]
pub struct PgQueryExecutor {
    tenants: TenantRegistry,
    catalog: Arc<dyn Catalog>,
}

impl PgQueryExecutor {
    pub fn new(tenants: TenantRegistry, catalog: Arc<dyn Catalog>) -> Self {
        Self { tenants, catalog }
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn fetch_row(&self, tenant: &str, feather: &str, id: &str) -> Result<Value, FetchError> {
        let pool = self
            .tenants
            .find(tenant)
            .map_err(|_| FetchError::UnknownTenant(tenant.to_string()))?
            .pool()
            .clone();

        let table = match self.catalog.feather(tenant, feather).await {
            Some(definition) => definition.table,
            None => snake_case(feather),
        };
        let sql = format!(
            "SELECT to_jsonb(t) AS row FROM {} t WHERE t.id::text = $1",
            quote_table(&table)?
        );

        let row: Option<Value> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| FetchError::Query(e.to_string()))?;

        row.ok_or_else(|| FetchError::NotFound {
            feather: feather.to_string(),
            id: id.to_string(),
        })
    }
}
