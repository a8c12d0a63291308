//! Catalog Module
//!
//! The catalog answers "what feather/table does this name map to". The schema
//! model itself lives outside this crate; the server only needs the handful
//! of attributes that drive fetching and route registration, and keeps them
//! current from the Feather metadata stream.
//!
//! # Module Structure
//!
//! ```text
//! catalog/
//! ├── mod.rs     - Catalog trait, Feather and the in-memory catalog
//! └── routes.rs  - Dynamic route table maintained from metadata changes
//! ```

/// Dynamic feather and module routes
pub mod routes;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

pub use routes::{RouteChange, RouteEntry, RouteTable};

/// Errors raised while interpreting feather definitions
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Invalid definition for feather '{name}': {message}")]
    InvalidDefinition { name: String, message: String },
}

/// The attributes of a feather the server core cares about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feather {
    pub name: String,
    /// Plural name; feathers without one get no HTTP route
    pub plural: Option<String>,
    pub module: Option<String>,
    pub read_only: bool,
    /// Backing table queried when a record is re-fetched
    pub table: String,
    pub inherits: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeatherDefinition {
    #[serde(default)]
    plural: Option<String>,
    #[serde(default)]
    module: Option<String>,
    #[serde(default, alias = "isReadOnly")]
    read_only: bool,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    inherits: Option<String>,
}

impl Feather {
    /// A feather with no plural, module or inheritance
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: snake_case(&name),
            name,
            plural: None,
            module: None,
            read_only: false,
            inherits: None,
        }
    }

    /// Build a feather from the `data` of a Feather metadata change
    pub fn from_definition(name: &str, data: Option<&Value>) -> Result<Self, CatalogError> {
        let definition: FeatherDefinition = match data {
            None | Some(Value::Null) => FeatherDefinition::default(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                CatalogError::InvalidDefinition {
                    name: name.to_string(),
                    message: e.to_string(),
                }
            })?,
        };

        Ok(Self {
            name: name.to_string(),
            plural: definition.plural.filter(|p| !p.is_empty()),
            module: definition.module,
            read_only: definition.read_only,
            table: definition.table.unwrap_or_else(|| snake_case(name)),
            inherits: definition.inherits,
        })
    }

    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    /// URL segment for this feather's route, if it has one
    pub fn route_path(&self) -> Option<String> {
        self.plural.as_deref().map(kebab_case)
    }
}

fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in name.chars() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if c.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
            current.extend(c.to_lowercase());
        } else {
            current.extend(c.to_lowercase());
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// `ContactAddress` → `contact_address`
pub fn snake_case(name: &str) -> String {
    split_words(name).join("_")
}

/// `ContactAddresses` → `contact-addresses`
pub fn kebab_case(name: &str) -> String {
    split_words(name).join("-")
}

/// Source of feather definitions
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn feather(&self, tenant: &str, name: &str) -> Option<Feather>;

    /// The feather backed by `table`, for changes that only name their table
    async fn feather_for_table(&self, tenant: &str, table: &str) -> Option<Feather>;

    /// Insert or replace a definition, returning the previous one
    async fn upsert(&self, tenant: &str, feather: Feather) -> Option<Feather>;

    async fn remove(&self, tenant: &str, name: &str) -> Option<Feather>;
}

/// Catalog held in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    feathers: Arc<RwLock<HashMap<(String, String), Feather>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.feathers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn feather(&self, tenant: &str, name: &str) -> Option<Feather> {
        self.feathers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(tenant.to_string(), name.to_string()))
            .cloned()
    }

    async fn feather_for_table(&self, tenant: &str, table: &str) -> Option<Feather> {
        self.feathers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|((t, _), feather)| t == tenant && feather.table == table)
            .map(|(_, feather)| feather.clone())
    }

    async fn upsert(&self, tenant: &str, feather: Feather) -> Option<Feather> {
        self.feathers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((tenant.to_string(), feather.name.clone()), feather)
    }

    async fn remove(&self, tenant: &str, name: &str) -> Option<Feather> {
        self.feathers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(tenant.to_string(), name.to_string()))
    }
}
