//! Tenant Module
//!
//! Connection and configuration data for every tenant database served by
//! this process.
//!
//! # Module Structure
//!
//! ```text
//! tenants/
//! ├── mod.rs      - Module exports and the tenant error type
//! ├── config.rs   - Tenant file parsing and validation
//! └── registry.rs - TenantRegistry, Tenant and reload diffs
//! ```

/// Tenant file parsing
pub mod config;

/// Tenant registry
pub mod registry;

use thiserror::Error;

pub use config::{parse_tenant_file, TenantConfig};
pub use registry::{Tenant, TenantDiff, TenantRegistry, TenantSource};

/// Errors raised while loading or looking up tenants
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantError {
    /// The tenant configuration as a whole is unusable
    #[error("Tenant configuration error: {message}")]
    Config { message: String },

    /// A single tenant entry was rejected
    #[error("Invalid tenant entry #{index}: {reason}")]
    InvalidEntry { index: usize, reason: String },

    /// The configuration source could not be read
    #[error("Cannot read tenant file {path}: {message}")]
    Io { path: String, message: String },

    /// A pool could not be built from the tenant's connection parameters
    #[error("Cannot create pool for tenant '{tenant}': {message}")]
    Pool { tenant: String, message: String },

    #[error("Unknown tenant '{0}'")]
    NotFound(String),
}

impl TenantError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_entry(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            index,
            reason: reason.into(),
        }
    }
}
