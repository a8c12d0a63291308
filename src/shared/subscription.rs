/**
 * Subscription Identifiers and Targets
 *
 * An event key names one live client channel. A subscription links an event
 * key to a tenant and a target: a single record, the result set of a named
 * query (a feather), or one of the fixed metadata streams.
 */
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared::error::SharedError;

/// Opaque token identifying one live client channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKey(String);

impl EventKey {
    /// Wrap an existing key supplied by the transport
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Identifier handed back from a subscribe request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubscriptionId {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SharedError::validation("subscriptionId", e.to_string()))
    }
}

/// Well-known metadata streams
///
/// Changes on these streams alter process-wide server state (catalog,
/// dynamic routes, running listeners) before any client is notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataStream {
    /// Feather (schema) definitions
    #[serde(alias = "feather")]
    Feather,
    /// Module route definitions
    #[serde(alias = "route")]
    Route,
    /// The tenant list itself
    #[serde(alias = "tenant")]
    Tenant,
}

impl MetadataStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feather => "Feather",
            Self::Route => "Route",
            Self::Tenant => "Tenant",
        }
    }
}

impl fmt::Display for MetadataStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataStream {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "feather" => Ok(Self::Feather),
            "route" => Ok(Self::Route),
            "tenant" => Ok(Self::Tenant),
            other => Err(SharedError::validation(
                "stream",
                format!("unknown metadata stream '{}'", other),
            )),
        }
    }
}

/// What a subscription is interested in
///
/// Serialized as `{"type": "record", "name": "R1"}`,
/// `{"type": "query", "name": "Contact"}` or
/// `{"type": "metadata", "name": "Feather"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "camelCase")]
pub enum SubscriptionTarget {
    /// A single record, by id
    Record(String),
    /// Every record of a feather (the query's result set)
    Query(String),
    /// A metadata stream
    Metadata(MetadataStream),
}

impl SubscriptionTarget {
    /// Reject targets that could never match a change
    pub fn validate(&self) -> Result<(), SharedError> {
        match self {
            Self::Record(id) if id.trim().is_empty() => {
                Err(SharedError::validation("target", "record id cannot be empty"))
            }
            Self::Query(name) if name.trim().is_empty() => {
                Err(SharedError::validation("target", "query name cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Options supplied with a subscribe request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    /// Deliver incremental deltas and let the client decide whether to re-fetch
    #[serde(default)]
    pub merge: bool,
}
