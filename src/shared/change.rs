/**
 * Change Messages
 *
 * A change message is what a tenant's notification channel carries once it
 * has been decoded. Record changes name a feather and a record id; metadata
 * changes name one of the well-known streams and the item that changed.
 *
 * # Wire Format
 *
 * Payloads published on the channel are JSON objects tagged by `kind`:
 *
 * ```json
 * {"kind": "record", "feather": "contact", "id": "R1", "change": "update"}
 * {"kind": "metadata", "stream": "Feather", "name": "Contact", "change": "create", "data": {...}}
 * ```
 *
 * Record payloads may carry `subscriptions` (explicit addressees) and `data`
 * (a delta for merge subscribers). Either kind may carry `origin`, the event
 * key of the session that caused the change.
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::shared::error::SharedError;
use crate::shared::subscription::{EventKey, MetadataStream, SubscriptionId};

/// Kind of change applied to a record or metadata item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a change message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangePayload {
    /// A row in a feather's table changed
    Record {
        feather: String,
        id: String,
        change: ChangeKind,
        /// When non-empty, only these subscriptions are addressed
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        subscriptions: Vec<SubscriptionId>,
        /// Optional delta forwarded to merge subscribers
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// An item on a metadata stream changed
    Metadata {
        stream: MetadataStream,
        name: String,
        change: ChangeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl ChangePayload {
    pub fn change(&self) -> ChangeKind {
        match self {
            Self::Record { change, .. } | Self::Metadata { change, .. } => *change,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Record { data, .. } | Self::Metadata { data, .. } => data.as_ref(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<EventKey>,
    #[serde(flatten)]
    payload: ChangePayload,
}

/// A decoded change, tagged with the tenant whose channel produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeMessage {
    pub tenant: String,
    pub origin: Option<EventKey>,
    pub payload: ChangePayload,
}

impl ChangeMessage {
    pub fn new(tenant: impl Into<String>, payload: ChangePayload) -> Self {
        Self {
            tenant: tenant.into(),
            origin: None,
            payload,
        }
    }

    /// Convenience constructor for a record change
    pub fn record(
        tenant: impl Into<String>,
        feather: impl Into<String>,
        id: impl Into<String>,
        change: ChangeKind,
    ) -> Self {
        Self::new(
            tenant,
            ChangePayload::Record {
                feather: feather.into(),
                id: id.into(),
                change,
                subscriptions: Vec::new(),
                data: None,
            },
        )
    }

    /// Convenience constructor for a metadata change
    pub fn metadata(
        tenant: impl Into<String>,
        stream: MetadataStream,
        name: impl Into<String>,
        change: ChangeKind,
        data: Option<Value>,
    ) -> Self {
        Self::new(
            tenant,
            ChangePayload::Metadata {
                stream,
                name: name.into(),
                change,
                data,
            },
        )
    }

    pub fn with_origin(mut self, origin: EventKey) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Decode a raw channel payload for `tenant`
    pub fn decode(tenant: &str, raw: &str) -> Result<Self, SharedError> {
        let wire: WireChange =
            serde_json::from_str(raw).map_err(|e| SharedError::decode(tenant, e.to_string()))?;

        match &wire.payload {
            ChangePayload::Record { feather, id, .. } => {
                if feather.is_empty() {
                    return Err(SharedError::decode(tenant, "record change without feather"));
                }
                if id.is_empty() {
                    return Err(SharedError::decode(tenant, "record change without id"));
                }
            }
            ChangePayload::Metadata { name, .. } => {
                if name.is_empty() {
                    return Err(SharedError::decode(tenant, "metadata change without name"));
                }
            }
        }

        Ok(Self {
            tenant: tenant.to_string(),
            origin: wire.origin,
            payload: wire.payload,
        })
    }

    /// Encode the payload the way it travels on the channel (tenant excluded)
    pub fn to_wire(&self) -> Result<String, SharedError> {
        let wire = WireChange {
            origin: self.origin.clone(),
            payload: self.payload.clone(),
        };
        Ok(serde_json::to_string(&wire)?)
    }
}
