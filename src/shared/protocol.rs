/**
 * Duplex Channel Frames
 *
 * Requests a session sends over its channel and the replies it gets back.
 * Notifications are pushed on the same channel but are not replies, so they
 * never carry an `id`.
 *
 * ```json
 * {"id": 1, "method": "subscribe", "tenant": "acme", "target": {"type": "record", "name": "R1"}}
 * {"id": 2, "method": "lock", "tenant": "acme", "recordId": "R1", "username": "alice"}
 * ```
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::subscription::{SubscribeOptions, SubscriptionId, SubscriptionTarget};

/// A request issued by a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    Subscribe {
        tenant: String,
        target: SubscriptionTarget,
        #[serde(default)]
        options: SubscribeOptions,
    },
    Unsubscribe {
        subscription_id: SubscriptionId,
    },
    Lock {
        tenant: String,
        record_id: String,
        username: String,
        /// Overrides the server's default lock lifetime
        #[serde(default)]
        ttl_secs: Option<u64>,
    },
    Unlock {
        tenant: String,
        record_id: String,
        username: String,
    },
}

/// A request together with the correlation id the client chose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub request: ClientRequest,
}

/// Error half of a reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    pub message: String,
    pub status: u16,
}

/// Reply to a [`ClientFrame`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerReply {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl ServerReply {
    pub fn ok(id: Option<u64>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<u64>, status: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ReplyError {
                message: message.into(),
                status,
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
