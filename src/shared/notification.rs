/**
 * Session Notifications
 *
 * The object pushed to a session whenever something it subscribed to
 * changes:
 *
 * ```json
 * {"subscription": {"subscriptionId": "...", "change": "update"}, "data": {...}}
 * ```
 *
 * `deleted` is only present (and `true`) for delete changes. `data` is `null`
 * when the session asked for bare signals or the record was deleted.
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::change::ChangeKind;
use crate::shared::subscription::SubscriptionId;

/// Addressing part of a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionNotice {
    pub subscription_id: SubscriptionId,
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

/// A notification for one subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub subscription: SubscriptionNotice,
    #[serde(default)]
    pub data: Value,
}

impl Notification {
    pub fn new(subscription_id: SubscriptionId, change: ChangeKind, data: Value) -> Self {
        let deleted = (change == ChangeKind::Delete).then_some(true);
        Self {
            subscription: SubscriptionNotice {
                subscription_id,
                change,
                deleted,
            },
            data,
        }
    }

    /// A bare signal with no payload
    pub fn signal(subscription_id: SubscriptionId, change: ChangeKind) -> Self {
        Self::new(subscription_id, change, Value::Null)
    }

    pub fn is_deleted(&self) -> bool {
        self.subscription.deleted.unwrap_or(false)
    }
}
