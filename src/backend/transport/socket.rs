/**
 * WebSocket Event Channel
 *
 * `GET /events/{event_key}` upgrades to the duplex channel a browser session
 * uses to receive notifications and to issue requests.
 *
 * # Connection Lifecycle
 *
 * 1. On upgrade the session is registered under the event key. Its delivery
 *    callback serializes notifications into an unbounded channel.
 * 2. A writer task drains that channel into the socket, so delivery never
 *    waits on the network.
 * 3. Each text frame is parsed as a `ClientFrame`, executed against the hub
 *    and answered with a `ServerReply` carrying the same `id`.
 * 4. When the socket closes the session is torn down: subscriptions are
 *    dropped and locks released.
 *
 * # Query Parameters
 *
 * - `fetch=false` - receive bare change signals without re-fetched rows
 * - `session=<id>` - transport session the channel belongs to
 */

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::backend::error::BackendError;
use crate::backend::locks::{LockOptions, UnlockCriteria};
use crate::backend::realtime::LiveHub;
use crate::backend::sessions::DeliveryFn;
use crate::shared::{ClientFrame, ClientRequest, EventKey, Notification, ServerReply};

fn default_fetch() -> bool {
    true
}

/// Query parameters of the event channel
#[derive(Debug, Deserialize)]
pub struct EventChannelQuery {
    #[serde(default = "default_fetch")]
    pub fetch: bool,
    #[serde(default)]
    pub session: Option<String>,
}

/// Upgrade handler for `GET /events/{event_key}`
pub async fn handle_event_channel(
    ws: WebSocketUpgrade,
    Path(event_key): Path<String>,
    Query(query): Query<EventChannelQuery>,
    State(hub): State<Arc<LiveHub>>,
) -> Result<impl IntoResponse, BackendError> {
    if event_key.trim().is_empty() {
        return Err(BackendError::protocol("event key is empty"));
    }
    let event_key = EventKey::new(event_key);
    Ok(ws.on_upgrade(move |socket| run_session(socket, hub, event_key, query)))
}

async fn run_session(socket: WebSocket, hub: Arc<LiveHub>, event_key: EventKey, query: EventChannelQuery) {
    let session_id = query.session.unwrap_or_else(|| event_key.to_string());
    tracing::info!("[Ws] {} connected (session {}, fetch={})", event_key, session_id, query.fetch);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let notify_tx = out_tx.clone();
    let deliver: DeliveryFn = Arc::new(move |notification: Notification| match serde_json::to_string(&notification) {
        Ok(text) => {
            let _ = notify_tx.send(text);
        }
        Err(e) => tracing::warn!("[Ws] Failed to encode notification: {}", e),
    });
    let session = hub.connect(event_key.clone(), session_id, query.fetch, deliver);

    let writer_key = event_key.clone();
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!("[Ws] {} went away while sending", writer_key);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(received) = ws_rx.next().await {
        match received {
            Ok(Message::Text(text)) => {
                let reply = handle_frame(&hub, &event_key, text.as_str()).await;
                match serde_json::to_string(&reply) {
                    Ok(encoded) => {
                        if out_tx.send(encoded).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("[Ws] Failed to encode reply: {}", e),
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("[Ws] {} receive error: {}", event_key, e);
                break;
            }
        }
    }

    hub.disconnect(&session).await;

    // Let queued replies drain before the writer is dropped.
    drop(out_tx);
    if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
        tracing::debug!("[Ws] Writer for {} did not finish in time", event_key);
    }
    tracing::info!("[Ws] {} disconnected", event_key);
}

/// Parse and execute one client frame
pub async fn handle_frame(hub: &LiveHub, event_key: &EventKey, raw: &str) -> ServerReply {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => return BackendError::protocol(format!("invalid frame: {}", e)).into_reply(None),
    };

    let id = frame.id;
    match execute(hub, event_key, frame.request).await {
        Ok(result) => ServerReply::ok(id, result),
        Err(e) => {
            tracing::debug!("[Ws] Request {:?} from {} failed: {}", id, event_key, e);
            e.into_reply(id)
        }
    }
}

async fn execute(hub: &LiveHub, event_key: &EventKey, request: ClientRequest) -> Result<Value, BackendError> {
    match request {
        ClientRequest::Subscribe {
            tenant,
            target,
            options,
        } => {
            let subscription_id = hub.subscribe(&tenant, event_key, target, options)?;
            Ok(json!({ "subscriptionId": subscription_id }))
        }
        ClientRequest::Unsubscribe { subscription_id } => {
            let removed = hub.unsubscribe(event_key, subscription_id);
            Ok(json!({ "removed": removed }))
        }
        ClientRequest::Lock {
            tenant,
            record_id,
            username,
            ttl_secs,
        } => {
            let options = LockOptions {
                ttl: ttl_secs.map(Duration::from_secs),
            };
            let lock = hub.lock(&tenant, &record_id, &username, event_key, options).await?;
            Ok(serde_json::to_value(lock)?)
        }
        ClientRequest::Unlock {
            tenant,
            record_id,
            username,
        } => {
            let released = hub
                .unlock(&tenant, &UnlockCriteria::Record { record_id, username })
                .await?;
            Ok(json!({ "released": released }))
        }
    }
}
