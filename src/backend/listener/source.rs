/**
 * Notification Sources
 *
 * A source opens a stream of raw notifications for one tenant on a named
 * channel. The Postgres source uses `LISTEN` through `PgListener`; tests
 * substitute in-memory sources.
 */
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use thiserror::Error;

use crate::backend::tenants::Tenant;

/// A notification as received, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
}

/// Transient failures of a notification channel
///
/// These never reach clients: the listener logs them and reconnects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Failed to listen on channel '{channel}': {message}")]
    Listen { channel: String, message: String },

    #[error("Failed to receive notification: {0}")]
    Receive(String),

    #[error("Notification channel closed")]
    Closed,
}

/// An open notification subscription
#[async_trait]
pub trait NotificationStream: Send {
    async fn recv(&mut self) -> Result<RawNotification, ChannelError>;
}

/// Opens notification streams for tenants
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn connect(&self, tenant: &Tenant, channel: &str) -> Result<Box<dyn NotificationStream>, ChannelError>;
}

/// `LISTEN`-based source using the tenant's pool
#[derive(Debug, Clone, Copy, Default)]
pub struct PgNotificationSource;

#[async_trait]
impl NotificationSource for PgNotificationSource {
    async fn connect(&self, tenant: &Tenant, channel: &str) -> Result<Box<dyn NotificationStream>, ChannelError> {
        let mut listener = PgListener::connect_with(tenant.pool())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        listener.listen(channel).await.map_err(|e| ChannelError::Listen {
            channel: channel.to_string(),
            message: e.to_string(),
        })?;

        Ok(Box::new(PgNotificationStream { listener }))
    }
}

struct PgNotificationStream {
    listener: PgListener,
}

#[async_trait]
impl NotificationStream for PgNotificationStream {
    async fn recv(&mut self) -> Result<RawNotification, ChannelError> {
        // try_recv reports a lost connection as None instead of reconnecting
        // silently, so the listener can apply its own backoff.
        match self.listener.try_recv().await {
            Ok(Some(notification)) => Ok(RawNotification {
                channel: notification.channel().to_string(),
                payload: notification.payload().to_string(),
            }),
            Ok(None) => Err(ChannelError::Closed),
            Err(e) => Err(ChannelError::Receive(e.to_string())),
        }
    }
}
