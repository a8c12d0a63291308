/**
 * Change Listener
 *
 * One listener task per tenant. The task keeps a notification stream open on
 * the tenant's channel, decodes each payload into a `ChangeMessage` and
 * forwards it to the dispatch sink in arrival order.
 *
 * # Reconnection
 *
 * A failed connect or a dropped stream is logged and retried after a delay
 * that doubles on every consecutive failure, up to a ceiling. The delay
 * resets once a stream is open again. Undecodable payloads are skipped and
 * do not affect the connection.
 */
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backend::listener::source::{NotificationSource, RawNotification};
use crate::backend::tenants::Tenant;
use crate::shared::ChangeMessage;

/// Reconnect delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay to use after `current` failed again
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Observable state of a listener task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerStatus {
    Connecting,
    Listening,
    /// Waiting `delay` before reconnect attempt number `attempt`
    Backoff { attempt: u32, delay: Duration },
    Stopped,
}

/// Handle to a running listener task
#[derive(Debug)]
pub struct ListenerHandle {
    tenant: String,
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<ListenerStatus>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn status(&self) -> ListenerStatus {
        self.status.borrow().clone()
    }

    pub fn status_watch(&self) -> watch::Receiver<ListenerStatus> {
        self.status.clone()
    }

    /// Stop the task and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("[Listener] Listener task for {} ended abnormally: {}", self.tenant, e);
        }
    }
}

/// Listens for changes on one tenant
pub struct ChangeListener {
    tenant: Arc<Tenant>,
    source: Arc<dyn NotificationSource>,
    channel: String,
    sink: mpsc::UnboundedSender<ChangeMessage>,
    backoff: Backoff,
}

impl ChangeListener {
    pub fn new(
        tenant: Arc<Tenant>,
        source: Arc<dyn NotificationSource>,
        channel: impl Into<String>,
        sink: mpsc::UnboundedSender<ChangeMessage>,
        backoff: Backoff,
    ) -> Self {
        Self {
            tenant,
            source,
            channel: channel.into(),
            sink,
            backoff,
        }
    }

    /// Start the listener task
    pub fn spawn(self) -> ListenerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(ListenerStatus::Connecting);
        let tenant = self.tenant.name().to_string();

        let task = tokio::spawn(async move {
            self.run(shutdown_rx, &status_tx).await;
            status_tx.send_replace(ListenerStatus::Stopped);
        });

        ListenerHandle {
            tenant,
            shutdown: shutdown_tx,
            status: status_rx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>, status: &watch::Sender<ListenerStatus>) {
        let tenant = self.tenant.name().to_string();
        let mut delay = self.backoff.initial;
        let mut attempt: u32 = 0;

        loop {
            status.send_replace(ListenerStatus::Connecting);
            let connected = tokio::select! {
                result = self.source.connect(&self.tenant, &self.channel) => result,
                _ = shutdown.changed() => return,
            };

            match connected {
                Ok(mut stream) => {
                    tracing::info!("[Listener] Listening on '{}' for tenant {}", self.channel, tenant);
                    status.send_replace(ListenerStatus::Listening);
                    delay = self.backoff.initial;
                    attempt = 0;

                    let error = loop {
                        tokio::select! {
                            received = stream.recv() => match received {
                                Ok(raw) => {
                                    if !self.forward(&raw) {
                                        tracing::info!("[Listener] Dispatch closed, stopping listener for {}", tenant);
                                        return;
                                    }
                                }
                                Err(e) => break e,
                            },
                            _ = shutdown.changed() => return,
                        }
                    };
                    tracing::warn!("[Listener] Channel for tenant {} dropped: {}", tenant, error);
                }
                Err(e) => {
                    tracing::warn!("[Listener] Could not listen for tenant {}: {}", tenant, e);
                }
            }

            attempt += 1;
            status.send_replace(ListenerStatus::Backoff { attempt, delay });
            tracing::debug!("[Listener] Reconnecting {} in {:?} (attempt {})", tenant, delay, attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
            delay = self.backoff.next(delay);
        }
    }

    /// Decode and forward one notification; `false` once the sink is gone
    fn forward(&self, raw: &RawNotification) -> bool {
        match ChangeMessage::decode(self.tenant.name(), &raw.payload) {
            Ok(message) => {
                tracing::trace!("[Listener] {} on {}: {:?}", raw.channel, self.tenant.name(), message.payload);
                self.sink.send(message).is_ok()
            }
            Err(e) => {
                tracing::warn!("[Listener] Skipping notification on {}: {}", raw.channel, e);
                true
            }
        }
    }
}
