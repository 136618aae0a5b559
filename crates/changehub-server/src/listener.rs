//! Upstream notification listener.
//!
//! The listener is the only consumer of the upstream connection. It runs as
//! one sequential task: each notification is decoded and published before
//! the next one is read, which is what keeps per-topic delivery in arrival
//! order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use changehub_core::SharedHub;
use changehub_proto::EventDecoder;

use crate::backoff::Backoff;
use crate::error::ConnectionError;
use crate::source::{NotificationSource, RawNotification};

/// Default timeout for establishing the upstream connection, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Establishing the connection and registering interest.
    Connecting,
    /// Receiving notifications.
    Listening,
    /// Connection lost or refused; waiting to retry.
    Failed,
    /// Shut down; the connection has been released.
    Stopped,
}

/// Observable listener status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerStatus {
    /// Current state.
    pub state: ListenerState,
    /// Consecutive failed attempts since the connection last proved healthy.
    pub retry_count: u32,
}

impl ListenerStatus {
    fn new(state: ListenerState, retry_count: u32) -> Self {
        Self { state, retry_count }
    }
}

/// Listener counters.
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    notifications_received: AtomicU64,
    decode_failures: AtomicU64,
    events_published: AtomicU64,
    connection_failures: AtomicU64,
    reconnects: AtomicU64,
}

impl ListenerMetrics {
    /// Raw notifications read from the upstream connection.
    pub fn notifications_received(&self) -> u64 {
        self.notifications_received.load(Ordering::Relaxed)
    }

    /// Notifications discarded because they could not be decoded.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Events handed to the hub.
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// Failed connects plus lost connections.
    pub fn connection_failures(&self) -> u64 {
        self.connection_failures.load(Ordering::Relaxed)
    }

    /// Successful connects that followed a failure.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

enum ListenOutcome {
    Shutdown,
    Lost(ConnectionError),
}

/// Bridges an upstream [`NotificationSource`] to the broadcast hub.
pub struct NotificationListener<S> {
    source: S,
    decoder: EventDecoder,
    hub: SharedHub,
    backoff: Backoff,
    connect_timeout: Duration,
    status: watch::Sender<ListenerStatus>,
    metrics: Arc<ListenerMetrics>,
}

impl<S: NotificationSource> NotificationListener<S> {
    /// Create a listener that publishes decoded events to `hub`.
    pub fn new(source: S, decoder: EventDecoder, hub: SharedHub) -> Self {
        let (status, _) = watch::channel(ListenerStatus::new(ListenerState::Connecting, 0));
        Self {
            source,
            decoder,
            hub,
            backoff: Backoff::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            status,
            metrics: Arc::new(ListenerMetrics::default()),
        }
    }

    /// Set the reconnect backoff policy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Watch the listener state.
    pub fn status(&self) -> watch::Receiver<ListenerStatus> {
        self.status.subscribe()
    }

    /// Get the listener counters.
    pub fn metrics(&self) -> Arc<ListenerMetrics> {
        self.metrics.clone()
    }

    /// Run until `shutdown` fires, reconnecting whenever the upstream
    /// connection fails.
    ///
    /// On shutdown the channel registration is released before returning.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            source = %self.source.describe(),
            topics = ?self.decoder.registry().topics(),
            "notification listener started"
        );

        let mut retry_count: u32 = 0;

        loop {
            self.set_status(ListenerState::Connecting, retry_count);

            let connected = tokio::select! {
                _ = shutdown.recv() => break,
                result = tokio::time::timeout(self.connect_timeout, self.source.connect()) => {
                    result.unwrap_or_else(|_| {
                        Err(ConnectionError::Timeout(format!(
                            "connect did not finish within {:?}",
                            self.connect_timeout
                        )))
                    })
                }
            };

            match connected {
                Ok(()) => {
                    if retry_count > 0 {
                        self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
                    }
                    self.set_status(ListenerState::Listening, retry_count);
                    info!(retry_count, "listening for upstream notifications");

                    let connected_at = Instant::now();
                    match self.listen(&mut retry_count, &mut shutdown).await {
                        ListenOutcome::Shutdown => break,
                        ListenOutcome::Lost(e) => {
                            // A long-lived idle connection counts as healthy.
                            if connected_at.elapsed() >= self.backoff.max() {
                                retry_count = 0;
                            }
                            warn!(error = %e, "upstream connection lost");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, retry_count, "failed to connect to upstream");
                }
            }

            self.metrics.connection_failures.fetch_add(1, Ordering::Relaxed);
            retry_count = retry_count.saturating_add(1);
            self.set_status(ListenerState::Failed, retry_count);

            let delay = self.backoff.delay(retry_count);
            info!(
                retry_count,
                delay_ms = delay.as_millis() as u64,
                "reconnecting after backoff"
            );

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.close().await;
    }

    /// Read until the connection is lost. The first notification proves the
    /// connection healthy and clears `retry_count`.
    async fn listen(
        &mut self,
        retry_count: &mut u32,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ListenOutcome {
        loop {
            let notification = tokio::select! {
                biased;
                _ = shutdown.recv() => return ListenOutcome::Shutdown,
                result = self.source.recv() => match result {
                    Ok(notification) => notification,
                    Err(e) => return ListenOutcome::Lost(e),
                },
            };

            if *retry_count > 0 {
                *retry_count = 0;
                self.set_status(ListenerState::Listening, 0);
            }
            self.dispatch(notification);
        }
    }

    /// Decode one notification and publish it. Decode failures are logged
    /// and dropped.
    fn dispatch(&self, notification: RawNotification) {
        self.metrics
            .notifications_received
            .fetch_add(1, Ordering::Relaxed);

        match self.decoder.decode(&notification.payload) {
            Ok(event) => {
                let topic = event.topic.clone();
                let report = self.hub.publish(&topic, event);
                self.metrics.events_published.fetch_add(1, Ordering::Relaxed);
                trace!(
                    channel = %notification.channel,
                    topic = %topic,
                    delivered = report.delivered,
                    evicted = report.evicted,
                    "notification dispatched"
                );
            }
            Err(e) => {
                self.metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    channel = %notification.channel,
                    error = %e,
                    payload_len = notification.payload.len(),
                    "discarding undecodable notification"
                );
            }
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(self.connect_timeout, self.source.disconnect()).await {
            Ok(Ok(())) => debug!("upstream registration released"),
            Ok(Err(e)) => warn!(error = %e, "failed to release upstream registration"),
            Err(_) => warn!("timed out releasing upstream registration"),
        }

        self.set_status(ListenerState::Stopped, 0);
        info!(
            notifications = self.metrics.notifications_received(),
            published = self.metrics.events_published(),
            decode_failures = self.metrics.decode_failures(),
            reconnects = self.metrics.reconnects(),
            "notification listener stopped"
        );
    }

    fn set_status(&self, state: ListenerState, retry_count: u32) {
        self.status.send_replace(ListenerStatus::new(state, retry_count));
    }
}
