//! changehub server - fans out database change notifications.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use changehub_core::BroadcastHub;
use changehub_proto::EventDecoder;
use changehub_server::{spawn_tap, Args, NotificationListener, PgNotificationSource};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "changehub_server=info,changehub_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting changehub server");

    // Parse command-line arguments
    let config = Args::parse().into_config()?;

    tracing::info!(
        channel = %config.channel,
        topics = ?config.topics,
        queue_capacity = config.queue_capacity,
        overflow = ?config.overflow,
        "configuration loaded"
    );

    let hub = Arc::new(BroadcastHub::new(config.hub_config()));

    let source = PgNotificationSource::new(config.pg_source_config())?;
    let listener = NotificationListener::new(
        source,
        EventDecoder::new(config.topic_registry()),
        hub.clone(),
    )
    .with_backoff(config.backoff)
    .with_connect_timeout(config.connect_timeout);
    let listener_metrics = listener.metrics();

    let taps: Vec<_> = config
        .taps
        .iter()
        .map(|topic| spawn_tap(&hub, topic))
        .collect();

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(());
    });

    // The listener must release the upstream channel before the hub goes away.
    if let Err(e) = tokio::spawn(listener.run(shutdown_rx)).await {
        tracing::error!(error = %e, "notification listener task failed");
    }

    hub.shutdown();
    for tap in taps {
        match tap.await {
            Ok(count) => tracing::debug!(events = count, "tap finished"),
            Err(e) => tracing::error!(error = %e, "tap task failed"),
        }
    }

    let stats = hub.stats();
    tracing::info!(
        notifications = listener_metrics.notifications_received(),
        decode_failures = listener_metrics.decode_failures(),
        reconnects = listener_metrics.reconnects(),
        events_published = stats.events_published,
        deliveries = stats.deliveries,
        events_dropped = stats.events_dropped,
        evictions = stats.evictions,
        uptime_secs = hub.metrics().uptime().as_secs(),
        "server shutdown complete"
    );

    drop(shutdown_tx);
    Ok(())
}
