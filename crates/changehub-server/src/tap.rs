//! Logging taps.
//!
//! A tap is an in-process subscriber that writes every event of one topic
//! to the log. It is handy for checking trigger wiring without a streaming
//! client attached.

use tokio::task::JoinHandle;
use tracing::info;

use changehub_core::{BroadcastHub, Subscription};

/// Log every event of a subscription until it is cancelled.
///
/// Returns the number of events logged.
pub async fn run_tap(mut subscription: Subscription) -> u64 {
    let topic = subscription.topic().to_string();
    info!(topic = %topic, subscription_id = %subscription.id(), "tap started");

    let mut seen = 0;
    while let Some(event) = subscription.recv().await {
        seen += 1;
        info!(
            topic = %event.topic,
            operation = %event.operation,
            entity_id = %event.entity_id,
            payload = %event.payload,
            "change event"
        );
    }

    info!(
        topic = %topic,
        events = seen,
        dropped = subscription.dropped_events(),
        "tap stopped"
    );
    seen
}

/// Subscribe to `topic` and spawn a tap task for it.
pub fn spawn_tap(hub: &BroadcastHub, topic: &str) -> JoinHandle<u64> {
    let subscription = hub.subscribe(topic);
    tokio::spawn(run_tap(subscription))
}
