//! The broadcast hub: topic ownership and subscriber lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use changehub_proto::DomainEvent;

use crate::config::HubConfig;
use crate::mailbox::Mailbox;
use crate::metrics::{HubMetrics, HubStats};
use crate::subscription::{Subscription, SubscriptionHandle, SubscriptionId};
use crate::topic::{PublishReport, Topic};

/// Fan-out hub for change events.
///
/// One hub exists per process. It is created at startup, shared behind an
/// [`Arc`], and shut down after the upstream listener has stopped.
pub struct BroadcastHub {
    /// Topics keyed by name. Topics are never removed while the hub lives.
    topics: DashMap<String, Arc<Topic>>,
    /// Next subscription ID.
    next_subscription_id: AtomicU64,
    config: HubConfig,
    metrics: Arc<HubMetrics>,
    closed: AtomicBool,
}

impl BroadcastHub {
    /// Create a new hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            topics: DashMap::new(),
            next_subscription_id: AtomicU64::new(1),
            config,
            metrics: Arc::new(HubMetrics::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Subscribe to a topic, creating it if it has never been seen.
    ///
    /// Never fails. After [`shutdown`](Self::shutdown) the returned
    /// subscription is already cancelled and yields no events.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let topic = self.topic_or_create(topic);
        let id = SubscriptionId::new(self.next_subscription_id.fetch_add(1, Ordering::SeqCst));
        let mailbox = Arc::new(Mailbox::new(id, topic.name(), &self.config));

        if self.is_closed() {
            mailbox.cancel();
            tracing::debug!(subscription_id = %id, topic = %topic.name(), "subscribe after shutdown");
            return Subscription::new(mailbox, topic);
        }

        self.metrics.record_subscribe();
        topic.insert(Arc::clone(&mailbox));

        // Shutdown may have swept this topic between the check above and
        // the insert.
        if self.is_closed() {
            topic.remove(&mailbox);
        }

        tracing::debug!(
            subscription_id = %id,
            topic = %topic.name(),
            subscribers = topic.subscriber_count(),
            "subscription created"
        );

        Subscription::new(mailbox, topic)
    }

    /// Cancel a subscription. Idempotent and safe during a concurrent publish.
    ///
    /// Returns `true` if this call performed the cancellation.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        handle.cancel()
    }

    /// Deliver an event to every active subscriber of `topic`.
    ///
    /// Never blocks on consumers and never fails: subscribers that cannot
    /// take the event are evicted and the rest still receive it. Publishing
    /// to a topic without subscribers is a no-op.
    pub fn publish(&self, topic: &str, event: DomainEvent) -> PublishReport {
        if self.is_closed() {
            tracing::trace!(topic, "hub closed, dropping event");
            return PublishReport::default();
        }

        let Some(topic) = self.topic(topic) else {
            tracing::trace!(topic, "no subscribers for topic");
            return PublishReport::default();
        };

        topic.publish(Arc::new(event))
    }

    /// Cancel every subscription and stop accepting events.
    ///
    /// Consumers see their streams end. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let topics: Vec<Arc<Topic>> = self.topics.iter().map(|t| Arc::clone(t.value())).collect();
        let closed: usize = topics.iter().map(|t| t.close_all()).sum();

        tracing::info!(
            topics = topics.len(),
            subscriptions_closed = closed,
            "broadcast hub shut down"
        );
    }

    /// Check if the hub has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Look up an existing topic.
    pub fn topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.get(name).map(|t| Arc::clone(t.value()))
    }

    /// Names of all topics seen so far, sorted.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Number of active subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topic(topic).map(|t| t.subscriber_count()).unwrap_or(0)
    }

    /// Number of active subscriptions across all topics.
    pub fn subscription_count(&self) -> usize {
        self.topics.iter().map(|t| t.value().subscriber_count()).sum()
    }

    /// Get the hub counters.
    pub fn metrics(&self) -> &HubMetrics {
        &self.metrics
    }

    /// Snapshot of the hub counters.
    pub fn stats(&self) -> HubStats {
        self.metrics.snapshot()
    }

    fn topic_or_create(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topic(name) {
            return topic;
        }

        let topic = self
            .topics
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(topic = name, "topic created");
                Arc::new(Topic::new(name, Arc::clone(&self.metrics)))
            });
        Arc::clone(topic.value())
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Shared hub handle.
pub type SharedHub = Arc<BroadcastHub>;
