//! Named broadcast channels.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use changehub_proto::DomainEvent;

use crate::mailbox::{DeliveryOutcome, Mailbox};
use crate::metrics::HubMetrics;
use crate::subscription::SubscriptionId;

/// Summary of one publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    /// Subscriptions the event was queued for.
    pub delivered: usize,
    /// Of those, how many had to drop an older event to make room.
    pub lagged: usize,
    /// Subscriptions removed because delivery to them failed.
    pub evicted: usize,
}

/// The live set of subscriptions for one entity type.
///
/// Membership changes take a short write lock on the member map; publish
/// copies the member list under a read lock and delivers without holding
/// it, so registration never waits on delivery.
pub struct Topic {
    name: String,
    members: RwLock<HashMap<SubscriptionId, Arc<Mailbox>>>,
    /// Serializes publishes so every member sees them in call order.
    publish_order: Mutex<()>,
    metrics: Arc<HubMetrics>,
}

impl Topic {
    pub(crate) fn new(name: impl Into<String>, metrics: Arc<HubMetrics>) -> Self {
        Self {
            name: name.into(),
            members: RwLock::new(HashMap::new()),
            publish_order: Mutex::new(()),
            metrics,
        }
    }

    /// The topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.members.read().len()
    }

    /// IDs of the active subscriptions, sorted.
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<SubscriptionId> = self.members.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn insert(&self, mailbox: Arc<Mailbox>) {
        self.members.write().insert(mailbox.id(), mailbox);
    }

    /// Cancel a member and drop it from the membership. Idempotent.
    pub(crate) fn remove(&self, mailbox: &Mailbox) -> bool {
        let was_active = mailbox.cancel();
        self.members.write().remove(&mailbox.id());

        if was_active {
            self.metrics.record_unsubscribe();
            tracing::debug!(
                subscription_id = %mailbox.id(),
                topic = %self.name,
                delivered = mailbox.delivered(),
                dropped = mailbox.dropped(),
                "subscription removed"
            );
        }

        was_active
    }

    /// Deliver an event to every active member.
    pub(crate) fn publish(&self, event: Arc<DomainEvent>) -> PublishReport {
        let _order = self.publish_order.lock();

        let members: Vec<Arc<Mailbox>> = self.members.read().values().cloned().collect();

        let mut report = PublishReport::default();
        let mut failed = Vec::new();

        for mailbox in members {
            match mailbox.deliver(&event) {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Lagged => {
                    report.delivered += 1;
                    report.lagged += 1;
                }
                DeliveryOutcome::Overflowed | DeliveryOutcome::Closed => failed.push(mailbox),
            }
        }

        for mailbox in failed {
            if self.remove(&mailbox) {
                self.metrics.record_eviction();
                report.evicted += 1;
                tracing::warn!(
                    subscription_id = %mailbox.id(),
                    topic = %self.name,
                    "evicted subscriber that could not accept delivery"
                );
            }
        }

        self.metrics.record_publish(report.delivered, report.lagged);

        tracing::trace!(
            topic = %self.name,
            operation = %event.operation,
            entity_id = %event.entity_id,
            delivered = report.delivered,
            "published change event"
        );

        report
    }

    /// Cancel and remove every member.
    pub(crate) fn close_all(&self) -> usize {
        let members: Vec<Arc<Mailbox>> = self.members.write().drain().map(|(_, m)| m).collect();

        let mut closed = 0;
        for mailbox in members {
            if mailbox.cancel() {
                self.metrics.record_unsubscribe();
                closed += 1;
            }
        }
        closed
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
