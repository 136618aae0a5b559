//! Hub counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for the broadcast hub.
///
/// All counters are monotonically increasing and updated with relaxed
/// atomics; read them through [`HubMetrics::snapshot`].
#[derive(Debug)]
pub struct HubMetrics {
    subscriptions_created: AtomicU64,
    subscriptions_removed: AtomicU64,
    events_published: AtomicU64,
    deliveries: AtomicU64,
    events_dropped: AtomicU64,
    evictions: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of the hub counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    /// Subscriptions ever created.
    pub subscriptions_created: u64,
    /// Subscriptions cancelled, whatever the reason.
    pub subscriptions_removed: u64,
    /// Calls to publish that reached an existing topic.
    pub events_published: u64,
    /// Individual per-subscription deliveries.
    pub deliveries: u64,
    /// Events discarded from full queues under drop-oldest.
    pub events_dropped: u64,
    /// Subscriptions removed because delivery to them failed.
    pub evictions: u64,
}

impl HubStats {
    /// Subscriptions currently active.
    pub fn active_subscriptions(&self) -> u64 {
        self.subscriptions_created
            .saturating_sub(self.subscriptions_removed)
    }
}

impl HubMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            subscriptions_created: AtomicU64::new(0),
            subscriptions_removed: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub(crate) fn record_subscribe(&self) {
        self.subscriptions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unsubscribe(&self) {
        self.subscriptions_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish(&self, deliveries: usize, dropped: usize) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(deliveries as u64, Ordering::Relaxed);
        self.events_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the hub was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> HubStats {
        HubStats {
            subscriptions_created: self.subscriptions_created.load(Ordering::Relaxed),
            subscriptions_removed: self.subscriptions_removed.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self::new()
    }
}
