//! Per-subscription bounded event queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use changehub_proto::DomainEvent;

use crate::config::{HubConfig, OverflowPolicy};
use crate::subscription::{SubscriptionId, SubscriptionState};

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;

/// Result of offering one event to a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    /// The event was queued.
    Delivered,
    /// The event was queued after discarding the oldest buffered event.
    Lagged,
    /// The queue was full and the policy rejects the write.
    Overflowed,
    /// The mailbox was already cancelled.
    Closed,
}

/// Shared state between the hub (producer side) and one [`Subscription`]
/// (consumer side).
///
/// [`Subscription`]: crate::Subscription
#[derive(Debug)]
pub(crate) struct Mailbox {
    id: SubscriptionId,
    topic: String,
    state: AtomicU8,
    queue: Mutex<VecDeque<Arc<DomainEvent>>>,
    capacity: usize,
    overflow: OverflowPolicy,
    ready: Notify,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Mailbox {
    pub(crate) fn new(id: SubscriptionId, topic: &str, config: &HubConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        Self {
            id,
            topic: topic.to_string(),
            state: AtomicU8::new(ACTIVE),
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            overflow: config.overflow,
            ready: Notify::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        match self.state.load(Ordering::SeqCst) {
            ACTIVE => SubscriptionState::Active,
            _ => SubscriptionState::Cancelled,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ACTIVE
    }

    /// Offer an event without ever blocking the caller.
    pub(crate) fn deliver(&self, event: &Arc<DomainEvent>) -> DeliveryOutcome {
        let mut queue = self.queue.lock();

        // Checked under the queue lock: `cancel` clears the queue under the
        // same lock, so nothing survives in a cancelled mailbox.
        if !self.is_active() {
            return DeliveryOutcome::Closed;
        }

        let mut outcome = DeliveryOutcome::Delivered;
        if queue.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    outcome = DeliveryOutcome::Lagged;
                }
                OverflowPolicy::Disconnect => return DeliveryOutcome::Overflowed,
            }
        }

        queue.push_back(Arc::clone(event));
        drop(queue);

        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();
        outcome
    }

    /// Mark the mailbox cancelled and discard anything still queued.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub(crate) fn cancel(&self) -> bool {
        let was_active = self.state.swap(CANCELLED, Ordering::SeqCst) == ACTIVE;
        self.queue.lock().clear();
        // Wake a consumer parked in `recv` so its stream can end.
        self.ready.notify_one();
        was_active
    }

    pub(crate) fn try_pop(&self) -> Option<Arc<DomainEvent>> {
        self.queue.lock().pop_front()
    }

    /// Wait for the next event; `None` once the mailbox is cancelled.
    pub(crate) async fn recv(&self) -> Option<Arc<DomainEvent>> {
        loop {
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if !self.is_active() {
                return None;
            }
            // `notify_one` stores a permit when nobody is waiting, so an
            // event queued between the pop above and this await is not lost.
            self.ready.notified().await;
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
