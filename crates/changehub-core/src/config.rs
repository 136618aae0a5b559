//! Hub configuration.

/// Default number of events buffered per subscription.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// What to do when a subscription's queue is full at delivery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the oldest buffered event for that subscription only.
    #[default]
    DropOldest,
    /// Treat the overflow as a failed delivery and evict the subscription.
    Disconnect,
}

/// Broadcast hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum events buffered per subscription.
    pub queue_capacity: usize,
    /// Overflow behavior for full subscription queues.
    pub overflow: OverflowPolicy,
}

impl HubConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::DropOldest,
        }
    }

    /// Set the per-subscription queue capacity (at least 1).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the overflow policy.
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new()
    }
}
