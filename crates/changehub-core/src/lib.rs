//! changehub core - topic-based fan-out of change events.
//!
//! The [`BroadcastHub`] owns one [`Topic`] per entity type. Streaming
//! endpoints call [`BroadcastHub::subscribe`] to obtain a [`Subscription`],
//! and the upstream listener calls [`BroadcastHub::publish`] for every
//! decoded event. Each subscription has its own bounded queue, so a slow
//! consumer only ever loses its own events and never stalls the publisher.

pub mod config;
mod mailbox;
pub mod hub;
pub mod metrics;
pub mod subscription;
pub mod topic;

pub use config::{HubConfig, OverflowPolicy};
pub use hub::{BroadcastHub, SharedHub};
pub use metrics::{HubMetrics, HubStats};
pub use subscription::{
    Subscription, SubscriptionHandle, SubscriptionId, SubscriptionState, SubscriptionStream,
};
pub use topic::{PublishReport, Topic};

/// Re-export protocol types.
pub use changehub_proto as proto;
pub use changehub_proto::{DomainEvent, Operation};
