//! Consumer-side subscription handles.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};

use changehub_proto::DomainEvent;

use crate::mailbox::Mailbox;
use crate::topic::Topic;

/// Opaque subscription identifier, unique within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Receiving events.
    Active,
    /// Removed from its topic; never delivered to again.
    Cancelled,
}

/// A live registration for one topic.
///
/// The owner drains events with [`recv`](Self::recv) or converts the
/// subscription into a [`Stream`] with [`into_stream`](Self::into_stream).
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    mailbox: Arc<Mailbox>,
    topic: Arc<Topic>,
}

impl Subscription {
    pub(crate) fn new(mailbox: Arc<Mailbox>, topic: Arc<Topic>) -> Self {
        Self { mailbox, topic }
    }

    /// The subscription ID.
    pub fn id(&self) -> SubscriptionId {
        self.mailbox.id()
    }

    /// The topic this subscription belongs to.
    pub fn topic(&self) -> &str {
        self.mailbox.topic()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.mailbox.state()
    }

    /// Check if the subscription still receives events.
    pub fn is_active(&self) -> bool {
        self.mailbox.is_active()
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription has been cancelled, whether by
    /// [`unsubscribe`](Self::unsubscribe), a [`SubscriptionHandle`], eviction,
    /// or hub shutdown.
    pub async fn recv(&mut self) -> Option<Arc<DomainEvent>> {
        self.mailbox.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<DomainEvent>> {
        self.mailbox.try_pop()
    }

    /// Number of buffered events not yet received.
    pub fn pending(&self) -> usize {
        self.mailbox.pending()
    }

    /// Events queued for this subscription so far.
    pub fn delivered_events(&self) -> u64 {
        self.mailbox.delivered()
    }

    /// Events discarded because this subscription fell behind.
    pub fn dropped_events(&self) -> u64 {
        self.mailbox.dropped()
    }

    /// A clonable cancellation hook for this subscription.
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            mailbox: Arc::clone(&self.mailbox),
            topic: Arc::clone(&self.topic),
        }
    }

    /// Cancel the subscription. Idempotent.
    ///
    /// Returns `true` if this call performed the cancellation.
    pub fn unsubscribe(&self) -> bool {
        self.topic.remove(&self.mailbox)
    }

    /// Convert into a stream that ends when the subscription is cancelled.
    pub fn into_stream(self) -> SubscriptionStream {
        let handle = self.handle();
        let inner = stream::unfold(self, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
        .boxed();

        SubscriptionStream { handle, inner }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.topic.remove(&self.mailbox);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("topic", &self.topic())
            .field("state", &self.state())
            .finish()
    }
}

/// Cancellation hook for a [`Subscription`].
///
/// Streaming endpoints keep a handle next to the response they stream and
/// call [`cancel`](Self::cancel) when the remote client disconnects.
#[derive(Clone)]
pub struct SubscriptionHandle {
    mailbox: Arc<Mailbox>,
    topic: Arc<Topic>,
}

impl SubscriptionHandle {
    /// The subscription ID.
    pub fn id(&self) -> SubscriptionId {
        self.mailbox.id()
    }

    /// The topic of the subscription.
    pub fn topic(&self) -> &str {
        self.mailbox.topic()
    }

    /// Check if the subscription is still active.
    pub fn is_active(&self) -> bool {
        self.mailbox.is_active()
    }

    /// Number of buffered events the subscriber has not received yet.
    pub fn pending(&self) -> usize {
        self.mailbox.pending()
    }

    /// Cancel the subscription. Idempotent.
    pub fn cancel(&self) -> bool {
        self.topic.remove(&self.mailbox)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id())
            .field("topic", &self.topic())
            .finish()
    }
}

/// Stream of events for one subscription.
///
/// Dropping the stream unsubscribes.
pub struct SubscriptionStream {
    handle: SubscriptionHandle,
    inner: BoxStream<'static, Arc<DomainEvent>>,
}

impl SubscriptionStream {
    /// Cancellation hook for the underlying subscription.
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }
}

impl Stream for SubscriptionStream {
    type Item = Arc<DomainEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for SubscriptionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("handle", &self.handle)
            .finish()
    }
}
