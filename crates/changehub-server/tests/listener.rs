//! Listener tests against a scripted in-memory source.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;

use changehub_core::{BroadcastHub, Operation, Subscription};
use changehub_proto::EventDecoder;
use changehub_server::{
    Backoff, ConnectionError, ListenerState, ListenerStatus, NotificationListener,
    NotificationSource, RawNotification,
};

const WAIT: Duration = Duration::from_secs(5);

enum Step {
    Notify(String),
    Drop,
}

#[derive(Default)]
struct Counters {
    connects: AtomicU32,
    disconnects: AtomicU32,
}

/// Plays back a script of notifications and connection drops. Steps stay
/// queued across reconnects, like a server-side backlog.
struct ScriptedSource {
    steps: mpsc::UnboundedReceiver<Step>,
    hang_connects: u32,
    refuse_connects: u32,
    counters: Arc<Counters>,
}

#[async_trait]
impl NotificationSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.hang_connects > 0 {
            self.hang_connects -= 1;
            return std::future::pending().await;
        }
        if self.refuse_connects > 0 {
            self.refuse_connects -= 1;
            return Err(ConnectionError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<RawNotification, ConnectionError> {
        match self.steps.recv().await {
            Some(Step::Notify(payload)) => Ok(RawNotification::new("events", payload)),
            Some(Step::Drop) => Err(ConnectionError::Closed("server went away".to_string())),
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    hub: Arc<BroadcastHub>,
    steps: mpsc::UnboundedSender<Step>,
    counters: Arc<Counters>,
    status: watch::Receiver<ListenerStatus>,
    metrics: Arc<changehub_server::ListenerMetrics>,
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(refuse_connects: u32, backoff: Backoff) -> Self {
        Self::start_with(0, refuse_connects, backoff, Duration::from_secs(5))
    }

    fn start_with(
        hang_connects: u32,
        refuse_connects: u32,
        backoff: Backoff,
        connect_timeout: Duration,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::default());
        let (steps, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let source = ScriptedSource {
            steps: rx,
            hang_connects,
            refuse_connects,
            counters: counters.clone(),
        };
        let listener = NotificationListener::new(source, EventDecoder::default(), hub.clone())
            .with_backoff(backoff)
            .with_connect_timeout(connect_timeout);
        let status = listener.status();
        let metrics = listener.metrics();

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(listener.run(shutdown_rx));

        Self {
            hub,
            steps,
            counters,
            status,
            metrics,
            shutdown,
            task,
        }
    }

    fn notify(&self, topic: &str, operation: &str, id: &str) {
        let payload = format!(
            r#"{{"table":"{}","action":"{}","data":{{"id":"{}"}}}}"#,
            topic, operation, id
        );
        self.steps.send(Step::Notify(payload)).unwrap();
    }

    fn send_raw(&self, payload: &str) {
        self.steps.send(Step::Notify(payload.to_string())).unwrap();
    }

    fn drop_connection(&self) {
        self.steps.send(Step::Drop).unwrap();
    }

    async fn wait_for(&mut self, state: ListenerState) -> ListenerStatus {
        self.wait_until(|status| status.state == state).await
    }

    async fn wait_until(&mut self, done: impl Fn(&ListenerStatus) -> bool) -> ListenerStatus {
        let status = &mut self.status;
        timeout(WAIT, async {
            loop {
                let current = *status.borrow_and_update();
                if done(&current) {
                    return current;
                }
                status.changed().await.unwrap();
            }
        })
        .await
        .expect("listener did not reach the expected state")
    }

    async fn stop(self) -> Arc<Counters> {
        self.shutdown.send(()).unwrap();
        timeout(WAIT, self.task).await.unwrap().unwrap();
        self.counters
    }
}

fn fast_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(5), Duration::from_millis(20), 0.0)
}

async fn next_id(sub: &mut Subscription) -> String {
    let event = timeout(WAIT, sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription ended");
    event.entity_id.clone()
}

#[tokio::test]
async fn publishes_decoded_notifications() {
    let mut harness = Harness::start(0, fast_backoff());
    let mut assets = harness.hub.subscribe("asset");

    harness.wait_for(ListenerState::Listening).await;
    harness.notify("assets", "INSERT", "a1");

    let event = timeout(WAIT, assets.recv()).await.unwrap().unwrap();
    assert_eq!(event.topic, "asset");
    assert_eq!(event.operation, Operation::Create);
    assert_eq!(event.entity_id, "a1");

    harness.stop().await;
}

#[tokio::test]
async fn undecodable_notifications_are_skipped() {
    let mut harness = Harness::start(0, fast_backoff());
    let mut incidents = harness.hub.subscribe("incident");

    harness.wait_for(ListenerState::Listening).await;
    harness.send_raw("not json at all");
    harness.notify("audit_log", "UPDATE", "x1");
    harness.notify("incident", "UPDATE", "i1");

    assert_eq!(next_id(&mut incidents).await, "i1");
    assert_eq!(harness.metrics.decode_failures(), 2);
    assert_eq!(harness.metrics.notifications_received(), 3);
    assert_eq!(harness.status.borrow().state, ListenerState::Listening);
    assert_eq!(harness.counters.connects.load(Ordering::SeqCst), 1);

    harness.stop().await;
}

#[tokio::test]
async fn reconnects_after_connection_loss_without_gaps() {
    let mut harness = Harness::start(0, fast_backoff());
    let mut sub = harness.hub.subscribe("asset");

    harness.wait_for(ListenerState::Listening).await;
    harness.notify("asset", "INSERT", "e1");
    harness.notify("asset", "UPDATE", "e2");
    harness.drop_connection();
    harness.notify("asset", "UPDATE", "e3");
    harness.notify("asset", "DELETE", "e4");

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(next_id(&mut sub).await);
    }
    assert_eq!(received, vec!["e1", "e2", "e3", "e4"]);
    assert!(sub.try_recv().is_none());

    assert_eq!(harness.metrics.connection_failures(), 1);
    assert_eq!(harness.metrics.reconnects(), 1);
    assert_eq!(harness.counters.connects.load(Ordering::SeqCst), 2);

    let status = harness.wait_for(ListenerState::Listening).await;
    assert_eq!(status.retry_count, 0);

    harness.stop().await;
}

#[tokio::test]
async fn flapping_connection_keeps_backing_off() {
    let backoff = Backoff::new(Duration::from_millis(5), Duration::from_secs(1), 0.0);
    let mut harness = Harness::start(0, backoff);
    let mut sub = harness.hub.subscribe("asset");

    harness.wait_for(ListenerState::Listening).await;
    for _ in 0..3 {
        harness.drop_connection();
    }

    let status = harness
        .wait_until(|s| s.state == ListenerState::Listening && s.retry_count == 3)
        .await;
    assert_eq!(status.retry_count, 3);
    assert_eq!(harness.metrics.connection_failures(), 3);
    assert_eq!(harness.metrics.reconnects(), 3);
    assert_eq!(harness.counters.connects.load(Ordering::SeqCst), 4);

    harness.notify("asset", "UPDATE", "a1");
    assert_eq!(next_id(&mut sub).await, "a1");
    let status = harness
        .wait_until(|s| s.state == ListenerState::Listening && s.retry_count == 0)
        .await;
    assert_eq!(status.retry_count, 0);

    harness.stop().await;
}

#[tokio::test]
async fn hanging_connect_times_out_and_retries() {
    let backoff = Backoff::new(Duration::from_millis(5), Duration::from_secs(1), 0.0);
    let mut harness = Harness::start_with(2, 0, backoff, Duration::from_millis(20));

    let failed = harness.wait_for(ListenerState::Failed).await;
    assert!(failed.retry_count >= 1);
    assert!(harness.metrics.connection_failures() >= 1);

    let mut sub = harness.hub.subscribe("car");
    let listening = harness.wait_for(ListenerState::Listening).await;
    assert_eq!(listening.retry_count, 2);
    assert_eq!(harness.counters.connects.load(Ordering::SeqCst), 3);
    assert_eq!(harness.metrics.connection_failures(), 2);
    assert_eq!(harness.metrics.reconnects(), 1);

    harness.notify("car", "UPDATE", "c1");
    assert_eq!(next_id(&mut sub).await, "c1");

    harness.stop().await;
}

#[tokio::test]
async fn refused_connects_are_retried_with_backoff() {
    let backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(1), 0.0);
    let mut harness = Harness::start(2, backoff);

    let failed = harness.wait_for(ListenerState::Failed).await;
    assert!(failed.retry_count >= 1);

    let mut sub = harness.hub.subscribe("car");
    harness.wait_for(ListenerState::Listening).await;
    harness.notify("car", "UPDATE", "c1");

    assert_eq!(next_id(&mut sub).await, "c1");
    assert_eq!(harness.counters.connects.load(Ordering::SeqCst), 3);
    assert_eq!(harness.metrics.connection_failures(), 2);
    assert_eq!(harness.metrics.reconnects(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn shutdown_releases_the_channel() {
    let mut harness = Harness::start(0, fast_backoff());
    harness.wait_for(ListenerState::Listening).await;

    let mut status = harness.status.clone();
    let counters = harness.stop().await;

    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(status.borrow_and_update().state, ListenerState::Stopped);
}

#[tokio::test]
async fn shutdown_while_waiting_to_retry() {
    let backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(60), 0.0);
    let mut harness = Harness::start(1, backoff);

    harness.wait_for(ListenerState::Failed).await;
    let counters = harness.stop().await;

    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
}
