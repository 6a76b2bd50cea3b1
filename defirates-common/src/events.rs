//! Update broadcaster for live-update subscribers
//!
//! A [`Broadcaster`] fans one message out to every registered subscriber.
//! Each subscriber owns a bounded queue; a publish waits at most
//! `send_timeout` per subscriber, so a stalled consumer is skipped for that
//! message instead of holding up the publisher or the other subscribers.
//!
//! The registry lock is only held to insert, remove or snapshot senders.
//! Sends happen on the snapshot with the lock released, so new subscriptions
//! never wait on a slow publish.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, error, info};

/// Event name sent once when a live-update stream opens
pub const EVENT_CONNECTED: &str = "connected";

/// Event name sent after every refresh cycle
pub const EVENT_UPDATE: &str = "update";

/// Per-subscriber queue sizing and publish timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterConfig {
    pub queue_capacity: usize,
    pub send_timeout: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            send_timeout: Duration::from_secs(1),
        }
    }
}

/// One event-stream message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: String,
    /// Serialized JSON object
    pub data: String,
}

impl SseMessage {
    /// Build a message, encoding a missing payload as `{}`
    pub fn new<T: Serialize + ?Sized>(
        event: impl Into<String>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let data = match payload {
            Some(payload) => serde_json::to_string(payload)?,
            None => "{}".to_string(),
        };

        Ok(Self {
            event: event.into(),
            data,
        })
    }

    /// Greeting sent to a subscriber as soon as its stream opens
    pub fn connected() -> Self {
        Self {
            event: EVENT_CONNECTED.to_string(),
            data: serde_json::json!({ "message": "Connected to real-time updates" }).to_string(),
        }
    }

    /// `event: <name>\ndata: <json>\n\n`
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// Result of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers whose queue stayed full past the timeout, or that closed
    pub skipped: usize,
}

/// A registered subscriber's receiving end
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<SseMessage>,
}

impl Subscription {
    /// Next message, or `None` once unsubscribed
    pub async fn recv(&mut self) -> Option<SseMessage> {
        self.rx.recv().await
    }
}

/// Subscription that unregisters itself when dropped
///
/// Held by each live-update stream so that a client disconnect, an early
/// return or a panic all release the registry slot.
#[derive(Debug)]
pub struct SubscriptionGuard {
    subscription: Subscription,
    broadcaster: Broadcaster,
}

impl SubscriptionGuard {
    pub fn id(&self) -> u64 {
        self.subscription.id
    }

    pub async fn recv(&mut self) -> Option<SseMessage> {
        self.subscription.recv().await
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.subscription.id);
    }
}

#[derive(Debug)]
struct Inner {
    config: BroadcasterConfig,
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, mpsc::Sender<SseMessage>>>,
}

/// Process-wide fan-out hub, cheap to clone
#[derive(Debug, Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                next_id: AtomicU64::new(1),
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a new subscriber with its own bounded queue
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let count = {
            let mut subscribers = self.write_registry();
            subscribers.insert(id, tx);
            subscribers.len()
        };

        info!(subscriber_id = id, subscribers = count, "Subscriber registered");
        Subscription { id, rx }
    }

    /// Register a subscriber that unregisters itself on drop
    pub fn subscribe_guarded(&self) -> SubscriptionGuard {
        SubscriptionGuard {
            subscription: self.subscribe(),
            broadcaster: self.clone(),
        }
    }

    /// Remove a subscriber and close its queue
    ///
    /// Returns `false` when the id was not registered; repeated calls are
    /// no-ops.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let (removed, count) = {
            let mut subscribers = self.write_registry();
            let removed = subscribers.remove(&id);
            (removed, subscribers.len())
        };

        match removed {
            // Dropping the last sender ends the receiver's stream
            Some(sender) => {
                drop(sender);
                info!(subscriber_id = id, subscribers = count, "Subscriber removed");
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.read_registry().len()
    }

    /// Unregister everyone, ending every open stream
    pub fn close_all(&self) -> usize {
        let closed = {
            let mut subscribers = self.write_registry();
            let closed = subscribers.len();
            subscribers.clear();
            closed
        };

        if closed > 0 {
            info!(subscribers = closed, "Closed all subscribers");
        }
        closed
    }

    /// Send one event to every current subscriber
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        event: &str,
        payload: Option<&T>,
    ) -> PublishReport {
        match SseMessage::new(event, payload) {
            Ok(message) => self.publish_message(message).await,
            Err(e) => {
                error!(event, "Failed to serialize event payload: {}", e);
                PublishReport::default()
            }
        }
    }

    /// Notify subscribers that a refresh cycle finished
    pub async fn publish_data_changed(&self) -> PublishReport {
        let payload = serde_json::json!({
            "timestamp": chrono::Utc::now().timestamp(),
            "message": "Data has been updated",
        });
        self.publish(EVENT_UPDATE, Some(&payload)).await
    }

    /// Send an already-built message to every current subscriber
    pub async fn publish_message(&self, message: SseMessage) -> PublishReport {
        let targets: Vec<(u64, mpsc::Sender<SseMessage>)> = self
            .read_registry()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if targets.is_empty() {
            debug!(event = %message.event, "No subscribers, publish skipped");
            return PublishReport::default();
        }

        let timeout = self.inner.config.send_timeout;
        let sends = targets.iter().map(|(id, tx)| {
            let message = message.clone();
            async move { (*id, tx.send_timeout(message, timeout).await) }
        });

        let mut report = PublishReport::default();
        for (id, result) in futures::future::join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    debug!(subscriber_id = id, "Subscriber queue full, message skipped");
                    report.skipped += 1;
                }
                Err(SendTimeoutError::Closed(_)) => {
                    debug!(subscriber_id = id, "Subscriber closed during publish");
                    report.skipped += 1;
                }
            }
        }

        debug!(
            event = %message.event,
            delivered = report.delivered,
            skipped = report.skipped,
            "Published event"
        );
        report
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, HashMap<u64, mpsc::Sender<SseMessage>>> {
        // Critical sections never panic mid-update, so a poisoned map is still consistent
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HashMap<u64, mpsc::Sender<SseMessage>>> {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::time::timeout;

    fn fast_config(queue_capacity: usize) -> BroadcasterConfig {
        BroadcasterConfig {
            queue_capacity,
            send_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_wire_format() {
        let msg = SseMessage::new("test", Some(&serde_json::json!({ "a": 1 }))).unwrap();
        assert_eq!(msg.to_wire(), "event: test\ndata: {\"a\":1}\n\n");

        let empty = SseMessage::new::<serde_json::Value>("ping", None).unwrap();
        assert_eq!(empty.to_wire(), "event: ping\ndata: {}\n\n");
    }

    #[test]
    fn test_connected_message() {
        let msg = SseMessage::connected();
        assert_eq!(msg.event, "connected");
        let data: serde_json::Value = serde_json::from_str(&msg.data).unwrap();
        assert_eq!(data["message"], "Connected to real-time updates");
    }

    #[tokio::test]
    async fn test_fan_out_to_three_subscribers() {
        let broadcaster = Broadcaster::default();
        let mut subs: Vec<Subscription> = (0..3).map(|_| broadcaster.subscribe()).collect();

        let report = broadcaster
            .publish("test", Some(&serde_json::json!({ "n": 7 })))
            .await;
        assert_eq!(report, PublishReport { delivered: 3, skipped: 0 });

        for sub in subs.iter_mut() {
            let msg = timeout(Duration::from_secs(1), sub.recv())
                .await
                .expect("message within bound")
                .expect("channel open");
            let wire = msg.to_wire();
            assert!(wire.contains("event: test"));
            assert!(wire.contains("data: "));
            assert!(sub.rx.try_recv().is_err(), "exactly one message per publish");
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broadcaster = Broadcaster::default();
        let report = timeout(Duration::from_millis(100), broadcaster.publish_data_changed())
            .await
            .expect("publish with no subscribers returns immediately");
        assert_eq!(report, PublishReport::default());
    }

    #[tokio::test]
    async fn test_unsubscribe_twice_is_noop() {
        let broadcaster = Broadcaster::default();
        let sub = broadcaster.subscribe();

        assert!(broadcaster.unsubscribe(sub.id));
        assert!(!broadcaster.unsubscribe(sub.id));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_queue() {
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();

        broadcaster.unsubscribe(sub.id);

        let next = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_block_others() {
        let broadcaster = Broadcaster::new(fast_config(1));
        let _stalled = broadcaster.subscribe();
        let mut healthy = broadcaster.subscribe();

        // Fills the stalled queue; the healthy one is drained below
        broadcaster.publish_data_changed().await;
        healthy.recv().await.unwrap();

        let started = Instant::now();
        let report = broadcaster.publish_data_changed().await;

        assert_eq!(report, PublishReport { delivered: 1, skipped: 1 });
        assert!(started.elapsed() < Duration::from_secs(1));
        let msg = timeout(Duration::from_secs(1), healthy.recv()).await.unwrap().unwrap();
        assert_eq!(msg.event, EVENT_UPDATE);
    }

    #[tokio::test]
    async fn test_guard_unsubscribes_on_drop() {
        let broadcaster = Broadcaster::default();
        {
            let guard = broadcaster.subscribe_guarded();
            assert!(guard.id() > 0);
            assert_eq!(broadcaster.subscriber_count(), 1);
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let broadcaster = Broadcaster::default();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        assert_eq!(broadcaster.close_all(), 2);
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        // Later unsubscribe from a stream's own cleanup path is harmless
        assert!(!broadcaster.unsubscribe(a.id));
    }

    #[tokio::test]
    async fn test_data_changed_payload() {
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();

        broadcaster.publish_data_changed().await;

        let msg = sub.recv().await.unwrap();
        let data: serde_json::Value = serde_json::from_str(&msg.data).unwrap();
        assert_eq!(msg.event, "update");
        assert_eq!(data["message"], "Data has been updated");
        assert!(data["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_publish_unsubscribe() {
        let broadcaster = Broadcaster::new(fast_config(10));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let b = broadcaster.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let sub = b.subscribe();
                    tokio::task::yield_now().await;
                    b.unsubscribe(sub.id);
                }
            }));
        }
        for _ in 0..4 {
            let b = broadcaster.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    b.publish_data_changed().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
