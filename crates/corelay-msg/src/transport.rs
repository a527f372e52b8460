//! ---
//! corelay_section: "02-messaging-envelopes"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Pub/sub topic abstraction and the in-process topic."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Transport-level failures. These never reach a submitter as application errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The topic could not be reached.
    #[error("topic '{topic}' is unreachable")]
    Unreachable {
        /// Topic name.
        topic: String,
    },
    /// The subscription or topic has been shut down.
    #[error("topic '{topic}' is closed")]
    Closed {
        /// Topic name.
        topic: String,
    },
}

/// Identifier assigned to a message by the topic on publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Allocate a new message id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One delivery of a published message to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Id assigned at publish time; stable across redeliveries and duplicates.
    pub message_id: MessageId,
    /// Topic the message was published to.
    pub topic: Arc<str>,
    /// Serialized envelope.
    pub body: String,
    /// 1 for the first delivery, incremented on each redelivery.
    pub attempt: u32,
}

impl Delivery {
    /// The same message, scheduled for its next attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }
}

/// A pub/sub topic.
///
/// Delivery is at-least-once: subscribers may observe the same message more than once
/// and in any order relative to other messages.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Publish a serialized envelope.
    async fn publish(&self, body: String) -> Result<MessageId, TransportError>;
    /// Open a new subscription that receives every message published from now on.
    fn subscribe(&self) -> Subscription;
    /// Topic name for logging/metrics.
    fn name(&self) -> &str;
}

/// Receiving end of a topic subscription.
///
/// Backends feed deliveries into the sender returned by [`Subscription::channel`]; the
/// dispatcher uses the same channel to requeue redeliveries.
#[derive(Debug)]
pub struct Subscription {
    topic: Arc<str>,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    requeue: mpsc::UnboundedSender<Delivery>,
}

impl Subscription {
    /// Create a subscription and the sender that feeds it.
    pub fn channel(topic: impl Into<Arc<str>>) -> (mpsc::UnboundedSender<Delivery>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = Self {
            topic: topic.into(),
            receiver,
            requeue: sender.clone(),
        };
        (sender, subscription)
    }

    /// Topic this subscription is attached to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next delivery.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Take a delivery if one is immediately available.
    pub fn try_next(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Handle used to put a delivery back on this subscription.
    pub fn requeue_handle(&self) -> RequeueHandle {
        RequeueHandle {
            topic: Arc::clone(&self.topic),
            sender: self.requeue.clone(),
        }
    }
}

/// Cloneable handle for requeueing deliveries onto a subscription.
#[derive(Debug, Clone)]
pub struct RequeueHandle {
    topic: Arc<str>,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl RequeueHandle {
    /// Put a delivery back on the subscription.
    pub fn requeue(&self, delivery: Delivery) -> Result<(), TransportError> {
        self.sender
            .send(delivery)
            .map_err(|_| TransportError::Closed {
                topic: self.topic.to_string(),
            })
    }
}

/// In-process topic that fans every message out to all subscriptions.
///
/// Fault injection hooks (`set_unreachable`, `fail_next_publishes`, `set_duplication`)
/// model the failure modes of a real pub/sub service.
#[derive(Clone)]
pub struct InMemoryTopic {
    inner: Arc<Inner>,
}

struct Inner {
    name: Arc<str>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Delivery>>>,
    unreachable: AtomicBool,
    failing_publishes: AtomicU32,
    duplication: AtomicU32,
    published: AtomicU64,
    journal: Option<Mutex<Vec<String>>>,
}

impl InMemoryTopic {
    /// Create a topic.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::build(name.into(), None)
    }

    /// Create a topic that records every successfully published body.
    pub fn with_journal(name: impl Into<Arc<str>>) -> Self {
        Self::build(name.into(), Some(Mutex::new(Vec::new())))
    }

    fn build(name: Arc<str>, journal: Option<Mutex<Vec<String>>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                subscribers: Mutex::new(Vec::new()),
                unreachable: AtomicBool::new(false),
                failing_publishes: AtomicU32::new(0),
                duplication: AtomicU32::new(1),
                published: AtomicU64::new(0),
                journal,
            }),
        }
    }

    /// Make every publish fail (or succeed again).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `count` publishes, then recover.
    pub fn fail_next_publishes(&self, count: u32) {
        self.inner.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Deliver each message `copies` times to every subscription (minimum 1).
    pub fn set_duplication(&self, copies: u32) {
        self.inner.duplication.store(copies.max(1), Ordering::SeqCst);
    }

    /// Number of successful publishes.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    /// Bodies published so far, when created with [`InMemoryTopic::with_journal`].
    pub fn journal(&self) -> Vec<String> {
        self.inner
            .journal
            .as_ref()
            .map(|journal| journal.lock().clone())
            .unwrap_or_default()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|sender| !sender.is_closed());
        subscribers.len()
    }

    fn should_fail(&self) -> bool {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return true;
        }
        self.inner
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl fmt::Debug for InMemoryTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTopic")
            .field("name", &self.inner.name)
            .field("published", &self.published_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Topic for InMemoryTopic {
    async fn publish(&self, body: String) -> Result<MessageId, TransportError> {
        if self.should_fail() {
            return Err(TransportError::Unreachable {
                topic: self.inner.name.to_string(),
            });
        }

        let message_id = MessageId::new();
        let copies = self.inner.duplication.load(Ordering::SeqCst);
        {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.retain(|sender| !sender.is_closed());
            for sender in subscribers.iter() {
                for _ in 0..copies {
                    // a receiver dropped between retain and send is simply skipped
                    let _ = sender.send(Delivery {
                        message_id,
                        topic: Arc::clone(&self.inner.name),
                        body: body.clone(),
                        attempt: 1,
                    });
                }
            }
        }
        if let Some(journal) = &self.inner.journal {
            journal.lock().push(body);
        }
        self.inner.published.fetch_add(1, Ordering::SeqCst);
        Ok(message_id)
    }

    fn subscribe(&self) -> Subscription {
        let (sender, subscription) = Subscription::channel(Arc::clone(&self.inner.name));
        self.inner.subscribers.lock().push(sender);
        subscription
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_every_subscription() {
        let topic = InMemoryTopic::new("requests");
        let mut first = topic.subscribe();
        let mut second = topic.subscribe();

        let id = topic.publish("{\"a\":1}".into()).await.unwrap();

        let a = first.next().await.unwrap();
        let b = second.next().await.unwrap();
        assert_eq!(a.message_id, id);
        assert_eq!(b.message_id, id);
        assert_eq!(a.attempt, 1);
        assert_eq!(&*a.topic, "requests");
        assert_eq!(topic.published_count(), 1);
    }

    #[tokio::test]
    async fn messages_published_before_subscribing_are_not_seen() {
        let topic = InMemoryTopic::new("requests");
        topic.publish("early".into()).await.unwrap();
        let mut late = topic.subscribe();
        assert!(late.try_next().is_none());
    }

    #[tokio::test]
    async fn unreachable_topic_rejects_publishes() {
        let topic = InMemoryTopic::with_journal("requests");
        let mut subscription = topic.subscribe();
        topic.set_unreachable(true);

        let err = topic.publish("x".into()).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Unreachable {
                topic: "requests".into()
            }
        );
        assert!(subscription.try_next().is_none());
        assert!(topic.journal().is_empty());

        topic.set_unreachable(false);
        topic.publish("y".into()).await.unwrap();
        assert_eq!(topic.journal(), vec!["y".to_string()]);
    }

    #[tokio::test]
    async fn transient_failures_recover() {
        let topic = InMemoryTopic::new("outcomes");
        topic.fail_next_publishes(2);
        assert!(topic.publish("1".into()).await.is_err());
        assert!(topic.publish("2".into()).await.is_err());
        assert!(topic.publish("3".into()).await.is_ok());
        assert_eq!(topic.published_count(), 1);
    }

    #[tokio::test]
    async fn duplication_delivers_same_message_id() {
        let topic = InMemoryTopic::new("outcomes");
        let mut subscription = topic.subscribe();
        topic.set_duplication(3);
        let id = topic.publish("dup".into()).await.unwrap();
        for _ in 0..3 {
            assert_eq!(subscription.next().await.unwrap().message_id, id);
        }
        assert!(subscription.try_next().is_none());
    }

    #[tokio::test]
    async fn requeue_increments_attempt() {
        let topic = InMemoryTopic::new("requests");
        let mut subscription = topic.subscribe();
        topic.publish("again".into()).await.unwrap();
        let first = subscription.next().await.unwrap();
        subscription
            .requeue_handle()
            .requeue(first.next_attempt())
            .unwrap();
        let second = subscription.next().await.unwrap();
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let topic = InMemoryTopic::new("requests");
        let kept = topic.subscribe();
        drop(topic.subscribe());
        assert_eq!(topic.subscriber_count(), 1);
        drop(kept);
        // the requeue sender held by the subscription is dropped with it
        assert_eq!(topic.subscriber_count(), 0);
    }
}
