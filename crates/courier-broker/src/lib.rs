//! Broker-client abstraction used by the Courier gateway.
//!
//! # Purpose
//! Defines the message model and the async publish/receive primitives the
//! gateway composes: non-blocking publish submission with deferred
//! resolution, and push-style delivery streams with per-message
//! acknowledgement. The `memory` module provides a fully functional
//! in-memory at-least-once broker behind the same traits.
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub mod memory;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("topic {0} not found")]
    TopicNotFound(String),
    #[error("topic {0} already exists")]
    TopicExists(String),
    #[error("subscription {0} not found")]
    SubscriptionNotFound(String),
    #[error("subscription {0} already exists")]
    SubscriptionExists(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("publisher closed before the result resolved")]
    PublisherClosed,
    #[error("delivery stream failed: {0}")]
    StreamFailed(String),
    #[error("stream teardown exceeded its deadline")]
    TeardownTimedOut,
}

/// An opaque payload plus string key/value attributes. Immutable once built;
/// ownership moves across the publish/receive boundary, never shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
}

impl Message {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(text.into()),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Broker-side subscription settings recorded at creation time.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub ack_deadline: Duration,
    pub expiration: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            ack_deadline: Duration::from_secs(60),
            expiration: Duration::from_secs(25 * 60 * 60),
        }
    }
}

/// Resolution side of an in-flight publish. The broker implementation keeps
/// the resolver and fulfills it exactly once; dropping it unresolved makes
/// the paired [`PendingPublish`] report [`BrokerError::PublisherClosed`].
pub struct PublishResolver {
    sender: oneshot::Sender<Result<String>>,
}

impl PublishResolver {
    pub fn resolve(self, result: Result<String>) {
        let _ = self.sender.send(result);
    }
}

/// Awaitable handle for one submitted publish, resolved with the
/// broker-assigned message id or an error.
pub struct PendingPublish {
    receiver: oneshot::Receiver<Result<String>>,
}

impl PendingPublish {
    pub fn channel() -> (PublishResolver, PendingPublish) {
        let (sender, receiver) = oneshot::channel();
        (PublishResolver { sender }, PendingPublish { receiver })
    }

    /// Build an already-resolved handle. Handy for broker stubs in tests.
    pub fn ready(result: Result<String>) -> PendingPublish {
        let (resolver, pending) = Self::channel();
        resolver.resolve(result);
        pending
    }

    pub async fn resolve(self) -> Result<String> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::PublisherClosed),
        }
    }
}

/// Consuming acknowledgement for a single delivery. Dropping the token
/// without calling [`AckToken::ack`] leaves the message unacked, so an
/// at-least-once broker will redeliver it.
pub struct AckToken {
    on_ack: Option<Box<dyn FnOnce() + Send>>,
}

impl AckToken {
    pub fn new(on_ack: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_ack: Some(Box::new(on_ack)),
        }
    }

    /// Token that acknowledges nothing. For handler tests.
    pub fn noop() -> Self {
        Self { on_ack: None }
    }

    pub fn ack(mut self) {
        if let Some(on_ack) = self.on_ack.take() {
            on_ack();
        }
    }
}

impl std::fmt::Debug for AckToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckToken")
            .field("armed", &self.on_ack.is_some())
            .finish()
    }
}

/// One pushed message together with its acknowledgement token.
#[derive(Debug)]
pub struct Delivery {
    message: Message,
    ack: AckToken,
}

impl Delivery {
    pub fn new(message: Message, ack: AckToken) -> Self {
        Self { message, ack }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_parts(self) -> (Message, AckToken) {
        (self.message, self.ack)
    }
}

/// Receiver-side callback invoked (possibly concurrently) for each pushed
/// delivery while a subscriber stream is active.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_delivery(&self, delivery: Delivery);
}

/// Publish side of an open topic.
#[async_trait]
pub trait PublisherHandle: Send + Sync {
    /// Submit a message without waiting for the broker round trip.
    fn submit(&self, message: Message) -> PendingPublish;

    /// Flush buffered submissions and release publish resources. Resolves
    /// only after every submitted message has been handed to the broker.
    async fn shutdown(&self);
}

/// Receive side of a subscription.
#[async_trait]
pub trait SubscriberHandle: Send + Sync {
    /// Push deliveries to `handler` until `cancel` fires or the stream hits
    /// a terminal error. Returns only after every in-flight handler
    /// invocation has completed, so the caller may treat its own state as
    /// quiescent once this resolves.
    async fn receive(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<()>;
}

/// Management and handle-opening surface of the broker client.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<String>>;
    async fn create_topic(&self, name: &str) -> Result<()>;
    async fn delete_topic(&self, name: &str) -> Result<()>;
    async fn topic_exists(&self, name: &str) -> Result<bool>;

    async fn list_subscriptions(&self) -> Result<Vec<String>>;
    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        config: SubscriptionConfig,
    ) -> Result<()>;
    async fn delete_subscription(&self, name: &str) -> Result<()>;
    async fn subscription_exists(&self, name: &str) -> Result<bool>;

    async fn publisher(&self, topic: &str) -> Result<Box<dyn PublisherHandle>>;
    async fn subscriber(&self, subscription: &str) -> Result<Box<dyn SubscriberHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_publish_resolves_with_id() {
        let (resolver, pending) = PendingPublish::channel();
        resolver.resolve(Ok("42".to_string()));
        assert_eq!(pending.resolve().await.unwrap(), "42");
    }

    #[tokio::test]
    async fn pending_publish_reports_closed_publisher() {
        let (resolver, pending) = PendingPublish::channel();
        drop(resolver);
        assert!(matches!(
            pending.resolve().await,
            Err(BrokerError::PublisherClosed)
        ));
    }

    #[tokio::test]
    async fn ready_handle_is_immediately_resolved() {
        let pending = PendingPublish::ready(Err(BrokerError::PublishFailed("boom".into())));
        assert!(matches!(
            pending.resolve().await,
            Err(BrokerError::PublishFailed(_))
        ));
    }

    #[test]
    fn ack_token_runs_callback_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = Arc::new(AtomicUsize::new(0));
        let acked = Arc::clone(&count);
        let token = AckToken::new(move || {
            acked.fetch_add(1, Ordering::SeqCst);
        });
        token.ack();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_ack_token_does_not_ack() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = Arc::new(AtomicUsize::new(0));
        let acked = Arc::clone(&count);
        drop(AckToken::new(move || {
            acked.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn message_builder_sets_attributes() {
        let message = Message::from_text("hello").with_attribute("source", "test");
        assert_eq!(message.data, Bytes::from_static(b"hello"));
        assert_eq!(message.attributes.get("source").unwrap(), "test");
    }
}
