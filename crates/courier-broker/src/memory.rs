//! In-memory at-least-once broker.
//!
//! # Purpose
//! Default backend for local runs and the test double for the gateway.
//! Topics fan published messages out to every attached subscription; each
//! subscription keeps a backlog queue plus an outstanding (delivered,
//! unacked) map, and requeues unacked messages when a delivery stream
//! stops, so redelivery behaves like a real at-least-once broker.
use crate::{
    AckToken, BrokerClient, BrokerError, Delivery, DeliveryHandler, Message, PendingPublish,
    PublisherHandle, Result, SubscriberHandle, SubscriptionConfig,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    topics: RwLock<HashMap<String, TopicState>>,
    subscriptions: RwLock<HashMap<String, Arc<SubscriptionState>>>,
    next_message_id: AtomicU64,
}

#[derive(Default)]
struct TopicState {
    // Names of subscriptions receiving this topic's messages.
    subscriptions: HashSet<String>,
}

struct SubscriptionState {
    topic: String,
    // Recorded but not enforced; expiry is a managed-broker concern.
    #[allow(dead_code)]
    config: SubscriptionConfig,
    queue: Mutex<SubscriptionQueue>,
    notify: Notify,
}

#[derive(Default)]
struct SubscriptionQueue {
    backlog: VecDeque<QueuedMessage>,
    outstanding: HashMap<u64, Message>,
    next_ack_id: u64,
}

struct QueuedMessage {
    ack_id: u64,
    message: Message,
}

impl SubscriptionState {
    fn new(topic: String, config: SubscriptionConfig) -> Self {
        Self {
            topic,
            config,
            queue: Mutex::new(SubscriptionQueue::default()),
            notify: Notify::new(),
        }
    }

    fn enqueue(&self, message: Message) {
        {
            let mut queue = self.queue.lock();
            let ack_id = queue.next_ack_id;
            queue.next_ack_id += 1;
            queue.backlog.push_back(QueuedMessage { ack_id, message });
        }
        // A permit is stored if no receiver is waiting, so wakeups are not lost.
        self.notify.notify_one();
    }

    /// Move the next backlog entry into the outstanding map and return it.
    fn pop_for_delivery(&self) -> Option<QueuedMessage> {
        let mut queue = self.queue.lock();
        let next = queue.backlog.pop_front()?;
        queue.outstanding.insert(next.ack_id, next.message.clone());
        Some(next)
    }

    fn ack(&self, ack_id: u64) {
        let mut queue = self.queue.lock();
        queue.outstanding.remove(&ack_id);
    }

    /// Return every delivered-but-unacked message to the front of the
    /// backlog, oldest first, for redelivery on the next stream.
    fn requeue_outstanding(&self) {
        let mut queue = self.queue.lock();
        let mut unacked: Vec<(u64, Message)> = queue.outstanding.drain().collect();
        if unacked.is_empty() {
            return;
        }
        unacked.sort_by_key(|(ack_id, _)| *ack_id);
        metrics::counter!("courier_broker_redelivered_total").increment(unacked.len() as u64);
        for (ack_id, message) in unacked.into_iter().rev() {
            queue.backlog.push_front(QueuedMessage { ack_id, message });
        }
    }

    fn backlog_len(&self) -> usize {
        self.queue.lock().backlog.len()
    }
}

impl Shared {
    fn fan_out(&self, topic: &str, message: Message) -> Result<String> {
        let attached: Vec<Arc<SubscriptionState>> = {
            let topics = self.topics.read();
            let state = topics
                .get(topic)
                .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;
            let subscriptions = self.subscriptions.read();
            state
                .subscriptions
                .iter()
                .filter_map(|name| subscriptions.get(name).cloned())
                .collect()
        };
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        for subscription in &attached {
            subscription.enqueue(message.clone());
        }
        metrics::counter!("courier_broker_published_total").increment(1);
        metrics::counter!("courier_broker_fanout_total").increment(attached.len() as u64);
        Ok(id.to_string())
    }

    fn subscription(&self, name: &str) -> Result<Arc<SubscriptionState>> {
        self.subscriptions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::SubscriptionNotFound(name.to_string()))
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backlog depth of a subscription. Test observability hook.
    pub fn backlog_len(&self, subscription: &str) -> Result<usize> {
        Ok(self.shared.subscription(subscription)?.backlog_len())
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn list_topics(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.shared.topics.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_topic(&self, name: &str) -> Result<()> {
        let mut topics = self.shared.topics.write();
        if topics.contains_key(name) {
            return Err(BrokerError::TopicExists(name.to_string()));
        }
        topics.insert(name.to_string(), TopicState::default());
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        // Attached subscriptions survive topic deletion; they just stop
        // receiving new messages.
        let mut topics = self.shared.topics.write();
        topics
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_string()))
    }

    async fn topic_exists(&self, name: &str) -> Result<bool> {
        Ok(self.shared.topics.read().contains_key(name))
    }

    async fn list_subscriptions(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.shared.subscriptions.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        config: SubscriptionConfig,
    ) -> Result<()> {
        let mut topics = self.shared.topics.write();
        let topic_state = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;
        let mut subscriptions = self.shared.subscriptions.write();
        if subscriptions.contains_key(name) {
            return Err(BrokerError::SubscriptionExists(name.to_string()));
        }
        subscriptions.insert(
            name.to_string(),
            Arc::new(SubscriptionState::new(topic.to_string(), config)),
        );
        topic_state.subscriptions.insert(name.to_string());
        Ok(())
    }

    async fn delete_subscription(&self, name: &str) -> Result<()> {
        let mut topics = self.shared.topics.write();
        let mut subscriptions = self.shared.subscriptions.write();
        let state = subscriptions
            .remove(name)
            .ok_or_else(|| BrokerError::SubscriptionNotFound(name.to_string()))?;
        if let Some(topic_state) = topics.get_mut(&state.topic) {
            topic_state.subscriptions.remove(name);
        }
        Ok(())
    }

    async fn subscription_exists(&self, name: &str) -> Result<bool> {
        Ok(self.shared.subscriptions.read().contains_key(name))
    }

    async fn publisher(&self, topic: &str) -> Result<Box<dyn PublisherHandle>> {
        if !self.shared.topics.read().contains_key(topic) {
            return Err(BrokerError::TopicNotFound(topic.to_string()));
        }
        Ok(Box::new(MemoryPublisher {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            inflight: Arc::new(Inflight::default()),
        }))
    }

    async fn subscriber(&self, subscription: &str) -> Result<Box<dyn SubscriberHandle>> {
        // Resolve eagerly so a missing subscription fails at open time.
        let state = self.shared.subscription(subscription)?;
        Ok(Box::new(MemorySubscriber { state }))
    }
}

/// Tracks spawned fan-out tasks so `shutdown` can wait for quiescence.
#[derive(Default)]
struct Inflight {
    active: AtomicUsize,
    idle: Notify,
}

impl Inflight {
    fn enter(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    fn exit(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn drained(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct MemoryPublisher {
    shared: Arc<Shared>,
    topic: String,
    inflight: Arc<Inflight>,
}

#[async_trait]
impl PublisherHandle for MemoryPublisher {
    fn submit(&self, message: Message) -> PendingPublish {
        let (resolver, pending) = PendingPublish::channel();
        let shared = Arc::clone(&self.shared);
        let topic = self.topic.clone();
        let inflight = Arc::clone(&self.inflight);
        inflight.enter();
        tokio::spawn(async move {
            let result = shared.fan_out(&topic, message);
            resolver.resolve(result);
            inflight.exit();
        });
        pending
    }

    async fn shutdown(&self) {
        self.inflight.drained().await;
    }
}

struct MemorySubscriber {
    state: Arc<SubscriptionState>,
}

#[async_trait]
impl SubscriberHandle for MemorySubscriber {
    async fn receive(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<()> {
        let mut deliveries = Vec::new();
        loop {
            while let Some(queued) = self.state.pop_for_delivery() {
                let delivery = make_delivery(&self.state, queued);
                let handler = Arc::clone(&handler);
                metrics::counter!("courier_broker_delivered_total").increment(1);
                deliveries.push(tokio::spawn(async move {
                    handler.on_delivery(delivery).await;
                }));
            }
            let notified = self.state.notify.notified();
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = notified => {}
            }
        }
        // Closed only once every in-flight handler call has finished.
        for delivery in deliveries {
            let _ = delivery.await;
        }
        self.state.requeue_outstanding();
        Ok(())
    }
}

fn make_delivery(state: &Arc<SubscriptionState>, queued: QueuedMessage) -> Delivery {
    let acker = Arc::clone(state);
    let ack_id = queued.ack_id;
    Delivery::new(queued.message, AckToken::new(move || acker.ack(ack_id)))
}
