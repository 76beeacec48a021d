//! Fan-out publish coordinator.
//!
//! # Purpose
//! Submits every payload to the broker without waiting for individual
//! round trips, then resolves the results in input order so the visible
//! outcome sequence is deterministic even though acknowledgments complete
//! out of order. A failed message never aborts collection of the rest.
use courier_broker::{Message, PublisherHandle};

/// Per-message publish result, positioned to match the input sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { id: String },
    Failed { error: String },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

/// Publish `messages` through `publisher` and return one outcome per input,
/// in input order. The publisher is shut down before returning, so buffered
/// submissions are flushed on every exit path.
pub async fn publish_all(
    publisher: Box<dyn PublisherHandle>,
    messages: Vec<Message>,
) -> Vec<PublishOutcome> {
    // Submit everything up front; the broker pipelines the round trips.
    let mut pending = Vec::with_capacity(messages.len());
    for message in messages {
        pending.push(publisher.submit(message));
    }

    // Resolve in input order, not completion order.
    let mut outcomes = Vec::with_capacity(pending.len());
    for ticket in pending {
        match ticket.resolve().await {
            Ok(id) => {
                metrics::counter!("courier_publish_outcomes_total", "outcome" => "published")
                    .increment(1);
                outcomes.push(PublishOutcome::Published { id });
            }
            Err(err) => {
                metrics::counter!("courier_publish_outcomes_total", "outcome" => "failed")
                    .increment(1);
                outcomes.push(PublishOutcome::Failed {
                    error: err.to_string(),
                });
            }
        }
    }

    publisher.shutdown().await;
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_broker::{BrokerError, PendingPublish};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Stub publisher that resolves each submission on its own spawned task
    /// after a per-index delay, so completion order can be forced to differ
    /// from submission order.
    struct StubPublisher {
        delays: Vec<Duration>,
        fail_at: Option<usize>,
        submitted: AtomicUsize,
        shutdowns: Arc<AtomicUsize>,
    }

    impl StubPublisher {
        fn new(delays: Vec<Duration>, fail_at: Option<usize>) -> Self {
            Self {
                delays,
                fail_at,
                submitted: AtomicUsize::new(0),
                shutdowns: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl PublisherHandle for StubPublisher {
        fn submit(&self, _message: Message) -> PendingPublish {
            let index = self.submitted.fetch_add(1, Ordering::SeqCst);
            let delay = self
                .delays
                .get(index)
                .copied()
                .unwrap_or(Duration::from_millis(0));
            let fails = self.fail_at == Some(index);
            let (resolver, pending) = PendingPublish::channel();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if fails {
                    resolver.resolve(Err(BrokerError::PublishFailed(format!(
                        "injected failure at {index}"
                    ))));
                } else {
                    resolver.resolve(Ok(format!("id-{index}")));
                }
            });
            pending
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn empty_input_yields_empty_outcomes() {
        let publisher = StubPublisher::new(Vec::new(), None);
        let shutdowns = Arc::clone(&publisher.shutdowns);
        let outcomes = publish_all(Box::new(publisher), Vec::new()).await;
        assert!(outcomes.is_empty());
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outcomes_preserve_input_order_despite_completion_order() {
        // Later submissions complete first.
        let delays = vec![
            Duration::from_millis(30),
            Duration::from_millis(20),
            Duration::from_millis(10),
        ];
        let publisher = StubPublisher::new(delays, None);
        let messages = vec![
            Message::from_text("a"),
            Message::from_text("b"),
            Message::from_text("c"),
        ];
        let outcomes = publish_all(Box::new(publisher), messages).await;
        let ids: Vec<_> = outcomes
            .iter()
            .map(|outcome| match outcome {
                PublishOutcome::Published { id } => id.clone(),
                PublishOutcome::Failed { error } => panic!("unexpected failure: {error}"),
            })
            .collect();
        assert_eq!(ids, vec!["id-0", "id-1", "id-2"]);
    }

    #[tokio::test]
    async fn single_failure_does_not_abort_the_rest() {
        let publisher = StubPublisher::new(
            vec![Duration::from_millis(5); 3],
            Some(1),
        );
        let messages = vec![
            Message::from_text("a"),
            Message::from_text("b"),
            Message::from_text("c"),
        ];
        let outcomes = publish_all(Box::new(publisher), messages).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_published());
        assert!(matches!(
            &outcomes[1],
            PublishOutcome::Failed { error } if error.contains("injected failure at 1")
        ));
        assert!(outcomes[2].is_published());
    }

    #[tokio::test]
    async fn all_submissions_happen_before_any_resolution() {
        // If submission were interleaved with resolution, the long first
        // delay would serialize the batch and this would take ~3x longer.
        struct TrackingPublisher {
            all_submitted: Arc<AtomicBool>,
            count: AtomicUsize,
            total: usize,
        }

        #[async_trait]
        impl PublisherHandle for TrackingPublisher {
            fn submit(&self, _message: Message) -> PendingPublish {
                let submitted = self.count.fetch_add(1, Ordering::SeqCst) + 1;
                if submitted == self.total {
                    self.all_submitted.store(true, Ordering::SeqCst);
                }
                let flag = Arc::clone(&self.all_submitted);
                let (resolver, pending) = PendingPublish::channel();
                tokio::spawn(async move {
                    // Resolve only once the whole batch is submitted.
                    while !flag.load(Ordering::SeqCst) {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    resolver.resolve(Ok("id".to_string()));
                });
                pending
            }

            async fn shutdown(&self) {}
        }

        let publisher = TrackingPublisher {
            all_submitted: Arc::new(AtomicBool::new(false)),
            count: AtomicUsize::new(0),
            total: 4,
        };
        let messages = (0..4).map(|i| Message::from_text(format!("m{i}"))).collect();
        let outcomes = publish_all(Box::new(publisher), messages).await;
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(PublishOutcome::is_published));
    }
}
