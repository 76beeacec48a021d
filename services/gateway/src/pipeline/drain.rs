//! Bounded-window drain receiver.
//!
//! # Purpose
//! Runs a push-delivery stream for a fixed wall-clock window, accumulating
//! every delivery into an ordered buffer under a single mutex and acking
//! each message on receipt. When the window expires the stream is stopped
//! via a cancellation token, and the buffer is read only after the stop has
//! fully completed. The stop itself is bounded so a hung teardown cannot
//! block the request forever.
//!
//! # Notes
//! Acking before the buffered message is reported accepts a small loss
//! window if the process dies between ack and response; that trade-off is
//! deliberate (latency over exactly-once) and inherited from the broker
//! client's callback contract.
use async_trait::async_trait;
use courier_broker::{BrokerError, Delivery, DeliveryHandler, Message, SubscriberHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything one drain window produced: the ordered batch, plus the
/// terminal stream error if the stream failed before the deadline. A
/// partial batch collected before the error is still returned.
#[derive(Debug)]
pub struct DrainOutcome {
    pub messages: Vec<Message>,
    pub error: Option<BrokerError>,
}

#[derive(Default)]
struct Accumulator {
    inner: Mutex<AccumulatorInner>,
}

#[derive(Default)]
struct AccumulatorInner {
    closed: bool,
    batch: Vec<Message>,
}

impl Accumulator {
    /// Seal the buffer and take the batch. After this, late deliveries see
    /// the closed flag and are dropped unacked (the broker redelivers).
    fn close(&self) -> Vec<Message> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        std::mem::take(&mut inner.batch)
    }
}

#[async_trait]
impl DeliveryHandler for Accumulator {
    async fn on_delivery(&self, delivery: Delivery) {
        let mut inner = self.inner.lock();
        if inner.closed {
            // Window already sealed: leave the message unacked so the
            // broker redelivers it on a later stream.
            return;
        }
        let (message, ack) = delivery.into_parts();
        ack.ack();
        inner.batch.push(message);
    }
}

/// Drain `subscriber` for `window`, acking everything delivered, and return
/// the accumulated batch in arrival order. Never blocks longer than
/// `window + teardown`.
pub async fn drain(
    subscriber: Box<dyn SubscriberHandle>,
    window: Duration,
    teardown: Duration,
) -> DrainOutcome {
    let cancel = CancellationToken::new();
    let accumulator = Arc::new(Accumulator::default());

    let deadline = cancel.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(window).await;
        deadline.cancel();
    });

    let handler: Arc<dyn DeliveryHandler> = Arc::clone(&accumulator) as Arc<dyn DeliveryHandler>;
    let stream = tokio::time::timeout(
        window + teardown,
        subscriber.receive(cancel.clone(), handler),
    )
    .await;
    timer.abort();
    // Idempotent; covers the error-before-deadline path.
    cancel.cancel();

    let error = match stream {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(_) => {
            tracing::warn!(?window, ?teardown, "drain stream teardown timed out");
            Some(BrokerError::TeardownTimedOut)
        }
    };

    // The stream has returned (or been abandoned past its bound), so the
    // producer side is stopped and the buffer is final.
    let messages = accumulator.close();
    metrics::histogram!("courier_drain_batch_size").record(messages.len() as f64);
    DrainOutcome { messages, error }
}
