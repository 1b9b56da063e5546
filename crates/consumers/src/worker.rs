//! Pulls messages off one queue and hands them to a [`DeliveryRunner`].

use std::sync::Arc;
use std::time::Duration;

use message_store::{MessageEnvelope, QueueReceiver, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{DeliveryOutcome, DeliveryRunner};

pub struct ConsumerWorker {
    queue: String,
    receiver: Arc<dyn QueueReceiver>,
    runner: DeliveryRunner,
    idle_interval: Duration,
}

impl ConsumerWorker {
    pub fn new(
        queue: impl Into<String>,
        receiver: Arc<dyn QueueReceiver>,
        runner: DeliveryRunner,
    ) -> Self {
        Self {
            queue: queue.into(),
            receiver,
            runner,
            idle_interval: Duration::from_millis(100),
        }
    }

    /// How long to wait before polling an empty queue again.
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Delivers everything currently on the queue. Returns how many
    /// messages were settled.
    ///
    /// Stops at the first store failure; that message goes back on the
    /// queue for the next run.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let mut settled = 0;
        while let Some(message) = self.receiver.receive(&self.queue).await? {
            self.settle(message).await?;
            settled += 1;
        }
        Ok(settled)
    }

    /// Delivers one received message. When the runner cannot record the
    /// outcome the message is put back, so it is neither lost nor
    /// dead-lettered for an infrastructure fault.
    async fn settle(&self, message: MessageEnvelope) -> Result<DeliveryOutcome, StoreError> {
        match self.runner.deliver(&self.queue, message.clone()).await {
            Ok(outcome) => {
                debug!(queue = %self.queue, ?outcome, "Delivered message");
                Ok(outcome)
            }
            Err(err) => {
                let message_id = message.message_id;
                match self.receiver.abandon(&self.queue, message).await {
                    Ok(()) => warn!(
                        queue = %self.queue,
                        %message_id,
                        error = %err,
                        "Delivery failed, message returned to queue"
                    ),
                    Err(requeue_err) => error!(
                        queue = %self.queue,
                        %message_id,
                        error = %err,
                        requeue_error = %requeue_err,
                        "Delivery failed and message could not be returned to queue"
                    ),
                }
                Err(err)
            }
        }
    }

    /// Polls until `shutdown` is cancelled. A message already being
    /// delivered is finished first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            queue = %self.queue,
            consumer = self.runner.consumer_name(),
            "Consumer worker started"
        );
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let idle = match self.receiver.receive(&self.queue).await {
                // Back off after a store failure instead of spinning on it.
                Ok(Some(message)) => self.settle(message).await.is_err(),
                Ok(None) => true,
                Err(err) => {
                    error!(queue = %self.queue, error = %err, "Failed to receive from queue");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_interval) => {}
                }
            }
        }
        info!(queue = %self.queue, "Consumer worker stopped");
    }
}

impl std::fmt::Debug for ConsumerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerWorker")
            .field("queue", &self.queue)
            .field("runner", &self.runner)
            .field("idle_interval", &self.idle_interval)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Consumer, ConsumerError, RetryPolicy};
    use async_trait::async_trait;
    use chrono::Utc;
    use common::{EventId, SystemClock};
    use message_store::{
        InMemoryBroker, InMemoryDeadLetterStore, InMemoryProcessedMessages, ProcessedMessages,
        QueueSender,
    };
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use uuid::Uuid;

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Consumer for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _message: &MessageEnvelope) -> Result<(), ConsumerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Processed-message log whose backing store can be switched off.
    #[derive(Default)]
    struct FlakyLog {
        inner: InMemoryProcessedMessages,
        down: AtomicBool,
    }

    impl FlakyLog {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("db down".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ProcessedMessages for FlakyLog {
        async fn is_processed(&self, consumer: &str, message_id: EventId) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.is_processed(consumer, message_id).await
        }

        async fn mark_processed(&self, consumer: &str, message_id: EventId) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.mark_processed(consumer, message_id).await
        }
    }

    fn message() -> MessageEnvelope {
        MessageEnvelope::builder()
            .event_type("CartCreated")
            .aggregate_type("Cart")
            .aggregate_id(Uuid::new_v4())
            .occurred_at(Utc::now())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        log: Arc<FlakyLog>,
        dead_letters: Arc<InMemoryDeadLetterStore>,
        consumer: Arc<Counting>,
        worker: ConsumerWorker,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(InMemoryBroker::new());
        let log = Arc::new(FlakyLog::default());
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let consumer = Arc::new(Counting {
            calls: AtomicU32::new(0),
        });
        let runner = DeliveryRunner::new(
            consumer.clone(),
            log.clone(),
            dead_letters.clone(),
            Arc::new(SystemClock),
        )
        .with_policy(RetryPolicy::immediate(3));
        let worker = ConsumerWorker::new("cart-summary", broker.clone(), runner);
        Fixture {
            broker,
            log,
            dead_letters,
            consumer,
            worker,
        }
    }

    #[tokio::test]
    async fn store_failure_puts_the_message_back() {
        let f = fixture();
        let sent = message();
        f.broker.send("cart-summary", sent.clone()).await.unwrap();
        f.log.down.store(true, Ordering::SeqCst);

        let result = f.worker.run_once().await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(f.broker.queue_depth("cart-summary").await, 1);
        assert!(f.dead_letters.is_empty().await);
        assert_eq!(f.consumer.calls.load(Ordering::SeqCst), 0);

        f.log.down.store(false, Ordering::SeqCst);
        assert_eq!(f.worker.run_once().await.unwrap(), 1);
        assert_eq!(f.broker.queue_depth("cart-summary").await, 0);
        assert_eq!(f.consumer.calls.load(Ordering::SeqCst), 1);
        assert!(f.log.inner.is_processed("counting", sent.message_id).await.unwrap());
    }

    #[tokio::test]
    async fn drained_queue_settles_every_message() {
        let f = fixture();
        for _ in 0..3 {
            f.broker.send("cart-summary", message()).await.unwrap();
        }

        assert_eq!(f.worker.run_once().await.unwrap(), 3);
        assert_eq!(f.worker.run_once().await.unwrap(), 0);
        assert_eq!(f.consumer.calls.load(Ordering::SeqCst), 3);
    }
}
