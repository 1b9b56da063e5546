//! Delivers one message to a consumer: dedup, bounded retries with backoff,
//! and dead-lettering when the message cannot be processed.

use std::sync::Arc;

use common::Clock;
use message_store::{
    DEAD_LETTER_QUEUE_HEADER, DEAD_LETTER_SEQUENCE_HEADER, DeadLetterStore, MessageEnvelope,
    NewDeadLetter, ProcessedMessages, StoreError,
};
use tracing::{debug, error, info, warn};

use crate::{Consumer, ConsumerError, RetryPolicy};

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handled successfully after `attempts` tries.
    Processed { attempts: u32 },
    /// Already processed earlier; the consumer was not invoked.
    Duplicate,
    /// Parked in the dead-letter store.
    DeadLettered {
        queue: String,
        sequence: i64,
        attempts: u32,
        permanent: bool,
    },
}

/// Runs a [`Consumer`] under a [`RetryPolicy`].
#[derive(Clone)]
pub struct DeliveryRunner {
    consumer: Arc<dyn Consumer>,
    processed: Arc<dyn ProcessedMessages>,
    dead_letters: Arc<dyn DeadLetterStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl DeliveryRunner {
    pub fn new(
        consumer: Arc<dyn Consumer>,
        processed: Arc<dyn ProcessedMessages>,
        dead_letters: Arc<dyn DeadLetterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            consumer,
            processed,
            dead_letters,
            clock,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn consumer_name(&self) -> &'static str {
        self.consumer.name()
    }

    /// Delivers `message`, received from `queue`, to the consumer.
    ///
    /// Errors only when the processed-message log or the dead-letter store
    /// itself fails; consumer failures end up in [`DeliveryOutcome`].
    #[tracing::instrument(
        skip(self, message),
        fields(consumer = self.consumer.name(), event_id = %message.message_id, event_type = %message.event_type)
    )]
    pub async fn deliver(
        &self,
        queue: &str,
        message: MessageEnvelope,
    ) -> Result<DeliveryOutcome, StoreError> {
        let name = self.consumer.name();

        if self.processed.is_processed(name, message.message_id).await? {
            debug!("Skipping already processed message");
            self.settle_replay(&message).await?;
            return Ok(DeliveryOutcome::Duplicate);
        }

        let mut attempt = 0;
        let failure = loop {
            attempt += 1;
            match self.consumer.handle(&message).await {
                Ok(()) => break None,
                Err(err) if err.is_permanent() => break Some(err),
                Err(err) if !self.policy.allows_retry_after(attempt) => break Some(err),
                Err(err) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Consumer failed, retrying after delay"
                    );
                    metrics::counter!("consumer_retries_total", "consumer" => name).increment(1);
                    tokio::time::sleep(delay).await;
                }
            }
        };

        match failure {
            None => {
                self.processed.mark_processed(name, message.message_id).await?;
                self.settle_replay(&message).await?;
                metrics::counter!("consumer_messages_processed_total", "consumer" => name)
                    .increment(1);
                if attempt > 1 {
                    info!(attempt, "Consumer succeeded after retry");
                }
                Ok(DeliveryOutcome::Processed { attempts: attempt })
            }
            Some(err) => self.dead_letter(queue, message, attempt, err).await,
        }
    }

    /// A replayed dead letter that is now processed leaves the store.
    async fn settle_replay(&self, message: &MessageEnvelope) -> Result<(), StoreError> {
        if let Some((queue, sequence)) = message.dead_letter_origin()
            && self.dead_letters.delete(queue, sequence).await?
        {
            info!(queue, sequence, "Replayed dead letter processed");
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        queue: &str,
        mut message: MessageEnvelope,
        attempts: u32,
        err: ConsumerError,
    ) -> Result<DeliveryOutcome, StoreError> {
        let permanent = err.is_permanent();
        let reason = err.to_string();
        let failures = i32::try_from(attempts).unwrap_or(i32::MAX);
        let now = self.clock.now();

        if permanent {
            warn!(attempts, reason = %reason, "Permanent failure, dead-lettering without retry");
        } else {
            error!(attempts, reason = %reason, "Retries exhausted, dead-lettering");
        }
        metrics::counter!("dead_letters_total", "queue" => queue.to_string()).increment(1);

        if let Some((origin_queue, sequence)) = message.dead_letter_origin() {
            let origin_queue = origin_queue.to_string();
            if self
                .dead_letters
                .record_failure(&origin_queue, sequence, failures, &reason, now)
                .await?
            {
                return Ok(DeliveryOutcome::DeadLettered {
                    queue: origin_queue,
                    sequence,
                    attempts,
                    permanent,
                });
            }
        }

        message.headers.remove(DEAD_LETTER_QUEUE_HEADER);
        message.headers.remove(DEAD_LETTER_SEQUENCE_HEADER);
        let sequence = self
            .dead_letters
            .put(NewDeadLetter {
                queue_name: queue.to_string(),
                envelope: message,
                failure_count: failures,
                retry_attempts: failures - 1,
                reason,
                failed_at: now,
            })
            .await?;

        Ok(DeliveryOutcome::DeadLettered {
            queue: queue.to_string(),
            sequence,
            attempts,
            permanent,
        })
    }
}

impl std::fmt::Debug for DeliveryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryRunner")
            .field("consumer", &self.consumer.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use common::SystemClock;
    use message_store::{
        DeadLetterStatus, InMemoryDeadLetterStore, InMemoryProcessedMessages,
    };
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    /// Fails according to a script, then succeeds.
    struct Scripted {
        script: Mutex<VecDeque<ConsumerError>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(failures: Vec<ConsumerError>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(failures.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Consumer for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn handle(&self, _message: &MessageEnvelope) -> Result<(), ConsumerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
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

    fn runner(consumer: Arc<Scripted>, dead_letters: Arc<InMemoryDeadLetterStore>) -> DeliveryRunner {
        DeliveryRunner::new(
            consumer,
            Arc::new(InMemoryProcessedMessages::new()),
            dead_letters,
            Arc::new(SystemClock),
        )
        .with_policy(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn permanent_failure_is_dead_lettered_without_retries() {
        let consumer = Scripted::new(vec![ConsumerError::permanent("unprocessable")]);
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let runner = runner(consumer.clone(), dead_letters.clone());

        let outcome = runner.deliver("orders-queue", message()).await.unwrap();

        let DeliveryOutcome::DeadLettered {
            sequence,
            attempts,
            permanent,
            ..
        } = outcome
        else {
            panic!("expected dead letter, got {outcome:?}");
        };
        assert_eq!(attempts, 1);
        assert!(permanent);
        assert_eq!(consumer.calls(), 1);

        let record = dead_letters.get("orders-queue", sequence).await.unwrap().unwrap();
        assert_eq!(record.retry_attempts, 0);
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.status, DeadLetterStatus::Pending);
    }

    #[tokio::test]
    async fn transient_failures_within_the_bound_are_never_dead_lettered() {
        let consumer = Scripted::new(vec![
            ConsumerError::transient("timeout"),
            ConsumerError::transient("timeout"),
        ]);
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let runner = runner(consumer.clone(), dead_letters.clone());

        let outcome = runner.deliver("orders-queue", message()).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Processed { attempts: 3 });
        assert_eq!(consumer.calls(), 3);
        assert!(dead_letters.is_empty().await);
    }

    #[tokio::test]
    async fn exhausted_retries_are_dead_lettered_with_attempt_counts() {
        let consumer = Scripted::new(vec![
            ConsumerError::transient("1"),
            ConsumerError::transient("2"),
            ConsumerError::transient("3"),
        ]);
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let runner = runner(consumer.clone(), dead_letters.clone());

        let outcome = runner.deliver("orders-queue", message()).await.unwrap();

        assert!(matches!(
            outcome,
            DeliveryOutcome::DeadLettered { attempts: 3, permanent: false, .. }
        ));
        let record = dead_letters.list("orders-queue", 10).await.unwrap().remove(0);
        assert_eq!(record.failure_count, 3);
        assert_eq!(record.retry_attempts, 2);
        assert_eq!(record.last_failure_reason, "Transient failure: 3");
    }

    #[tokio::test]
    async fn redelivery_is_skipped() {
        let consumer = Scripted::new(vec![]);
        let runner = runner(consumer.clone(), Arc::new(InMemoryDeadLetterStore::new()));
        let message = message();

        runner.deliver("q", message.clone()).await.unwrap();
        let second = runner.deliver("q", message).await.unwrap();

        assert_eq!(second, DeliveryOutcome::Duplicate);
        assert_eq!(consumer.calls(), 1);
    }

    #[tokio::test]
    async fn failed_replay_marks_the_original_record_dead() {
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let original = message();
        let sequence = dead_letters
            .put(NewDeadLetter {
                queue_name: "q".into(),
                envelope: original.clone(),
                failure_count: 1,
                retry_attempts: 0,
                reason: "first".into(),
                failed_at: Utc::now(),
            })
            .await
            .unwrap();
        let replay = original
            .with_header(DEAD_LETTER_QUEUE_HEADER, "q")
            .with_header(DEAD_LETTER_SEQUENCE_HEADER, sequence.to_string());

        let consumer = Scripted::new(vec![ConsumerError::permanent("still bad")]);
        let outcome = runner(consumer, dead_letters.clone())
            .deliver("q", replay)
            .await
            .unwrap();

        assert!(matches!(outcome, DeliveryOutcome::DeadLettered { sequence: s, .. } if s == sequence));
        assert_eq!(dead_letters.len().await, 1);
        let record = dead_letters.get("q", sequence).await.unwrap().unwrap();
        assert_eq!(record.status, DeadLetterStatus::Dead);
        assert_eq!(record.failure_count, 2);
        assert_eq!(record.last_failure_reason, "Permanent failure: still bad");
    }

    #[tokio::test]
    async fn successful_replay_deletes_the_record() {
        let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
        let original = message();
        let sequence = dead_letters
            .put(NewDeadLetter {
                queue_name: "q".into(),
                envelope: original.clone(),
                failure_count: 3,
                retry_attempts: 2,
                reason: "timeout".into(),
                failed_at: Utc::now(),
            })
            .await
            .unwrap();
        let replay = original
            .with_header(DEAD_LETTER_QUEUE_HEADER, "q")
            .with_header(DEAD_LETTER_SEQUENCE_HEADER, sequence.to_string());

        let outcome = runner(Scripted::new(vec![]), dead_letters.clone())
            .deliver("q", replay)
            .await
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Processed { attempts: 1 });
        assert!(dead_letters.is_empty().await);
    }
}
