use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    AggregateRecord, AggregateStore, ChangeSet, CommitReceipt, DeadLetterRecord, DeadLetterStatus,
    DeadLetterStore, EventId, MessageEnvelope, NewDeadLetter, OutboxStatus, ProcessedMessages,
    PublishChannel, QueueReceiver, QueueSender, Result, StoreError,
};

#[derive(Debug, Clone)]
struct OutboxEntry {
    envelope: MessageEnvelope,
    status: OutboxStatus,
    attempts: u32,
    last_error: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct AggregateState {
    records: HashMap<(String, Uuid), AggregateRecord>,
    outbox: Vec<OutboxEntry>,
}

/// In-memory aggregate store for tests and local runs.
///
/// Commits apply under one write lock, which gives the same all-or-nothing
/// visibility as the PostgreSQL transaction.
#[derive(Clone, Default)]
pub struct InMemoryAggregateStore {
    state: Arc<RwLock<AggregateState>>,
    fail_commits: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryAggregateStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent commit fail with a transient error.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn outbox_len(&self) -> usize {
        self.state.read().await.outbox.len()
    }

    pub async fn outbox_status(&self, message_id: EventId) -> Option<OutboxStatus> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .find(|entry| entry.envelope.message_id == message_id)
            .map(|entry| entry.status)
    }

    /// Failed publishes counted against an outbox row, and the last reason.
    pub async fn outbox_attempts(&self, message_id: EventId) -> Option<(u32, Option<String>)> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .find(|entry| entry.envelope.message_id == message_id)
            .map(|entry| (entry.attempts, entry.last_error.clone()))
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }

        let mut state = self.state.write().await;
        let receipt = CommitReceipt {
            aggregates: changes.records.len(),
            outbox_messages: changes.outbox.len(),
        };

        for record in &changes.records {
            let stored = state
                .records
                .get(&(record.aggregate_type.clone(), record.aggregate_id))
                .map_or(0, |existing| existing.version);
            if stored != record.expected_version() {
                return Err(StoreError::Conflict {
                    aggregate_type: record.aggregate_type.clone(),
                    aggregate_id: record.aggregate_id,
                    expected: record.expected_version(),
                });
            }
        }

        for record in changes.records {
            let key = (record.aggregate_type.clone(), record.aggregate_id);
            state.records.insert(key, record);
        }
        state
            .outbox
            .extend(changes.outbox.into_iter().map(|envelope| OutboxEntry {
                envelope,
                status: OutboxStatus::Pending,
                attempts: 0,
                last_error: None,
                published_at: None,
            }));

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(receipt)
    }

    async fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<AggregateRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(&(aggregate_type.to_string(), aggregate_id))
            .cloned())
    }

    async fn pending_outbox(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageEnvelope>> {
        let state = self.state.read().await;
        let mut pending: Vec<_> = state
            .outbox
            .iter()
            .filter(|entry| {
                entry.status == OutboxStatus::Pending && entry.envelope.occurred_at < before
            })
            .map(|entry| entry.envelope.clone())
            .collect();
        pending.sort_by_key(|envelope| envelope.occurred_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_published(
        &self,
        message_ids: &[EventId],
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        let ids: HashSet<_> = message_ids.iter().copied().collect();
        let mut state = self.state.write().await;
        for entry in state
            .outbox
            .iter_mut()
            .filter(|entry| ids.contains(&entry.envelope.message_id))
        {
            entry.status = OutboxStatus::Published;
            entry.published_at = Some(published_at);
        }
        Ok(())
    }

    async fn record_publish_failure(
        &self,
        message_id: EventId,
        reason: &str,
        permanent: bool,
        max_attempts: u32,
    ) -> Result<Option<OutboxStatus>> {
        let mut state = self.state.write().await;
        let Some(entry) = state.outbox.iter_mut().find(|entry| {
            entry.envelope.message_id == message_id && entry.status == OutboxStatus::Pending
        }) else {
            return Ok(None);
        };

        entry.attempts += 1;
        entry.last_error = Some(reason.to_string());
        if permanent || entry.attempts >= max_attempts {
            entry.status = OutboxStatus::Failed;
        }
        Ok(Some(entry.status))
    }
}

#[derive(Debug, Clone)]
struct Binding {
    queue: String,
    event_types: Option<HashSet<String>>,
}

impl Binding {
    fn matches(&self, event_type: &str) -> bool {
        self.event_types
            .as_ref()
            .is_none_or(|types| types.contains(event_type))
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    published: Vec<MessageEnvelope>,
    bindings: Vec<Binding>,
    queues: HashMap<String, VecDeque<MessageEnvelope>>,
    rejected_types: HashSet<String>,
}

/// In-memory message broker: a publish channel that routes every message to
/// the queues bound to its event type, plus point-to-point queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    unavailable: Arc<AtomicBool>,
    latency: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every publish, which makes concurrent fan-out observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Routes every published message to `queue`.
    pub async fn bind(&self, queue: impl Into<String>) {
        self.state.lock().await.bindings.push(Binding {
            queue: queue.into(),
            event_types: None,
        });
    }

    /// Routes messages of the given event types to `queue`.
    pub async fn bind_event_types<I, T>(&self, queue: impl Into<String>, event_types: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.state.lock().await.bindings.push(Binding {
            queue: queue.into(),
            event_types: Some(event_types.into_iter().map(Into::into).collect()),
        });
    }

    /// Simulates a broker outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes publishes of one event type fail.
    pub async fn reject_event_type(&self, event_type: impl Into<String>) {
        self.state
            .lock()
            .await
            .rejected_types
            .insert(event_type.into());
    }

    pub async fn published(&self) -> Vec<MessageEnvelope> {
        self.state.lock().await.published.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.state.lock().await.published.len()
    }

    pub async fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Highest number of publishes observed in flight at the same time.
    pub fn max_concurrent_publishes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishChannel for InMemoryBroker {
    async fn publish(&self, message: &MessageEnvelope) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::ChannelUnavailable(
                "in-memory broker is down".to_string(),
            ));
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().await;
        if state.rejected_types.contains(&message.event_type) {
            return Err(StoreError::PublishRejected {
                message_id: message.message_id,
                reason: format!("event type {} is rejected", message.event_type),
            });
        }

        state.published.push(message.clone());
        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|binding| binding.matches(&message.event_type))
            .map(|binding| binding.queue.clone())
            .collect();
        for queue in targets {
            state
                .queues
                .entry(queue)
                .or_default()
                .push_back(message.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl QueueSender for InMemoryBroker {
    async fn send(&self, queue: &str, message: MessageEnvelope) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::ChannelUnavailable(
                "in-memory broker is down".to_string(),
            ));
        }
        self.state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        Ok(())
    }
}

#[async_trait]
impl QueueReceiver for InMemoryBroker {
    async fn receive(&self, queue: &str) -> Result<Option<MessageEnvelope>> {
        Ok(self
            .state
            .lock()
            .await
            .queues
            .get_mut(queue)
            .and_then(VecDeque::pop_front))
    }

    async fn abandon(&self, queue: &str, message: MessageEnvelope) -> Result<()> {
        self.state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_front(message);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DeadLetterState {
    queues: HashMap<String, BTreeMap<i64, DeadLetterRecord>>,
    sequences: HashMap<String, i64>,
}

/// In-memory dead-letter store.
#[derive(Clone, Default)]
pub struct InMemoryDeadLetterStore {
    state: Arc<RwLock<DeadLetterState>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of parked messages across all queues.
    pub async fn len(&self) -> usize {
        self.state.read().await.queues.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn put(&self, entry: NewDeadLetter) -> Result<i64> {
        let mut state = self.state.write().await;
        let counter = state.sequences.entry(entry.queue_name.clone()).or_insert(0);
        *counter += 1;
        let sequence = *counter;

        let record = DeadLetterRecord {
            queue_name: entry.queue_name.clone(),
            sequence_number: sequence,
            envelope: entry.envelope,
            failure_count: entry.failure_count,
            retry_attempts: entry.retry_attempts,
            last_failure_reason: entry.reason,
            status: DeadLetterStatus::Pending,
            first_failed_at: entry.failed_at,
            last_failed_at: entry.failed_at,
        };
        state
            .queues
            .entry(entry.queue_name)
            .or_default()
            .insert(sequence, record);
        Ok(sequence)
    }

    async fn get(&self, queue: &str, sequence: i64) -> Result<Option<DeadLetterRecord>> {
        let state = self.state.read().await;
        Ok(state
            .queues
            .get(queue)
            .and_then(|records| records.get(&sequence))
            .cloned())
    }

    async fn delete(&self, queue: &str, sequence: i64) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .queues
            .get_mut(queue)
            .and_then(|records| records.remove(&sequence))
            .is_some())
    }

    async fn update_status(
        &self,
        queue: &str,
        sequence: i64,
        status: DeadLetterStatus,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .queues
            .get_mut(queue)
            .and_then(|records| records.get_mut(&sequence))
        {
            Some(record) => {
                record.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        queue: &str,
        sequence: i64,
        failures: i32,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .queues
            .get_mut(queue)
            .and_then(|records| records.get_mut(&sequence))
        {
            Some(record) => {
                record.failure_count += failures;
                record.retry_attempts += failures;
                record.last_failure_reason = reason.to_string();
                record.last_failed_at = failed_at;
                record.status = DeadLetterStatus::Dead;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, queue: &str, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        let state = self.state.read().await;
        Ok(state
            .queues
            .get(queue)
            .map(|records| records.values().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory processed-message log.
#[derive(Clone, Default)]
pub struct InMemoryProcessedMessages {
    seen: Arc<RwLock<HashSet<(String, EventId)>>>,
}

impl InMemoryProcessedMessages {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedMessages for InMemoryProcessedMessages {
    async fn is_processed(&self, consumer: &str, message_id: EventId) -> Result<bool> {
        Ok(self
            .seen
            .read()
            .await
            .contains(&(consumer.to_string(), message_id)))
    }

    async fn mark_processed(&self, consumer: &str, message_id: EventId) -> Result<bool> {
        Ok(self
            .seen
            .write()
            .await
            .insert((consumer.to_string(), message_id)))
    }
}
