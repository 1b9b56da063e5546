use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EventId, MessageEnvelope, Result};

/// Persisted state of one aggregate instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub state: serde_json::Value,
    /// Version this write produces. `1` creates the aggregate; any higher
    /// value only applies on top of `version - 1`.
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
    /// Given up on: rejected by the channel, or out of attempts.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OutboxStatus::Pending),
            "published" => Some(OutboxStatus::Published),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

impl AggregateRecord {
    /// Version the stored row must have for this write to apply.
    pub fn expected_version(&self) -> i64 {
        self.version - 1
    }
}

/// Everything one unit of work writes in a single transaction: aggregate
/// state upserts and the outbox rows for the events those aggregates raised.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub records: Vec<AggregateRecord>,
    pub outbox: Vec<MessageEnvelope>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.outbox.is_empty()
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub aggregates: usize,
    pub outbox_messages: usize,
}

/// Aggregate persistence with a transactional outbox.
///
/// `commit` is all-or-nothing: either every record and every outbox row is
/// durable, or none is.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`](crate::StoreError::Conflict) and
    /// writes nothing when any record's stored version is not
    /// `record.version - 1` (absent counts as 0).
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt>;

    async fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<AggregateRecord>>;

    /// Outbox messages still pending whose event occurred before `before`,
    /// oldest first.
    async fn pending_outbox(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageEnvelope>>;

    /// Marks outbox rows as delivered. Unknown ids are ignored.
    async fn mark_published(
        &self,
        message_ids: &[EventId],
        published_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Counts one failed publish of a pending row. The row moves to
    /// [`OutboxStatus::Failed`] when `permanent` is set or it has now failed
    /// `max_attempts` times. Returns the row's new status, or `None` when no
    /// pending row has that id.
    async fn record_publish_failure(
        &self,
        message_id: EventId,
        reason: &str,
        permanent: bool,
        max_attempts: u32,
    ) -> Result<Option<OutboxStatus>>;
}
