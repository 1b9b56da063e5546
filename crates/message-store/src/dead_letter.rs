use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageEnvelope, Result};

/// Replay state of a dead-lettered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    /// Parked after failing processing, waiting for a replay.
    Pending,
    /// Resubmitted to its processing queue; outcome not yet known.
    Retrying,
    /// A replay failed again.
    Dead,
}

impl DeadLetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterStatus::Pending => "pending",
            DeadLetterStatus::Retrying => "retrying",
            DeadLetterStatus::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DeadLetterStatus::Pending),
            "retrying" => Some(DeadLetterStatus::Retrying),
            "dead" => Some(DeadLetterStatus::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeadLetterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message about to be parked; the store assigns its sequence number.
#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub queue_name: String,
    pub envelope: MessageEnvelope,
    /// Number of failed processing attempts.
    pub failure_count: i32,
    /// Number of those attempts that were retries of the first one.
    pub retry_attempts: i32,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// A parked message addressed by `(queue_name, sequence_number)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub queue_name: String,
    pub sequence_number: i64,
    pub envelope: MessageEnvelope,
    pub failure_count: i32,
    pub retry_attempts: i32,
    pub last_failure_reason: String,
    pub status: DeadLetterStatus,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

/// Durable home of messages that could not be processed.
///
/// Sequence numbers increase monotonically per queue and are never reused,
/// even after a record is deleted.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Parks a message and returns its sequence number.
    async fn put(&self, entry: NewDeadLetter) -> Result<i64>;

    async fn get(&self, queue: &str, sequence: i64) -> Result<Option<DeadLetterRecord>>;

    /// Removes a record. Returns whether it existed.
    async fn delete(&self, queue: &str, sequence: i64) -> Result<bool>;

    /// Returns whether the record existed.
    async fn update_status(
        &self,
        queue: &str,
        sequence: i64,
        status: DeadLetterStatus,
    ) -> Result<bool>;

    /// Adds failures from a failed replay and marks the record dead.
    /// Returns whether the record existed.
    async fn record_failure(
        &self,
        queue: &str,
        sequence: i64,
        failures: i32,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Records for one queue in sequence order.
    async fn list(&self, queue: &str, limit: usize) -> Result<Vec<DeadLetterRecord>>;
}
