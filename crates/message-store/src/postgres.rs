use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateRecord, AggregateStore, ChangeSet, CommitReceipt, DeadLetterRecord, DeadLetterStatus,
    DeadLetterStore, EventId, MessageEnvelope, NewDeadLetter, OutboxStatus, ProcessedMessages,
    Result, StoreError,
};

/// PostgreSQL-backed aggregate store, outbox, dead-letter store and
/// processed-message log.
#[derive(Clone)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<AggregateRecord> {
        Ok(AggregateRecord {
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            state: row.try_get("state")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_dead_letter(row: PgRow) -> Result<DeadLetterRecord> {
        let status: String = row.try_get("status")?;
        let status = DeadLetterStatus::parse(&status)
            .ok_or_else(|| StoreError::CorruptRecord(format!("unknown status {status}")))?;
        let envelope: serde_json::Value = row.try_get("envelope")?;

        Ok(DeadLetterRecord {
            queue_name: row.try_get("queue_name")?,
            sequence_number: row.try_get("sequence_number")?,
            envelope: serde_json::from_value(envelope)?,
            failure_count: row.try_get("failure_count")?,
            retry_attempts: row.try_get("retry_attempts")?,
            last_failure_reason: row.try_get("last_failure_reason")?,
            status,
            first_failed_at: row.try_get("first_failed_at")?,
            last_failed_at: row.try_get("last_failed_at")?,
        })
    }
}

#[async_trait]
impl AggregateStore for PostgresMessageStore {
    #[tracing::instrument(skip(self, changes), fields(records = changes.records.len(), outbox = changes.outbox.len()))]
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt> {
        let receipt = CommitReceipt {
            aggregates: changes.records.len(),
            outbox_messages: changes.outbox.len(),
        };

        let started = std::time::Instant::now();
        let mut tx = self.pool.begin().await?;

        for record in &changes.records {
            let result = if record.version == 1 {
                sqlx::query(
                    r#"
                    INSERT INTO aggregates (aggregate_type, aggregate_id, state, version, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (aggregate_type, aggregate_id) DO NOTHING
                    "#,
                )
                .bind(&record.aggregate_type)
                .bind(record.aggregate_id)
                .bind(&record.state)
                .bind(record.version)
                .bind(record.created_at)
                .bind(record.updated_at)
                .execute(&mut *tx)
                .await?
            } else {
                sqlx::query(
                    r#"
                    UPDATE aggregates
                    SET state = $3, version = $4, updated_at = $5
                    WHERE aggregate_type = $1 AND aggregate_id = $2 AND version = $6
                    "#,
                )
                .bind(&record.aggregate_type)
                .bind(record.aggregate_id)
                .bind(&record.state)
                .bind(record.version)
                .bind(record.updated_at)
                .bind(record.expected_version())
                .execute(&mut *tx)
                .await?
            };

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict {
                    aggregate_type: record.aggregate_type.clone(),
                    aggregate_id: record.aggregate_id,
                    expected: record.expected_version(),
                });
            }
        }

        for envelope in &changes.outbox {
            sqlx::query(
                r#"
                INSERT INTO outbox (message_id, event_type, occurred_at, envelope, status)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(envelope.message_id.as_uuid())
            .bind(&envelope.event_type)
            .bind(envelope.occurred_at)
            .bind(serde_json::to_value(envelope)?)
            .bind(OutboxStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        metrics::histogram!("store_commit_duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("outbox_messages_written_total").increment(receipt.outbox_messages as u64);
        Ok(receipt)
    }

    async fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<AggregateRecord>> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_type, aggregate_id, state, version, created_at, updated_at
            FROM aggregates
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn pending_outbox(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MessageEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT envelope
            FROM outbox
            WHERE status = $1 AND occurred_at < $2
            ORDER BY occurred_at ASC
            LIMIT $3
            "#,
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<MessageEnvelope> {
                let envelope: serde_json::Value = row.try_get("envelope")?;
                Ok(serde_json::from_value(envelope)?)
            })
            .collect()
    }

    async fn mark_published(
        &self,
        message_ids: &[EventId],
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = message_ids.iter().map(EventId::as_uuid).collect();

        sqlx::query(
            r#"
            UPDATE outbox SET status = $1, published_at = $2
            WHERE message_id = ANY($3)
            "#,
        )
        .bind(OutboxStatus::Published.as_str())
        .bind(published_at)
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_publish_failure(
        &self,
        message_id: EventId,
        reason: &str,
        permanent: bool,
        max_attempts: u32,
    ) -> Result<Option<OutboxStatus>> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE outbox
            SET attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN $3 OR attempts + 1 >= $4 THEN $5 ELSE status END
            WHERE message_id = $1 AND status = $6
            RETURNING status
            "#,
        )
        .bind(message_id.as_uuid())
        .bind(reason)
        .bind(permanent)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(OutboxStatus::Failed.as_str())
        .bind(OutboxStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;

        status
            .map(|status| {
                OutboxStatus::parse(&status)
                    .ok_or_else(|| StoreError::CorruptRecord(format!("unknown outbox status {status}")))
            })
            .transpose()
    }
}

#[async_trait]
impl DeadLetterStore for PostgresMessageStore {
    #[tracing::instrument(skip(self, entry), fields(queue = %entry.queue_name))]
    async fn put(&self, entry: NewDeadLetter) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO dead_letter_sequences (queue_name, last_value)
            VALUES ($1, 1)
            ON CONFLICT (queue_name)
            DO UPDATE SET last_value = dead_letter_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(&entry.queue_name)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO dead_letters (
                queue_name, sequence_number, envelope, failure_count, retry_attempts,
                last_failure_reason, status, first_failed_at, last_failed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(&entry.queue_name)
        .bind(sequence)
        .bind(serde_json::to_value(&entry.envelope)?)
        .bind(entry.failure_count)
        .bind(entry.retry_attempts)
        .bind(&entry.reason)
        .bind(DeadLetterStatus::Pending.as_str())
        .bind(entry.failed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sequence)
    }

    async fn get(&self, queue: &str, sequence: i64) -> Result<Option<DeadLetterRecord>> {
        let row = sqlx::query(
            r#"
            SELECT queue_name, sequence_number, envelope, failure_count, retry_attempts,
                   last_failure_reason, status, first_failed_at, last_failed_at
            FROM dead_letters
            WHERE queue_name = $1 AND sequence_number = $2
            "#,
        )
        .bind(queue)
        .bind(sequence)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_dead_letter).transpose()
    }

    async fn delete(&self, queue: &str, sequence: i64) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM dead_letters WHERE queue_name = $1 AND sequence_number = $2")
                .bind(queue)
                .bind(sequence)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status(
        &self,
        queue: &str,
        sequence: i64,
        status: DeadLetterStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE dead_letters SET status = $3 WHERE queue_name = $1 AND sequence_number = $2",
        )
        .bind(queue)
        .bind(sequence)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_failure(
        &self,
        queue: &str,
        sequence: i64,
        failures: i32,
        reason: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dead_letters
            SET failure_count = failure_count + $3,
                retry_attempts = retry_attempts + $3,
                last_failure_reason = $4,
                last_failed_at = $5,
                status = $6
            WHERE queue_name = $1 AND sequence_number = $2
            "#,
        )
        .bind(queue)
        .bind(sequence)
        .bind(failures)
        .bind(reason)
        .bind(failed_at)
        .bind(DeadLetterStatus::Dead.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, queue: &str, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT queue_name, sequence_number, envelope, failure_count, retry_attempts,
                   last_failure_reason, status, first_failed_at, last_failed_at
            FROM dead_letters
            WHERE queue_name = $1
            ORDER BY sequence_number ASC
            LIMIT $2
            "#,
        )
        .bind(queue)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_dead_letter).collect()
    }
}

#[async_trait]
impl ProcessedMessages for PostgresMessageStore {
    async fn is_processed(&self, consumer: &str, message_id: EventId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM processed_messages WHERE consumer = $1 AND message_id = $2)",
        )
        .bind(consumer)
        .bind(message_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn mark_processed(&self, consumer: &str, message_id: EventId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_messages (consumer, message_id)
            VALUES ($1, $2)
            ON CONFLICT (consumer, message_id) DO NOTHING
            "#,
        )
        .bind(consumer)
        .bind(message_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
