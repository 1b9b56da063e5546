use thiserror::Error;

use crate::EventId;

/// Errors raised by stores and message channels.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The broker or channel cannot be reached right now.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// The channel refused one specific message.
    #[error("Publish rejected for message {message_id}: {reason}")]
    PublishRejected { message_id: EventId, reason: String },

    /// Another writer changed the aggregate since it was loaded.
    #[error("Concurrency conflict on {aggregate_type} {aggregate_id}: expected version {expected}")]
    Conflict {
        aggregate_type: String,
        aggregate_id: uuid::Uuid,
        expected: i64,
    },

    /// The backing store cannot be reached right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// An envelope was built without one of its required fields.
    #[error("Incomplete envelope: missing {0}")]
    IncompleteEnvelope(&'static str),

    /// A stored value could not be mapped back into its type.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same operation later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::ChannelUnavailable(_) | StoreError::Unavailable(_) => true,
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            StoreError::PublishRejected { .. }
            | StoreError::Conflict { .. }
            | StoreError::IncompleteEnvelope(_)
            | StoreError::CorruptRecord(_)
            | StoreError::Migration(_)
            | StoreError::Serialization(_) => false,
        }
    }
}

/// Result type for store and channel operations.
pub type Result<T> = std::result::Result<T, StoreError>;
