pub mod channel;
pub mod dead_letter;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod processed;
pub mod store;

pub use channel::{PublishChannel, QueueReceiver, QueueSender};
pub use common::{CorrelationId, EventId};
pub use dead_letter::{DeadLetterRecord, DeadLetterStatus, DeadLetterStore, NewDeadLetter};
pub use envelope::{
    DEAD_LETTER_QUEUE_HEADER, DEAD_LETTER_SEQUENCE_HEADER, MessageEnvelope,
    MessageEnvelopeBuilder,
};
pub use error::{Result, StoreError};
pub use memory::{
    InMemoryAggregateStore, InMemoryBroker, InMemoryDeadLetterStore, InMemoryProcessedMessages,
};
pub use postgres::PostgresMessageStore;
pub use processed::ProcessedMessages;
pub use store::{AggregateRecord, AggregateStore, ChangeSet, CommitReceipt, OutboxStatus};
