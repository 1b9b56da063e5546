use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CorrelationId, EventId, StoreError};

/// Header naming the dead-letter queue a resubmitted message came from.
pub const DEAD_LETTER_QUEUE_HEADER: &str = "x-dead-letter-queue";

/// Header carrying the dead-letter sequence number of a resubmitted message.
pub const DEAD_LETTER_SEQUENCE_HEADER: &str = "x-dead-letter-sequence";

fn default_schema_version() -> u16 {
    1
}

/// A serialized domain event as it travels through the outbox, the publish
/// channel and the consumer queues.
///
/// Field names are part of the wire contract. Fields added after the first
/// schema version carry serde defaults so older producers stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique identifier for this message; equal to the domain event id.
    pub message_id: EventId,

    /// The type of the event (e.g., "ProductAddedToCart").
    pub event_type: String,

    /// Version of the payload schema for `event_type`.
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,

    /// The type of aggregate that raised the event (e.g., "Cart").
    pub aggregate_type: String,

    /// The aggregate that raised the event.
    pub aggregate_id: Uuid,

    /// Correlation id of the request that produced the event.
    pub correlation_id: CorrelationId,

    /// When the event was raised.
    pub occurred_at: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Transport headers; never part of the domain payload.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl MessageEnvelope {
    /// Creates a new message envelope builder.
    pub fn builder() -> MessageEnvelopeBuilder {
        MessageEnvelopeBuilder::default()
    }

    /// Deserializes the payload into a concrete event type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Returns a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Returns a copy of this envelope with an extra header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// The dead-letter address this message was resubmitted from, if any.
    pub fn dead_letter_origin(&self) -> Option<(&str, i64)> {
        let queue = self.header(DEAD_LETTER_QUEUE_HEADER)?;
        let sequence = self.header(DEAD_LETTER_SEQUENCE_HEADER)?.parse().ok()?;
        Some((queue, sequence))
    }
}

/// Builder for constructing message envelopes.
#[derive(Debug, Default)]
pub struct MessageEnvelopeBuilder {
    message_id: Option<EventId>,
    event_type: Option<String>,
    schema_version: Option<u16>,
    aggregate_type: Option<String>,
    aggregate_id: Option<Uuid>,
    correlation_id: Option<CorrelationId>,
    occurred_at: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    headers: BTreeMap<String, String>,
}

impl MessageEnvelopeBuilder {
    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn message_id(mut self, id: EventId) -> Self {
        self.message_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the payload schema version. Defaults to 1.
    pub fn schema_version(mut self, version: u16) -> Self {
        self.schema_version = Some(version);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: impl Into<Uuid>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    /// Sets the correlation ID. If not set, a new chain is started.
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Sets the occurrence time. If not set, the current time will be used.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Builds the envelope, failing on the first missing required field.
    pub fn build(self) -> Result<MessageEnvelope, StoreError> {
        Ok(MessageEnvelope {
            message_id: self.message_id.unwrap_or_default(),
            event_type: self
                .event_type
                .ok_or(StoreError::IncompleteEnvelope("event_type"))?,
            schema_version: self.schema_version.unwrap_or_else(default_schema_version),
            aggregate_type: self
                .aggregate_type
                .ok_or(StoreError::IncompleteEnvelope("aggregate_type"))?,
            aggregate_id: self
                .aggregate_id
                .ok_or(StoreError::IncompleteEnvelope("aggregate_id"))?,
            correlation_id: self.correlation_id.unwrap_or_default(),
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            payload: self
                .payload
                .ok_or(StoreError::IncompleteEnvelope("payload"))?,
            headers: self.headers,
        })
    }
}
