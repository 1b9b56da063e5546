//! Domain events and their metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use common::{CorrelationId, EventId};
use message_store::MessageEnvelope;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Trait for domain event payloads.
///
/// Payloads represent facts that have happened in the domain. They are named
/// in past tense, and new fields must be optional with a serde default so
/// consumers on an older schema keep working.
pub trait EventPayload:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Returns the event type name.
    ///
    /// Used as the routing key on the publish channel.
    fn event_type(&self) -> &'static str;

    /// Payload schema version for this event type.
    fn schema_version(&self) -> u16 {
        1
    }
}

/// Envelope fields every event carries regardless of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: CorrelationId,
}

/// An immutable domain event: metadata plus payload.
///
/// There are no setters. The correlation id is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent<P> {
    metadata: EventMetadata,
    payload: P,
}

impl<P: EventPayload> DomainEvent<P> {
    pub fn new(metadata: EventMetadata, payload: P) -> Self {
        Self { metadata, payload }
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn event_id(&self) -> EventId {
        self.metadata.event_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.metadata.correlation_id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Serializes the event for the outbox and the publish channel.
    pub fn to_envelope(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<MessageEnvelope, serde_json::Error> {
        Ok(MessageEnvelope {
            message_id: self.metadata.event_id,
            event_type: self.payload.event_type().to_string(),
            schema_version: self.payload.schema_version(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            correlation_id: self.metadata.correlation_id,
            occurred_at: self.metadata.occurred_at,
            payload: serde_json::to_value(&self.payload)?,
            headers: Default::default(),
        })
    }
}

/// What an aggregate needs to raise events during one command: the
/// request's correlation id and the current time from the injected clock.
#[derive(Debug, Clone, Copy)]
pub struct EventContext {
    pub correlation_id: CorrelationId,
    pub now: DateTime<Utc>,
}

impl EventContext {
    pub fn new(correlation_id: CorrelationId, now: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            now,
        }
    }

    /// Wraps `payload` in a fresh event stamped from this context.
    pub fn raise<P: EventPayload>(&self, payload: P) -> DomainEvent<P> {
        DomainEvent::new(
            EventMetadata {
                event_id: EventId::new(),
                occurred_at: self.now,
                correlation_id: self.correlation_id,
            },
            payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pinged {
        count: u32,
    }

    impl EventPayload for Pinged {
        fn event_type(&self) -> &'static str {
            "Pinged"
        }

        fn schema_version(&self) -> u16 {
            3
        }
    }

    #[test]
    fn raised_events_carry_context_metadata() {
        let correlation_id = CorrelationId::new();
        let now = Utc::now();
        let context = EventContext::new(correlation_id, now);

        let first = context.raise(Pinged { count: 1 });
        let second = context.raise(Pinged { count: 1 });

        assert_eq!(first.correlation_id(), correlation_id);
        assert_eq!(first.occurred_at(), now);
        assert_ne!(first.event_id(), second.event_id());
    }

    #[test]
    fn envelope_carries_type_version_and_payload() {
        let context = EventContext::new(CorrelationId::new(), Utc::now());
        let event = context.raise(Pinged { count: 7 });
        let aggregate_id = Uuid::new_v4();

        let envelope = event.to_envelope("Pinger", aggregate_id).unwrap();

        assert_eq!(envelope.message_id, event.event_id());
        assert_eq!(envelope.event_type, "Pinged");
        assert_eq!(envelope.schema_version, 3);
        assert_eq!(envelope.aggregate_type, "Pinger");
        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.correlation_id, event.correlation_id());
        assert_eq!(envelope.decode_payload::<Pinged>().unwrap(), Pinged { count: 7 });
        assert!(envelope.headers.is_empty());
    }
}
