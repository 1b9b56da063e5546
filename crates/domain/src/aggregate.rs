//! Core aggregate traits.
//!
//! An aggregate owns an [`EventQueue`] by composition and exposes the three
//! queue operations through [`AggregateRoot`]'s provided methods.
//! [`TrackedAggregate`] is the object-safe view the unit of work holds.

use chrono::{DateTime, Utc};
use message_store::{AggregateRecord, MessageEnvelope};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use uuid::Uuid;

use crate::event::{DomainEvent, EventPayload};

/// Ordered buffer of events raised but not yet handed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQueue<E> {
    events: Vec<E>,
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Appends in raise order. No deduplication.
    pub fn push(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn pending(&self) -> &[E] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Creation and last-modification timestamps, maintained by the unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AuditStamp {
    /// Sets `updated_at`, and `created_at` only the first time.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.updated_at = Some(now);
    }
}

/// Trait for aggregate roots.
///
/// An aggregate root is the consistency boundary for a cluster of domain
/// objects and the only thing that raises events about them. Its state is
/// persisted as JSON; the event queue must be skipped during serialization.
pub trait AggregateRoot: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: Copy + Into<Uuid> + fmt::Display + Send + Sync;

    type Event: EventPayload;

    /// Returns the aggregate type name.
    ///
    /// Used as the storage key and on every envelope this aggregate produces.
    const AGGREGATE_TYPE: &'static str;

    /// Identity, fixed at creation.
    fn id(&self) -> Self::Id;

    fn events(&self) -> &EventQueue<DomainEvent<Self::Event>>;

    fn events_mut(&mut self) -> &mut EventQueue<DomainEvent<Self::Event>>;

    /// Version of the stored state this instance was loaded from; 0 until
    /// the first commit.
    fn version(&self) -> i64;

    /// Sets the aggregate version. Called by the repository and the unit of
    /// work, never by business logic.
    fn set_version(&mut self, version: i64);

    /// Aggregates that keep audit timestamps return them here.
    fn audit(&self) -> Option<&AuditStamp> {
        None
    }

    fn audit_mut(&mut self) -> Option<&mut AuditStamp> {
        None
    }

    fn add_domain_event(&mut self, event: DomainEvent<Self::Event>) {
        self.events_mut().push(event);
    }

    /// Read-only, ordered view; possibly empty.
    fn pending_events(&self) -> &[DomainEvent<Self::Event>] {
        self.events().pending()
    }

    /// Empties the queue. Idempotent.
    fn clear_events(&mut self) {
        self.events_mut().clear();
    }
}

/// Type-erased aggregate as seen by the unit of work.
pub trait TrackedAggregate: Send + Sync {
    fn tracked_type(&self) -> &'static str;

    fn tracked_id(&self) -> Uuid;

    /// Touches the audit stamp and returns the value it had before, or
    /// `None` when the aggregate keeps no audit stamp.
    fn stamp_audit(&mut self, now: DateTime<Utc>) -> Option<AuditStamp>;

    fn restore_audit(&mut self, previous: AuditStamp);

    /// State to write, versioned one past what was loaded.
    fn snapshot_record(&self) -> Result<AggregateRecord, serde_json::Error>;

    /// Moves the version past a commit that succeeded.
    fn advance_version(&mut self);

    fn pending_envelopes(&self) -> Result<Vec<MessageEnvelope>, serde_json::Error>;

    fn pending_count(&self) -> usize;

    fn discard_pending(&mut self);
}

impl<A: AggregateRoot> TrackedAggregate for A {
    fn tracked_type(&self) -> &'static str {
        A::AGGREGATE_TYPE
    }

    fn tracked_id(&self) -> Uuid {
        self.id().into()
    }

    fn stamp_audit(&mut self, now: DateTime<Utc>) -> Option<AuditStamp> {
        let audit = self.audit_mut()?;
        let previous = *audit;
        audit.touch(now);
        Some(previous)
    }

    fn restore_audit(&mut self, previous: AuditStamp) {
        if let Some(audit) = self.audit_mut() {
            *audit = previous;
        }
    }

    fn snapshot_record(&self) -> Result<AggregateRecord, serde_json::Error> {
        let audit = self.audit().copied().unwrap_or_default();
        Ok(AggregateRecord {
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            aggregate_id: self.id().into(),
            state: serde_json::to_value(self)?,
            version: self.version() + 1,
            created_at: audit.created_at,
            updated_at: audit.updated_at,
        })
    }

    fn advance_version(&mut self) {
        self.set_version(self.version() + 1);
    }

    fn pending_envelopes(&self) -> Result<Vec<MessageEnvelope>, serde_json::Error> {
        let aggregate_id = self.id().into();
        self.pending_events()
            .iter()
            .map(|event| event.to_envelope(A::AGGREGATE_TYPE, aggregate_id))
            .collect()
    }

    fn pending_count(&self) -> usize {
        self.events().len()
    }

    fn discard_pending(&mut self) {
        self.clear_events();
    }
}
