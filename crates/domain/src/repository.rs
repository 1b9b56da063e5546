//! Loading aggregates from their persisted state.

use message_store::AggregateStore;

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;

/// Loads an aggregate by id. Returns `None` if it was never committed.
#[tracing::instrument(skip(store, id), fields(aggregate_type = A::AGGREGATE_TYPE, aggregate_id = %id))]
pub async fn load<A: AggregateRoot>(
    store: &dyn AggregateStore,
    id: A::Id,
) -> Result<Option<A>, DomainError> {
    match store.load(A::AGGREGATE_TYPE, id.into()).await? {
        Some(record) => {
            let mut aggregate: A = serde_json::from_value(record.state)?;
            aggregate.set_version(record.version);
            Ok(Some(aggregate))
        }
        None => Ok(None),
    }
}

/// Like [`load`], but a missing aggregate is an error.
pub async fn load_existing<A: AggregateRoot>(
    store: &dyn AggregateStore,
    id: A::Id,
) -> Result<A, DomainError> {
    load(store, id)
        .await?
        .ok_or_else(|| DomainError::not_found(A::AGGREGATE_TYPE, id))
}
