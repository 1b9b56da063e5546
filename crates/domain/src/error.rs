//! Domain error types.

use common::IdError;
use message_store::StoreError;
use pipeline::ReportableError;
use thiserror::Error;

use crate::cart::CartError;
use crate::catalog::CatalogError;
use crate::unit_of_work::CommitError;
use crate::value_objects::ValueError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the aggregate store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A cart rule rejected the command.
    #[error("Cart error: {0}")]
    Cart(CartError),

    /// A catalog rule rejected the command.
    #[error("Catalog error: {0}")]
    Catalog(CatalogError),

    #[error("Invalid value: {0}")]
    Value(#[from] ValueError),

    #[error("Invalid identifier: {0}")]
    Id(#[from] IdError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Commit(#[from] CommitError),
}

impl DomainError {
    pub fn not_found(aggregate_type: &'static str, aggregate_id: impl ToString) -> Self {
        DomainError::AggregateNotFound {
            aggregate_type,
            aggregate_id: aggregate_id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            DomainError::AggregateNotFound { .. } => true,
            DomainError::Cart(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// The aggregate changed between load and commit.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::Store(StoreError::Conflict { .. })
                | DomainError::Commit(CommitError::Store(StoreError::Conflict { .. }))
        )
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            _ if self.is_concurrency_conflict() => true,
            DomainError::Cart(err) => err.is_conflict(),
            DomainError::Catalog(err) => err.is_conflict(),
            _ => false,
        }
    }

    /// Input that passed validation but breaks a value rule.
    pub fn is_invalid(&self) -> bool {
        match self {
            DomainError::Value(_) | DomainError::Id(_) => true,
            DomainError::Cart(err) => !err.is_not_found() && !err.is_conflict(),
            DomainError::Catalog(err) => !err.is_conflict(),
            _ => false,
        }
    }
}

impl From<CartError> for DomainError {
    fn from(e: CartError) -> Self {
        DomainError::Cart(e)
    }
}

impl From<CatalogError> for DomainError {
    fn from(e: CatalogError) -> Self {
        DomainError::Catalog(e)
    }
}

impl ReportableError for DomainError {
    fn is_unexpected(&self) -> bool {
        !self.is_concurrency_conflict()
            && matches!(
                self,
                DomainError::Store(_) | DomainError::Serialization(_) | DomainError::Commit(_)
            )
    }
}
