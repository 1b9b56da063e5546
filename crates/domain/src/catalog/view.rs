use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateRoot;
use crate::value_objects::Money;

use super::{Product, ProductId, ProductStatus};

/// Read-only projection of a product returned by the catalog commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductView {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub status: ProductStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Product> for ProductView {
    fn from(product: &Product) -> Self {
        let audit = product.audit().copied().unwrap_or_default();
        Self {
            id: product.id(),
            name: product.name().to_string(),
            price: product.price().amount(),
            status: product.status(),
            created_at: audit.created_at,
            updated_at: audit.updated_at,
        }
    }
}
