//! Catalog commands and their validation rules.

use pipeline::{Command, RuleSet};
use serde::{Deserialize, Serialize};

use crate::cart::MAX_PRODUCT_NAME_LEN;
use crate::value_objects::Currency;

use super::{ProductId, ProductView};

/// Command to add a product to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

impl CreateProduct {
    pub fn new(name: impl Into<String>, price_cents: i64) -> Self {
        Self {
            product_id: ProductId::new(),
            name: name.into(),
            price_cents,
            currency: None,
        }
    }

    pub fn rules() -> RuleSet<Self> {
        RuleSet::new()
            .rule("name", "must not be blank", |c: &Self| {
                !c.name.trim().is_empty()
            })
            .rule(
                "name",
                format!("must be at most {MAX_PRODUCT_NAME_LEN} characters"),
                |c: &Self| c.name.chars().count() <= MAX_PRODUCT_NAME_LEN,
            )
            .rule("price_cents", "must be greater than 0", |c: &Self| {
                c.price_cents > 0
            })
            .rule("currency", "must be USD, EUR or GBP", |c: &Self| {
                c.currency
                    .as_deref()
                    .is_none_or(|code| code.parse::<Currency>().is_ok())
            })
    }
}

impl Command for CreateProduct {
    type Response = ProductView;
    const NAME: &'static str = "CreateProduct";
}

/// Command to reprice a product. The currency stays the product's own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeProductPrice {
    pub product_id: ProductId,
    pub price_cents: i64,
}

impl ChangeProductPrice {
    pub fn new(product_id: ProductId, price_cents: i64) -> Self {
        Self {
            product_id,
            price_cents,
        }
    }

    pub fn rules() -> RuleSet<Self> {
        RuleSet::new().rule("price_cents", "must be greater than 0", |c: &Self| {
            c.price_cents > 0
        })
    }
}

impl Command for ChangeProductPrice {
    type Response = ProductView;
    const NAME: &'static str = "ChangeProductPrice";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscontinueProduct {
    pub product_id: ProductId,
}

impl DiscontinueProduct {
    pub fn new(product_id: ProductId) -> Self {
        Self { product_id }
    }
}

impl Command for DiscontinueProduct {
    type Response = ProductView;
    const NAME: &'static str = "DiscontinueProduct";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_product_rules() {
        assert!(CreateProduct::rules().validate(&CreateProduct::new("Lamp", 100)).is_ok());

        let errors = CreateProduct::rules()
            .validate(&CreateProduct::new(" ", 0))
            .unwrap_err();
        let fields: Vec<_> = errors.fields().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "price_cents"]);
    }

    #[test]
    fn price_change_must_be_positive() {
        let command = ChangeProductPrice::new(ProductId::new(), -1);
        assert_eq!(ChangeProductPrice::rules().validate(&command).unwrap_err().len(), 1);
    }
}
