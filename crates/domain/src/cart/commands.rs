//! Cart commands and their validation rules.
//!
//! Numeric inputs arrive as raw integers so that out-of-range values are
//! reported by the rule sets as field errors instead of failing to parse.

use pipeline::{Command, RuleSet};
use serde::{Deserialize, Serialize};

use crate::catalog::ProductId;
use crate::value_objects::Currency;

use super::{BuyerId, CartId, CartView};

/// Upper bound for a single line's quantity.
pub const MAX_LINE_QUANTITY: i64 = 1_000;

/// Longest accepted product name.
pub const MAX_PRODUCT_NAME_LEN: usize = 200;

/// Command to open a new cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCart {
    pub cart_id: CartId,
    pub buyer_id: BuyerId,

    /// ISO currency code; USD when absent.
    #[serde(default)]
    pub currency: Option<String>,
}

impl CreateCart {
    pub fn new(buyer_id: BuyerId) -> Self {
        Self {
            cart_id: CartId::new(),
            buyer_id,
            currency: None,
        }
    }

    pub fn rules() -> RuleSet<Self> {
        RuleSet::new().rule("currency", "must be USD, EUR or GBP", |c: &Self| {
            c.currency
                .as_deref()
                .is_none_or(|code| code.parse::<Currency>().is_ok())
        })
    }
}

impl Command for CreateCart {
    type Response = CartView;
    const NAME: &'static str = "CreateCart";
}

/// Command to add a product to a cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddItemToCart {
    pub cart_id: CartId,
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl AddItemToCart {
    pub fn new(cart_id: CartId, product_id: ProductId, quantity: i64, unit_price_cents: i64) -> Self {
        Self {
            cart_id,
            product_id,
            product_name: None,
            quantity,
            unit_price_cents,
        }
    }

    pub fn named(mut self, product_name: impl Into<String>) -> Self {
        self.product_name = Some(product_name.into());
        self
    }

    pub fn rules() -> RuleSet<Self> {
        RuleSet::new()
            .rule(
                "quantity",
                format!("must be between 1 and {MAX_LINE_QUANTITY}"),
                |c: &Self| (1..=MAX_LINE_QUANTITY).contains(&c.quantity),
            )
            .rule(
                "unit_price_cents",
                "must be greater than 0",
                |c: &Self| c.unit_price_cents > 0,
            )
            .rule(
                "product_name",
                format!("must be non-blank and at most {MAX_PRODUCT_NAME_LEN} characters"),
                |c: &Self| {
                    c.product_name.as_deref().is_none_or(|name| {
                        !name.trim().is_empty() && name.chars().count() <= MAX_PRODUCT_NAME_LEN
                    })
                },
            )
    }
}

impl Command for AddItemToCart {
    type Response = CartView;
    const NAME: &'static str = "AddItemToCart";
}

/// Command to set the quantity of an existing line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeItemQuantity {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: i64,
}

impl ChangeItemQuantity {
    pub fn new(cart_id: CartId, product_id: ProductId, quantity: i64) -> Self {
        Self {
            cart_id,
            product_id,
            quantity,
        }
    }

    pub fn rules() -> RuleSet<Self> {
        RuleSet::new().rule(
            "quantity",
            format!("must be between 1 and {MAX_LINE_QUANTITY}"),
            |c: &Self| (1..=MAX_LINE_QUANTITY).contains(&c.quantity),
        )
    }
}

impl Command for ChangeItemQuantity {
    type Response = CartView;
    const NAME: &'static str = "ChangeItemQuantity";
}

/// Command to remove a line from a cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveItemFromCart {
    pub cart_id: CartId,
    pub product_id: ProductId,
}

impl RemoveItemFromCart {
    pub fn new(cart_id: CartId, product_id: ProductId) -> Self {
        Self {
            cart_id,
            product_id,
        }
    }
}

impl Command for RemoveItemFromCart {
    type Response = CartView;
    const NAME: &'static str = "RemoveItemFromCart";
}

/// Command to check out a cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutCart {
    pub cart_id: CartId,
}

impl CheckoutCart {
    pub fn new(cart_id: CartId) -> Self {
        Self { cart_id }
    }
}

impl Command for CheckoutCart {
    type Response = CartView;
    const NAME: &'static str = "CheckoutCart";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_item_rules_report_every_failing_field() {
        let command = AddItemToCart::new(CartId::new(), ProductId::new(), 0, -5).named("   ");

        let errors = AddItemToCart::rules().validate(&command).unwrap_err();
        let fields: Vec<_> = errors.fields().iter().map(|e| e.field.as_str()).collect();

        assert_eq!(fields, vec!["quantity", "unit_price_cents", "product_name"]);
    }

    #[test]
    fn add_item_rules_accept_a_valid_command() {
        let command = AddItemToCart::new(CartId::new(), ProductId::new(), 2, 999).named("Mug");
        assert!(AddItemToCart::rules().validate(&command).is_ok());
    }

    #[test]
    fn quantity_above_limit_is_rejected() {
        let command = ChangeItemQuantity::new(CartId::new(), ProductId::new(), MAX_LINE_QUANTITY + 1);
        assert!(ChangeItemQuantity::rules().validate(&command).is_err());
    }

    #[test]
    fn unknown_currency_is_rejected() {
        let mut command = CreateCart::new(BuyerId::new());
        assert!(CreateCart::rules().validate(&command).is_ok());

        command.currency = Some("DOGE".into());
        let errors = CreateCart::rules().validate(&command).unwrap_err();
        assert_eq!(errors.fields()[0].field, "currency");
    }
}
