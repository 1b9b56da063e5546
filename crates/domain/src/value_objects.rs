//! Value objects shared by the cart and catalog aggregates.
//!
//! All of them validate at construction and never mutate; arithmetic returns
//! new instances.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected value-object construction or arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("Quantity must not be negative, got {0}")]
    NegativeQuantity(i64),

    #[error("Quantity {0} is out of range")]
    QuantityOutOfRange(i64),

    #[error("Price must be greater than zero, got {0}")]
    NonPositivePrice(Money),

    #[error("Currency mismatch: {left} and {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("Amount overflow")]
    Overflow,

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
}

/// ISO 4217 currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            _ => Err(ValueError::UnknownCurrency(s.to_string())),
        }
    }
}

/// Money amount in minor units (cents) to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    cents: i64,
    #[serde(default)]
    currency: Currency,
}

impl Money {
    pub fn from_cents(cents: i64, currency: Currency) -> Self {
        Self { cents, currency }
    }

    /// US dollars, the default currency.
    pub fn usd(cents: i64) -> Self {
        Self::from_cents(cents, Currency::Usd)
    }

    pub fn zero(currency: Currency) -> Self {
        Self::from_cents(0, currency)
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn checked_add(&self, other: Money) -> Result<Money, ValueError> {
        self.ensure_same_currency(other)?;
        let cents = self
            .cents
            .checked_add(other.cents)
            .ok_or(ValueError::Overflow)?;
        Ok(Money::from_cents(cents, self.currency))
    }

    pub fn checked_sub(&self, other: Money) -> Result<Money, ValueError> {
        self.ensure_same_currency(other)?;
        let cents = self
            .cents
            .checked_sub(other.cents)
            .ok_or(ValueError::Overflow)?;
        Ok(Money::from_cents(cents, self.currency))
    }

    pub fn times(&self, quantity: Quantity) -> Result<Money, ValueError> {
        let cents = self
            .cents
            .checked_mul(i64::from(quantity.value()))
            .ok_or(ValueError::Overflow)?;
        Ok(Money::from_cents(cents, self.currency))
    }

    fn ensure_same_currency(&self, other: Money) -> Result<(), ValueError> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(ValueError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            })
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}

/// A non-negative item count.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: i64) -> Result<Self, ValueError> {
        if value < 0 {
            return Err(ValueError::NegativeQuantity(value));
        }
        u32::try_from(value)
            .map(Self)
            .map_err(|_| ValueError::QuantityOutOfRange(value))
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Quantity) -> Result<Quantity, ValueError> {
        self.0
            .checked_add(other.0)
            .map(Quantity)
            .ok_or(ValueError::QuantityOutOfRange(
                i64::from(self.0) + i64::from(other.0),
            ))
    }
}

impl TryFrom<i64> for Quantity {
    type Error = ValueError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(quantity: Quantity) -> Self {
        i64::from(quantity.0)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A strictly positive unit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Money", into = "Money")]
pub struct Price(Money);

impl Price {
    pub fn new(amount: Money) -> Result<Self, ValueError> {
        if amount.is_positive() {
            Ok(Self(amount))
        } else {
            Err(ValueError::NonPositivePrice(amount))
        }
    }

    pub fn amount(&self) -> Money {
        self.0
    }

    pub fn currency(&self) -> Currency {
        self.0.currency()
    }

    /// Total for `quantity` units at this price.
    pub fn total_for(&self, quantity: Quantity) -> Result<Money, ValueError> {
        self.0.times(quantity)
    }
}

impl TryFrom<Money> for Price {
    type Error = ValueError;

    fn try_from(amount: Money) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl From<Price> for Money {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
