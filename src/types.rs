//! Core types used throughout PriceDrop
//!
//! Defines items, money, observations and drop events.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Producer-assigned wall-clock time of an observation
pub type Timestamp = DateTime<Utc>;

/// Grocery item identifier (e.g. "Tata Salt 1kg")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Retail store an observation was scraped from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new("BigBasket")
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::new("INR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exact decimal amount in a single currency.
///
/// Never routed through binary floating point; arithmetic across currencies
/// yields `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Shorthand for the default currency
    pub fn inr(amount: Decimal) -> Self {
        Self::new(amount, Currency::default())
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// `self - other`, or `None` if the currencies differ
    pub fn checked_sub(&self, other: &Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        let amount = self.amount.checked_sub(other.amount)?;
        Some(Money::new(amount, self.currency.clone()))
    }

    /// Strictly-less comparison, `None` across currencies
    pub fn lt(&self, other: &Money) -> Option<bool> {
        (self.currency == other.currency).then(|| self.amount < other.amount)
    }

    /// Two fractional digits, as shown in alerts
    pub fn display_amount(&self) -> String {
        format!("{:.2}", self.amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.display_amount(), self.currency)
    }
}

/// Content-derived identity of an observation.
///
/// Stable across redeliveries: two payloads describing the same item, instant,
/// price and source hash to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(String);

impl ObservationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recorded price for one item at one instant. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub item: ItemId,
    pub price: Money,
    pub observed_at: Timestamp,
    pub source: StoreId,
}

impl Observation {
    pub fn new(item: ItemId, price: Money, observed_at: Timestamp, source: StoreId) -> Self {
        Self {
            item,
            price,
            observed_at,
            source,
        }
    }

    pub fn id(&self) -> ObservationId {
        let mut hasher = Sha256::new();
        hasher.update(self.item.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(
            self.observed_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        hasher.update([0u8]);
        hasher.update(self.price.amount.normalize().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.price.currency.code().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.source.as_str().as_bytes());
        let digest = hasher.finalize();
        ObservationId(hex::encode(&digest[..16]))
    }
}

/// An observation as held by the price store, with its append-order sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObservation {
    pub id: ObservationId,
    /// Strictly increasing per store, assigned at append time
    pub sequence: u64,
    pub observation: Observation,
}

impl StoredObservation {
    pub fn new(sequence: u64, observation: Observation) -> Self {
        Self {
            id: observation.id(),
            sequence,
            observation,
        }
    }

    /// Key used for every "most recent" ordering: timestamp, then sequence
    pub fn recency_key(&self) -> (Timestamp, u64) {
        (self.observation.observed_at, self.sequence)
    }
}

/// Dedup identity of a drop: at most one drop exists per observation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DropIdentity {
    pub item: ItemId,
    pub observation_id: ObservationId,
}

impl fmt::Display for DropIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.item, self.observation_id)
    }
}

/// A new observation priced strictly below its reference price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropEvent {
    pub item: ItemId,
    pub observation_id: ObservationId,
    pub previous_price: Money,
    pub new_price: Money,
    pub drop_amount: Money,
    pub detected_at: Timestamp,
}

impl DropEvent {
    pub fn identity(&self) -> DropIdentity {
        DropIdentity {
            item: self.item.clone(),
            observation_id: self.observation_id.clone(),
        }
    }
}

/// Proof that a drop identity has been claimed for dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub identity: DropIdentity,
    pub dispatched_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn obs(price: Decimal) -> Observation {
        Observation::new(
            ItemId::from("Tata Salt 1kg"),
            Money::inr(price),
            Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap(),
            StoreId::default(),
        )
    }

    #[test]
    fn observation_id_ignores_trailing_zeros() {
        assert_eq!(obs(dec!(42.50)).id(), obs(dec!(42.5)).id());
        assert_ne!(obs(dec!(42.50)).id(), obs(dec!(42.49)).id());
    }

    #[test]
    fn money_arithmetic_is_exact_and_currency_checked() {
        let a = Money::inr(dec!(45.00));
        let b = Money::inr(dec!(42.50));
        assert_eq!(a.checked_sub(&b).unwrap().amount, dec!(2.50));
        assert_eq!(b.lt(&a), Some(true));

        let usd = Money::new(dec!(1), Currency::new("usd"));
        assert!(a.checked_sub(&usd).is_none());
        assert_eq!(a.lt(&usd), None);
        assert_eq!(usd.currency.code(), "USD");
    }

    #[test]
    fn display_amount_uses_two_decimals() {
        assert_eq!(Money::inr(dec!(2.5)).display_amount(), "2.50");
        assert_eq!(Money::inr(dec!(42)).to_string(), "42.00 INR");
    }
}
