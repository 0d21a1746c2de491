//! Change record wire shape
//!
//! ```json
//! {"event": "updated", "item": "Tata Salt 1kg", "price": "42.50",
//!  "timestamp": "2024-03-01T06:00:00Z", "store": "BigBasket",
//!  "previous": {"price": "45.00", "timestamp": "2024-02-29T06:00:00Z"}}
//! ```
//!
//! Prices are decimal strings. Timestamps are RFC 3339; naive ISO-8601
//! timestamps (no offset) are read as UTC.

use chrono::{NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::engine::Delivery;
use crate::error::ValidationError;
use crate::types::{Currency, ItemId, Money, Observation, StoreId, StoredObservation, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    #[serde(alias = "INSERT")]
    Created,
    #[serde(alias = "MODIFY")]
    Updated,
}

/// Prior-state image carried by `updated` records. A hint only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorSnapshot {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "lenient_timestamp")]
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(rename = "event")]
    pub kind: ChangeKind,
    pub item: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(with = "lenient_timestamp")]
    pub timestamp: Timestamp,
    #[serde(rename = "store", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<PriorSnapshot>,
}

impl ChangeRecord {
    /// Record emitted for a freshly appended observation
    pub fn created(stored: &StoredObservation) -> Self {
        let obs = &stored.observation;
        Self {
            kind: ChangeKind::Created,
            item: obs.item.to_string(),
            price: obs.price.amount,
            currency: Some(obs.price.currency.to_string()),
            timestamp: obs.observed_at,
            source: Some(obs.source.to_string()),
            previous: None,
        }
    }

    pub fn from_json(payload: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(payload).map_err(|e| ValidationError::MalformedRecord(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    /// Rebuild the observation (and optional prior hint) this record describes.
    /// `default_currency` applies when the record carries none.
    pub fn to_delivery(&self, default_currency: &Currency) -> Result<Delivery, ValidationError> {
        let item = self.item.trim();
        if item.is_empty() {
            return Err(ValidationError::EmptyItem);
        }
        let item = ItemId::new(item);
        let currency = self
            .currency
            .as_deref()
            .map(Currency::new)
            .unwrap_or_else(|| default_currency.clone());
        let source = self
            .source
            .as_deref()
            .map(StoreId::new)
            .unwrap_or_default();

        let observation = Observation::new(
            item.clone(),
            Money::new(self.price, currency.clone()),
            self.timestamp,
            source.clone(),
        );

        let prior = match (self.kind, &self.previous) {
            (ChangeKind::Updated, Some(prev)) => Some(Observation::new(
                item,
                Money::new(prev.price, currency),
                prev.timestamp,
                source,
            )),
            _ => None,
        };

        Ok(Delivery { observation, prior })
    }
}

mod lenient_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<Timestamp, String> {
        if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp {:?}: {}", raw, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_dynamo_style_insert_with_naive_timestamp() {
        let record = ChangeRecord::from_json(
            r#"{"event":"INSERT","item":"Tata Salt 1kg","price":"42.50",
                "timestamp":"2024-03-01T06:00:00.123456","store":"BigBasket"}"#,
        )
        .unwrap();

        assert_eq!(record.kind, ChangeKind::Created);
        let delivery = record.to_delivery(&Currency::default()).unwrap();
        assert_eq!(delivery.observation.price, Money::inr(dec!(42.50)));
        assert_eq!(
            delivery.observation.observed_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
                + chrono::Duration::microseconds(123_456)
        );
        assert!(delivery.prior.is_none());
    }

    #[test]
    fn updated_record_carries_prior_hint() {
        let record = ChangeRecord::from_json(
            r#"{"event":"updated","item":"salt","price":"42.50","currency":"inr",
                "timestamp":"2024-03-01T06:00:00Z",
                "previous":{"price":"45.00","timestamp":"2024-02-29T06:00:00Z"}}"#,
        )
        .unwrap();

        let delivery = record.to_delivery(&Currency::default()).unwrap();
        let prior = delivery.prior.expect("hint");
        assert_eq!(prior.price, Money::inr(dec!(45.00)));
        assert_eq!(prior.item, delivery.observation.item);
    }

    #[test]
    fn float_prices_and_blank_items_are_rejected() {
        let float_price = ChangeRecord::from_json(
            r#"{"event":"created","item":"salt","price":42.5,"timestamp":"2024-03-01T06:00:00Z"}"#,
        );
        assert!(matches!(float_price, Err(ValidationError::MalformedRecord(_))));

        let blank = ChangeRecord::from_json(
            r#"{"event":"created","item":"  ","price":"1","timestamp":"2024-03-01T06:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(
            blank.to_delivery(&Currency::default()).unwrap_err(),
            ValidationError::EmptyItem
        );
    }

    #[test]
    fn created_record_round_trips_through_json() {
        let stored = StoredObservation::new(
            1,
            Observation::new(
                ItemId::from("salt"),
                Money::inr(dec!(45.00)),
                Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap(),
                StoreId::default(),
            ),
        );
        let record = ChangeRecord::created(&stored);
        let decoded = ChangeRecord::from_json(&record.to_json()).unwrap();
        let delivery = decoded.to_delivery(&Currency::default()).unwrap();
        assert_eq!(delivery.observation.id(), stored.id);
    }
}
