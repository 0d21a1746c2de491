//! Error taxonomy for the drop-detection engine

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{Currency, ItemId, Timestamp};

/// Price store failures. Always transient from the engine's point of view.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Price store unavailable: {0}")]
    Unavailable(String),

    #[error("Price store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Price store CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Change feed closed")]
    FeedClosed,
}

/// Dedup ledger failures
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Dedup ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Dedup ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dedup ledger journal error: {0}")]
    Journal(#[from] csv::Error),
}

/// Publish failed after a successful claim. The alert is lost, never retried.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("Publish to topic {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
}

/// Malformed observation or change record. Dropped, never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Empty item identifier")]
    EmptyItem,

    #[error("Non-positive price {price} for {item}")]
    NonPositivePrice { item: ItemId, price: Decimal },

    #[error("Timestamp {observed_at} for {item} is before epoch floor {floor}")]
    BeforeEpochFloor {
        item: ItemId,
        observed_at: Timestamp,
        floor: Timestamp,
    },

    #[error("Currency mismatch for {item}: expected {expected}, found {found}")]
    CurrencyMismatch {
        item: ItemId,
        expected: Currency,
        found: Currency,
    },

    #[error("Malformed change record: {0}")]
    MalformedRecord(String),
}

/// Failure of one `on_observation` delivery
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Transient store failure: {0}")]
    TransientStore(#[from] StoreError),

    #[error("Transient ledger failure: {0}")]
    TransientLedger(#[from] LedgerError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Processing timed out after {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    /// Whether the change stream should redeliver this observation
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EngineError::Validation(_))
    }
}
