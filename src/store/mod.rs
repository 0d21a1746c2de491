//! Price Store - append-only observation log keyed by item
//!
//! Observations are kept per item in `(observed_at, sequence)` order and served
//! newest-first. Appending an observation that is already present returns the
//! stored copy instead of creating a second entry.

mod csv_log;
mod feed;

pub use csv_log::CsvPriceStore;
pub use feed::ChangeFeedStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreError;
use crate::types::{ItemId, Observation, ObservationId, StoredObservation, Timestamp};

/// Result of an append
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    /// First time this observation was seen
    New(StoredObservation),
    /// Already in the log, nothing written
    Existing(StoredObservation),
}

impl Appended {
    pub fn stored(&self) -> &StoredObservation {
        match self {
            Appended::New(s) | Appended::Existing(s) => s,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Appended::New(_))
    }
}

/// Trait for price store backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Append an observation, assigning the next sequence number
    async fn append(&self, observation: Observation) -> Result<Appended, StoreError>;

    /// Observations for `item` ordered by `(observed_at desc, sequence desc)`,
    /// restricted to `observed_at < before` when given, at most `limit` entries
    async fn fetch(
        &self,
        item: &ItemId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<StoredObservation>, StoreError>;

    /// Every item with at least one observation
    async fn items(&self) -> Result<Vec<ItemId>, StoreError>;
}

/// Per-item ordered index shared by the store backends
#[derive(Debug, Default)]
pub(crate) struct ObservationIndex {
    next_sequence: u64,
    by_item: HashMap<ItemId, Vec<StoredObservation>>,
    by_id: HashMap<ObservationId, (ItemId, u64)>,
}

impl ObservationIndex {
    pub(crate) fn get(&self, id: &ObservationId) -> Option<&StoredObservation> {
        let (item, sequence) = self.by_id.get(id)?;
        self.by_item
            .get(item)?
            .iter()
            .find(|s| s.sequence == *sequence)
    }

    /// Wrap an observation with the next sequence number without inserting it
    pub(crate) fn stamp(&self, observation: Observation) -> StoredObservation {
        StoredObservation::new(self.next_sequence + 1, observation)
    }

    /// Insert a stamped observation, keeping the item log sorted
    pub(crate) fn insert(&mut self, stored: StoredObservation) {
        self.next_sequence = self.next_sequence.max(stored.sequence);
        self.by_id.insert(
            stored.id.clone(),
            (stored.observation.item.clone(), stored.sequence),
        );
        let log = self
            .by_item
            .entry(stored.observation.item.clone())
            .or_default();
        let key = stored.recency_key();
        let pos = log.partition_point(|s| s.recency_key() <= key);
        log.insert(pos, stored);
    }

    pub(crate) fn fetch(
        &self,
        item: &ItemId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Vec<StoredObservation> {
        self.by_item
            .get(item)
            .map(|log| {
                log.iter()
                    .rev()
                    .filter(|s| before.map_or(true, |b| s.observation.observed_at < b))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn items(&self) -> Vec<ItemId> {
        let mut items: Vec<ItemId> = self.by_item.keys().cloned().collect();
        items.sort();
        items
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("price index lock poisoned".to_string())
}

/// Volatile store for tests and single-process runs
#[derive(Debug, Default)]
pub struct InMemoryPriceStore {
    index: RwLock<ObservationIndex>,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored observations
    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn append(&self, observation: Observation) -> Result<Appended, StoreError> {
        let mut index = self.index.write().map_err(|_| poisoned())?;
        if let Some(existing) = index.get(&observation.id()) {
            return Ok(Appended::Existing(existing.clone()));
        }
        let stored = index.stamp(observation);
        index.insert(stored.clone());
        Ok(Appended::New(stored))
    }

    async fn fetch(
        &self,
        item: &ItemId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        let index = self.index.read().map_err(|_| poisoned())?;
        Ok(index.fetch(item, before, limit))
    }

    async fn items(&self) -> Result<Vec<ItemId>, StoreError> {
        let index = self.index.read().map_err(|_| poisoned())?;
        Ok(index.items())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{Money, StoreId};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    pub(crate) fn at(minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, minute, 0).unwrap()
    }

    pub(crate) fn observation(item: &str, price: Decimal, minute: u32) -> Observation {
        Observation::new(
            ItemId::from(item),
            Money::inr(price),
            at(minute),
            StoreId::default(),
        )
    }

    #[tokio::test]
    async fn fetch_orders_newest_first_and_respects_bound() {
        let store = InMemoryPriceStore::new();
        // appended out of timestamp order on purpose
        store.append(observation("salt", dec!(45), 10)).await.unwrap();
        store.append(observation("salt", dec!(44), 30)).await.unwrap();
        store.append(observation("salt", dec!(46), 20)).await.unwrap();
        store.append(observation("sugar", dec!(50), 15)).await.unwrap();

        let all = store.fetch(&"salt".into(), None, 10).await.unwrap();
        let minutes: Vec<_> = all
            .iter()
            .map(|s| s.observation.observed_at)
            .collect();
        assert_eq!(minutes, vec![at(30), at(20), at(10)]);

        let bounded = store.fetch(&"salt".into(), Some(at(30)), 1).await.unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].observation.observed_at, at(20));

        assert_eq!(
            store.items().await.unwrap(),
            vec![ItemId::from("salt"), ItemId::from("sugar")]
        );
    }

    #[tokio::test]
    async fn equal_timestamps_are_ordered_by_sequence() {
        let store = InMemoryPriceStore::new();
        let first = store.append(observation("salt", dec!(45), 10)).await.unwrap();
        let second = store.append(observation("salt", dec!(43), 10)).await.unwrap();
        assert!(second.stored().sequence > first.stored().sequence);

        let fetched = store.fetch(&"salt".into(), None, 2).await.unwrap();
        assert_eq!(fetched[0].sequence, second.stored().sequence);
        assert_eq!(fetched[1].sequence, first.stored().sequence);
    }

    #[tokio::test]
    async fn duplicate_append_returns_existing_record() {
        let store = InMemoryPriceStore::new();
        let first = store.append(observation("salt", dec!(45), 10)).await.unwrap();
        let again = store.append(observation("salt", dec!(45.00), 10)).await.unwrap();

        assert!(first.is_new());
        assert!(!again.is_new());
        assert_eq!(first.stored(), again.stored());
        assert_eq!(store.len(), 1);
    }
}
