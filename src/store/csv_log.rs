//! CSV-backed price store
//!
//! Every observation is appended to `prices/observations.csv` and the whole
//! log is replayed into memory on open.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::info;

use super::{Appended, ObservationIndex, PriceStore};
use crate::error::StoreError;
use crate::types::{
    Currency, ItemId, Money, Observation, StoreId, StoredObservation, Timestamp,
};

const LOG_FILE: &str = "observations.csv";

/// Observation row for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObservationRecord {
    sequence: u64,
    id: String,
    item: String,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    currency: String,
    observed_at: DateTime<Utc>,
    source: String,
}

impl From<&StoredObservation> for ObservationRecord {
    fn from(stored: &StoredObservation) -> Self {
        let obs = &stored.observation;
        Self {
            sequence: stored.sequence,
            id: stored.id.to_string(),
            item: obs.item.to_string(),
            price: obs.price.amount,
            currency: obs.price.currency.to_string(),
            observed_at: obs.observed_at,
            source: obs.source.to_string(),
        }
    }
}

impl ObservationRecord {
    fn into_stored(self) -> StoredObservation {
        let observation = Observation::new(
            ItemId::new(self.item),
            Money::new(self.price, Currency::new(self.currency)),
            self.observed_at,
            StoreId::new(self.source),
        );
        // identity is recomputed, the stored id column is informational
        StoredObservation::new(self.sequence, observation)
    }
}

/// Append-only CSV observation log with an in-memory index
pub struct CsvPriceStore {
    path: PathBuf,
    index: RwLock<ObservationIndex>,
    writer: Mutex<csv::Writer<fs::File>>,
}

impl CsvPriceStore {
    /// Open (or create) the log under `data_dir/prices`
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = data_dir.as_ref().join("prices");
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOG_FILE);

        let mut index = ObservationIndex::default();
        if path.exists() {
            let file = fs::File::open(&path)?;
            let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
            for result in reader.deserialize() {
                let record: ObservationRecord = result?;
                index.insert(record.into_stored());
            }
        }
        info!(path = %path.display(), observations = index.len(), "Price log loaded");

        let writer = Self::create_writer(&path)?;
        Ok(Self {
            path,
            index: RwLock::new(index),
            writer: Mutex::new(writer),
        })
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>, StoreError> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("price log lock poisoned".to_string())
}

#[async_trait]
impl PriceStore for CsvPriceStore {
    async fn append(&self, observation: Observation) -> Result<Appended, StoreError> {
        let mut index = self.index.write().map_err(|_| poisoned())?;
        if let Some(existing) = index.get(&observation.id()) {
            return Ok(Appended::Existing(existing.clone()));
        }

        let stored = index.stamp(observation);
        {
            let mut writer = self.writer.lock().map_err(|_| poisoned())?;
            writer.serialize(ObservationRecord::from(&stored))?;
            writer.flush()?;
        }
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
mod tests {
    use super::*;
    use crate::store::tests::{at, observation};
    use rust_decimal_macros::dec;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "pricedrop_store_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    #[tokio::test]
    async fn reopen_replays_log_with_sequences() {
        let dir = temp_data_dir("reopen");
        {
            let store = CsvPriceStore::open(&dir).unwrap();
            store.append(observation("salt", dec!(45.00), 10)).await.unwrap();
            store.append(observation("salt", dec!(42.50), 20)).await.unwrap();
        }

        let store = CsvPriceStore::open(&dir).unwrap();
        let fetched = store.fetch(&"salt".into(), None, 10).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].observation.price.amount, dec!(42.50));
        assert_eq!(fetched[0].observation.observed_at, at(20));
        assert_eq!(fetched[0].sequence, 2);

        // sequence continues after the replayed log, duplicates are not rewritten
        let again = store.append(observation("salt", dec!(42.5), 20)).await.unwrap();
        assert!(!again.is_new());
        let next = store.append(observation("salt", dec!(41), 30)).await.unwrap();
        assert_eq!(next.stored().sequence, 3);

        let _ = fs::remove_dir_all(&dir);
    }
}
