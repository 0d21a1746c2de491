//! Read-side query - latest price per item and per-item history
//!
//! Views carry prices as decimal strings so no consumer sees a float.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::StoreError;
use crate::store::PriceStore;
use crate::types::{ItemId, StoredObservation, Timestamp};

/// One stored observation, shaped for readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceView {
    pub item: ItemId,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub currency: String,
    pub observed_at: Timestamp,
    pub source: String,
    pub sequence: u64,
}

impl From<StoredObservation> for PriceView {
    fn from(stored: StoredObservation) -> Self {
        let obs = stored.observation;
        Self {
            item: obs.item,
            price: obs.price.amount,
            currency: obs.price.currency.to_string(),
            observed_at: obs.observed_at,
            source: obs.source.to_string(),
            sequence: stored.sequence,
        }
    }
}

/// Latest known price per item. Items whose lookup fails are skipped.
pub async fn latest_prices(store: &dyn PriceStore) -> BTreeMap<ItemId, PriceView> {
    let items = match store.items().await {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "Listing items failed, returning no prices");
            return BTreeMap::new();
        }
    };

    let mut latest = BTreeMap::new();
    for item in items {
        match store.fetch(&item, None, 1).await {
            Ok(history) => {
                if let Some(newest) = history.into_iter().max_by_key(|s| s.recency_key()) {
                    latest.insert(item, PriceView::from(newest));
                }
            }
            Err(e) => warn!(item = %item, error = %e, "Skipping item in latest prices"),
        }
    }
    latest
}

/// Newest `limit` observations of `item`, newest first
pub async fn price_history(
    store: &dyn PriceStore,
    item: &ItemId,
    limit: usize,
) -> Result<Vec<PriceView>, StoreError> {
    let mut history = store.fetch(item, None, limit).await?;
    history.sort_by_key(|s| std::cmp::Reverse(s.recency_key()));
    Ok(history.into_iter().map(PriceView::from).collect())
}
