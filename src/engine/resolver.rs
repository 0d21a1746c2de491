//! History Resolver - finds the reference price for a candidate observation
//!
//! The reference is the most recent stored observation of the same item with
//! `observed_at` strictly before the candidate's, ties broken by append
//! sequence. Fetch order is never trusted: the winner is picked by
//! `(observed_at, sequence)` so quirky store ordering cannot change the result.

use std::sync::Arc;

use tracing::trace;

use crate::error::StoreError;
use crate::store::PriceStore;
use crate::types::{Observation, ObservationId, StoredObservation};

pub struct HistoryResolver {
    store: Arc<dyn PriceStore>,
    limit: usize,
}

impl HistoryResolver {
    pub fn new(store: Arc<dyn PriceStore>, limit: usize) -> Self {
        Self {
            store,
            limit: limit.max(1),
        }
    }

    /// `Ok(None)` means the item has no earlier history. Lookup failures are
    /// returned as errors, never as "no history".
    pub async fn resolve(
        &self,
        candidate: &Observation,
    ) -> Result<Option<StoredObservation>, StoreError> {
        let history = self
            .store
            .fetch(&candidate.item, Some(candidate.observed_at), self.limit)
            .await?;
        trace!(item = %candidate.item, fetched = history.len(), "History fetched");
        Ok(select_reference(history, candidate, &candidate.id()))
    }
}

/// Pick the reference out of an arbitrarily ordered history page
pub fn select_reference(
    history: Vec<StoredObservation>,
    candidate: &Observation,
    candidate_id: &ObservationId,
) -> Option<StoredObservation> {
    history
        .into_iter()
        .filter(|s| &s.id != candidate_id)
        .filter(|s| s.observation.item == candidate.item)
        .filter(|s| s.observation.observed_at < candidate.observed_at)
        .max_by_key(|s| s.recency_key())
}
