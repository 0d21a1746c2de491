//! Store wrapper that publishes every new append to the change stream

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use super::{Appended, PriceStore};
use crate::error::StoreError;
use crate::stream::ChangeRecord;
use crate::types::{ItemId, Observation, StoredObservation, Timestamp};

/// Emits a `created` change record for each observation that is new to the
/// wrapped store. Re-appends of a known observation emit nothing.
pub struct ChangeFeedStore<S> {
    inner: S,
    tx: mpsc::Sender<ChangeRecord>,
}

impl<S: PriceStore> ChangeFeedStore<S> {
    pub fn new(inner: S, tx: mpsc::Sender<ChangeRecord>) -> Self {
        Self { inner, tx }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: PriceStore> PriceStore for ChangeFeedStore<S> {
    async fn append(&self, observation: Observation) -> Result<Appended, StoreError> {
        let appended = self.inner.append(observation).await?;
        if let Appended::New(stored) = &appended {
            if self.tx.send(ChangeRecord::created(stored)).await.is_err() {
                warn!(item = %stored.observation.item, "Change stream closed, observation stored without delivery");
                return Err(StoreError::FeedClosed);
            }
        }
        Ok(appended)
    }

    async fn fetch(
        &self,
        item: &ItemId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        self.inner.fetch(item, before, limit).await
    }

    async fn items(&self) -> Result<Vec<ItemId>, StoreError> {
        self.inner.items().await
    }
}
