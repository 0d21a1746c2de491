//! Change Stream - record shape and at-least-once consumer
//!
//! Records are delivered to the engine concurrently. A delivery that fails
//! with a retryable error is redelivered after a short delay, up to the
//! configured limit; validation failures are acknowledged and dropped.

mod record;

pub use record::{ChangeKind, ChangeRecord, PriorSnapshot};

use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::config::StreamConfig;
use crate::engine::{DropEngine, Outcome};
use crate::types::Currency;

/// Delivery counters kept by the consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub delivered: AtomicU64,
    pub redelivered: AtomicU64,
    pub dropped_invalid: AtomicU64,
    pub dead_lettered: AtomicU64,
}

/// How one record ended
#[derive(Debug)]
pub enum DeliveryStatus {
    Acked(Outcome),
    /// Malformed or invalid, not retried
    Rejected,
    /// Still failing after every redelivery
    DeadLettered,
}

pub struct ChangeStreamConsumer {
    engine: Arc<DropEngine>,
    config: StreamConfig,
    redelivery_delay: Duration,
    stats: Arc<ConsumerStats>,
}

impl ChangeStreamConsumer {
    pub fn new(engine: Arc<DropEngine>, config: StreamConfig) -> Self {
        let redelivery_delay = Duration::from_millis(config.redelivery_delay_ms);
        Self {
            engine,
            config,
            redelivery_delay,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Consume until the sending side closes
    pub async fn run(self, rx: mpsc::Receiver<ChangeRecord>) {
        let concurrency = self.config.concurrency.max(1);
        ReceiverStream::new(rx)
            .for_each_concurrent(concurrency, |record| {
                let consumer = &self;
                async move {
                    consumer.deliver(record).await;
                }
            })
            .await;
        debug!("Change stream drained");
    }

    /// Deliver one record, redelivering on retryable failures
    pub async fn deliver(&self, record: ChangeRecord) -> DeliveryStatus {
        let currency = self.engine.currency().clone();
        let delivery = match record.to_delivery(&currency) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(item = %record.item, error = %e, "Dropping malformed change record");
                self.stats.dropped_invalid.fetch_add(1, Ordering::Relaxed);
                return DeliveryStatus::Rejected;
            }
        };

        let mut attempt: u32 = 0;
        loop {
            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            match self.engine.on_delivery(delivery.clone()).await {
                Ok(outcome) => return DeliveryStatus::Acked(outcome),
                Err(e) if !e.is_retryable() => {
                    self.stats.dropped_invalid.fetch_add(1, Ordering::Relaxed);
                    return DeliveryStatus::Rejected;
                }
                Err(e) if attempt >= self.config.max_redeliveries => {
                    error!(
                        item = %delivery.observation.item,
                        attempts = attempt + 1,
                        error = %e,
                        payload = %record.to_json(),
                        "Redeliveries exhausted, dead-lettering change record"
                    );
                    self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    return DeliveryStatus::DeadLettered;
                }
                Err(e) => {
                    attempt += 1;
                    debug!(item = %delivery.observation.item, attempt, error = %e, "Redelivering change record");
                    self.stats.redelivered.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(self.redelivery_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, ChannelDispatcher};
    use crate::config::{AlertsConfig, EngineConfig};
    use crate::error::StoreError;
    use crate::ledger::InMemoryDedupLedger;
    use crate::store::tests::observation;
    use crate::store::{InMemoryPriceStore, MockPriceStore, PriceStore};
    use crate::types::StoredObservation;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            redelivery_delay_ms: 1,
            max_redeliveries: 2,
            ..StreamConfig::default()
        }
    }

    fn engine(store: Arc<dyn PriceStore>) -> (Arc<DropEngine>, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(16);
        let engine = DropEngine::new(
            EngineConfig::default(),
            &AlertsConfig::default(),
            store,
            Arc::new(InMemoryDedupLedger::default()),
            Arc::new(ChannelDispatcher::new(tx)),
        );
        (Arc::new(engine), rx)
    }

    fn created(price: rust_decimal::Decimal, minute: u32) -> ChangeRecord {
        ChangeRecord::created(&StoredObservation::new(0, observation("salt", price, minute)))
    }

    #[tokio::test]
    async fn transient_failure_is_redelivered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut store = MockPriceStore::new();
        store.expect_fetch().returning(move |_, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Unavailable("throttled".into()))
            } else {
                Ok(vec![StoredObservation::new(1, observation("salt", dec!(45), 10))])
            }
        });

        let (engine, mut alerts) = engine(Arc::new(store));
        let consumer = ChangeStreamConsumer::new(engine, fast_config());
        let status = consumer.deliver(created(dec!(42.50), 20)).await;

        assert!(matches!(status, DeliveryStatus::Acked(Outcome::Dispatched(_))));
        assert_eq!(consumer.stats().redelivered.load(Ordering::Relaxed), 1);
        assert_eq!(
            alerts.recv().await.unwrap().body,
            "salt is now ₹42.50 (was ₹45.00, down ₹2.50)"
        );
    }

    #[tokio::test]
    async fn persistent_failure_is_dead_lettered() {
        let mut store = MockPriceStore::new();
        store
            .expect_fetch()
            .times(3)
            .returning(|_, _, _| Err(StoreError::Unavailable("down".into())));

        let (engine, _alerts) = engine(Arc::new(store));
        let consumer = ChangeStreamConsumer::new(engine, fast_config());
        let status = consumer.deliver(created(dec!(42.50), 20)).await;

        assert!(matches!(status, DeliveryStatus::DeadLettered));
        assert_eq!(consumer.stats().dead_lettered.load(Ordering::Relaxed), 1);
        assert_eq!(consumer.stats().delivered.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn invalid_records_are_not_redelivered() {
        let mut store = MockPriceStore::new();
        store.expect_fetch().never();

        let (engine, _alerts) = engine(Arc::new(store));
        let consumer = ChangeStreamConsumer::new(engine, fast_config());
        let mut zero = created(dec!(0), 20);
        assert!(matches!(consumer.deliver(zero.clone()).await, DeliveryStatus::Rejected));

        zero.item = String::new();
        assert!(matches!(consumer.deliver(zero).await, DeliveryStatus::Rejected));
        assert_eq!(consumer.stats().dropped_invalid.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn repeated_records_alert_once() {
        let store = Arc::new(InMemoryPriceStore::new());
        store.append(observation("salt", dec!(45), 10)).await.unwrap();

        let (engine, mut alerts) = engine(store);
        let stats = engine.stats();
        let consumer = ChangeStreamConsumer::new(engine, fast_config());

        let (tx, rx) = mpsc::channel(8);
        let record = created(dec!(42.50), 20);
        for _ in 0..3 {
            tx.send(record.clone()).await.unwrap();
        }
        drop(tx);
        consumer.run(rx).await;

        assert!(alerts.recv().await.is_some());
        assert!(alerts.try_recv().is_err());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dispatched, 1);
        assert_eq!(snapshot.duplicates, 2);
    }
}
