//! Price-drop detection engine
//!
//! Per delivery: validate -> resolve reference -> evaluate -> claim -> publish.
//! The order is fixed. Nothing is published without a successful claim, and a
//! failed publish is never un-claimed (a lost alert beats a duplicate one).

mod evaluator;
mod resolver;

pub use evaluator::{DropEvaluator, Verdict};
pub use resolver::{select_reference, HistoryResolver};

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertDispatcher, AlertFormatter};
use crate::config::{AlertsConfig, EngineConfig};
use crate::error::{DispatchError, EngineError, ValidationError};
use crate::ledger::DedupLedger;
use crate::store::PriceStore;
use crate::types::{Currency, DropEvent, DropIdentity, Money, Observation};

/// One change-stream delivery as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub observation: Observation,
    /// Prior-state snapshot from an `updated` record. Never authoritative.
    pub prior: Option<Observation>,
}

impl Delivery {
    pub fn new(observation: Observation) -> Self {
        Self {
            observation,
            prior: None,
        }
    }
}

/// What processing a delivery amounted to
#[derive(Debug, Clone)]
pub enum Outcome {
    /// First known price for the item
    NoReference,
    NoDrop,
    BelowFloor { drop_amount: Money },
    Incomparable,
    /// Drop already claimed by an earlier delivery
    DuplicateSuppressed(DropIdentity),
    Dispatched(DropEvent),
    /// Claimed but publish failed; not retried
    DispatchLost { event: DropEvent, error: DispatchError },
}

impl Outcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Outcome::Dispatched(_))
    }

    pub fn drop_event(&self) -> Option<&DropEvent> {
        match self {
            Outcome::Dispatched(event) | Outcome::DispatchLost { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Where `prepare` left a delivery
enum Prepared {
    Settled(Outcome),
    Claimed(DropEvent),
}

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineStats {
    received: AtomicU64,
    rejected: AtomicU64,
    no_reference: AtomicU64,
    no_drop: AtomicU64,
    below_floor: AtomicU64,
    duplicates: AtomicU64,
    dispatched: AtomicU64,
    lost_alerts: AtomicU64,
    transient_failures: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub no_reference: u64,
    pub no_drop: u64,
    pub below_floor: u64,
    pub duplicates: u64,
    pub dispatched: u64,
    pub lost_alerts: u64,
    pub transient_failures: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            no_reference: self.no_reference.load(Ordering::Relaxed),
            no_drop: self.no_drop.load(Ordering::Relaxed),
            below_floor: self.below_floor.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            lost_alerts: self.lost_alerts.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::NoReference => &self.no_reference,
            Outcome::NoDrop | Outcome::Incomparable => &self.no_drop,
            Outcome::BelowFloor { .. } => &self.below_floor,
            Outcome::DuplicateSuppressed(_) => &self.duplicates,
            Outcome::Dispatched(_) => &self.dispatched,
            Outcome::DispatchLost { .. } => &self.lost_alerts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Ingestion orchestrator. Stateless per call apart from the store and ledger.
pub struct DropEngine {
    config: EngineConfig,
    currency: Currency,
    resolver: HistoryResolver,
    evaluator: DropEvaluator,
    ledger: Arc<dyn DedupLedger>,
    dispatcher: Arc<dyn AlertDispatcher>,
    formatter: AlertFormatter,
    stats: Arc<EngineStats>,
}

impl DropEngine {
    pub fn new(
        config: EngineConfig,
        alerts: &AlertsConfig,
        store: Arc<dyn PriceStore>,
        ledger: Arc<dyn DedupLedger>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Self {
        Self {
            currency: config.currency(),
            resolver: HistoryResolver::new(store, config.history_limit),
            evaluator: DropEvaluator::new(config.min_drop),
            formatter: AlertFormatter::new(alerts),
            stats: Arc::new(EngineStats::default()),
            config,
            ledger,
            dispatcher,
        }
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    /// Reject observations no producer should have appended
    pub fn validate(&self, obs: &Observation) -> Result<(), ValidationError> {
        if obs.item.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyItem);
        }
        if !obs.price.is_positive() {
            return Err(ValidationError::NonPositivePrice {
                item: obs.item.clone(),
                price: obs.price.amount,
            });
        }
        if obs.price.currency != self.currency {
            return Err(ValidationError::CurrencyMismatch {
                item: obs.item.clone(),
                expected: self.currency.clone(),
                found: obs.price.currency.clone(),
            });
        }
        if obs.observed_at < self.config.epoch_floor {
            return Err(ValidationError::BeforeEpochFloor {
                item: obs.item.clone(),
                observed_at: obs.observed_at,
                floor: self.config.epoch_floor,
            });
        }
        Ok(())
    }

    /// Entry point per change-stream delivery of a bare observation
    pub async fn on_observation(&self, observation: Observation) -> Result<Outcome, EngineError> {
        self.on_delivery(Delivery::new(observation)).await
    }

    /// Process one delivery within the configured timeout.
    ///
    /// The timeout bounds resolve and claim. Once a claim is held, publishing
    /// gets whatever time is left, and running out of it is a lost alert
    /// rather than a retryable error.
    ///
    /// An `Err` tells the stream to redeliver unless it is a validation error.
    pub async fn on_delivery(&self, delivery: Delivery) -> Result<Outcome, EngineError> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.validate(&delivery.observation) {
            warn!(item = %delivery.observation.item, error = %e, "Rejecting observation");
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }

        let timeout = self.config.processing_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let result = match tokio::time::timeout_at(deadline, self.prepare(&delivery)).await {
            Ok(Ok(Prepared::Settled(outcome))) => Ok(outcome),
            Ok(Ok(Prepared::Claimed(event))) => Ok(self.dispatch(event, deadline, timeout).await),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Timeout(timeout)),
        };

        match &result {
            Ok(outcome) => self.stats.record(outcome),
            Err(e) => {
                self.stats.transient_failures.fetch_add(1, Ordering::Relaxed);
                warn!(item = %delivery.observation.item, error = %e, "Delivery failed, awaiting redelivery");
            }
        }
        result
    }

    /// Resolve, evaluate and claim. Anything short of a held claim settles here.
    async fn prepare(&self, delivery: &Delivery) -> Result<Prepared, EngineError> {
        let candidate = &delivery.observation;

        let resolved = self.resolver.resolve(candidate).await?;
        let reference = match resolved {
            Some(stored) => {
                if let Some(prior) = &delivery.prior {
                    if prior.price != stored.observation.price {
                        debug!(
                            item = %candidate.item,
                            hint = %prior.price,
                            resolved = %stored.observation.price,
                            "Prior-state hint contradicts history, using history"
                        );
                    }
                }
                Some(stored.observation)
            }
            None => self.hint_fallback(delivery),
        };

        let detected_at = Utc::now();
        let event = match self
            .evaluator
            .verdict(candidate, reference.as_ref(), detected_at)
        {
            Verdict::Drop(event) => event,
            Verdict::NoReference => {
                debug!(item = %candidate.item, "First observation for item, nothing to compare");
                return Ok(Prepared::Settled(Outcome::NoReference));
            }
            Verdict::NoDrop => {
                debug!(item = %candidate.item, price = %candidate.price, "No price drop");
                return Ok(Prepared::Settled(Outcome::NoDrop));
            }
            Verdict::BelowFloor { drop_amount } => {
                debug!(item = %candidate.item, drop = %drop_amount, "Drop below configured floor");
                return Ok(Prepared::Settled(Outcome::BelowFloor { drop_amount }));
            }
            Verdict::Incomparable => {
                warn!(item = %candidate.item, "Reference priced in another currency, skipping");
                return Ok(Prepared::Settled(Outcome::Incomparable));
            }
        };

        let identity = event.identity();
        if !self.ledger.try_claim(&identity, detected_at).await? {
            debug!(identity = %identity, "Duplicate drop suppressed");
            return Ok(Prepared::Settled(Outcome::DuplicateSuppressed(identity)));
        }

        Ok(Prepared::Claimed(event))
    }

    /// Publish a claimed drop. Never un-claims, so every failure is a lost alert.
    async fn dispatch(
        &self,
        event: DropEvent,
        deadline: tokio::time::Instant,
        timeout: std::time::Duration,
    ) -> Outcome {
        let alert = self.formatter.format(&event);
        let published = tokio::time::timeout_at(
            deadline,
            self.dispatcher.publish(&alert.topic, &alert.subject, &alert.body),
        )
        .await
        .unwrap_or_else(|_| {
            Err(DispatchError::PublishFailed {
                topic: alert.topic.clone(),
                reason: format!("publish timed out after {:?}", timeout),
            })
        });

        match published {
            Ok(()) => {
                info!(
                    item = %event.item,
                    previous = %event.previous_price,
                    new = %event.new_price,
                    drop = %event.drop_amount,
                    "Price drop alert dispatched"
                );
                Outcome::Dispatched(event)
            }
            Err(error) => {
                error!(identity = %event.identity(), error = %error, "Lost alert: publish failed after claim");
                Outcome::DispatchLost { event, error }
            }
        }
    }

    /// Use the record's prior snapshot only when enabled and strictly earlier
    fn hint_fallback(&self, delivery: &Delivery) -> Option<Observation> {
        if !self.config.prior_hint_fallback {
            return None;
        }
        delivery
            .prior
            .as_ref()
            .filter(|prior| prior.observed_at < delivery.observation.observed_at)
            .filter(|prior| prior.item == delivery.observation.item)
            .cloned()
    }
}
