//! Drop Evaluator - pure decision from (candidate, reference) to a drop verdict

use rust_decimal::Decimal;

use crate::types::{DropEvent, Money, Observation, Timestamp};

/// Why an observation did or did not produce a drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// First known price for the item
    NoReference,
    /// Equal or higher than the reference
    NoDrop,
    /// Strictly lower, but by less than the configured floor
    BelowFloor { drop_amount: Money },
    /// Reference priced in another currency
    Incomparable,
    Drop(DropEvent),
}

/// Relative-drop policy with an optional absolute floor
#[derive(Debug, Clone)]
pub struct DropEvaluator {
    min_drop: Decimal,
}

impl Default for DropEvaluator {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}

impl DropEvaluator {
    pub fn new(min_drop: Decimal) -> Self {
        Self {
            min_drop: min_drop.max(Decimal::ZERO),
        }
    }

    pub fn min_drop(&self) -> Decimal {
        self.min_drop
    }

    /// A drop event iff `reference` exists and the candidate is strictly cheaper
    pub fn evaluate(
        &self,
        candidate: &Observation,
        reference: Option<&Observation>,
        detected_at: Timestamp,
    ) -> Option<DropEvent> {
        match self.verdict(candidate, reference, detected_at) {
            Verdict::Drop(event) => Some(event),
            _ => None,
        }
    }

    pub fn verdict(
        &self,
        candidate: &Observation,
        reference: Option<&Observation>,
        detected_at: Timestamp,
    ) -> Verdict {
        let Some(reference) = reference else {
            return Verdict::NoReference;
        };

        let (Some(cheaper), Some(drop_amount)) = (
            candidate.price.lt(&reference.price),
            reference.price.checked_sub(&candidate.price),
        ) else {
            return Verdict::Incomparable;
        };

        if !cheaper {
            return Verdict::NoDrop;
        }
        if drop_amount.amount < self.min_drop {
            return Verdict::BelowFloor { drop_amount };
        }

        Verdict::Drop(DropEvent {
            item: candidate.item.clone(),
            observation_id: candidate.id(),
            previous_price: reference.price.clone(),
            new_price: candidate.price.clone(),
            drop_amount,
            detected_at,
        })
    }
}
