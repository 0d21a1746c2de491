//! Dedup Ledger - idempotence store for dispatched drops
//!
//! `try_claim` is an atomic test-and-set: for a given drop identity it returns
//! `true` at most once (per retention window), no matter how many deliveries
//! race for it. The engine only dispatches after a successful claim.

mod journal;

pub use journal::CsvDedupLedger;

use async_trait::async_trait;
use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::LedgerError;
use crate::types::{DedupRecord, DropIdentity, Timestamp};

/// Trait for dedup ledger backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// Record a claim for `identity` iff none is live; `true` means the caller owns dispatch
    async fn try_claim(&self, identity: &DropIdentity, now: Timestamp)
        -> Result<bool, LedgerError>;

    /// Drop claims older than the retention window, returning how many were removed
    async fn purge_expired(&self, now: Timestamp) -> Result<usize, LedgerError>;
}

/// Bounded, expirable claim set shared by the ledger backends
#[derive(Debug)]
pub(crate) struct ClaimSet {
    ttl: Option<Duration>,
    capacity: Option<usize>,
    claims: HashMap<DropIdentity, DedupRecord>,
    /// Insertion order for capacity eviction
    order: VecDeque<(DropIdentity, Timestamp)>,
}

impl ClaimSet {
    pub(crate) fn new(ttl: Option<Duration>, capacity: Option<usize>) -> Self {
        Self {
            ttl,
            capacity: capacity.filter(|c| *c > 0),
            claims: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn is_live(&self, record: &DedupRecord, now: Timestamp) -> bool {
        self.ttl.map_or(true, |ttl| unexpired(record, ttl, now))
    }

    pub(crate) fn contains(&self, identity: &DropIdentity, now: Timestamp) -> bool {
        self.claims
            .get(identity)
            .map_or(false, |record| self.is_live(record, now))
    }

    /// Insert a claim unless a live one exists. Returns the new record.
    ///
    /// Capacity is not enforced here. Callers evict once the claim is
    /// committed, so a released claim never costs an older one its slot.
    pub(crate) fn claim(&mut self, identity: &DropIdentity, now: Timestamp) -> Option<DedupRecord> {
        if self.contains(identity, now) {
            return None;
        }
        let record = DedupRecord {
            identity: identity.clone(),
            dispatched_at: now,
        };
        self.push(record.clone());
        Some(record)
    }

    /// Undo a claim that could not be made durable
    pub(crate) fn release(&mut self, record: &DedupRecord) {
        if self.claims.get(&record.identity) == Some(record) {
            self.claims.remove(&record.identity);
        }
    }

    /// Insert without checking, used when replaying a journal
    pub(crate) fn insert(&mut self, record: DedupRecord) {
        self.push(record);
        self.evict_over_capacity();
    }

    fn push(&mut self, record: DedupRecord) {
        self.order
            .push_back((record.identity.clone(), record.dispatched_at));
        self.claims.insert(record.identity.clone(), record);
    }

    pub(crate) fn evict_over_capacity(&mut self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.claims.len() > capacity {
            let Some((identity, at)) = self.order.pop_front() else {
                break;
            };
            // stale order entries belong to claims already replaced or purged
            if self.claims.get(&identity).map(|r| r.dispatched_at) == Some(at) {
                self.claims.remove(&identity);
            }
        }
    }

    pub(crate) fn purge_expired(&mut self, now: Timestamp) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.claims.len();
        self.claims.retain(|_, record| unexpired(record, ttl, now));
        let claims = &self.claims;
        self.order.retain(|(identity, at)| {
            claims.get(identity).map(|r| r.dispatched_at) == Some(*at)
        });
        before - self.claims.len()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &DedupRecord> {
        self.order
            .iter()
            .filter_map(|(identity, at)| {
                self.claims
                    .get(identity)
                    .filter(|record| record.dispatched_at == *at)
            })
    }

    pub(crate) fn len(&self) -> usize {
        self.claims.len()
    }
}

/// A retention window past the representable range never expires
fn unexpired(record: &DedupRecord, ttl: Duration, now: Timestamp) -> bool {
    record
        .dispatched_at
        .checked_add_signed(ttl)
        .map_or(true, |expires_at| expires_at > now)
}

fn poisoned() -> LedgerError {
    LedgerError::Unavailable("dedup ledger lock poisoned".to_string())
}

/// Process-local ledger. Claims do not survive a restart.
#[derive(Debug)]
pub struct InMemoryDedupLedger {
    claims: Mutex<ClaimSet>,
}

impl Default for InMemoryDedupLedger {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl InMemoryDedupLedger {
    pub fn new(ttl: Option<Duration>, capacity: Option<usize>) -> Self {
        Self {
            claims: Mutex::new(ClaimSet::new(ttl, capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.claims.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn is_claimed(&self, identity: &DropIdentity, now: Timestamp) -> bool {
        self.claims
            .lock()
            .map(|c| c.contains(identity, now))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DedupLedger for InMemoryDedupLedger {
    async fn try_claim(
        &self,
        identity: &DropIdentity,
        now: Timestamp,
    ) -> Result<bool, LedgerError> {
        let mut claims = self.claims.lock().map_err(|_| poisoned())?;
        let claimed = claims.claim(identity, now).is_some();
        claims.evict_over_capacity();
        Ok(claimed)
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<usize, LedgerError> {
        let mut claims = self.claims.lock().map_err(|_| poisoned())?;
        Ok(claims.purge_expired(now))
    }
}
