//! CSV-journaled dedup ledger
//!
//! A claim is appended and flushed to `ledger/claims.csv` before `try_claim`
//! reports success, and the journal is replayed on open, so claims survive
//! restarts. Purging rewrites the journal with the live claims only.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use super::{ClaimSet, DedupLedger};
use crate::error::LedgerError;
use crate::types::{DedupRecord, DropIdentity, ItemId, ObservationId, Timestamp};

const JOURNAL_FILE: &str = "claims.csv";

/// Claim row for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClaimRecord {
    item: String,
    observation_id: String,
    dispatched_at: DateTime<Utc>,
}

impl From<&DedupRecord> for ClaimRecord {
    fn from(record: &DedupRecord) -> Self {
        Self {
            item: record.identity.item.to_string(),
            observation_id: record.identity.observation_id.to_string(),
            dispatched_at: record.dispatched_at,
        }
    }
}

impl From<ClaimRecord> for DedupRecord {
    fn from(row: ClaimRecord) -> Self {
        DedupRecord {
            identity: DropIdentity {
                item: ItemId::new(row.item),
                observation_id: ObservationId::from_hex(row.observation_id),
            },
            dispatched_at: row.dispatched_at,
        }
    }
}

struct Journaled {
    claims: ClaimSet,
    writer: csv::Writer<fs::File>,
}

/// Durable ledger backed by an append-only claim journal
pub struct CsvDedupLedger {
    path: PathBuf,
    state: Mutex<Journaled>,
}

impl CsvDedupLedger {
    /// Open (or create) the journal under `data_dir/ledger`
    pub fn open(
        data_dir: impl AsRef<Path>,
        ttl: Option<Duration>,
        capacity: Option<usize>,
    ) -> Result<Self, LedgerError> {
        let dir = data_dir.as_ref().join("ledger");
        fs::create_dir_all(&dir)?;
        let path = dir.join(JOURNAL_FILE);

        let mut claims = ClaimSet::new(ttl, capacity);
        if path.exists() {
            let file = fs::File::open(&path)?;
            let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
            for result in reader.deserialize() {
                let row: ClaimRecord = result?;
                claims.insert(row.into());
            }
        }
        let expired = claims.purge_expired(Utc::now());
        info!(path = %path.display(), claims = claims.len(), expired, "Dedup journal loaded");

        let writer = Self::create_writer(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(Journaled { claims, writer }),
        })
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>, LedgerError> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    /// Rewrite the journal with the given records, then reopen it for appends
    fn rewrite(&self, state: &mut Journaled) -> Result<(), LedgerError> {
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = WriterBuilder::new().has_headers(true).from_path(&tmp)?;
            for record in state.claims.records() {
                writer.serialize(ClaimRecord::from(record))?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        state.writer = Self::create_writer(&self.path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.claims.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn is_claimed(&self, identity: &DropIdentity, now: Timestamp) -> bool {
        self.state
            .lock()
            .map(|s| s.claims.contains(identity, now))
            .unwrap_or(false)
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Unavailable("dedup journal lock poisoned".to_string())
}

#[async_trait]
impl DedupLedger for CsvDedupLedger {
    async fn try_claim(
        &self,
        identity: &DropIdentity,
        now: Timestamp,
    ) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let Some(record) = state.claims.claim(identity, now) else {
            return Ok(false);
        };

        let mut written = state
            .writer
            .serialize(ClaimRecord::from(&record))
            .map_err(LedgerError::from);
        if written.is_ok() {
            written = state.writer.flush().map_err(LedgerError::from);
        }
        if let Err(e) = written {
            // not durable, let a redelivery try again
            state.claims.release(&record);
            warn!(identity = %identity, error = %e, "Claim journal write failed");
            return Err(e);
        }
        state.claims.evict_over_capacity();
        Ok(true)
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<usize, LedgerError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let removed = state.claims.purge_expired(now);
        if removed > 0 {
            self.rewrite(&mut state)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::identity;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "pricedrop_ledger_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    #[tokio::test]
    async fn claims_survive_reopen() {
        let dir = temp_data_dir("reopen");
        let now = Utc::now();
        {
            let ledger = CsvDedupLedger::open(&dir, None, None).unwrap();
            assert!(ledger.try_claim(&identity(1), now).await.unwrap());
        }

        let ledger = CsvDedupLedger::open(&dir, None, None).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.try_claim(&identity(1), now).await.unwrap());
        assert!(ledger.try_claim(&identity(2), now).await.unwrap());

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn purge_compacts_journal() {
        let dir = temp_data_dir("purge");
        let now = Utc::now();
        let ttl = Duration::hours(1);
        {
            let ledger = CsvDedupLedger::open(&dir, Some(ttl), None).unwrap();
            assert!(ledger
                .try_claim(&identity(1), now - Duration::minutes(90))
                .await
                .unwrap());
            assert!(ledger.try_claim(&identity(2), now).await.unwrap());
            assert_eq!(ledger.purge_expired(now).await.unwrap(), 1);
            assert!(ledger.try_claim(&identity(3), now).await.unwrap());
        }

        let journal = fs::read_to_string(dir.join("ledger").join(JOURNAL_FILE)).unwrap();
        assert_eq!(journal.lines().count(), 3, "header + two live claims");

        let ledger = CsvDedupLedger::open(&dir, Some(ttl), None).unwrap();
        assert!(ledger.is_claimed(&identity(2), now));
        assert!(ledger.is_claimed(&identity(3), now));
        assert!(!ledger.is_claimed(&identity(1), now));

        let _ = fs::remove_dir_all(&dir);
    }
}
