//! Keyed store of live candidates.

use std::path::PathBuf;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::arbitrage::CandidateRecord;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// An existing record for the fingerprint was superseded.
    Replaced,
    /// The stored record was at least as good; nothing changed.
    Kept,
}

/// Candidates keyed by fingerprint. Writes replace whole records.
pub trait CandidateRepository: Send + Sync {
    fn get(&self, fingerprint: &str) -> Option<CandidateRecord>;

    /// Store `record` unless a record for the same fingerprint promises more
    /// profit. Equal profit goes to the newer record.
    fn put(&self, record: CandidateRecord) -> PutOutcome;

    fn delete(&self, fingerprint: &str) -> bool;

    fn list(&self) -> Vec<CandidateRecord>;

    fn flush(&self) -> Result<(), AppError>;
}

fn supersedes(new: &CandidateRecord, old: &CandidateRecord) -> bool {
    let new_profit = new.estimated_profit_usd.unwrap_or(f64::NEG_INFINITY);
    let old_profit = old.estimated_profit_usd.unwrap_or(f64::NEG_INFINITY);
    if new_profit != old_profit {
        return new_profit > old_profit;
    }
    new.created_at_ms > old.created_at_ms
}

/// `dashmap` backed repository. `flush` optionally writes a JSON snapshot.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: DashMap<String, CandidateRecord>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        Self {
            records: DashMap::new(),
            snapshot_path: Some(path.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CandidateRepository for InMemoryRepository {
    fn get(&self, fingerprint: &str) -> Option<CandidateRecord> {
        self.records.get(fingerprint).map(|r| r.clone())
    }

    fn put(&self, record: CandidateRecord) -> PutOutcome {
        match self.records.entry(record.fingerprint.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                PutOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                if supersedes(&record, slot.get()) {
                    slot.insert(record);
                    PutOutcome::Replaced
                } else {
                    PutOutcome::Kept
                }
            }
        }
    }

    fn delete(&self, fingerprint: &str) -> bool {
        let removed = self.records.remove(fingerprint).is_some();
        if removed {
            debug!(fingerprint, "[ENGINE] candidate retired");
        }
        removed
    }

    fn list(&self) -> Vec<CandidateRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    fn flush(&self) -> Result<(), AppError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut records = self.list();
        records.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        std::fs::write(path, serde_json::to_vec_pretty(&records)?)?;
        info!(path = %path.display(), count = records.len(), "[ENGINE] repository flushed");
        Ok(())
    }
}
