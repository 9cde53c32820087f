//! In-memory record store
//!
//! Keeps logs in a concurrent map. Nothing survives the process, which is
//! what tests and ephemeral coordinators want.

use crate::store::{RecordStore, SavedRecord};
use arbiter_core::{Result, Uid};
use dashmap::DashMap;
use tracing::trace;

/// Record store backed by a `DashMap`
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    logs: DashMap<Uid, Vec<SavedRecord>>,
}

impl InMemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions with a log
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    /// True when no transaction has a log
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn save(&self, txn: Uid, record: SavedRecord) -> Result<()> {
        trace!(target: "arbiter::store", %txn, record_type = %record.record_type, "save");
        self.logs.entry(txn).or_default().push(record);
        Ok(())
    }

    fn restore(&self, txn: Uid) -> Result<Vec<SavedRecord>> {
        Ok(self
            .logs
            .get(&txn)
            .map(|records| records.clone())
            .unwrap_or_default())
    }

    fn forget(&self, txn: Uid) -> Result<bool> {
        Ok(self.logs.remove(&txn).is_some())
    }

    fn transactions(&self) -> Result<Vec<Uid>> {
        let mut uids: Vec<Uid> = self.logs.iter().map(|entry| *entry.key()).collect();
        uids.sort();
        Ok(uids)
    }
}
