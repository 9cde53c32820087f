//! Record store capability
//!
//! The coordinator persists participant records whose `do_save()` is true
//! before it starts phase two, and keeps records that need administrator or
//! recovery attention afterwards. It only needs four operations, so any
//! backing store (file, database, remote log) can implement this trait.

use arbiter_core::{ActionStatus, RecordType, Result, Uid};
use serde::{Deserialize, Serialize};

/// What recovery must do with a logged record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    /// Decided to commit: drive commit
    #[default]
    Commit,
    /// Decided to roll back: drive rollback
    Rollback,
    /// Reported a heuristic outcome; never re-driven, kept for an
    /// administrator along with the transaction's heuristic status
    Held(ActionStatus),
}

/// One participant record as written to a transaction's log
///
/// `order` and `type_name` form the base identity every record carries;
/// `payload` is whatever the record's own `save_state()` produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRecord {
    /// Record kind, used to pick a factory on restore
    pub record_type: RecordType,
    /// Identifier of the object the record manages
    pub order: Uid,
    /// Type name of the managed object
    pub type_name: String,
    /// Record-specific state
    pub payload: Vec<u8>,
    /// Decision recovery re-drives
    #[serde(default)]
    pub resolution: Resolution,
}

impl SavedRecord {
    /// Create a saved record
    pub fn new(
        record_type: RecordType,
        order: Uid,
        type_name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            record_type,
            order,
            type_name: type_name.into(),
            payload,
            resolution: Resolution::Commit,
        }
    }

    /// Same record with a different resolution
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }
}

/// Durable storage for transaction logs
///
/// Implementations must be safe to share between the application threads
/// driving transactions and recovery.
pub trait RecordStore: Send + Sync {
    /// Append a record to the log of `txn`
    fn save(&self, txn: Uid, record: SavedRecord) -> Result<()>;

    /// All records saved for `txn`, in save order; empty if none
    fn restore(&self, txn: Uid) -> Result<Vec<SavedRecord>>;

    /// Drop the log of `txn`; returns whether a log existed
    fn forget(&self, txn: Uid) -> Result<bool>;

    /// Transactions that currently have a log (candidates for recovery)
    fn transactions(&self) -> Result<Vec<Uid>>;
}
