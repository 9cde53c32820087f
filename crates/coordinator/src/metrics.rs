//! Transaction counters
//!
//! Shared by every coordinator built from the same environment. Counters
//! are relaxed atomics; `snapshot()` reads them into a plain struct.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by coordinators and the reaper
#[derive(Debug, Default)]
pub struct TransactionStats {
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
    nested_committed: AtomicU64,
    nested_aborted: AtomicU64,
    heuristics: AtomicU64,
    application_rollbacks: AtomicU64,
    resource_rollbacks: AtomicU64,
    timeouts: AtomicU64,
}

impl TransactionStats {
    /// Fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&self) {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.finish();
        self.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.finish();
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// A top-level transaction ended in a heuristic status
    pub(crate) fn record_heuristic_end(&self) {
        self.finish();
        self.heuristics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_nested_commit(&self) {
        self.nested_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_nested_abort(&self) {
        self.nested_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_application_rollback(&self) {
        self.application_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resource_rollback(&self) {
        self.resource_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one reaper-initiated termination
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    // Saturating: a coordinator that never began must not wrap the gauge
    fn finish(&self) {
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            nested_committed: self.nested_committed.load(Ordering::Relaxed),
            nested_aborted: self.nested_aborted.load(Ordering::Relaxed),
            heuristics: self.heuristics.load(Ordering::Relaxed),
            application_rollbacks: self.application_rollbacks.load(Ordering::Relaxed),
            resource_rollbacks: self.resource_rollbacks.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}

/// Transaction statistics
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionMetrics {
    /// Top-level transactions begun but not finished
    pub active_count: u64,
    /// Total top-level transactions started
    pub total_started: u64,
    /// Total top-level transactions committed
    pub total_committed: u64,
    /// Total top-level transactions rolled back
    pub total_aborted: u64,
    /// Nested transactions committed
    pub nested_committed: u64,
    /// Nested transactions rolled back
    pub nested_aborted: u64,
    /// Top-level transactions that ended with a heuristic status
    pub heuristics: u64,
    /// Rollbacks requested by the application
    pub application_rollbacks: u64,
    /// Rollbacks caused by a participant refusing to prepare
    pub resource_rollbacks: u64,
    /// Transactions terminated by the reaper
    pub timeouts: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Total transactions that completed (committed + aborted + heuristic)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted + self.heuristics
    }

    /// Abort rate (aborted / started)
    pub fn abort_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_aborted as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
