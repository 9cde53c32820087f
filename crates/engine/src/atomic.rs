//! Shared transaction handle the reaper can time out
//!
//! `AtomicTransaction` puts a `TransactionCoordinator` behind a mutex so the
//! application thread and a reaper worker can both drive it. Marking it
//! rollback-only never takes that mutex: a flag is raised and applied by
//! whoever next holds the coordinator.

use crate::reaper::{Interrupt, Reapable, TransactionReaper};
use arbiter_coordinator::{
    AddOutcome, ParticipantRecord, Synchronization, TransactionCoordinator,
};
use arbiter_core::{ActionStatus, Error, Result, Uid};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Wait per attempt when a cancel competes for the coordinator
const CANCEL_LOCK_ATTEMPT: Duration = Duration::from_millis(10);

/// What the reaper saw of a transaction ahead of its deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticSnapshot {
    /// Time since the transaction began
    pub taken_after: Duration,
    /// Status, or `None` if the coordinator was busy
    pub status: Option<ActionStatus>,
    /// Type names of the enlisted records
    pub records: Vec<String>,
    /// Threads associated at the time
    pub threads: Vec<ThreadId>,
}

/// A top-level transaction shared between its owner and the reaper
pub struct AtomicTransaction {
    uid: Uid,
    coordinator: Mutex<TransactionCoordinator>,
    rollback_only: AtomicBool,
    completing: AtomicBool,
    reaper: Weak<TransactionReaper>,
    started: Instant,
    snapshots: Mutex<Vec<DiagnosticSnapshot>>,
}

impl AtomicTransaction {
    /// Wrap a running top-level coordinator
    ///
    /// `reaper` is the reaper the handle deregisters from once complete.
    pub fn new(coordinator: TransactionCoordinator, reaper: Weak<TransactionReaper>) -> Result<Self> {
        if coordinator.parent().is_some() {
            return Err(Error::IsNested(coordinator.uid()));
        }
        Ok(Self {
            uid: coordinator.uid(),
            coordinator: Mutex::new(coordinator),
            rollback_only: AtomicBool::new(false),
            completing: AtomicBool::new(false),
            reaper,
            started: Instant::now(),
            snapshots: Mutex::new(Vec::new()),
        })
    }

    /// Transaction identifier
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Current status (blocks while another thread drives the coordinator)
    pub fn status(&self) -> ActionStatus {
        self.coordinator.lock().status()
    }

    /// Whether the transaction was marked rollback-only
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst) || self.status() == ActionStatus::AbortOnly
    }

    /// Direct access to the coordinator
    pub fn coordinator(&self) -> MutexGuard<'_, TransactionCoordinator> {
        self.coordinator.lock()
    }

    /// Enlist a participant record
    pub fn add(&self, record: Box<dyn ParticipantRecord>) -> Result<AddOutcome> {
        self.coordinator.lock().add(record)
    }

    /// Register a completion callback
    pub fn register_synchronization(&self, sync: Box<dyn Synchronization>) -> Result<()> {
        self.coordinator.lock().register_synchronization(sync)
    }

    /// Commit, honouring a rollback-only mark raised by any thread
    pub fn commit(&self) -> Result<ActionStatus> {
        let mut coordinator = self.coordinator.lock();
        self.begin_completion(&mut coordinator);
        let result = coordinator.commit();
        drop(coordinator);
        self.deregister();
        result
    }

    /// Roll back
    pub fn rollback(&self) -> Result<ActionStatus> {
        let mut coordinator = self.coordinator.lock();
        self.begin_completion(&mut coordinator);
        let result = coordinator.abort();
        drop(coordinator);
        self.deregister();
        result
    }

    /// Diagnostics captured ahead of the deadline
    pub fn snapshots(&self) -> Vec<DiagnosticSnapshot> {
        self.snapshots.lock().clone()
    }

    fn begin_completion(&self, coordinator: &mut TransactionCoordinator) {
        // Pairs with prevent_commit: either that call sees `completing` or
        // this one sees the mark
        self.completing.store(true, Ordering::SeqCst);
        if self.rollback_only.load(Ordering::SeqCst) {
            coordinator.prevent_commit();
        }
    }

    fn deregister(&self) {
        if let Some(reaper) = self.reaper.upgrade() {
            reaper.remove(self.uid);
        }
    }
}

impl Reapable for AtomicTransaction {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn running(&self) -> bool {
        match self.coordinator.try_lock() {
            Some(coordinator) => coordinator.status().is_active(),
            None => !self.completing.load(Ordering::SeqCst),
        }
    }

    fn cancel(&self, interrupt: &Interrupt) -> ActionStatus {
        loop {
            if let Some(mut coordinator) = self.coordinator.try_lock_for(CANCEL_LOCK_ATTEMPT) {
                if !coordinator.status().is_active() {
                    trace!(target: "arbiter::txn", txn = %self.uid, status = %coordinator.status(), "Owner finished before the timeout rollback");
                    return ActionStatus::NoAction;
                }
                self.completing.store(true, Ordering::SeqCst);
                return match coordinator.abort() {
                    Ok(status) => {
                        debug!(target: "arbiter::txn", txn = %self.uid, %status, "Transaction rolled back on timeout");
                        status
                    }
                    Err(e) => {
                        warn!(target: "arbiter::txn", txn = %self.uid, error = %e, "Timeout rollback refused");
                        coordinator.status()
                    }
                };
            }
            if interrupt.is_interrupted() {
                debug!(target: "arbiter::txn", txn = %self.uid, "Cancel interrupted while waiting for the coordinator");
                return ActionStatus::Running;
            }
        }
    }

    fn prevent_commit(&self) -> bool {
        self.rollback_only.store(true, Ordering::SeqCst);
        if let Some(mut coordinator) = self.coordinator.try_lock() {
            return coordinator.prevent_commit();
        }
        !self.completing.load(Ordering::SeqCst)
    }

    fn record_stack_traces(&self) {
        let snapshot = match self.coordinator.try_lock() {
            Some(coordinator) => DiagnosticSnapshot {
                taken_after: self.started.elapsed(),
                status: Some(coordinator.status()),
                records: coordinator.record_type_names(),
                threads: coordinator.associated_threads().to_vec(),
            },
            None => DiagnosticSnapshot {
                taken_after: self.started.elapsed(),
                status: None,
                records: Vec::new(),
                threads: Vec::new(),
            },
        };
        self.snapshots.lock().push(snapshot);
    }

    fn output_captured_stack_traces(&self) {
        for snapshot in self.snapshots.lock().iter() {
            warn!(
                target: "arbiter::reaper",
                txn = %self.uid,
                after = ?snapshot.taken_after,
                status = ?snapshot.status,
                records = ?snapshot.records,
                threads = ?snapshot.threads,
                "Timed-out transaction diagnostics"
            );
        }
    }
}

impl std::fmt::Debug for AtomicTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicTransaction")
            .field("uid", &self.uid)
            .field("rollback_only", &self.rollback_only.load(Ordering::Relaxed))
            .field("completing", &self.completing.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for AtomicTransaction {
    fn drop(&mut self) {
        let coordinator = self.coordinator.get_mut();
        if coordinator.status().is_active() {
            debug!(target: "arbiter::txn", txn = %self.uid, "Rolling back abandoned transaction");
            let _ = coordinator.abort();
        }
    }
}
