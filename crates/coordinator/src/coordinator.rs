//! Two-phase commit coordinator
//!
//! A `TransactionCoordinator` owns the intentions lists of one transaction
//! and drives its records through the commit protocol.
//!
//! ## Status transitions
//!
//! ```text
//! Created -> Running -> Preparing -> Prepared -> Committing -> Committed | H_*
//!               |           |           |
//!               |           +-----------+----> Aborting -> Aborted | H_*
//!               +-> AbortOnly -------------------^
//! ```
//!
//! ## Partitions
//!
//! - `pending`: enlisted, not yet prepared
//! - `prepared`: voted to prepare (a record refusing to prepare lands here
//!   too so that it is rolled back)
//! - `read_only`: voted read-only, excluded from phase two
//! - `failed`: finished with an error, kept for recovery attention
//! - `heuristic`: reported a heuristic outcome
//!
//! Phase one stops at the first refusal. Phase two never stops early: every
//! record receives its verb exactly once and a panicking record is recorded
//! as failed.
//!
//! ## Thread Safety
//!
//! A coordinator is driven by one thread at a time. Shared handles wrap it
//! in a lock (see the engine's `AtomicTransaction`).

use crate::env::CoordinatorEnv;
use crate::heuristic::{Decision, HeuristicTracker};
use crate::hierarchy::ActionHierarchy;
use crate::intentions::{AddOutcome, IntentionsList};
use crate::record::{invoke, ParticipantRecord, Verb};
use crate::synchronization::{run_after, run_before, Synchronization};
use arbiter_core::{ActionStatus, ActionType, Error, Result, TwoPhaseOutcome, Uid};
use arbiter_durability::{Resolution, SavedRecord};
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Coordinator of one (top-level or nested) transaction
pub struct TransactionCoordinator {
    pub(crate) uid: Uid,
    pub(crate) kind: ActionType,
    pub(crate) status: ActionStatus,
    hierarchy: ActionHierarchy,
    pub(crate) env: CoordinatorEnv,
    pub(crate) pending: IntentionsList,
    pub(crate) prepared: IntentionsList,
    pub(crate) read_only: IntentionsList,
    pub(crate) failed: IntentionsList,
    pub(crate) heuristic: IntentionsList,
    // heuristic statuses reported before phase two (prepare, nested children)
    pub(crate) prior_heuristics: Vec<ActionStatus>,
    // direction of the last phase-two sweep
    pub(crate) decision: Option<Decision>,
    synchronizations: Vec<Box<dyn Synchronization>>,
    threads: Vec<ThreadId>,
    ever_associated: bool,
    pub(crate) logged: bool,
    created_at: Instant,
}

impl TransactionCoordinator {
    /// New top-level transaction in status `Created`
    pub fn new(env: CoordinatorEnv) -> Self {
        let uid = Uid::new();
        let mut hierarchy = ActionHierarchy::default();
        hierarchy.add(uid, ActionType::TopLevel);
        Self::with_parts(uid, ActionType::TopLevel, hierarchy, env)
    }

    pub(crate) fn with_parts(
        uid: Uid,
        kind: ActionType,
        hierarchy: ActionHierarchy,
        env: CoordinatorEnv,
    ) -> Self {
        let policy = env.ordering();
        Self {
            uid,
            kind,
            status: ActionStatus::Created,
            hierarchy,
            env,
            pending: IntentionsList::new(policy),
            prepared: IntentionsList::new(policy),
            read_only: IntentionsList::new(policy),
            failed: IntentionsList::new(policy),
            heuristic: IntentionsList::new(policy),
            prior_heuristics: Vec::new(),
            decision: None,
            synchronizations: Vec::new(),
            threads: Vec::new(),
            ever_associated: false,
            logged: false,
            created_at: Instant::now(),
        }
    }

    /// Transaction identifier
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Top-level or nested
    pub fn kind(&self) -> ActionType {
        self.kind
    }

    /// Current status
    pub fn status(&self) -> ActionStatus {
        self.status
    }

    /// Nesting path, outermost first, ending with this transaction
    pub fn hierarchy(&self) -> &ActionHierarchy {
        &self.hierarchy
    }

    /// Identifier of the enclosing transaction, for nested transactions
    pub fn parent(&self) -> Option<Uid> {
        match self.kind {
            ActionType::TopLevel => None,
            ActionType::Nested => {
                let depth = self.hierarchy.depth();
                depth.checked_sub(2).and_then(|i| self.hierarchy.get(i)).map(|(uid, _)| uid)
            }
        }
    }

    /// Environment this coordinator was built from
    pub fn env(&self) -> &CoordinatorEnv {
        &self.env
    }

    /// Time since construction
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Records enlisted and not yet prepared
    pub fn pending(&self) -> &IntentionsList {
        &self.pending
    }

    /// Records that voted to prepare
    pub fn prepared(&self) -> &IntentionsList {
        &self.prepared
    }

    /// Records that voted read-only
    pub fn read_only(&self) -> &IntentionsList {
        &self.read_only
    }

    /// Records that failed to finish
    pub fn failed(&self) -> &IntentionsList {
        &self.failed
    }

    /// Records that reported a heuristic outcome
    pub fn heuristic(&self) -> &IntentionsList {
        &self.heuristic
    }

    /// Type names of every record still held, in partition order
    pub fn record_type_names(&self) -> Vec<String> {
        [
            &self.pending,
            &self.prepared,
            &self.read_only,
            &self.failed,
            &self.heuristic,
        ]
        .iter()
        .flat_map(|list| list.iter().map(|r| r.type_name().to_string()))
        .collect()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// `Created -> Running`
    pub fn begin(&mut self) -> Result<()> {
        if self.status != ActionStatus::Created {
            return Err(Error::invalid_state("begin", self.status));
        }
        self.status = ActionStatus::Running;
        if self.kind == ActionType::TopLevel {
            self.env.stats().record_start();
        }
        debug!(target: "arbiter::txn", txn = %self.uid, kind = %self.kind, "Transaction begun");
        Ok(())
    }

    /// Start a nested transaction inside this one
    ///
    /// The child shares this coordinator's environment, is already running,
    /// and must be completed with `commit_nested` or `abort_nested` against
    /// this coordinator.
    pub fn begin_nested(&self) -> Result<TransactionCoordinator> {
        if !self.status.is_active() {
            return Err(Error::invalid_state("nest in", self.status));
        }
        let uid = Uid::new();
        let mut hierarchy = self.hierarchy.clone();
        hierarchy.add(uid, ActionType::Nested);
        let mut child =
            TransactionCoordinator::with_parts(uid, ActionType::Nested, hierarchy, self.env.clone());
        child.begin()?;
        Ok(child)
    }

    /// Enlist a record in the pending list
    ///
    /// A `Duplicate` outcome is an enlistment failure; the caller decides
    /// whether the transaction must become rollback-only.
    pub fn add(&mut self, record: Box<dyn ParticipantRecord>) -> Result<AddOutcome> {
        if !self.status.is_active() {
            return Err(Error::invalid_state("enlist in", self.status));
        }
        let order = record.order();
        let outcome = self.pending.insert(record);
        if outcome.accepted() {
            trace!(target: "arbiter::txn", txn = %self.uid, %order, ?outcome, "Record enlisted");
        } else {
            debug!(target: "arbiter::txn", txn = %self.uid, %order, "Enlistment rejected");
        }
        Ok(outcome)
    }

    /// Mark the transaction rollback-only
    ///
    /// Returns true if the transaction is (now) rollback-only, false once
    /// termination has begun.
    pub fn prevent_commit(&mut self) -> bool {
        match self.status {
            ActionStatus::Running => {
                self.status = ActionStatus::AbortOnly;
                debug!(target: "arbiter::txn", txn = %self.uid, "Marked rollback-only");
                true
            }
            ActionStatus::AbortOnly => true,
            _ => false,
        }
    }

    /// Register a completion callback (top-level transactions only)
    pub fn register_synchronization(&mut self, sync: Box<dyn Synchronization>) -> Result<()> {
        if self.kind == ActionType::Nested {
            return Err(Error::IsNested(self.uid));
        }
        if !self.status.is_active() {
            return Err(Error::invalid_state("register a synchronization with", self.status));
        }
        self.synchronizations.push(sync);
        Ok(())
    }

    // ========================================================================
    // Thread association
    // ========================================================================

    /// Record that `thread` is working on this transaction
    pub fn associate_thread(&mut self, thread: ThreadId) {
        self.ever_associated = true;
        if !self.threads.contains(&thread) {
            self.threads.push(thread);
        }
    }

    /// Forget `thread`; returns whether it was associated
    pub fn disassociate_thread(&mut self, thread: ThreadId) -> bool {
        let before = self.threads.len();
        self.threads.retain(|t| *t != thread);
        self.threads.len() != before
    }

    /// Threads currently associated
    pub fn associated_threads(&self) -> &[ThreadId] {
        &self.threads
    }

    /// A running transaction whose every associated thread has left
    pub fn is_orphan(&self) -> bool {
        self.status.is_active() && self.ever_associated && self.threads.is_empty()
    }

    // ========================================================================
    // Phase one
    // ========================================================================

    /// Ask every pending record to prepare, stopping at the first refusal
    ///
    /// Returns `PrepareOk` when at least one record must take part in phase
    /// two, `PrepareReadOnly` when every record voted read-only, and
    /// `PrepareNotOk` when the transaction must roll back. A transaction that
    /// is not running answers `InvalidTransaction` without touching records.
    pub fn prepare(&mut self) -> TwoPhaseOutcome {
        match self.status {
            ActionStatus::Running => {}
            ActionStatus::AbortOnly => return TwoPhaseOutcome::PrepareNotOk,
            _ => return TwoPhaseOutcome::InvalidTransaction,
        }
        self.status = ActionStatus::Preparing;

        let mut ok = true;
        while let Some(mut record) = self.pending.pop_front() {
            let vote = match invoke(record.as_mut(), self.kind, Verb::Prepare) {
                Ok(vote) => vote,
                Err(panic) => {
                    warn!(
                        target: "arbiter::txn",
                        txn = %self.uid,
                        order = %record.order(),
                        %panic,
                        "Record panicked during prepare"
                    );
                    TwoPhaseOutcome::PrepareNotOk
                }
            };

            match vote {
                TwoPhaseOutcome::PrepareOk => {
                    self.prepared.push_back(record);
                }
                TwoPhaseOutcome::PrepareReadOnly => {
                    self.read_only.push_back(record);
                }
                heuristic if heuristic.is_heuristic() => {
                    warn!(
                        target: "arbiter::txn",
                        txn = %self.uid,
                        order = %record.order(),
                        outcome = %heuristic,
                        "Heuristic outcome reported during prepare"
                    );
                    if let Some(status) = heuristic.heuristic_status() {
                        self.prior_heuristics.push(status);
                    }
                    self.heuristic.push_back(record);
                    ok = false;
                    break;
                }
                refusal => {
                    debug!(
                        target: "arbiter::txn",
                        txn = %self.uid,
                        order = %record.order(),
                        outcome = %refusal,
                        "Record refused to prepare"
                    );
                    self.prepared.push_back(record);
                    ok = false;
                    break;
                }
            }
        }

        if ok && self.kind == ActionType::TopLevel && !self.save_prepared() {
            ok = false;
        }

        if !ok {
            self.env.stats().record_resource_rollback();
            return TwoPhaseOutcome::PrepareNotOk;
        }

        self.status = ActionStatus::Prepared;
        if self.prepared.is_empty() && self.heuristic.is_empty() {
            TwoPhaseOutcome::PrepareReadOnly
        } else {
            TwoPhaseOutcome::PrepareOk
        }
    }

    // Write every prepared record that asks to be saved. False on failure,
    // in which case the partial log is dropped.
    fn save_prepared(&mut self) -> bool {
        let Some(store) = self.env.store().cloned() else {
            return true;
        };

        let mut result = Ok(());
        for record in self.prepared.iter().filter(|r| r.do_save()) {
            result = saved_record(record).and_then(|saved| store.save(self.uid, saved));
            if result.is_err() {
                break;
            }
            self.logged = true;
        }

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "arbiter::txn",
                    txn = %self.uid,
                    error = %e,
                    "Failed to save prepared records, rolling back"
                );
                if self.logged {
                    let _ = store.forget(self.uid);
                    self.logged = false;
                }
                false
            }
        }
    }

    // ========================================================================
    // Top-level completion
    // ========================================================================

    /// Commit a top-level transaction
    ///
    /// Runs before-completion callbacks, then either the one-phase
    /// optimisation (exactly one pending record that permits it) or prepare
    /// followed by phase two. A rollback-only transaction is rolled back.
    /// Callable from `Prepared` to run only phase two.
    pub fn commit(&mut self) -> Result<ActionStatus> {
        self.require_top_level()?;
        match self.status {
            ActionStatus::Running | ActionStatus::AbortOnly | ActionStatus::Prepared => {}
            status => return Err(Error::invalid_state("commit", status)),
        }

        if self.status != ActionStatus::Prepared
            && !run_before(self.uid, &mut self.synchronizations)
        {
            self.prevent_commit();
        }

        let status = match self.status {
            ActionStatus::AbortOnly => self.rollback_sweep(Verb::Abort).0,
            ActionStatus::Prepared => self.commit_sweep().0,
            _ if self.one_phase_applies() => self.one_phase(),
            _ => match self.prepare() {
                TwoPhaseOutcome::PrepareOk | TwoPhaseOutcome::PrepareReadOnly => {
                    self.commit_sweep().0
                }
                _ => self.rollback_sweep(Verb::Abort).0,
            },
        };

        Ok(self.finish_top_level(status))
    }

    /// Roll back a top-level transaction
    pub fn abort(&mut self) -> Result<ActionStatus> {
        self.require_top_level()?;
        match self.status {
            ActionStatus::Running | ActionStatus::AbortOnly => {
                self.env.stats().record_application_rollback();
            }
            ActionStatus::Preparing | ActionStatus::Prepared => {}
            status => return Err(Error::invalid_state("abort", status)),
        }

        let status = self.rollback_sweep(Verb::Abort).0;
        Ok(self.finish_top_level(status))
    }

    /// Terminate an orphaned transaction through the records' cleanup verbs
    pub fn cleanup(&mut self) -> ActionStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        debug!(target: "arbiter::txn", txn = %self.uid, status = %self.status, "Cleaning up orphan");
        self.status = ActionStatus::Cleanup;
        let status = self.rollback_sweep(Verb::Cleanup).0;
        match self.kind {
            ActionType::TopLevel => self.finish_top_level(status),
            ActionType::Nested => {
                self.env.stats().record_nested_abort();
                self.status = status;
                status
            }
        }
    }

    fn require_top_level(&self) -> Result<()> {
        match self.kind {
            ActionType::TopLevel => Ok(()),
            ActionType::Nested => Err(Error::IsNested(self.uid)),
        }
    }

    fn one_phase_applies(&self) -> bool {
        self.env.one_phase_commit()
            && self.prior_heuristics.is_empty()
            && self.pending.len() == 1
            && self
                .pending
                .iter()
                .next()
                .map(|r| r.is_permitted_one_phase_commit())
                .unwrap_or(false)
    }

    fn one_phase(&mut self) -> ActionStatus {
        let Some(mut record) = self.pending.pop_front() else {
            return ActionStatus::Committed;
        };
        self.status = ActionStatus::Committing;

        let outcome = match invoke(record.as_mut(), self.kind, Verb::OnePhaseCommit) {
            Ok(outcome) => outcome,
            Err(panic) => {
                warn!(
                    target: "arbiter::txn",
                    txn = %self.uid,
                    order = %record.order(),
                    %panic,
                    "Record panicked during one-phase commit"
                );
                TwoPhaseOutcome::OnePhaseError
            }
        };
        trace!(target: "arbiter::txn", txn = %self.uid, %outcome, "One-phase commit");

        match outcome {
            TwoPhaseOutcome::FinishOk
            | TwoPhaseOutcome::PrepareReadOnly
            | TwoPhaseOutcome::PrepareOnePhaseCommitted => ActionStatus::Committed,
            heuristic if heuristic.is_heuristic() => {
                warn!(
                    target: "arbiter::txn",
                    txn = %self.uid,
                    order = %record.order(),
                    %outcome,
                    "Heuristic outcome from one-phase commit"
                );
                self.heuristic.push_back(record);
                heuristic
                    .heuristic_status()
                    .unwrap_or(ActionStatus::HeuristicHazard)
            }
            TwoPhaseOutcome::OnePhaseError => {
                self.failed.push_back(record);
                ActionStatus::Aborted
            }
            _ => ActionStatus::Aborted,
        }
    }

    fn finish_top_level(&mut self, status: ActionStatus) -> ActionStatus {
        self.status = status;
        self.rewrite_log();
        run_after(self.uid, &mut self.synchronizations, status);

        let stats = self.env.stats();
        match status {
            ActionStatus::Committed => stats.record_commit(),
            s if s.is_heuristic() => {
                warn!(target: "arbiter::txn", txn = %self.uid, status = %s, "Transaction ended heuristically");
                stats.record_heuristic_end();
            }
            _ => stats.record_abort(),
        }
        debug!(target: "arbiter::txn", txn = %self.uid, %status, "Transaction finished");
        status
    }

    /// Replace the log with the records that still need attention
    ///
    /// Failed records are tagged with the sweep's decision so recovery
    /// drives the same verb again; heuristic records are held.
    pub(crate) fn rewrite_log(&mut self) {
        let Some(store) = self.env.store().cloned() else {
            return;
        };
        if self.logged {
            if let Err(e) = store.forget(self.uid) {
                warn!(target: "arbiter::txn", txn = %self.uid, error = %e, "Failed to forget log");
            }
            self.logged = false;
        }

        let decided = match self.decision {
            Some(Decision::Commit) => Resolution::Commit,
            // one-phase failures end aborted without a sweep
            Some(Decision::Rollback) | None => Resolution::Rollback,
        };
        let held = Resolution::Held(if self.status.is_heuristic() {
            self.status
        } else {
            ActionStatus::HeuristicHazard
        });
        let keep = self.failed.iter().map(|r| (r, decided)).chain(
            self.heuristic
                .iter()
                .filter(|r| !r.forget_heuristic())
                .map(|r| (r, held)),
        );
        for (record, resolution) in keep {
            let entry = saved_record(record).map(|saved| saved.with_resolution(resolution));
            match entry.and_then(|saved| store.save(self.uid, saved)) {
                Ok(()) => self.logged = true,
                Err(e) => warn!(
                    target: "arbiter::txn",
                    txn = %self.uid,
                    order = %record.order(),
                    error = %e,
                    "Failed to log record needing recovery"
                ),
            }
        }
    }

    // ========================================================================
    // Phase two
    // ========================================================================

    /// Commit every prepared record; returns the status and the records
    /// that finished cleanly
    pub(crate) fn commit_sweep(&mut self) -> (ActionStatus, Vec<Box<dyn ParticipantRecord>>) {
        self.status = ActionStatus::Committing;
        self.decision = Some(Decision::Commit);
        let mut tracker = self.tracker(Decision::Commit);
        let mut finished = Vec::new();
        while let Some(record) = self.prepared.pop_front() {
            self.finish_record(record, Verb::Commit, &mut tracker, &mut finished);
        }
        (tracker.status(), finished)
    }

    // Roll back every record still held: prepared first, then pending
    pub(crate) fn rollback_sweep(&mut self, verb: Verb) -> (ActionStatus, Vec<Box<dyn ParticipantRecord>>) {
        if verb == Verb::Abort {
            self.status = ActionStatus::Aborting;
        }
        self.decision = Some(Decision::Rollback);
        let mut tracker = self.tracker(Decision::Rollback);
        let mut finished = Vec::new();
        while let Some(record) = self.prepared.pop_front() {
            self.finish_record(record, verb, &mut tracker, &mut finished);
        }
        while let Some(record) = self.pending.pop_front() {
            self.finish_record(record, verb, &mut tracker, &mut finished);
        }
        (tracker.status(), finished)
    }

    fn tracker(&self, decision: Decision) -> HeuristicTracker {
        let mut tracker = HeuristicTracker::new(decision);
        for &status in &self.prior_heuristics {
            tracker.observe_prior(status);
        }
        tracker
    }

    fn finish_record(
        &mut self,
        mut record: Box<dyn ParticipantRecord>,
        verb: Verb,
        tracker: &mut HeuristicTracker,
        finished: &mut Vec<Box<dyn ParticipantRecord>>,
    ) {
        let outcome = match invoke(record.as_mut(), self.kind, verb) {
            Ok(outcome) => outcome,
            Err(panic) => {
                warn!(
                    target: "arbiter::txn",
                    txn = %self.uid,
                    order = %record.order(),
                    ?verb,
                    %panic,
                    "Record panicked during phase two"
                );
                TwoPhaseOutcome::FinishError
            }
        };
        tracker.observe(outcome);

        match outcome {
            TwoPhaseOutcome::FinishOk | TwoPhaseOutcome::PrepareReadOnly => finished.push(record),
            o if o.is_heuristic() => {
                warn!(
                    target: "arbiter::txn",
                    txn = %self.uid,
                    order = %record.order(),
                    outcome = %o,
                    ?verb,
                    "Heuristic outcome during phase two"
                );
                self.heuristic.push_back(record);
            }
            o => {
                warn!(
                    target: "arbiter::txn",
                    txn = %self.uid,
                    order = %record.order(),
                    outcome = %o,
                    ?verb,
                    "Record failed to finish, keeping it for recovery"
                );
                self.failed.push_back(record);
            }
        }
    }

    // ========================================================================
    // Nested completion
    // ========================================================================

    /// Commit a nested transaction into `parent`
    ///
    /// Records that finish cleanly and `propagate_on_commit()` are enlisted
    /// in the parent's pending list. Heuristic and failed records move to
    /// the parent's corresponding lists. A rollback-only or refusing nested
    /// transaction is rolled back instead.
    pub fn commit_nested(&mut self, parent: &mut TransactionCoordinator) -> Result<ActionStatus> {
        self.check_parent(parent)?;
        match self.status {
            ActionStatus::Running => {}
            ActionStatus::AbortOnly => return self.abort_nested(parent),
            status => return Err(Error::invalid_state("commit", status)),
        }

        let status = match self.prepare() {
            TwoPhaseOutcome::PrepareOk | TwoPhaseOutcome::PrepareReadOnly => {
                let (status, mut finished) = self.commit_sweep();
                finished.extend(self.read_only.drain());
                let moved = finished.into_iter().filter(|r| r.propagate_on_commit());
                self.propagate(parent, moved);
                self.env.stats().record_nested_commit();
                status
            }
            _ => {
                let (status, finished) = self.rollback_sweep(Verb::Abort);
                let moved = finished.into_iter().filter(|r| r.propagate_on_abort());
                self.propagate(parent, moved);
                self.env.stats().record_nested_abort();
                status
            }
        };
        self.hand_over_leftovers(parent, status);
        self.status = status;
        debug!(target: "arbiter::txn", txn = %self.uid, parent = %parent.uid, %status, "Nested transaction finished");
        Ok(status)
    }

    /// Roll back a nested transaction
    ///
    /// Only records with `propagate_on_abort()` move to the parent.
    pub fn abort_nested(&mut self, parent: &mut TransactionCoordinator) -> Result<ActionStatus> {
        self.check_parent(parent)?;
        if !self.status.is_active() {
            return Err(Error::invalid_state("abort", self.status));
        }

        let (status, finished) = self.rollback_sweep(Verb::Abort);
        let moved = finished.into_iter().filter(|r| r.propagate_on_abort());
        self.propagate(parent, moved);
        self.hand_over_leftovers(parent, status);
        self.env.stats().record_nested_abort();
        self.status = status;
        debug!(target: "arbiter::txn", txn = %self.uid, parent = %parent.uid, %status, "Nested transaction rolled back");
        Ok(status)
    }

    fn check_parent(&self, parent: &TransactionCoordinator) -> Result<()> {
        if self.kind != ActionType::Nested {
            return Err(Error::NotNested(self.uid));
        }
        if self.parent() != Some(parent.uid) {
            return Err(Error::WrongParent {
                child: self.uid,
                parent: parent.uid,
            });
        }
        if !parent.status.is_active() {
            return Err(Error::invalid_state("complete a child of", parent.status));
        }
        Ok(())
    }

    fn propagate(
        &self,
        parent: &mut TransactionCoordinator,
        records: impl Iterator<Item = Box<dyn ParticipantRecord>>,
    ) {
        for record in records {
            let order = record.order();
            if !parent.pending.insert(record).accepted() {
                warn!(
                    target: "arbiter::txn",
                    txn = %self.uid,
                    parent = %parent.uid,
                    %order,
                    "Parent rejected propagated record, marking it rollback-only"
                );
                parent.prevent_commit();
            }
        }
    }

    fn hand_over_leftovers(&mut self, parent: &mut TransactionCoordinator, status: ActionStatus) {
        for record in self.failed.drain() {
            parent.failed.push_back(record);
        }
        for record in self.heuristic.drain() {
            parent.heuristic.push_back(record);
        }
        if status.is_heuristic() {
            parent.prior_heuristics.push(status);
        }
    }
}

/// Log form of a record
pub(crate) fn saved_record(record: &dyn ParticipantRecord) -> Result<SavedRecord> {
    Ok(SavedRecord::new(
        record.record_type(),
        record.order(),
        record.type_name(),
        record.save_state()?,
    ))
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("uid", &self.uid)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("pending", &self.pending.len())
            .field("prepared", &self.prepared.len())
            .field("read_only", &self.read_only.len())
            .field("failed", &self.failed.len())
            .field("heuristic", &self.heuristic.len())
            .finish()
    }
}
