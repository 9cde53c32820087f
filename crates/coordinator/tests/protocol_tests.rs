//! Integration tests for the commit protocol
//!
//! These tests verify that:
//! 1. Prepare stops at the first refusal and the transaction rolls back
//! 2. Phase two reaches every record exactly once, whatever earlier records did
//! 3. One-phase commit ends in the same state as prepare + commit
//! 4. Heuristic outcomes are classified and surfaced
//! 5. Completion callbacks always run

use arbiter_coordinator::{
    AddOutcome, CallLog, CoordinatorEnv, ScriptedRecord, Synchronization, TransactionCoordinator,
};
use arbiter_core::{ActionStatus, OrderingPolicy, TwoPhaseOutcome, Uid};
use parking_lot::Mutex;
use std::sync::Arc;

fn env() -> CoordinatorEnv {
    CoordinatorEnv::new(OrderingPolicy::OrderFirst)
}

fn running(env: CoordinatorEnv) -> TransactionCoordinator {
    let mut txn = TransactionCoordinator::new(env);
    txn.begin().unwrap();
    txn
}

// Records with increasing order keys, so list order is enlistment order
fn enlist(txn: &mut TransactionCoordinator, records: Vec<ScriptedRecord>) {
    for record in records {
        assert_eq!(txn.add(Box::new(record)).unwrap(), AddOutcome::Added);
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_three_records_commit() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![
            ScriptedRecord::new("r1", &log),
            ScriptedRecord::new("r2", &log),
            ScriptedRecord::new("r3", &log),
        ],
    );

    assert_eq!(txn.commit().unwrap(), ActionStatus::Committed);
    for name in ["r1", "r2", "r3"] {
        assert_eq!(log.calls_for(name), vec!["prepare", "commit"]);
    }
    assert!(txn.failed().is_empty());
    assert!(txn.heuristic().is_empty());
}

#[test]
fn test_second_record_refuses_prepare() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![
            ScriptedRecord::new("r1", &log),
            ScriptedRecord::new("r2", &log).with_prepare(TwoPhaseOutcome::PrepareNotOk),
            ScriptedRecord::new("r3", &log),
        ],
    );

    assert_eq!(txn.commit().unwrap(), ActionStatus::Aborted);
    assert_eq!(log.calls_for("r1"), vec!["prepare", "abort"]);
    assert_eq!(log.calls_for("r2"), vec!["prepare", "abort"]);
    assert_eq!(log.count("r3", "prepare"), 0);
    assert_eq!(log.count("r3", "commit"), 0);
    // never prepared, still told to roll back
    assert_eq!(log.calls_for("r3"), vec!["abort"]);

    let metrics = txn.env().stats().snapshot();
    assert_eq!(metrics.resource_rollbacks, 1);
    assert_eq!(metrics.total_aborted, 1);
}

#[test]
fn test_replace_scenario() {
    let log = CallLog::new();
    let mut txn = running(env());
    let key = Uid::new();

    let a = ScriptedRecord::new("A", &log).with_order(key).replacing();
    let b = ScriptedRecord::new("B", &log)
        .with_order(key)
        .with_commit(TwoPhaseOutcome::HeuristicCommit);
    assert_eq!(txn.add(Box::new(a)).unwrap(), AddOutcome::Added);
    assert_eq!(txn.add(Box::new(b)).unwrap(), AddOutcome::Replaced);

    assert_eq!(txn.pending().len(), 1);
    assert_eq!(log.calls_for("A"), vec!["replace(B)"]);
    assert!(log.calls_for("B").is_empty());

    // the survivor carries B's behaviour
    let status = txn.commit().unwrap();
    assert_eq!(status, ActionStatus::HeuristicCommit);
}

#[test]
fn test_duplicate_enlistment_is_reported() {
    let log = CallLog::new();
    let mut txn = running(env());
    let key = Uid::new();

    txn.add(Box::new(ScriptedRecord::new("A", &log).with_order(key)))
        .unwrap();
    let outcome = txn
        .add(Box::new(ScriptedRecord::new("B", &log).with_order(key)))
        .unwrap();
    assert_eq!(outcome, AddOutcome::Duplicate);

    // the caller's response to a rejected enlistment
    assert!(txn.prevent_commit());
    assert_eq!(txn.commit().unwrap(), ActionStatus::Aborted);
    assert_eq!(log.calls_for("A"), vec!["abort"]);
}

// ============================================================================
// Phase Two Totality
// ============================================================================

#[test]
fn test_commit_continues_past_failures() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![
            ScriptedRecord::new("ok1", &log),
            ScriptedRecord::new("boom", &log).panicking_on("commit"),
            ScriptedRecord::new("err", &log).with_commit(TwoPhaseOutcome::FinishError),
            ScriptedRecord::new("ok2", &log),
        ],
    );

    assert_eq!(txn.commit().unwrap(), ActionStatus::Committed);
    for name in ["ok1", "boom", "err", "ok2"] {
        assert_eq!(log.count(name, "commit"), 1, "{} committed once", name);
    }
    assert_eq!(txn.failed().len(), 2);
}

#[test]
fn test_abort_continues_past_failures() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![
            ScriptedRecord::new("boom", &log).panicking_on("abort"),
            ScriptedRecord::new("err", &log).with_abort(TwoPhaseOutcome::FinishError),
            ScriptedRecord::new("ok", &log),
        ],
    );

    assert_eq!(txn.abort().unwrap(), ActionStatus::Aborted);
    for name in ["boom", "err", "ok"] {
        assert_eq!(log.calls_for(name), vec!["abort"]);
    }
    assert_eq!(txn.failed().len(), 2);
    assert_eq!(txn.env().stats().snapshot().application_rollbacks, 1);
}

#[test]
fn test_panic_in_prepare_rolls_back() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![
            ScriptedRecord::new("boom", &log).panicking_on("prepare"),
            ScriptedRecord::new("later", &log),
        ],
    );

    assert_eq!(txn.commit().unwrap(), ActionStatus::Aborted);
    assert_eq!(log.calls_for("boom"), vec!["prepare", "abort"]);
    assert_eq!(log.calls_for("later"), vec!["abort"]);
}

#[test]
fn test_read_only_records_skip_phase_two() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![
            ScriptedRecord::new("ro", &log).with_prepare(TwoPhaseOutcome::PrepareReadOnly),
            ScriptedRecord::new("rw", &log),
        ],
    );

    assert_eq!(txn.commit().unwrap(), ActionStatus::Committed);
    assert_eq!(log.calls_for("ro"), vec!["prepare"]);
    assert_eq!(log.calls_for("rw"), vec!["prepare", "commit"]);
    assert_eq!(txn.read_only().len(), 1);
}

#[test]
fn test_explicit_prepare_then_commit() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![ScriptedRecord::new("a", &log), ScriptedRecord::new("b", &log)],
    );

    assert_eq!(txn.prepare(), TwoPhaseOutcome::PrepareOk);
    assert_eq!(txn.status(), ActionStatus::Prepared);
    assert_eq!(txn.commit().unwrap(), ActionStatus::Committed);
    assert_eq!(log.calls_for("a"), vec!["prepare", "commit"]);
}

#[test]
fn test_explicit_prepare_then_abort() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(&mut txn, vec![ScriptedRecord::new("a", &log)]);

    assert_eq!(txn.prepare(), TwoPhaseOutcome::PrepareOk);
    assert_eq!(txn.abort().unwrap(), ActionStatus::Aborted);
    assert_eq!(log.calls_for("a"), vec!["prepare", "abort"]);
}

// ============================================================================
// One-Phase Commit
// ============================================================================

fn one_phase_outcome(prepare: TwoPhaseOutcome, one_phase: bool) -> (ActionStatus, Vec<String>) {
    let log = CallLog::new();
    let mut txn = running(env().with_one_phase_commit(one_phase));
    enlist(
        &mut txn,
        vec![ScriptedRecord::new("solo", &log).with_prepare(prepare)],
    );
    let status = txn.commit().unwrap();
    (status, log.calls_for("solo"))
}

#[test]
fn test_one_phase_equivalence() {
    for prepare in [
        TwoPhaseOutcome::PrepareOk,
        TwoPhaseOutcome::PrepareReadOnly,
        TwoPhaseOutcome::PrepareNotOk,
    ] {
        let (fast_status, fast_calls) = one_phase_outcome(prepare, true);
        let (slow_status, slow_calls) = one_phase_outcome(prepare, false);
        assert_eq!(fast_status, slow_status, "vote {}", prepare);
        // a refusing record is rolled back explicitly only on the two-phase path
        assert_eq!(log_without_abort(&fast_calls), log_without_abort(&slow_calls));
    }

    let (_, calls) = one_phase_outcome(TwoPhaseOutcome::PrepareOk, true);
    assert_eq!(calls, vec!["prepare", "commit"]);
    let (_, calls) = one_phase_outcome(TwoPhaseOutcome::PrepareReadOnly, true);
    assert_eq!(calls, vec!["prepare"]);
}

fn log_without_abort(calls: &[String]) -> Vec<String> {
    calls.iter().filter(|c| *c != "abort").cloned().collect()
}

#[test]
fn test_one_phase_error_keeps_record() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![ScriptedRecord::new("solo", &log).with_prepare(TwoPhaseOutcome::OnePhaseError)],
    );

    assert_eq!(txn.commit().unwrap(), ActionStatus::Aborted);
    assert_eq!(txn.failed().len(), 1);
    assert_eq!(log.count("solo", "commit"), 0);
}

#[test]
fn test_one_phase_not_permitted_uses_two_phases() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![ScriptedRecord::new("solo", &log)
            .with_prepare(TwoPhaseOutcome::OnePhaseError)
            .without_one_phase()],
    );

    // a two-phase prepare treats the unexpected vote as a refusal
    assert_eq!(txn.commit().unwrap(), ActionStatus::Aborted);
    assert_eq!(log.calls_for("solo"), vec!["prepare", "abort"]);
    assert!(txn.failed().is_empty());
}

// ============================================================================
// Heuristics
// ============================================================================

#[test]
fn test_contradicting_heuristic_is_mixed() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![
            ScriptedRecord::new("ok", &log),
            ScriptedRecord::new("h", &log).with_commit(TwoPhaseOutcome::HeuristicRollback),
        ],
    );

    assert_eq!(txn.commit().unwrap(), ActionStatus::HeuristicMixed);
    assert_eq!(txn.heuristic().len(), 1);
    assert_eq!(txn.env().stats().snapshot().heuristics, 1);
}

#[test]
fn test_hazard_during_abort() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![
            ScriptedRecord::new("h", &log).with_abort(TwoPhaseOutcome::HeuristicHazard),
            ScriptedRecord::new("ok", &log),
        ],
    );

    assert_eq!(txn.abort().unwrap(), ActionStatus::HeuristicHazard);
    assert_eq!(log.calls_for("ok"), vec!["abort"]);
}

#[test]
fn test_heuristic_at_prepare_fails_vote() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![
            ScriptedRecord::new("first", &log),
            ScriptedRecord::new("h", &log).with_prepare(TwoPhaseOutcome::HeuristicRollback),
            ScriptedRecord::new("never", &log),
        ],
    );

    let status = txn.commit().unwrap();
    assert_eq!(status, ActionStatus::HeuristicRollback);
    assert_eq!(log.count("never", "prepare"), 0);
    // the record already decided: it is not rolled back again
    assert_eq!(log.calls_for("h"), vec!["prepare"]);
}

// ============================================================================
// Synchronizations
// ============================================================================

struct Recorder {
    veto: bool,
    panic_after: bool,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Synchronization for Recorder {
    fn before_completion(&mut self) -> bool {
        self.seen.lock().push("before".to_string());
        !self.veto
    }

    fn after_completion(&mut self, status: ActionStatus) {
        self.seen.lock().push(format!("after:{}", status));
        if self.panic_after {
            panic!("after_completion failed");
        }
    }
}

fn recorder(veto: bool, panic_after: bool) -> (Box<Recorder>, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sync = Box::new(Recorder {
        veto,
        panic_after,
        seen: Arc::clone(&seen),
    });
    (sync, seen)
}

#[test]
fn test_synchronization_around_commit() {
    let log = CallLog::new();
    let mut txn = running(env());
    let (sync, seen) = recorder(false, false);
    txn.register_synchronization(sync).unwrap();
    enlist(&mut txn, vec![ScriptedRecord::new("a", &log)]);

    assert_eq!(txn.commit().unwrap(), ActionStatus::Committed);
    assert_eq!(*seen.lock(), vec!["before", "after:COMMITTED"]);
}

#[test]
fn test_before_completion_veto_rolls_back() {
    let log = CallLog::new();
    let mut txn = running(env());
    let (sync, seen) = recorder(true, false);
    txn.register_synchronization(sync).unwrap();
    enlist(&mut txn, vec![ScriptedRecord::new("a", &log)]);

    assert_eq!(txn.commit().unwrap(), ActionStatus::Aborted);
    assert_eq!(log.calls_for("a"), vec!["abort"]);
    assert_eq!(*seen.lock(), vec!["before", "after:ABORTED"]);
}

#[test]
fn test_after_completion_runs_when_rollback_panics() {
    let log = CallLog::new();
    let mut txn = running(env());
    let (sync, seen) = recorder(false, true);
    txn.register_synchronization(sync).unwrap();
    let (second, second_seen) = recorder(false, false);
    txn.register_synchronization(second).unwrap();
    enlist(
        &mut txn,
        vec![ScriptedRecord::new("boom", &log).panicking_on("abort")],
    );

    assert_eq!(txn.abort().unwrap(), ActionStatus::Aborted);
    assert_eq!(*seen.lock(), vec!["after:ABORTED"]);
    // a panicking callback does not stop the next one
    assert_eq!(*second_seen.lock(), vec!["after:ABORTED"]);
}

// ============================================================================
// Orphans
// ============================================================================

#[test]
fn test_cleanup_uses_cleanup_verbs() {
    let log = CallLog::new();
    let mut txn = running(env());
    enlist(
        &mut txn,
        vec![ScriptedRecord::new("a", &log), ScriptedRecord::new("b", &log)],
    );
    let me = std::thread::current().id();
    txn.associate_thread(me);
    txn.disassociate_thread(me);
    assert!(txn.is_orphan());

    assert_eq!(txn.cleanup(), ActionStatus::Aborted);
    assert_eq!(log.calls_for("a"), vec!["cleanup"]);
    assert_eq!(log.calls_for("b"), vec!["cleanup"]);
    assert_eq!(txn.cleanup(), ActionStatus::Aborted);
    assert_eq!(log.calls().len(), 2);
}
