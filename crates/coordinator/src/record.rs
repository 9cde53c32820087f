//! Participant record contract
//!
//! A `ParticipantRecord` is the coordinator's view of one enlisted resource.
//! Concrete adapters (lock managers, persistent objects, interposed
//! coordinators, remote resources) implement this trait; the coordinator
//! only ever holds `Box<dyn ParticipantRecord>`.
//!
//! ## Identity and ordering
//!
//! A record is keyed by `(order(), record_type())`. Two records are equal
//! when both parts match. Whether `order` or `record_type` is the primary
//! component when comparing is an `OrderingPolicy` carried by the list, not
//! by the record.
//!
//! ## List management
//!
//! When a record is enlisted and an equal record is already present, the
//! list asks the existing record `should_merge`, `should_replace`,
//! `should_add` and `should_alter` (in that order) with the newcomer as the
//! argument. `merge`, `replace` and `alter` mutate the existing record using
//! the newcomer's data; implementations downcast through `as_any()`.

use arbiter_core::{ActionType, OrderingPolicy, RecordType, Result, TwoPhaseOutcome, Uid};
use std::any::Any;
use std::cmp::Ordering;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// One enlisted resource's commit protocol surface
pub trait ParticipantRecord: Send + 'static {
    /// Identifier of the managed object (primary ordering component)
    fn order(&self) -> Uid;

    /// Record kind tag
    fn record_type(&self) -> RecordType;

    /// Type name of the managed object
    fn type_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Upcast for downcasting inside `merge`/`alter`/`replace`
    fn as_any(&self) -> &dyn Any;

    /// Phase one of a top-level transaction
    fn top_level_prepare(&mut self) -> TwoPhaseOutcome;

    /// Phase two commit of a top-level transaction
    fn top_level_commit(&mut self) -> TwoPhaseOutcome;

    /// Phase two rollback of a top-level transaction
    fn top_level_abort(&mut self) -> TwoPhaseOutcome;

    /// Phase one of a nested transaction
    fn nested_prepare(&mut self) -> TwoPhaseOutcome;

    /// Commit of a nested transaction
    fn nested_commit(&mut self) -> TwoPhaseOutcome;

    /// Rollback of a nested transaction
    fn nested_abort(&mut self) -> TwoPhaseOutcome;

    /// Prepare and commit in one call
    ///
    /// The default runs `top_level_prepare` and only commits on
    /// `PrepareOk`. A read-only vote finishes without a commit call.
    fn top_level_one_phase_commit(&mut self) -> TwoPhaseOutcome {
        one_phase(self.top_level_prepare(), || self.top_level_commit())
    }

    /// Nested counterpart of `top_level_one_phase_commit`
    fn nested_one_phase_commit(&mut self) -> TwoPhaseOutcome {
        one_phase(self.nested_prepare(), || self.nested_commit())
    }

    /// Terminate an orphaned top-level transaction; orphans are aborts
    fn top_level_cleanup(&mut self) -> TwoPhaseOutcome {
        self.top_level_abort()
    }

    /// Terminate an orphaned nested transaction; orphans are aborts
    fn nested_cleanup(&mut self) -> TwoPhaseOutcome {
        self.nested_abort()
    }

    /// Whether the coordinator may use the one-phase optimisation
    fn is_permitted_one_phase_commit(&self) -> bool {
        true
    }

    /// Absorb `other` into `self`
    fn merge(&mut self, _other: &dyn ParticipantRecord) {}

    /// Adjust `self` in light of `other`
    fn alter(&mut self, _other: &dyn ParticipantRecord) {}

    /// Take over the state of `other`, superseding what `self` held
    fn replace(&mut self, _other: &dyn ParticipantRecord) {}

    /// Keep `other` as a separate entry next to `self`
    fn should_add(&self, _other: &dyn ParticipantRecord) -> bool {
        false
    }

    /// Alter `self` with `other` and drop `other`
    fn should_alter(&self, _other: &dyn ParticipantRecord) -> bool {
        false
    }

    /// Merge `other` into `self` and drop `other`
    fn should_merge(&self, _other: &dyn ParticipantRecord) -> bool {
        false
    }

    /// Replace `self`'s state with `other`'s and drop `other`
    fn should_replace(&self, _other: &dyn ParticipantRecord) -> bool {
        false
    }

    /// Whether the record must be logged before phase two
    fn do_save(&self) -> bool {
        false
    }

    /// Whether a heuristic outcome may be dropped once reported
    fn forget_heuristic(&self) -> bool {
        false
    }

    /// Whether a nested abort moves this record to the parent
    fn propagate_on_abort(&self) -> bool {
        false
    }

    /// Whether a nested commit moves this record to the parent
    fn propagate_on_commit(&self) -> bool {
        true
    }

    /// Record-specific state written to the log when `do_save()` is true
    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

fn one_phase(
    vote: TwoPhaseOutcome,
    commit: impl FnOnce() -> TwoPhaseOutcome,
) -> TwoPhaseOutcome {
    match vote {
        TwoPhaseOutcome::PrepareOk => commit(),
        TwoPhaseOutcome::PrepareReadOnly => TwoPhaseOutcome::FinishOk,
        TwoPhaseOutcome::OnePhaseError => TwoPhaseOutcome::OnePhaseError,
        _ => TwoPhaseOutcome::FinishError,
    }
}

/// `(order, record_type)` key of a record
pub fn record_key(record: &dyn ParticipantRecord) -> (Uid, RecordType) {
    (record.order(), record.record_type())
}

/// Compare two records under `policy`
pub fn compare_records(
    policy: OrderingPolicy,
    a: &dyn ParticipantRecord,
    b: &dyn ParticipantRecord,
) -> Ordering {
    policy.compare(record_key(a), record_key(b))
}

/// Key equality; identical under both ordering policies
pub fn records_equal(a: &dyn ParticipantRecord, b: &dyn ParticipantRecord) -> bool {
    record_key(a) == record_key(b)
}

/// Verbs the coordinator drives on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    Prepare,
    Commit,
    Abort,
    OnePhaseCommit,
    Cleanup,
}

/// Invoke `verb` at `level`, converting a panic into `Err(message)`
///
/// A participant fault must never unwind through the coordinator; the
/// caller maps the error to a failure-class outcome for the current phase.
pub(crate) fn invoke(
    record: &mut dyn ParticipantRecord,
    level: ActionType,
    verb: Verb,
) -> std::result::Result<TwoPhaseOutcome, String> {
    let result = catch_unwind(AssertUnwindSafe(|| match (level, verb) {
        (ActionType::TopLevel, Verb::Prepare) => record.top_level_prepare(),
        (ActionType::TopLevel, Verb::Commit) => record.top_level_commit(),
        (ActionType::TopLevel, Verb::Abort) => record.top_level_abort(),
        (ActionType::TopLevel, Verb::OnePhaseCommit) => record.top_level_one_phase_commit(),
        (ActionType::TopLevel, Verb::Cleanup) => record.top_level_cleanup(),
        (ActionType::Nested, Verb::Prepare) => record.nested_prepare(),
        (ActionType::Nested, Verb::Commit) => record.nested_commit(),
        (ActionType::Nested, Verb::Abort) => record.nested_abort(),
        (ActionType::Nested, Verb::OnePhaseCommit) => record.nested_one_phase_commit(),
        (ActionType::Nested, Verb::Cleanup) => record.nested_cleanup(),
    }));
    result.map_err(|panic| panic_message(panic.as_ref()))
}

/// Text of a caught panic payload
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}
