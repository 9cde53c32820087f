//! Test harness for coordinator behavior
//!
//! `ScriptedRecord` is a participant whose answers are fixed up front and
//! whose every call is appended to a shared `CallLog`, so tests can assert
//! which verbs ran, on which record, in which order.

use crate::record::ParticipantRecord;
use arbiter_core::{RecordType, Result, TwoPhaseOutcome, Uid};
use arbiter_durability::SavedRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

/// Shared, ordered log of `(record name, call)` pairs
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl CallLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call
    pub fn record(&self, name: &str, call: impl Into<String>) {
        self.calls.lock().push((name.to_string(), call.into()));
    }

    /// Every call so far
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    /// Calls made on the record named `name`
    pub fn calls_for(&self, name: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// How often `name` received `call`
    pub fn count(&self, name: &str, call: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(n, c)| n == name && c == call)
            .count()
    }

    /// Forget every call
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[derive(Serialize, Deserialize)]
struct ScriptState {
    name: String,
    commit: TwoPhaseOutcome,
}

/// Participant record with scripted answers
#[derive(Debug, Clone)]
pub struct ScriptedRecord {
    name: String,
    order: Uid,
    record_type: RecordType,
    prepare: TwoPhaseOutcome,
    commit: TwoPhaseOutcome,
    abort: TwoPhaseOutcome,
    panic_on: Option<&'static str>,
    merge: bool,
    replace: bool,
    add: bool,
    alter: bool,
    save: bool,
    forget_heuristic: bool,
    propagate_on_abort: bool,
    propagate_on_commit: bool,
    one_phase: bool,
    log: CallLog,
}

impl ScriptedRecord {
    /// Record that prepares and finishes cleanly, with a fresh order
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            order: Uid::new(),
            record_type: RecordType::USER_DEFINED,
            prepare: TwoPhaseOutcome::PrepareOk,
            commit: TwoPhaseOutcome::FinishOk,
            abort: TwoPhaseOutcome::FinishOk,
            panic_on: None,
            merge: false,
            replace: false,
            add: false,
            alter: false,
            save: false,
            forget_heuristic: false,
            propagate_on_abort: false,
            propagate_on_commit: true,
            one_phase: true,
            log: log.clone(),
        }
    }

    /// Name used in the call log
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of `record` if it is a `ScriptedRecord`
    pub fn name_of(record: &dyn ParticipantRecord) -> Option<String> {
        record
            .as_any()
            .downcast_ref::<ScriptedRecord>()
            .map(|r| r.name.clone())
    }

    /// Set the order key
    pub fn with_order(mut self, order: Uid) -> Self {
        self.order = order;
        self
    }

    /// Set the record type
    pub fn with_type(mut self, record_type: RecordType) -> Self {
        self.record_type = record_type;
        self
    }

    /// Answer to prepare (both levels)
    pub fn with_prepare(mut self, outcome: TwoPhaseOutcome) -> Self {
        self.prepare = outcome;
        self
    }

    /// Answer to commit (both levels)
    pub fn with_commit(mut self, outcome: TwoPhaseOutcome) -> Self {
        self.commit = outcome;
        self
    }

    /// Answer to abort and cleanup (both levels)
    pub fn with_abort(mut self, outcome: TwoPhaseOutcome) -> Self {
        self.abort = outcome;
        self
    }

    /// Panic when `call` ("prepare", "commit", "abort", "cleanup") runs
    pub fn panicking_on(mut self, call: &'static str) -> Self {
        self.panic_on = Some(call);
        self
    }

    /// Absorb equal newcomers
    pub fn merging(mut self) -> Self {
        self.merge = true;
        self
    }

    /// Take over equal newcomers' state
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    /// Accept equal newcomers as separate entries
    pub fn accepting_adds(mut self) -> Self {
        self.add = true;
        self
    }

    /// Alter itself with equal newcomers
    pub fn altering(mut self) -> Self {
        self.alter = true;
        self
    }

    /// Ask to be logged before phase two
    pub fn saved(mut self) -> Self {
        self.save = true;
        self
    }

    /// Allow a heuristic outcome to be dropped once reported
    pub fn forgetting_heuristic(mut self) -> Self {
        self.forget_heuristic = true;
        self
    }

    /// Move to the parent on nested abort
    pub fn propagating_on_abort(mut self) -> Self {
        self.propagate_on_abort = true;
        self
    }

    /// Stay behind on nested commit
    pub fn not_propagating_on_commit(mut self) -> Self {
        self.propagate_on_commit = false;
        self
    }

    /// Forbid the one-phase optimisation
    pub fn without_one_phase(mut self) -> Self {
        self.one_phase = false;
        self
    }

    /// Rebuild a record from the state written by `save_state`
    pub fn restore(saved: &SavedRecord, log: &CallLog) -> Result<Self> {
        let state: ScriptState = rmp_serde::from_slice(&saved.payload)?;
        Ok(ScriptedRecord::new(&state.name, log)
            .with_order(saved.order)
            .with_type(saved.record_type)
            .with_commit(state.commit)
            .saved())
    }

    /// Factory suitable for `RecordRegistry::register`
    pub fn factory(
        log: &CallLog,
    ) -> impl Fn(&SavedRecord) -> Result<Box<dyn ParticipantRecord>> + Send + Sync + 'static {
        let log = log.clone();
        move |saved| {
            let record: Box<dyn ParticipantRecord> = Box::new(ScriptedRecord::restore(saved, &log)?);
            Ok(record)
        }
    }

    fn run(&self, call: &'static str, outcome: TwoPhaseOutcome) -> TwoPhaseOutcome {
        self.log.record(&self.name, call);
        if self.panic_on == Some(call) {
            panic!("{} panicked in {}", self.name, call);
        }
        outcome
    }

    fn other_name(other: &dyn ParticipantRecord) -> String {
        Self::name_of(other).unwrap_or_else(|| other.type_name().to_string())
    }
}

impl ParticipantRecord for ScriptedRecord {
    fn order(&self) -> Uid {
        self.order
    }

    fn record_type(&self) -> RecordType {
        self.record_type
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn top_level_prepare(&mut self) -> TwoPhaseOutcome {
        self.run("prepare", self.prepare)
    }

    fn top_level_commit(&mut self) -> TwoPhaseOutcome {
        self.run("commit", self.commit)
    }

    fn top_level_abort(&mut self) -> TwoPhaseOutcome {
        self.run("abort", self.abort)
    }

    fn nested_prepare(&mut self) -> TwoPhaseOutcome {
        self.run("prepare", self.prepare)
    }

    fn nested_commit(&mut self) -> TwoPhaseOutcome {
        self.run("commit", self.commit)
    }

    fn nested_abort(&mut self) -> TwoPhaseOutcome {
        self.run("abort", self.abort)
    }

    fn top_level_cleanup(&mut self) -> TwoPhaseOutcome {
        self.run("cleanup", self.abort)
    }

    fn nested_cleanup(&mut self) -> TwoPhaseOutcome {
        self.run("cleanup", self.abort)
    }

    fn is_permitted_one_phase_commit(&self) -> bool {
        self.one_phase
    }

    fn merge(&mut self, other: &dyn ParticipantRecord) {
        self.log.record(&self.name, format!("merge({})", Self::other_name(other)));
    }

    fn alter(&mut self, other: &dyn ParticipantRecord) {
        self.log.record(&self.name, format!("alter({})", Self::other_name(other)));
    }

    fn replace(&mut self, other: &dyn ParticipantRecord) {
        self.log.record(&self.name, format!("replace({})", Self::other_name(other)));
        if let Some(other) = other.as_any().downcast_ref::<ScriptedRecord>() {
            self.prepare = other.prepare;
            self.commit = other.commit;
            self.abort = other.abort;
            self.save = other.save;
        }
    }

    fn should_add(&self, _other: &dyn ParticipantRecord) -> bool {
        self.add
    }

    fn should_alter(&self, _other: &dyn ParticipantRecord) -> bool {
        self.alter
    }

    fn should_merge(&self, _other: &dyn ParticipantRecord) -> bool {
        self.merge
    }

    fn should_replace(&self, _other: &dyn ParticipantRecord) -> bool {
        self.replace
    }

    fn do_save(&self) -> bool {
        self.save
    }

    fn forget_heuristic(&self) -> bool {
        self.forget_heuristic
    }

    fn propagate_on_abort(&self) -> bool {
        self.propagate_on_abort
    }

    fn propagate_on_commit(&self) -> bool {
        self.propagate_on_commit
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        let state = ScriptState {
            name: self.name.clone(),
            commit: self.commit,
        };
        Ok(rmp_serde::to_vec(&state)?)
    }
}
