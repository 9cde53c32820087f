//! Log replay
//!
//! A transaction whose log survives a crash was prepared (the log is only
//! written after a successful prepare). Each entry carries the decision to
//! re-drive: entries written before phase two say commit, entries rewritten
//! afterwards say whichever way the transaction went. Heuristic entries are
//! held for an administrator and never re-driven. Records are rebuilt by
//! factories registered per `RecordType`.

use crate::coordinator::TransactionCoordinator;
use crate::env::CoordinatorEnv;
use crate::hierarchy::ActionHierarchy;
use crate::record::{ParticipantRecord, Verb};
use arbiter_core::{ActionStatus, ActionType, Error, RecordType, Result, Uid};
use arbiter_durability::{Resolution, SavedRecord};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Rebuilds a record from its log form
pub type RecordFactory =
    Box<dyn Fn(&SavedRecord) -> Result<Box<dyn ParticipantRecord>> + Send + Sync>;

/// Factories keyed by record type
#[derive(Default)]
pub struct RecordRegistry {
    factories: HashMap<RecordType, RecordFactory>,
}

impl RecordRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `record_type`, replacing any previous one
    pub fn register<F>(&mut self, record_type: RecordType, factory: F) -> &mut Self
    where
        F: Fn(&SavedRecord) -> Result<Box<dyn ParticipantRecord>> + Send + Sync + 'static,
    {
        self.factories.insert(record_type, Box::new(factory));
        self
    }

    /// Whether a factory exists for `record_type`
    pub fn contains(&self, record_type: RecordType) -> bool {
        self.factories.contains_key(&record_type)
    }

    /// Rebuild `saved`
    pub fn create(&self, saved: &SavedRecord) -> Result<Box<dyn ParticipantRecord>> {
        let factory = self
            .factories
            .get(&saved.record_type)
            .ok_or(Error::UnknownRecordType(saved.record_type))?;
        factory(saved)
    }
}

impl std::fmt::Debug for RecordRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort();
        f.debug_struct("RecordRegistry").field("types", &types).finish()
    }
}

impl TransactionCoordinator {
    /// Rebuild transaction `uid` from its log
    ///
    /// The result is a top-level coordinator whose prepared list holds the
    /// records to re-drive in save order, in status `Committing` or
    /// `Aborting` to match their decision. Held records land in the
    /// heuristic list. A log mixing commit and rollback entries is corrupt.
    pub fn recover(uid: Uid, env: CoordinatorEnv, registry: &RecordRegistry) -> Result<Self> {
        let store = env
            .store()
            .cloned()
            .ok_or_else(|| Error::Persistence("no record store configured".to_string()))?;
        let saved = store.restore(uid)?;

        let mut hierarchy = ActionHierarchy::default();
        hierarchy.add(uid, ActionType::TopLevel);
        let mut txn = TransactionCoordinator::with_parts(uid, ActionType::TopLevel, hierarchy, env);
        let mut commits = false;
        let mut rollbacks = false;
        for record in &saved {
            let rebuilt = registry.create(record)?;
            match record.resolution {
                Resolution::Commit => commits = true,
                Resolution::Rollback => rollbacks = true,
                Resolution::Held(status) => {
                    txn.prior_heuristics.push(status);
                    txn.heuristic.push_back(rebuilt);
                    continue;
                }
            }
            txn.prepared.push_back(rebuilt);
        }
        if commits && rollbacks {
            return Err(Error::Corruption(format!(
                "log of {} mixes commit and rollback decisions",
                uid
            )));
        }
        txn.status = if rollbacks {
            ActionStatus::Aborting
        } else {
            ActionStatus::Committing
        };
        txn.logged = !saved.is_empty();

        debug!(target: "arbiter::txn", txn = %uid, records = saved.len(), "Recovered transaction log");
        Ok(txn)
    }

    /// Re-drive the logged decision over the recovered records
    ///
    /// The log is forgotten when every record finishes, otherwise rewritten
    /// with the records still needing attention.
    pub fn replay_phase_two(&mut self) -> Result<ActionStatus> {
        let (status, _) = match self.status {
            ActionStatus::Committing => self.commit_sweep(),
            ActionStatus::Aborting => self.rollback_sweep(Verb::Abort),
            status => return Err(Error::invalid_state("replay", status)),
        };
        self.status = status;
        self.rewrite_log();
        Ok(status)
    }
}

/// Replay every transaction the environment's store holds a log for
///
/// A transaction that cannot be rebuilt is skipped with a warning and its
/// log left in place.
pub fn recover_all(
    env: &CoordinatorEnv,
    registry: &RecordRegistry,
) -> Result<Vec<(Uid, ActionStatus)>> {
    let store = env
        .store()
        .cloned()
        .ok_or_else(|| Error::Persistence("no record store configured".to_string()))?;

    let mut outcomes = Vec::new();
    for uid in store.transactions()? {
        let result = TransactionCoordinator::recover(uid, env.clone(), registry)
            .and_then(|mut txn| txn.replay_phase_two());
        match result {
            Ok(status) => outcomes.push((uid, status)),
            Err(e) => warn!(target: "arbiter::txn", txn = %uid, error = %e, "Skipping unrecoverable transaction"),
        }
    }
    info!(target: "arbiter::txn", recovered = outcomes.len(), "Recovery pass complete");
    Ok(outcomes)
}
