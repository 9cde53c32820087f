//! Arbiter - two-phase-commit transaction coordination core
//!
//! Arbiter drives participant records through prepare and commit (or
//! rollback), tracks heuristic outcomes, propagates nested transactions to
//! their parents, and times out transactions that run too long.
//!
//! # Quick Start
//!
//! ```ignore
//! use arbiter::{CallLog, EngineConfig, OrderingPolicy, ScriptedRecord, TransactionManager};
//! use std::time::Duration;
//!
//! let manager = TransactionManager::new(EngineConfig::new(OrderingPolicy::OrderFirst))?;
//! let txn = manager.begin(Duration::from_secs(30))?;
//!
//! let log = CallLog::new();
//! txn.add(Box::new(ScriptedRecord::new("inventory", &log)))?;
//! txn.commit()?;
//! ```
//!
//! # Architecture
//!
//! - `arbiter-core`: identifiers, statuses, errors
//! - `arbiter-durability`: record stores for prepared transactions
//! - `arbiter-coordinator`: the commit protocol itself
//! - `arbiter-engine`: reaper, shared transaction handles, configuration

pub use arbiter_coordinator::{
    recover_all, ActionHierarchy, AddOutcome, CallLog, CoordinatorEnv, Decision,
    HeuristicTracker, IntentionsList, ParticipantRecord, RecordHandle, RecordRegistry,
    ScriptedRecord, Synchronization, TransactionCoordinator, TransactionMetrics,
};
pub use arbiter_core::{
    ActionStatus, ActionType, Error, OrderingPolicy, RecordType, Result, TwoPhaseOutcome, Uid,
};
pub use arbiter_durability::{FileRecordStore, InMemoryRecordStore, RecordStore, SavedRecord};
pub use arbiter_engine::{
    AtomicTransaction, CheckMode, EngineConfig, Interrupt, Reapable, ReaperMonitor,
    ReaperStatus, TransactionManager, TransactionReaper,
};
