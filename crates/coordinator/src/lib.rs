//! Two-phase commit coordination for Arbiter
//!
//! This crate drives enlisted participants through the commit protocol:
//! - ParticipantRecord: the verb set every enlisted resource exposes
//! - IntentionsList: ordered, arena-backed list of records
//! - ActionHierarchy: nesting path of a transaction
//! - TransactionCoordinator: the 2PC state machine, nested completion,
//!   orphan cleanup, persistence of prepared records
//! - HeuristicTracker: classification of phase-two outcomes
//! - Synchronization: before/after completion callbacks
//! - TransactionStats: shared counters
//! - RecordRegistry: log replay of prepared transactions
//! - Testing infrastructure (scripted records and call logs)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod env;
pub mod heuristic;
pub mod hierarchy;
pub mod intentions;
pub mod metrics;
pub mod record;
pub mod recovery;
pub mod synchronization;
pub mod testing; // Scripted participants for tests

pub use coordinator::TransactionCoordinator;
pub use env::CoordinatorEnv;
pub use heuristic::{Decision, HeuristicTracker};
pub use hierarchy::ActionHierarchy;
pub use intentions::{AddOutcome, IntentionsList, RecordHandle};
pub use metrics::{TransactionMetrics, TransactionStats};
pub use record::{compare_records, panic_message, record_key, records_equal, ParticipantRecord};
pub use recovery::{recover_all, RecordFactory, RecordRegistry};
pub use synchronization::Synchronization;
pub use testing::{CallLog, ScriptedRecord};
