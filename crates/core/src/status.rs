//! Transaction status and per-record protocol outcomes
//!
//! `ActionStatus` is the state of one transaction as the coordinator drives
//! it through two-phase commit. `TwoPhaseOutcome` is what every participant
//! verb returns; the coordinator folds many outcomes into one status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a transaction
///
/// Transitions:
/// - `Created` → `Running` (begin)
/// - `Running` → `Preparing` → `Prepared` → `Committing` → `Committed`
/// - `Running` | `Preparing` → `Aborting` → `Aborted`
/// - `Running` → `AbortOnly` → `Aborting` → `Aborted`
///
/// The heuristic states are terminal and only reached from phase two, when
/// participants decided differently from the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Executing; records may be enlisted
    Running,
    /// Phase one in progress
    Preparing,
    /// Rollback in progress
    Aborting,
    /// Marked rollback-only; any commit attempt aborts
    AbortOnly,
    /// Rolled back
    Aborted,
    /// Every participant voted yes; decision not yet applied
    Prepared,
    /// Phase-two commit in progress
    Committing,
    /// Committed
    Committed,
    /// Constructed but not yet begun
    Created,
    /// Unusable transaction
    Invalid,
    /// Orphan cleanup in progress
    Cleanup,
    /// Participants rolled back although the decision was commit
    HeuristicRollback,
    /// Participants committed although the decision was rollback
    HeuristicCommit,
    /// Some participants committed and some rolled back
    HeuristicMixed,
    /// Outcome of at least one participant is unknown
    HeuristicHazard,
    /// Transaction support disabled
    Disabled,
    /// No transaction
    NoAction,
}

impl ActionStatus {
    /// True for the `H_*` states
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            ActionStatus::HeuristicRollback
                | ActionStatus::HeuristicCommit
                | ActionStatus::HeuristicMixed
                | ActionStatus::HeuristicHazard
        )
    }

    /// True once the transaction can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Committed | ActionStatus::Aborted | ActionStatus::Invalid
        ) || self.is_heuristic()
    }

    /// True while records may still be enlisted
    pub fn is_active(&self) -> bool {
        matches!(self, ActionStatus::Running | ActionStatus::AbortOnly)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionStatus::Running => "RUNNING",
            ActionStatus::Preparing => "PREPARING",
            ActionStatus::Aborting => "ABORTING",
            ActionStatus::AbortOnly => "ABORT_ONLY",
            ActionStatus::Aborted => "ABORTED",
            ActionStatus::Prepared => "PREPARED",
            ActionStatus::Committing => "COMMITTING",
            ActionStatus::Committed => "COMMITTED",
            ActionStatus::Created => "CREATED",
            ActionStatus::Invalid => "INVALID",
            ActionStatus::Cleanup => "CLEANUP",
            ActionStatus::HeuristicRollback => "H_ROLLBACK",
            ActionStatus::HeuristicCommit => "H_COMMIT",
            ActionStatus::HeuristicMixed => "H_MIXED",
            ActionStatus::HeuristicHazard => "H_HAZARD",
            ActionStatus::Disabled => "DISABLED",
            ActionStatus::NoAction => "NO_ACTION",
        };
        f.write_str(s)
    }
}

/// Result of one participant verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TwoPhaseOutcome {
    /// Prepared; will follow the coordinator's decision
    PrepareOk,
    /// Refuses to prepare; the transaction must roll back
    PrepareNotOk,
    /// Made no changes; needs no phase two
    PrepareReadOnly,
    /// Unilaterally rolled back
    HeuristicRollback,
    /// Unilaterally committed
    HeuristicCommit,
    /// Partly committed, partly rolled back
    HeuristicMixed,
    /// Outcome unknown
    HeuristicHazard,
    /// Phase two completed
    FinishOk,
    /// Phase two failed; retry through recovery
    FinishError,
    /// Asked to complete without having prepared
    NotPrepared,
    /// One-phase commit failed and the participant could not say how
    OnePhaseError,
    /// Participant does not know this transaction
    InvalidTransaction,
    /// Prepare was answered by committing in one phase
    PrepareOnePhaseCommitted,
}

impl TwoPhaseOutcome {
    /// True for the heuristic outcomes
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            TwoPhaseOutcome::HeuristicRollback
                | TwoPhaseOutcome::HeuristicCommit
                | TwoPhaseOutcome::HeuristicMixed
                | TwoPhaseOutcome::HeuristicHazard
        )
    }

    /// Heuristic status a phase-two outcome maps to, if any
    pub fn heuristic_status(&self) -> Option<ActionStatus> {
        match self {
            TwoPhaseOutcome::HeuristicRollback => Some(ActionStatus::HeuristicRollback),
            TwoPhaseOutcome::HeuristicCommit => Some(ActionStatus::HeuristicCommit),
            TwoPhaseOutcome::HeuristicMixed => Some(ActionStatus::HeuristicMixed),
            TwoPhaseOutcome::HeuristicHazard => Some(ActionStatus::HeuristicHazard),
            _ => None,
        }
    }
}

impl fmt::Display for TwoPhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TwoPhaseOutcome::PrepareOk => "PREPARE_OK",
            TwoPhaseOutcome::PrepareNotOk => "PREPARE_NOTOK",
            TwoPhaseOutcome::PrepareReadOnly => "PREPARE_READONLY",
            TwoPhaseOutcome::HeuristicRollback => "HEURISTIC_ROLLBACK",
            TwoPhaseOutcome::HeuristicCommit => "HEURISTIC_COMMIT",
            TwoPhaseOutcome::HeuristicMixed => "HEURISTIC_MIXED",
            TwoPhaseOutcome::HeuristicHazard => "HEURISTIC_HAZARD",
            TwoPhaseOutcome::FinishOk => "FINISH_OK",
            TwoPhaseOutcome::FinishError => "FINISH_ERROR",
            TwoPhaseOutcome::NotPrepared => "NOT_PREPARED",
            TwoPhaseOutcome::OnePhaseError => "ONE_PHASE_ERROR",
            TwoPhaseOutcome::InvalidTransaction => "INVALID_TRANSACTION",
            TwoPhaseOutcome::PrepareOnePhaseCommitted => "PREPARE_ONE_PHASE_COMMITTED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_statuses() {
        assert!(ActionStatus::HeuristicMixed.is_heuristic());
        assert!(ActionStatus::HeuristicHazard.is_terminal());
        assert!(!ActionStatus::Committed.is_heuristic());
        assert!(!ActionStatus::Running.is_terminal());
        assert!(!ActionStatus::Preparing.is_terminal());
    }

    #[test]
    fn test_active_statuses() {
        assert!(ActionStatus::Running.is_active());
        assert!(ActionStatus::AbortOnly.is_active());
        assert!(!ActionStatus::Committing.is_active());
        assert!(!ActionStatus::Created.is_active());
    }

    #[test]
    fn test_display_uses_protocol_names() {
        assert_eq!(ActionStatus::AbortOnly.to_string(), "ABORT_ONLY");
        assert_eq!(ActionStatus::HeuristicRollback.to_string(), "H_ROLLBACK");
        assert_eq!(TwoPhaseOutcome::PrepareNotOk.to_string(), "PREPARE_NOTOK");
        assert_eq!(
            TwoPhaseOutcome::PrepareOnePhaseCommitted.to_string(),
            "PREPARE_ONE_PHASE_COMMITTED"
        );
    }

    #[test]
    fn test_outcome_heuristic_status() {
        assert_eq!(
            TwoPhaseOutcome::HeuristicCommit.heuristic_status(),
            Some(ActionStatus::HeuristicCommit)
        );
        assert_eq!(TwoPhaseOutcome::FinishError.heuristic_status(), None);
        assert!(TwoPhaseOutcome::HeuristicHazard.is_heuristic());
        assert!(!TwoPhaseOutcome::PrepareReadOnly.is_heuristic());
    }
}
