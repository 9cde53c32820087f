//! Phase-two outcome classification
//!
//! Folds the per-record outcomes of a commit or rollback sweep into the
//! transaction's final status. Rules:
//!
//! - every record finished cleanly: the decision status (`Committed` or
//!   `Aborted`)
//! - any `HeuristicMixed`, heuristic commit and rollback together, or a
//!   heuristic contradicting the decision while other records followed it:
//!   `HeuristicMixed`
//! - otherwise any `HeuristicHazard`: `HeuristicHazard`
//! - otherwise the single heuristic direction reported

use arbiter_core::{ActionStatus, TwoPhaseOutcome};

/// Direction of a phase-two sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Committing
    Commit,
    /// Rolling back
    Rollback,
}

impl Decision {
    /// Status reached when every record follows the decision
    pub fn status(self) -> ActionStatus {
        match self {
            Decision::Commit => ActionStatus::Committed,
            Decision::Rollback => ActionStatus::Aborted,
        }
    }
}

/// Accumulator over phase-two outcomes
#[derive(Debug, Clone)]
pub struct HeuristicTracker {
    decision: Decision,
    followed: usize,
    failed: usize,
    committed: bool,
    rolled_back: bool,
    mixed: bool,
    hazard: bool,
}

impl HeuristicTracker {
    /// Tracker for a sweep in direction `decision`
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            followed: 0,
            failed: 0,
            committed: false,
            rolled_back: false,
            mixed: false,
            hazard: false,
        }
    }

    /// Account for one record's outcome
    pub fn observe(&mut self, outcome: TwoPhaseOutcome) {
        match outcome {
            TwoPhaseOutcome::FinishOk | TwoPhaseOutcome::PrepareReadOnly => self.followed += 1,
            TwoPhaseOutcome::HeuristicCommit => self.committed = true,
            TwoPhaseOutcome::HeuristicRollback => self.rolled_back = true,
            TwoPhaseOutcome::HeuristicMixed => self.mixed = true,
            TwoPhaseOutcome::HeuristicHazard => self.hazard = true,
            _ => self.failed += 1,
        }
    }

    /// Account for a record whose heuristic was reported during prepare
    pub fn observe_prior(&mut self, status: ActionStatus) {
        match status {
            ActionStatus::HeuristicCommit => self.committed = true,
            ActionStatus::HeuristicRollback => self.rolled_back = true,
            ActionStatus::HeuristicMixed => self.mixed = true,
            ActionStatus::HeuristicHazard => self.hazard = true,
            _ => {}
        }
    }

    /// Records that reported a failure outcome
    pub fn failures(&self) -> usize {
        self.failed
    }

    /// Whether any heuristic was observed
    pub fn has_heuristic(&self) -> bool {
        self.committed || self.rolled_back || self.mixed || self.hazard
    }

    /// Final status of the sweep
    pub fn status(&self) -> ActionStatus {
        let contradicts = match self.decision {
            Decision::Commit => self.rolled_back,
            Decision::Rollback => self.committed,
        };

        if self.mixed
            || (self.committed && self.rolled_back)
            || (contradicts && self.followed > 0)
        {
            ActionStatus::HeuristicMixed
        } else if self.hazard {
            ActionStatus::HeuristicHazard
        } else if self.rolled_back {
            ActionStatus::HeuristicRollback
        } else if self.committed {
            ActionStatus::HeuristicCommit
        } else {
            self.decision.status()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TwoPhaseOutcome::*;

    fn classify(decision: Decision, outcomes: &[TwoPhaseOutcome]) -> ActionStatus {
        let mut tracker = HeuristicTracker::new(decision);
        for &o in outcomes {
            tracker.observe(o);
        }
        tracker.status()
    }

    #[test]
    fn test_all_ok() {
        assert_eq!(classify(Decision::Commit, &[FinishOk, FinishOk]), ActionStatus::Committed);
        assert_eq!(classify(Decision::Rollback, &[FinishOk]), ActionStatus::Aborted);
        assert_eq!(classify(Decision::Commit, &[]), ActionStatus::Committed);
    }

    #[test]
    fn test_finish_error_keeps_decision() {
        let mut tracker = HeuristicTracker::new(Decision::Commit);
        tracker.observe(FinishOk);
        tracker.observe(FinishError);
        assert_eq!(tracker.status(), ActionStatus::Committed);
        assert_eq!(tracker.failures(), 1);
        assert!(!tracker.has_heuristic());
    }

    #[test]
    fn test_agreeing_heuristic() {
        assert_eq!(
            classify(Decision::Commit, &[FinishOk, HeuristicCommit]),
            ActionStatus::HeuristicCommit
        );
        assert_eq!(
            classify(Decision::Rollback, &[HeuristicRollback]),
            ActionStatus::HeuristicRollback
        );
    }

    #[test]
    fn test_contradicting_heuristic() {
        assert_eq!(
            classify(Decision::Commit, &[FinishOk, HeuristicRollback]),
            ActionStatus::HeuristicMixed
        );
        // nobody followed the decision: the outcome is uniformly a rollback
        assert_eq!(
            classify(Decision::Commit, &[HeuristicRollback]),
            ActionStatus::HeuristicRollback
        );
    }

    #[test]
    fn test_mixed_dominates_hazard() {
        assert_eq!(
            classify(Decision::Commit, &[HeuristicHazard, HeuristicMixed]),
            ActionStatus::HeuristicMixed
        );
        assert_eq!(
            classify(Decision::Rollback, &[HeuristicCommit, HeuristicRollback]),
            ActionStatus::HeuristicMixed
        );
        assert_eq!(
            classify(Decision::Commit, &[FinishOk, HeuristicHazard]),
            ActionStatus::HeuristicHazard
        );
    }

    #[test]
    fn test_prior_heuristic() {
        let mut tracker = HeuristicTracker::new(Decision::Rollback);
        tracker.observe_prior(ActionStatus::HeuristicHazard);
        tracker.observe(FinishOk);
        assert_eq!(tracker.status(), ActionStatus::HeuristicHazard);
    }
}
