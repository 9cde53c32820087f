//! Completion callbacks
//!
//! Synchronizations registered on a top-level transaction are told before
//! the commit protocol starts and after the outcome is known.

use crate::record::panic_message;
use arbiter_core::{ActionStatus, Uid};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Callback pair around transaction completion
pub trait Synchronization: Send + 'static {
    /// Called before prepare; `false` marks the transaction rollback-only
    fn before_completion(&mut self) -> bool {
        true
    }

    /// Called once the final status is known, for commit and rollback alike
    fn after_completion(&mut self, status: ActionStatus);
}

/// Run every `before_completion`, returning false if any vetoed or panicked
pub(crate) fn run_before(txn: Uid, syncs: &mut [Box<dyn Synchronization>]) -> bool {
    let mut ok = true;
    for sync in syncs.iter_mut() {
        match catch_unwind(AssertUnwindSafe(|| sync.before_completion())) {
            Ok(true) => {}
            Ok(false) => {
                ok = false;
                break;
            }
            Err(panic) => {
                warn!(
                    target: "arbiter::txn",
                    %txn,
                    panic = %panic_message(panic.as_ref()),
                    "before_completion panicked"
                );
                ok = false;
                break;
            }
        }
    }
    ok
}

/// Run every `after_completion`; panics are logged and ignored
pub(crate) fn run_after(txn: Uid, syncs: &mut [Box<dyn Synchronization>], status: ActionStatus) {
    for sync in syncs.iter_mut() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| sync.after_completion(status))) {
            warn!(
                target: "arbiter::txn",
                %txn,
                %status,
                panic = %panic_message(panic.as_ref()),
                "after_completion panicked"
            );
        }
    }
}
