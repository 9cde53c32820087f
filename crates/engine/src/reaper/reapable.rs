//! What the reaper needs from a transaction, and what it tells listeners

use arbiter_core::{ActionStatus, Uid};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Transaction handle the reaper can time out
pub trait Reapable: Send + Sync {
    /// Transaction identifier
    fn uid(&self) -> Uid;

    /// Whether the transaction is still running
    ///
    /// Must not block. The reaper skips the cancel of a transaction that
    /// is not running.
    fn running(&self) -> bool;

    /// Roll the transaction back; `Aborted` on success
    ///
    /// Called on a reaper worker thread. Long waits should poll
    /// `interrupt` and give up once it is set. `NoAction` means the owner
    /// finished the transaction first and there was nothing to cancel.
    fn cancel(&self, interrupt: &Interrupt) -> ActionStatus;

    /// Mark the transaction rollback-only; must not block
    fn prevent_commit(&self) -> bool;

    /// Capture diagnostics ahead of the deadline
    fn record_stack_traces(&self) {}

    /// Report what `record_stack_traces` captured
    fn output_captured_stack_traces(&self) {}
}

/// Best-effort listener for reaper decisions
pub trait ReaperMonitor: Send + Sync {
    /// The reaper rolled `uid` back
    fn rolled_back(&self, uid: Uid);

    /// The reaper could not roll `uid` back and marked it rollback-only
    fn marked_rollback_only(&self, uid: Uid);
}

/// Cooperative cancellation signal for a reaper worker
///
/// The reaper sets it when a cancel runs past its wait; the worker's
/// `cancel` call observes it at its own polling points. A worker that
/// ignores it is abandoned after the cancel-fail wait.
#[derive(Debug, Default)]
pub struct Interrupt {
    flag: AtomicBool,
}

impl Interrupt {
    /// Unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the reaper asked the current cancel to stop
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep up to `timeout`, waking early once interrupted
    ///
    /// Returns true if interrupted.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_interrupted() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }

    pub(crate) fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}
