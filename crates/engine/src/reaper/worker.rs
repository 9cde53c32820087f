//! Reaper cancel workers

use super::element::{ElementState, ReaperElement};
use super::reapable::Interrupt;
use super::{ReaperInner, ReaperStatus};
use arbiter_core::ActionStatus;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Start one worker thread and record its handle
pub(super) fn spawn_worker(inner: &Arc<ReaperInner>) -> std::io::Result<()> {
    let id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
    let interrupt = Arc::new(Interrupt::new());
    let worker_inner = Arc::clone(inner);

    // Hold the map while spawning so the thread's handle is present before
    // the scheduler could abandon it
    let mut workers = inner.workers.lock();
    let handle = std::thread::Builder::new()
        .name(format!("arbiter-reaper-worker-{}", id))
        .spawn(move || worker_loop(&worker_inner, id, &interrupt))?;
    workers.insert(id, handle);
    inner.live_workers.fetch_add(1, Ordering::AcqRel);
    trace!(target: "arbiter::reaper", worker = id, "Reaper worker started");
    Ok(())
}

fn next_element(inner: &ReaperInner) -> Option<Arc<ReaperElement>> {
    let mut queue = inner.queue.lock();
    loop {
        if let Some(element) = queue.pop_front() {
            return Some(element);
        }
        if inner.shutdown.load(Ordering::Acquire) {
            return None;
        }
        inner.work_ready.wait(&mut queue);
    }
}

fn worker_loop(inner: &Arc<ReaperInner>, id: usize, interrupt: &Arc<Interrupt>) {
    while let Some(element) = next_element(inner) {
        {
            let mut state = element.state.lock();
            if state.removed || state.status != ReaperStatus::ScheduleCancel {
                continue;
            }
            let running = catch_unwind(AssertUnwindSafe(|| element.reapable.running()))
                .unwrap_or(true);
            if !running {
                state.status = ReaperStatus::Complete;
                inner.unregister(&element, &mut state);
                debug!(target: "arbiter::reaper", txn = %element.uid, "Transaction already finishing, nothing to cancel");
                continue;
            }
            state.status = ReaperStatus::Cancel;
            state.worker = Some((id, Arc::clone(interrupt)));
        }

        trace!(target: "arbiter::reaper", txn = %element.uid, worker = id, "Cancelling transaction");
        let result = catch_unwind(AssertUnwindSafe(|| element.reapable.cancel(interrupt)));

        let mut state = element.state.lock();
        if state.status == ReaperStatus::Zombie {
            drop(state);
            let _ = inner
                .zombies
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
            debug!(target: "arbiter::reaper", txn = %element.uid, worker = id, "Abandoned reaper worker returned");
            return;
        }

        let status = match result {
            Ok(status) => status,
            Err(panic) => {
                let message = arbiter_coordinator::panic_message(panic.as_ref());
                warn!(target: "arbiter::reaper", txn = %element.uid, panic = %message, "Cancel panicked");
                ActionStatus::Invalid
            }
        };
        finish(inner, &element, &mut state, status);
        state.worker = None;
        interrupt.reset();
        drop(state);

        if status == ActionStatus::NoAction {
            debug!(target: "arbiter::reaper", txn = %element.uid, "Owner finished the transaction first");
        } else if status == ActionStatus::Aborted {
            inner.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(target: "arbiter::reaper", txn = %element.uid, "Timed-out transaction rolled back");
            let uid = element.uid;
            inner.notify(|listener| listener.rolled_back(uid));
        } else {
            inner.failed.fetch_add(1, Ordering::Relaxed);
            warn!(target: "arbiter::reaper", txn = %element.uid, %status, "Cancel did not roll back");
            inner.mark_rollback_only(&element);
        }
    }

    inner.live_workers.fetch_sub(1, Ordering::AcqRel);
    trace!(target: "arbiter::reaper", worker = id, "Reaper worker stopped");
}

fn finish(
    inner: &ReaperInner,
    element: &Arc<ReaperElement>,
    state: &mut ElementState,
    status: ActionStatus,
) {
    state.status = if matches!(status, ActionStatus::Aborted | ActionStatus::NoAction) {
        ReaperStatus::Complete
    } else {
        ReaperStatus::Fail
    };
    inner.unregister(element, state);
}
