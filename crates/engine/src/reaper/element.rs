//! Per-transaction reaper bookkeeping

use super::reapable::{Interrupt, Reapable};
use arbiter_core::Uid;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a registered transaction is in the timeout protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaperStatus {
    /// Waiting for its deadline
    Run,
    /// Capturing diagnostics ahead of the deadline
    Trace,
    /// Deadline passed, queued for a worker
    ScheduleCancel,
    /// A worker is cancelling it
    Cancel,
    /// The cancelling worker was interrupted
    CancelInterrupted,
    /// The cancelling worker was abandoned
    Zombie,
    /// Cancel finished without rolling back
    Fail,
    /// Cancel rolled the transaction back
    Complete,
}

impl fmt::Display for ReaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReaperStatus::Run => "RUN",
            ReaperStatus::Trace => "TRACE",
            ReaperStatus::ScheduleCancel => "SCHEDULE_CANCEL",
            ReaperStatus::Cancel => "CANCEL",
            ReaperStatus::CancelInterrupted => "CANCEL_INTERRUPTED",
            ReaperStatus::Zombie => "ZOMBIE",
            ReaperStatus::Fail => "FAIL",
            ReaperStatus::Complete => "COMPLETE",
        };
        f.write_str(s)
    }
}

/// Position in the reaper's check schedule: (next check, tie-breaker)
pub(crate) type ScheduleKey = (Instant, u64);

pub(crate) struct ElementState {
    pub status: ReaperStatus,
    pub deadline: Instant,
    pub schedule_key: ScheduleKey,
    pub tracing: bool,
    // worker id and its interrupt while in Cancel / CancelInterrupted
    pub worker: Option<(usize, Arc<Interrupt>)>,
    // set once the element left the registry
    pub removed: bool,
}

/// One registered transaction
pub(crate) struct ReaperElement {
    pub uid: Uid,
    pub reapable: Arc<dyn Reapable>,
    pub timeout: Duration,
    pub state: Mutex<ElementState>,
}

impl ReaperElement {
    pub fn new(
        reapable: Arc<dyn Reapable>,
        timeout: Duration,
        deadline: Instant,
        key: ScheduleKey,
    ) -> Self {
        Self {
            uid: reapable.uid(),
            reapable,
            timeout,
            state: Mutex::new(ElementState {
                status: ReaperStatus::Run,
                deadline,
                schedule_key: key,
                tracing: false,
                worker: None,
                removed: false,
            }),
        }
    }
}
