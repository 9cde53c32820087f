//! Transaction reaper
//!
//! Times out registered transactions. A scheduler thread walks the
//! registrations ordered by next check time and drives each through
//! `Run -> ScheduleCancel -> Cancel -> Complete | Fail`; a pool of worker
//! threads performs the (possibly blocking) cancel calls.
//!
//! ## Escalation
//!
//! A cancel still running `cancel_wait` after it was scheduled is
//! interrupted (`CancelInterrupted`). Still running `cancel_fail_wait`
//! later, its worker is abandoned as a zombie, a replacement worker is
//! spawned and the transaction is marked rollback-only.
//!
//! ## Locking
//!
//! Three lock levels: per-element state, the registry, the work queue.
//! Acquisition order is element, then registry, then queue; the registry
//! and the queue are never held together.
//!
//! ## Scheduling
//!
//! - `Dynamic`: sleep until the earliest check; an insert with an earlier
//!   check wakes the scheduler
//! - `Periodic`: sleep for `check_period` between passes

mod element;
mod reapable;
mod worker;

pub use element::ReaperStatus;
pub use reapable::{Interrupt, Reapable, ReaperMonitor};

use crate::config::{CheckMode, ReaperConfig};
use arbiter_core::{Error, Result, Uid};
use element::{ElementState, ReaperElement, ScheduleKey};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Reaper timing, resolved from `ReaperConfig`
#[derive(Debug, Clone)]
pub struct ReaperSettings {
    /// Scheduler wake policy
    pub mode: CheckMode,
    /// Periodic interval, and upper bound on a dynamic sleep
    pub check_period: Duration,
    /// Allowed time from scheduling a cancel to interrupting it
    pub cancel_wait: Duration,
    /// Allowed time from interrupting a cancel to abandoning its worker
    pub cancel_fail_wait: Duration,
    /// Zombie count that triggers a warning on every new zombie
    pub zombie_max: usize,
    /// Diagnostics start this long before a deadline (zero disables)
    pub trace_grace_period: Duration,
    /// Interval between diagnostics captures
    pub trace_interval: Duration,
    /// Cancel worker threads
    pub workers: usize,
}

impl ReaperSettings {
    /// Resolve and clamp a config section
    pub fn from_config(config: &ReaperConfig) -> Result<Self> {
        Ok(Self {
            mode: config.check_mode()?,
            check_period: config.check_period(),
            cancel_wait: config.cancel_wait(),
            cancel_fail_wait: config.cancel_fail_wait(),
            zombie_max: config.zombie_max(),
            trace_grace_period: config.trace_grace_period(),
            trace_interval: config.trace_interval(),
            workers: config.workers(),
        })
    }
}

/// Reaper counters snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperStats {
    /// Transactions currently registered
    pub registered: usize,
    /// Live (non-zombie) worker threads
    pub workers: usize,
    /// Abandoned workers that have not returned
    pub zombies: usize,
    /// Workers ever abandoned
    pub total_zombies: u64,
    /// Transactions the reaper rolled back
    pub cancelled: u64,
    /// Transactions whose cancel did not roll back
    pub failed: u64,
}

struct Registry {
    elements: HashMap<Uid, Arc<ReaperElement>>,
    schedule: BTreeMap<ScheduleKey, Arc<ReaperElement>>,
    sequence: u64,
    // set while the scheduler sleeps
    next_wake: Option<Instant>,
}

impl Registry {
    fn key(&mut self, at: Instant) -> ScheduleKey {
        let key = (at, self.sequence);
        self.sequence += 1;
        key
    }
}

pub(crate) struct ReaperInner {
    settings: ReaperSettings,
    registry: Mutex<Registry>,
    wake: Condvar,
    drained: Condvar,
    queue: Mutex<VecDeque<Arc<ReaperElement>>>,
    work_ready: Condvar,
    closed: AtomicBool,
    shutdown: AtomicBool,
    zombies: AtomicUsize,
    live_workers: AtomicUsize,
    next_worker_id: AtomicUsize,
    workers: Mutex<HashMap<usize, JoinHandle<()>>>,
    listeners: RwLock<Vec<Arc<dyn ReaperMonitor>>>,
    total_zombies: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

/// Timeout enforcement for registered transactions
///
/// Owns its scheduler thread (`arbiter-reaper`) and worker threads
/// (`arbiter-reaper-worker-N`). Each instance is independent.
pub struct TransactionReaper {
    inner: Arc<ReaperInner>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionReaper {
    /// Start a reaper from a config section
    pub fn new(config: &ReaperConfig) -> Result<Self> {
        Self::with_settings(ReaperSettings::from_config(config)?)
    }

    /// Start a reaper with resolved settings
    pub fn with_settings(settings: ReaperSettings) -> Result<Self> {
        let workers = settings.workers.max(1);
        let inner = Arc::new(ReaperInner {
            settings,
            registry: Mutex::new(Registry {
                elements: HashMap::new(),
                schedule: BTreeMap::new(),
                sequence: 0,
                next_wake: None,
            }),
            wake: Condvar::new(),
            drained: Condvar::new(),
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            closed: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            zombies: AtomicUsize::new(0),
            live_workers: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(0),
            workers: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            total_zombies: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        for _ in 0..workers {
            worker::spawn_worker(&inner)?;
        }

        let scheduler_inner = Arc::clone(&inner);
        let scheduler = std::thread::Builder::new()
            .name("arbiter-reaper".to_string())
            .spawn(move || scheduler_loop(&scheduler_inner))?;

        debug!(
            target: "arbiter::reaper",
            mode = ?inner.settings.mode,
            workers,
            "Transaction reaper started"
        );
        Ok(Self {
            inner,
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Resolved settings
    pub fn settings(&self) -> &ReaperSettings {
        &self.inner.settings
    }

    /// Register `reapable` to be cancelled once `timeout` elapses
    ///
    /// A zero timeout is never reaped and registers nothing.
    pub fn insert(&self, reapable: Arc<dyn Reapable>, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Ok(());
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::ReaperTerminated);
        }

        let uid = reapable.uid();
        let now = Instant::now();
        let deadline = now + timeout;
        let grace = self.inner.settings.trace_grace_period;
        let first_check = if grace.is_zero() {
            deadline
        } else {
            deadline.checked_sub(grace).map(|t| t.max(now)).unwrap_or(now)
        };

        let mut registry = self.inner.registry.lock();
        if registry.elements.contains_key(&uid) {
            return Err(Error::DuplicateTransaction(uid));
        }
        let key = registry.key(first_check);
        let element = Arc::new(ReaperElement::new(reapable, timeout, deadline, key));
        registry.elements.insert(uid, Arc::clone(&element));
        registry.schedule.insert(key, element);

        let earlier = registry.next_wake.map_or(true, |wake| first_check < wake);
        if self.inner.settings.mode == CheckMode::Dynamic && earlier {
            self.inner.wake.notify_one();
        }
        trace!(target: "arbiter::reaper", txn = %uid, ?timeout, "Registered transaction");
        Ok(())
    }

    /// Deregister `uid`
    ///
    /// No-op (returns false) when `uid` is unknown or a cancel is already
    /// under way; the cancel then finishes and deregisters it.
    pub fn remove(&self, uid: Uid) -> bool {
        let Some(element) = self.inner.element(uid) else {
            return false;
        };
        let mut state = element.state.lock();
        if state.removed || !matches!(state.status, ReaperStatus::Run | ReaperStatus::Trace) {
            return false;
        }
        self.inner.unregister(&element, &mut state);
        trace!(target: "arbiter::reaper", txn = %uid, "Deregistered transaction");
        true
    }

    /// Process every registration whose check time has come
    ///
    /// The scheduler thread calls this on every wake; tests may call it
    /// directly.
    pub fn check(&self) {
        self.inner.check();
    }

    /// Registered transactions
    pub fn num_transactions(&self) -> usize {
        self.inner.registry.lock().elements.len()
    }

    /// Live (non-zombie) workers
    pub fn num_workers(&self) -> usize {
        self.inner.live_workers.load(Ordering::Acquire)
    }

    /// Abandoned workers still stuck in a cancel
    pub fn zombie_count(&self) -> usize {
        self.inner.zombies.load(Ordering::Acquire)
    }

    /// Timeout protocol status of `uid`
    pub fn status_of(&self, uid: Uid) -> Option<ReaperStatus> {
        self.inner.element(uid).map(|e| e.state.lock().status)
    }

    /// Timeout `uid` was registered with
    pub fn timeout_of(&self, uid: Uid) -> Option<Duration> {
        self.inner.element(uid).map(|e| e.timeout)
    }

    /// Time left until `uid`'s deadline (zero once passed)
    pub fn remaining(&self, uid: Uid) -> Option<Duration> {
        self.inner
            .element(uid)
            .map(|e| e.state.lock().deadline.saturating_duration_since(Instant::now()))
    }

    /// Add a listener
    pub fn add_listener(&self, listener: Arc<dyn ReaperMonitor>) {
        self.inner.listeners.write().push(listener);
    }

    /// Remove a listener previously added; returns whether it was present
    pub fn remove_listener(&self, listener: &Arc<dyn ReaperMonitor>) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Counters snapshot
    pub fn stats(&self) -> ReaperStats {
        ReaperStats {
            registered: self.num_transactions(),
            workers: self.num_workers(),
            zombies: self.zombie_count(),
            total_zombies: self.inner.total_zombies.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }

    /// Drain every registration, then stop the scheduler and the workers
    ///
    /// With `wait_for_transactions`, registrations leave as their owners
    /// complete them or as they time out. Without, every running
    /// registration is expired immediately. New registrations are refused
    /// from the start. Idempotent.
    pub fn terminate(&self, wait_for_transactions: bool) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(target: "arbiter::reaper", wait_for_transactions, "Terminating reaper");

        if !wait_for_transactions {
            self.inner.expire_all();
        }

        {
            let mut registry = self.inner.registry.lock();
            while !registry.elements.is_empty() {
                self.inner.drained.wait(&mut registry);
            }
        }

        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _registry = self.inner.registry.lock();
            self.inner.wake.notify_all();
        }
        // Lock the queue before notifying so a worker between its shutdown
        // check and its wait cannot miss the wakeup
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        if let Some(handle) = self.scheduler.lock().take() {
            let _ = handle.join();
        }
        let workers: Vec<JoinHandle<()>> = self.inner.workers.lock().drain().map(|(_, h)| h).collect();
        for handle in workers {
            let _ = handle.join();
        }
        debug!(target: "arbiter::reaper", "Reaper terminated");
    }
}

impl Drop for TransactionReaper {
    fn drop(&mut self) {
        self.terminate(false);
    }
}

impl std::fmt::Debug for TransactionReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionReaper")
            .field("settings", &self.inner.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ReaperInner {
    fn element(&self, uid: Uid) -> Option<Arc<ReaperElement>> {
        self.registry.lock().elements.get(&uid).cloned()
    }

    // Caller holds the element lock
    fn unregister(&self, element: &Arc<ReaperElement>, state: &mut ElementState) {
        state.removed = true;
        let mut registry = self.registry.lock();
        registry.schedule.remove(&state.schedule_key);
        let current = registry.elements.get(&element.uid);
        if current.map_or(false, |current| Arc::ptr_eq(current, element)) {
            registry.elements.remove(&element.uid);
        }
        if registry.elements.is_empty() {
            self.drained.notify_all();
        }
    }

    // Caller holds the element lock
    fn reschedule(&self, element: &Arc<ReaperElement>, state: &mut ElementState, at: Instant) {
        let mut registry = self.registry.lock();
        registry.schedule.remove(&state.schedule_key);
        let key = registry.key(at);
        state.schedule_key = key;
        registry.schedule.insert(key, Arc::clone(element));
        if self.settings.mode == CheckMode::Dynamic
            && registry.next_wake.map_or(false, |wake| at < wake)
        {
            self.wake.notify_one();
        }
    }

    fn enqueue(&self, element: Arc<ReaperElement>) {
        let mut queue = self.queue.lock();
        queue.push_back(element);
        self.work_ready.notify_one();
    }

    fn expire_all(&self) {
        let elements: Vec<Arc<ReaperElement>> =
            self.registry.lock().elements.values().cloned().collect();
        let now = Instant::now();
        for element in elements {
            let mut state = element.state.lock();
            if !state.removed && matches!(state.status, ReaperStatus::Run | ReaperStatus::Trace) {
                state.deadline = now;
                self.reschedule(&element, &mut state, now);
            }
        }
        let _registry = self.registry.lock();
        self.wake.notify_all();
    }

    fn check(self: &Arc<Self>) {
        let now = Instant::now();
        let due: Vec<Arc<ReaperElement>> = {
            let mut registry = self.registry.lock();
            let later = registry.schedule.split_off(&(now, u64::MAX));
            std::mem::replace(&mut registry.schedule, later)
                .into_values()
                .collect()
        };
        for element in due {
            self.process(&element, now);
        }
    }

    fn process(self: &Arc<Self>, element: &Arc<ReaperElement>, now: Instant) {
        let mut state = element.state.lock();
        if state.removed {
            return;
        }
        let settings = &self.settings;

        let status = state.status;
        match status {
            ReaperStatus::Run if now >= state.deadline => {
                if state.tracing {
                    guarded(element.uid, "output_captured_stack_traces", || {
                        element.reapable.output_captured_stack_traces()
                    });
                }
                state.status = ReaperStatus::ScheduleCancel;
                self.reschedule(element, &mut state, now + settings.cancel_wait);
                drop(state);
                debug!(target: "arbiter::reaper", txn = %element.uid, "Transaction timed out, scheduling cancel");
                self.enqueue(Arc::clone(element));
            }
            ReaperStatus::Run => {
                let grace = settings.trace_grace_period;
                let remaining = state.deadline.saturating_duration_since(now);
                if !grace.is_zero() && remaining <= grace {
                    // capture without the element lock; TRACE is visible meanwhile
                    state.status = ReaperStatus::Trace;
                    drop(state);
                    guarded(element.uid, "record_stack_traces", || {
                        element.reapable.record_stack_traces()
                    });

                    let mut state = element.state.lock();
                    if state.removed || state.status != ReaperStatus::Trace {
                        return;
                    }
                    state.tracing = true;
                    state.status = ReaperStatus::Run;
                    let next = if settings.trace_interval.is_zero() {
                        state.deadline
                    } else {
                        (Instant::now() + settings.trace_interval).min(state.deadline)
                    };
                    self.reschedule(element, &mut state, next);
                    return;
                }
                let next = if grace.is_zero() {
                    state.deadline
                } else {
                    state.deadline.checked_sub(grace).unwrap_or(state.deadline)
                };
                self.reschedule(element, &mut state, next);
            }
            ReaperStatus::ScheduleCancel => {
                // still waiting for a free worker
                self.reschedule(element, &mut state, now + settings.cancel_wait);
            }
            ReaperStatus::Cancel => {
                state.status = ReaperStatus::CancelInterrupted;
                if let Some((_, interrupt)) = &state.worker {
                    interrupt.interrupt();
                }
                self.reschedule(element, &mut state, now + settings.cancel_fail_wait);
                warn!(target: "arbiter::reaper", txn = %element.uid, "Cancel overran, interrupting worker");
            }
            ReaperStatus::CancelInterrupted => self.zombify(element, state),
            ReaperStatus::Trace
            | ReaperStatus::Zombie
            | ReaperStatus::Fail
            | ReaperStatus::Complete => {}
        }
    }

    fn zombify(
        self: &Arc<Self>,
        element: &Arc<ReaperElement>,
        mut state: parking_lot::MutexGuard<'_, ElementState>,
    ) {
        state.status = ReaperStatus::Zombie;
        let zombies = self.zombies.fetch_add(1, Ordering::AcqRel) + 1;
        self.total_zombies.fetch_add(1, Ordering::Relaxed);

        if let Some((id, _)) = state.worker.take() {
            // dropping the handle detaches the stuck thread
            self.workers.lock().remove(&id);
            self.live_workers.fetch_sub(1, Ordering::AcqRel);
        }
        if let Err(e) = worker::spawn_worker(self) {
            warn!(target: "arbiter::reaper", error = %e, "Failed to spawn replacement reaper worker");
        }
        self.unregister(element, &mut state);
        drop(state);

        warn!(
            target: "arbiter::reaper",
            txn = %element.uid,
            zombies,
            "Reaper worker unresponsive after interrupt, abandoned"
        );
        if zombies >= self.settings.zombie_max {
            warn!(
                target: "arbiter::reaper",
                zombies,
                zombie_max = self.settings.zombie_max,
                "Zombie reaper workers at or above ceiling"
            );
        }
        self.mark_rollback_only(element);
    }

    fn mark_rollback_only(&self, element: &ReaperElement) {
        let uid = element.uid;
        let marked = catch_unwind(AssertUnwindSafe(|| element.reapable.prevent_commit()))
            .unwrap_or(false);
        if marked {
            self.notify(|listener| listener.marked_rollback_only(uid));
        } else {
            warn!(target: "arbiter::reaper", txn = %uid, "Failed to mark timed-out transaction rollback-only");
        }
    }

    fn notify(&self, event: impl Fn(&dyn ReaperMonitor)) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| event(listener.as_ref()))).is_err() {
                warn!(target: "arbiter::reaper", "Reaper listener panicked");
            }
        }
    }
}

fn guarded(uid: Uid, what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(target: "arbiter::reaper", txn = %uid, what, "Diagnostics capture panicked");
    }
}

fn scheduler_loop(inner: &Arc<ReaperInner>) {
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }
        inner.check();

        let mut registry = inner.registry.lock();
        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        let period = now + inner.settings.check_period;
        let wake = match inner.settings.mode {
            CheckMode::Periodic => period,
            CheckMode::Dynamic => registry
                .schedule
                .keys()
                .next()
                .map(|(at, _)| (*at).min(period))
                .unwrap_or(period),
        };
        if wake > now {
            registry.next_wake = Some(wake);
            inner.wake.wait_until(&mut registry, wake);
            registry.next_wake = None;
        }
    }
}
