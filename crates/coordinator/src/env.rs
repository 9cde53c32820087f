//! Coordinator environment
//!
//! The explicit context every coordinator is built from: ordering policy,
//! one-phase switch, persistence capability and shared counters. There is no
//! process-wide default; tests build as many independent environments as
//! they need.

use crate::metrics::TransactionStats;
use arbiter_core::OrderingPolicy;
use arbiter_durability::RecordStore;
use std::sync::Arc;

/// Shared settings and capabilities for coordinators
#[derive(Clone)]
pub struct CoordinatorEnv {
    ordering: OrderingPolicy,
    one_phase_commit: bool,
    store: Option<Arc<dyn RecordStore>>,
    stats: Arc<TransactionStats>,
}

impl CoordinatorEnv {
    /// Environment with the given ordering, one-phase enabled, no store
    pub fn new(ordering: OrderingPolicy) -> Self {
        Self {
            ordering,
            one_phase_commit: true,
            store: None,
            stats: Arc::new(TransactionStats::new()),
        }
    }

    /// Enable or disable the one-phase optimisation
    pub fn with_one_phase_commit(mut self, enabled: bool) -> Self {
        self.one_phase_commit = enabled;
        self
    }

    /// Attach a persistence capability
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share counters with another environment
    pub fn with_stats(mut self, stats: Arc<TransactionStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Record ordering policy
    pub fn ordering(&self) -> OrderingPolicy {
        self.ordering
    }

    /// Whether the one-phase optimisation may be used
    pub fn one_phase_commit(&self) -> bool {
        self.one_phase_commit
    }

    /// Persistence capability, if any
    pub fn store(&self) -> Option<&Arc<dyn RecordStore>> {
        self.store.as_ref()
    }

    /// Shared counters
    pub fn stats(&self) -> &Arc<TransactionStats> {
        &self.stats
    }
}

impl std::fmt::Debug for CoordinatorEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorEnv")
            .field("ordering", &self.ordering)
            .field("one_phase_commit", &self.one_phase_commit)
            .field("store", &self.store.is_some())
            .finish()
    }
}
