//! Transaction manager: configured entry point for top-level transactions
//!
//! Owns the coordinator environment and the reaper. Every transaction it
//! begins shares the environment's ordering policy, one-phase setting,
//! record store and counters, and is registered with the reaper when it
//! has a timeout.

use crate::atomic::AtomicTransaction;
use crate::config::EngineConfig;
use crate::reaper::{ReaperMonitor, TransactionReaper};
use arbiter_coordinator::{
    recover_all, CoordinatorEnv, RecordRegistry, TransactionCoordinator, TransactionMetrics,
    TransactionStats,
};
use arbiter_core::{ActionStatus, Result, Uid};
use arbiter_durability::RecordStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Counts every reaper intervention as a timeout
struct TimeoutCounter {
    stats: Arc<TransactionStats>,
}

impl ReaperMonitor for TimeoutCounter {
    fn rolled_back(&self, _uid: Uid) {
        self.stats.record_timeout();
    }

    fn marked_rollback_only(&self, _uid: Uid) {
        self.stats.record_timeout();
    }
}

/// Begins transactions and enforces their timeouts
pub struct TransactionManager {
    config: EngineConfig,
    env: CoordinatorEnv,
    reaper: Arc<TransactionReaper>,
}

impl TransactionManager {
    /// Manager without persistence
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Manager logging prepared transactions to `store`
    pub fn with_store(config: EngineConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        Self::build(config, Some(store))
    }

    /// Manager configured from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(EngineConfig::from_file(path)?)
    }

    fn build(config: EngineConfig, store: Option<Arc<dyn RecordStore>>) -> Result<Self> {
        config.validate()?;
        let mut env = CoordinatorEnv::new(config.coordinator.ordering()?)
            .with_one_phase_commit(config.coordinator.one_phase_commit);
        if let Some(store) = store {
            env = env.with_store(store);
        }

        let reaper = Arc::new(TransactionReaper::new(&config.reaper)?);
        reaper.add_listener(Arc::new(TimeoutCounter {
            stats: Arc::clone(env.stats()),
        }));

        info!(
            target: "arbiter::txn",
            ordering = ?env.ordering(),
            one_phase_commit = env.one_phase_commit(),
            persistent = env.store().is_some(),
            "Transaction manager started"
        );
        Ok(Self { config, env, reaper })
    }

    /// Begin a top-level transaction, reaped after `timeout` (zero: never)
    ///
    /// The calling thread is associated with the transaction.
    pub fn begin(&self, timeout: Duration) -> Result<Arc<AtomicTransaction>> {
        let mut coordinator = TransactionCoordinator::new(self.env.clone());
        coordinator.begin()?;
        coordinator.associate_thread(std::thread::current().id());

        let txn = Arc::new(AtomicTransaction::new(coordinator, Arc::downgrade(&self.reaper))?);
        if let Err(e) = self.reaper.insert(txn.clone(), timeout) {
            let _ = txn.rollback();
            return Err(e);
        }
        debug!(target: "arbiter::txn", txn = %txn.uid(), ?timeout, "Began managed transaction");
        Ok(txn)
    }

    /// Begin with `coordinator.default_timeout_ms`
    pub fn begin_with_default_timeout(&self) -> Result<Arc<AtomicTransaction>> {
        self.begin(self.config.coordinator.default_timeout())
    }

    /// Replay every logged transaction in the store
    pub fn recover(&self, registry: &RecordRegistry) -> Result<Vec<(Uid, ActionStatus)>> {
        recover_all(&self.env, registry)
    }

    /// The reaper enforcing timeouts
    pub fn reaper(&self) -> &Arc<TransactionReaper> {
        &self.reaper
    }

    /// Shared coordinator environment
    pub fn env(&self) -> &CoordinatorEnv {
        &self.env
    }

    /// Configuration in effect
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Counters snapshot
    pub fn metrics(&self) -> TransactionMetrics {
        self.env.stats().snapshot()
    }

    /// Stop the reaper; see `TransactionReaper::terminate`
    pub fn shutdown(&self, wait_for_transactions: bool) {
        self.reaper.terminate(wait_for_transactions);
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("env", &self.env)
            .field("reaper", &self.reaper)
            .finish()
    }
}
