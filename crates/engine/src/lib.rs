//! Runtime layer for Arbiter
//!
//! This crate puts the coordinator to work across threads:
//! - TransactionReaper: times out registered transactions with a scheduler
//!   thread and a pool of cancel workers
//! - AtomicTransaction: a coordinator shared between its owner and the reaper
//! - TransactionManager: begins transactions from an `EngineConfig`
//! - config: `arbiter.toml` loading and validation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atomic;
pub mod config;
pub mod manager;
pub mod reaper;

pub use atomic::{AtomicTransaction, DiagnosticSnapshot};
pub use config::{CheckMode, CoordinatorConfig, EngineConfig, ReaperConfig, CONFIG_FILE_NAME};
pub use manager::TransactionManager;
pub use reaper::{
    Interrupt, Reapable, ReaperMonitor, ReaperSettings, ReaperStats, ReaperStatus,
    TransactionReaper,
};
