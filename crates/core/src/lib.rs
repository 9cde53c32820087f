//! Core types for the Arbiter coordination core
//!
//! This crate defines the foundational types used throughout the system:
//! - Uid: globally unique, totally ordered identifier
//! - ActionStatus: per-transaction state
//! - TwoPhaseOutcome: per-record protocol result
//! - ActionType, RecordType, OrderingPolicy: classification and ordering keys
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod status;
pub mod types;

pub use error::{Error, Result};
pub use status::{ActionStatus, TwoPhaseOutcome};
pub use types::{ActionType, OrderingPolicy, RecordType, Uid, UidParseError};
