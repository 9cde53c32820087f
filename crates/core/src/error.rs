//! Error types for the coordination core
//!
//! Protocol outcomes (votes, heuristics) are values, not errors. This enum
//! covers misuse of the API and failures of the surrounding capabilities
//! (record store, configuration). We use `thiserror` for automatic `Display`
//! and `Error` trait implementations.

use crate::status::ActionStatus;
use crate::types::{RecordType, Uid};
use std::io;
use thiserror::Error;

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the coordination core
#[derive(Debug, Error)]
pub enum Error {
    /// Operation not legal in the transaction's current status
    #[error("cannot {operation} a transaction in status {status}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// Status at the time of the attempt
        status: ActionStatus,
    },

    /// Transaction already registered with the reaper
    #[error("transaction {0} is already registered")]
    DuplicateTransaction(Uid),

    /// Transaction reaper no longer accepts registrations
    #[error("transaction reaper has been terminated")]
    ReaperTerminated,

    /// Nested-only operation invoked on a top-level transaction
    #[error("transaction {0} is not nested")]
    NotNested(Uid),

    /// Top-level-only operation invoked on a nested transaction
    #[error("transaction {0} is nested and completes through its parent")]
    IsNested(Uid),

    /// Nested transaction completed against a coordinator that is not its parent
    #[error("transaction {parent} is not the parent of {child}")]
    WrongParent {
        /// Nested transaction
        child: Uid,
        /// Coordinator supplied as parent
        parent: Uid,
    },

    /// Record store rejected a save/restore/forget
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Saved log failed validation
    #[error("log corruption: {0}")]
    Corruption(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// No factory registered for a saved record's type
    #[error("no record factory registered for record type {0}")]
    UnknownRecordType(RecordType),
}

impl Error {
    /// Shorthand for `Error::InvalidState`
    pub fn invalid_state(operation: &'static str, status: ActionStatus) -> Self {
        Error::InvalidState { operation, status }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
