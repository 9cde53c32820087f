//! Durability layer for Arbiter
//!
//! This crate provides the persistence capability the coordinator consumes:
//!
//! - RecordStore: save/restore/forget a transaction's participant records
//! - InMemoryRecordStore: concurrent map, for tests and ephemeral use
//! - FileRecordStore: one framed, checksummed log file per transaction
//! - format: log entry framing (length + version + payload + CRC32)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod file_store;
pub mod format;
pub mod inmemory;
pub mod store;

pub use file_store::FileRecordStore;
pub use format::{decode_entry, encode_entry, LogEntryError, LOG_ENTRY_FORMAT_VERSION};
pub use inmemory::InMemoryRecordStore;
pub use store::{RecordStore, Resolution, SavedRecord};
