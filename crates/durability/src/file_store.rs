//! File-backed record store
//!
//! One append-only log file per transaction, named
//! `<node-uuid>_<sequence-hex>.log`, inside a store directory. Each save
//! appends one framed entry (see `format`). Restore reads entries in order
//! and stops at a torn tail entry; a checksum mismatch is reported as
//! corruption rather than silently skipped.

use crate::format::{decode_entry, encode_entry, LogEntryError};
use crate::store::{RecordStore, SavedRecord};
use arbiter_core::{Error, Result, Uid};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOG_SUFFIX: &str = ".log";

/// Record store writing one log file per transaction
#[derive(Debug)]
pub struct FileRecordStore {
    dir: PathBuf,
    sync: bool,
    // serializes appends so concurrent saves never interleave entry bytes
    write_lock: Mutex<()>,
}

impl FileRecordStore {
    /// Open (creating if needed) a store rooted at `dir`
    ///
    /// Every save is followed by `sync_data`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync(dir, true)
    }

    /// Open a store, choosing whether saves are synced to disk
    pub fn open_with_sync(dir: impl AsRef<Path>, sync: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(target: "arbiter::store", dir = %dir.display(), sync, "Opened file record store");
        Ok(Self {
            dir,
            sync,
            write_lock: Mutex::new(()),
        })
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file for `txn`
    pub fn log_path(&self, txn: Uid) -> PathBuf {
        self.dir.join(log_name(txn))
    }
}

impl RecordStore for FileRecordStore {
    fn save(&self, txn: Uid, record: SavedRecord) -> Result<()> {
        let entry = encode_entry(&record).map_err(|e| Error::Serialization(e.to_string()))?;

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(txn))?;
        file.write_all(&entry)?;
        if self.sync {
            file.sync_data()?;
        }
        Ok(())
    }

    fn restore(&self, txn: Uid) -> Result<Vec<SavedRecord>> {
        let path = self.log_path(txn);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            match decode_entry(&bytes[offset..]) {
                Ok((record, consumed)) => {
                    records.push(record);
                    offset += consumed;
                }
                Err(LogEntryError::InsufficientData) => {
                    warn!(
                        target: "arbiter::store",
                        %txn,
                        offset,
                        "Ignoring torn entry at end of transaction log"
                    );
                    break;
                }
                Err(e) => {
                    return Err(Error::Corruption(format!(
                        "{} at offset {}: {}",
                        path.display(),
                        offset,
                        e
                    )))
                }
            }
        }
        Ok(records)
    }

    fn forget(&self, txn: Uid) -> Result<bool> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.log_path(txn)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn transactions(&self) -> Result<Vec<Uid>> {
        let mut uids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(uid) = name.to_str().and_then(parse_log_name) {
                uids.push(uid);
            }
        }
        uids.sort();
        Ok(uids)
    }
}

fn log_name(txn: Uid) -> String {
    format!("{}_{:016x}{}", txn.node(), txn.sequence(), LOG_SUFFIX)
}

fn parse_log_name(name: &str) -> Option<Uid> {
    let stem = name.strip_suffix(LOG_SUFFIX)?;
    let (node, sequence) = stem.rsplit_once('_')?;
    format!("{}:{}", node, sequence).parse().ok()
}
