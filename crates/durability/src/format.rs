//! Log entry framing
//!
//! # Entry Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! The payload is a MessagePack-encoded `SavedRecord`. The length field holds
//! the size of (format version + payload + crc32). The CRC covers the format
//! version and the payload.

use crate::store::SavedRecord;
use crc32fast::Hasher;

/// Current log entry format version
pub const LOG_ENTRY_FORMAT_VERSION: u8 = 1;

/// Minimum framed length: 1 byte format version + 4 bytes CRC
const MIN_FRAMED_LEN: usize = 5;

/// Log entry parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogEntryError {
    /// Not enough data to parse an entry (torn write at the tail)
    #[error("insufficient data to parse log entry")]
    InsufficientData,

    /// Entry framing is invalid
    #[error("invalid log entry format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the entry
        expected: u32,
        /// Checksum computed over the payload
        computed: u32,
    },

    /// Unsupported format version
    #[error("unsupported log entry format version: {0}")]
    UnsupportedVersion(u8),

    /// Payload could not be encoded or decoded
    #[error("log entry payload: {0}")]
    Payload(String),
}

/// Serialize a record into a framed entry
pub fn encode_entry(record: &SavedRecord) -> Result<Vec<u8>, LogEntryError> {
    let body = rmp_serde::to_vec(record).map_err(|e| LogEntryError::Payload(e.to_string()))?;

    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(LOG_ENTRY_FORMAT_VERSION);
    payload.extend_from_slice(&body);

    let crc = compute_crc(&payload);

    let total_len = payload.len() + 4;
    let mut entry = Vec::with_capacity(4 + total_len);
    entry.extend_from_slice(&(total_len as u32).to_le_bytes());
    entry.extend_from_slice(&payload);
    entry.extend_from_slice(&crc.to_le_bytes());
    Ok(entry)
}

/// Parse one framed entry from the front of `bytes`
///
/// Returns (record, bytes_consumed) on success.
pub fn decode_entry(bytes: &[u8]) -> Result<(SavedRecord, usize), LogEntryError> {
    let length = read_u32(bytes, 0).ok_or(LogEntryError::InsufficientData)? as usize;

    if length == 0 || length < MIN_FRAMED_LEN {
        return Err(LogEntryError::InvalidFormat);
    }
    if bytes.len() < 4 + length {
        return Err(LogEntryError::InsufficientData);
    }

    let framed = &bytes[4..4 + length];
    let payload = &framed[..length - 4];
    let stored_crc = read_u32(framed, length - 4).ok_or(LogEntryError::InvalidFormat)?;

    let computed = compute_crc(payload);
    if computed != stored_crc {
        return Err(LogEntryError::ChecksumMismatch {
            expected: stored_crc,
            computed,
        });
    }

    let format_version = payload[0];
    if format_version != LOG_ENTRY_FORMAT_VERSION {
        return Err(LogEntryError::UnsupportedVersion(format_version));
    }

    let record: SavedRecord =
        rmp_serde::from_slice(&payload[1..]).map_err(|e| LogEntryError::Payload(e.to_string()))?;
    Ok((record, 4 + length))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let slice = bytes.get(at..at + 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    Some(u32::from_le_bytes(buf))
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
