//! Integration tests for the record stores
//!
//! These tests verify that:
//! 1. Logs survive reopening a file store
//! 2. A torn entry at the tail is ignored, earlier entries are kept
//! 3. A corrupted entry is reported, not skipped
//! 4. Concurrent saves to different transactions do not interleave
//! 5. Both stores behave the same through the trait object
//! 6. Any sequence of saves restores in order, decisions included, and a
//!    torn final entry only loses that entry

use arbiter_core::{ActionStatus, Error, RecordType, Uid};
use arbiter_durability::{
    FileRecordStore, InMemoryRecordStore, RecordStore, Resolution, SavedRecord,
};
use proptest::prelude::*;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn saved(tag: u32, payload: &[u8]) -> SavedRecord {
    SavedRecord::new(RecordType(tag), Uid::new(), "participant", payload.to_vec())
}

// ============================================================================
// File Store Durability
// ============================================================================

#[test]
fn test_log_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let txn = Uid::new();
    let records = vec![saved(1, b"one"), saved(2, b"two"), saved(1, b"three")];

    {
        let store = FileRecordStore::open(temp_dir.path()).unwrap();
        for record in &records {
            store.save(txn, record.clone()).unwrap();
        }
    }

    let reopened = FileRecordStore::open(temp_dir.path()).unwrap();
    assert_eq!(reopened.transactions().unwrap(), vec![txn]);
    assert_eq!(reopened.restore(txn).unwrap(), records);
}

#[test]
fn test_torn_tail_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileRecordStore::open(temp_dir.path()).unwrap();
    let txn = Uid::new();
    let first = saved(1, b"complete");
    store.save(txn, first.clone()).unwrap();

    // Simulate a crash part-way through the second append
    let mut file = OpenOptions::new()
        .append(true)
        .open(store.log_path(txn))
        .unwrap();
    file.write_all(&[0x40, 0x00, 0x00, 0x00, 0x01, 0x02]).unwrap();
    drop(file);

    assert_eq!(store.restore(txn).unwrap(), vec![first]);
}

#[test]
fn test_corrupted_entry_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileRecordStore::open(temp_dir.path()).unwrap();
    let txn = Uid::new();
    store.save(txn, saved(1, b"payload-bytes")).unwrap();

    let path = store.log_path(txn);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 6;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    let result = store.restore(txn);
    assert!(matches!(result, Err(Error::Corruption(_))));
}

#[test]
fn test_concurrent_saves_different_transactions() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileRecordStore::open_with_sync(temp_dir.path(), false).unwrap());

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let txn = Uid::new();
            for i in 0..25u32 {
                store
                    .save(txn, saved(t, &i.to_le_bytes()))
                    .unwrap();
            }
            txn
        }));
    }

    let txns: Vec<Uid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for txn in txns {
        let records = store.restore(txn).unwrap();
        assert_eq!(records.len(), 25);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.payload, (i as u32).to_le_bytes().to_vec());
        }
    }
}

// ============================================================================
// Trait Object Parity
// ============================================================================

fn exercise(store: &dyn RecordStore) {
    let txn = Uid::new();
    assert!(store.restore(txn).unwrap().is_empty());

    let a = saved(3, b"a");
    let b = saved(4, b"b");
    store.save(txn, a.clone()).unwrap();
    store.save(txn, b.clone()).unwrap();
    assert_eq!(store.restore(txn).unwrap(), vec![a, b]);
    assert!(store.transactions().unwrap().contains(&txn));

    assert!(store.forget(txn).unwrap());
    assert!(store.restore(txn).unwrap().is_empty());
    assert!(!store.transactions().unwrap().contains(&txn));
}

#[test]
fn test_in_memory_store_contract() {
    exercise(&InMemoryRecordStore::new());
}

#[test]
fn test_file_store_contract() {
    let temp_dir = TempDir::new().unwrap();
    exercise(&FileRecordStore::open(temp_dir.path()).unwrap());
}

// ============================================================================
// Properties
// ============================================================================

fn resolution() -> impl Strategy<Value = Resolution> {
    prop_oneof![
        Just(Resolution::Commit),
        Just(Resolution::Rollback),
        Just(Resolution::Held(ActionStatus::HeuristicMixed)),
        Just(Resolution::Held(ActionStatus::HeuristicRollback)),
    ]
}

fn entries() -> impl Strategy<Value = Vec<SavedRecord>> {
    proptest::collection::vec(
        (0u32..4, proptest::collection::vec(any::<u8>(), 0..64), resolution()),
        1..12,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .map(|(tag, payload, resolution)| saved(tag, &payload).with_resolution(resolution))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_file_log_restores_in_save_order(records in entries()) {
        let temp_dir = TempDir::new().unwrap();
        let txn = Uid::new();
        {
            let store = FileRecordStore::open(temp_dir.path()).unwrap();
            for record in &records {
                store.save(txn, record.clone()).unwrap();
            }
        }

        let reopened = FileRecordStore::open(temp_dir.path()).unwrap();
        prop_assert_eq!(reopened.restore(txn).unwrap(), records);
    }

    #[test]
    fn prop_torn_final_entry_drops_only_itself(records in entries(), cut in 1u64..4) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileRecordStore::open(temp_dir.path()).unwrap();
        let txn = Uid::new();
        for record in &records {
            store.save(txn, record.clone()).unwrap();
        }

        // lose the tail of the last checksum
        let file = OpenOptions::new().write(true).open(store.log_path(txn)).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - cut).unwrap();
        drop(file);

        let restored = store.restore(txn).unwrap();
        prop_assert_eq!(&restored[..], &records[..records.len() - 1]);
    }
}
