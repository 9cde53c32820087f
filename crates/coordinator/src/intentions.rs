//! Ordered intentions list
//!
//! Holds the participant records of one transaction (or one partition of
//! it) ordered by `(order, record_type)` under the list's `OrderingPolicy`.
//!
//! ## Storage
//!
//! Records live in an arena of slots linked by index. A `RecordHandle`
//! carries the slot index plus a generation so a handle to a removed record
//! never aliases a later occupant of the same slot. Splice, removal and
//! in-place replacement are O(1) once the position is known.
//!
//! ## Insertion
//!
//! `insert` scans from the tail for the last record not greater than the
//! candidate. When that record has the same key, it decides what happens to
//! the candidate (merge, replace, add alongside, alter, or reject).

use crate::record::{compare_records, records_equal, ParticipantRecord};
use arbiter_core::OrderingPolicy;
use std::cmp::Ordering;
use tracing::trace;

/// Stable reference to a record inside one `IntentionsList`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    index: u32,
    generation: u32,
}

/// What `insert` did with the candidate record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Linked into the list as a new entry
    Added,
    /// Absorbed into an existing equal record
    Merged,
    /// An existing equal record took over the candidate's state
    Replaced,
    /// An existing equal record was adjusted by the candidate
    Altered,
    /// Rejected: an equal record exists and declined every disposition
    Duplicate,
}

impl AddOutcome {
    /// False only for a rejected enlistment
    pub fn accepted(self) -> bool {
        self != AddOutcome::Duplicate
    }
}

struct Entry {
    record: Box<dyn ParticipantRecord>,
    prev: Option<u32>,
    next: Option<u32>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Ordered, arena-backed list of participant records
pub struct IntentionsList {
    policy: OrderingPolicy,
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl IntentionsList {
    /// Create an empty list ordered by `policy`
    pub fn new(policy: OrderingPolicy) -> Self {
        Self {
            policy,
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Ordering policy of this list
    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the list holds no record
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Enlist `candidate`, honouring the merge/replace/add/alter protocol
    pub fn insert(&mut self, candidate: Box<dyn ParticipantRecord>) -> AddOutcome {
        let mut cursor = self.tail;
        while let Some(index) = cursor {
            let entry = self.entry(index);
            if compare_records(self.policy, entry.record.as_ref(), candidate.as_ref())
                != Ordering::Greater
            {
                break;
            }
            cursor = entry.prev;
        }

        let Some(index) = cursor else {
            self.link_front(candidate);
            return AddOutcome::Added;
        };

        if !records_equal(self.entry(index).record.as_ref(), candidate.as_ref()) {
            self.link_after(index, candidate);
            return AddOutcome::Added;
        }

        let existing = &mut self.entry_mut(index).record;
        let outcome = if existing.should_merge(candidate.as_ref()) {
            existing.merge(candidate.as_ref());
            AddOutcome::Merged
        } else if existing.should_replace(candidate.as_ref()) {
            existing.replace(candidate.as_ref());
            AddOutcome::Replaced
        } else if existing.should_add(candidate.as_ref()) {
            // `index` is the last of the equal run, keeping equal keys grouped
            self.link_after(index, candidate);
            return AddOutcome::Added;
        } else if existing.should_alter(candidate.as_ref()) {
            existing.alter(candidate.as_ref());
            AddOutcome::Altered
        } else {
            AddOutcome::Duplicate
        };

        trace!(
            target: "arbiter::txn",
            order = %candidate.order(),
            record_type = %candidate.record_type(),
            ?outcome,
            "Resolved enlistment against existing record"
        );
        outcome
    }

    /// Append without consulting the merge protocol
    ///
    /// Used when moving records between partitions in an order that is
    /// already established.
    pub fn push_back(&mut self, record: Box<dyn ParticipantRecord>) -> RecordHandle {
        match self.tail {
            Some(tail) => self.link_after(tail, record),
            None => self.link_front(record),
        }
    }

    /// Unlink and return the first record
    pub fn pop_front(&mut self) -> Option<Box<dyn ParticipantRecord>> {
        let head = self.head?;
        self.unlink(head)
    }

    /// Unlink and return the record behind `handle`
    pub fn remove(&mut self, handle: RecordHandle) -> Option<Box<dyn ParticipantRecord>> {
        if !self.is_live(handle) {
            return None;
        }
        self.unlink(handle.index)
    }

    /// Borrow the record behind `handle`
    pub fn get(&self, handle: RecordHandle) -> Option<&dyn ParticipantRecord> {
        if !self.is_live(handle) {
            return None;
        }
        self.slots[handle.index as usize]
            .entry
            .as_ref()
            .map(|entry| entry.record.as_ref())
    }

    /// Mutably borrow the record behind `handle`
    pub fn get_mut(
        &mut self,
        handle: RecordHandle,
    ) -> Option<&mut (dyn ParticipantRecord + 'static)> {
        if !self.is_live(handle) {
            return None;
        }
        self.slots[handle.index as usize]
            .entry
            .as_mut()
            .map(|entry| entry.record.as_mut())
    }

    /// Iterate records in list order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Handles of all records in list order
    pub fn handles(&self) -> Vec<RecordHandle> {
        let mut handles = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            handles.push(RecordHandle {
                index,
                generation: self.slots[index as usize].generation,
            });
            cursor = self.entry(index).next;
        }
        handles
    }

    /// Remove every record front to back
    pub fn drain(&mut self) -> impl Iterator<Item = Box<dyn ParticipantRecord>> + '_ {
        std::iter::from_fn(move || self.pop_front())
    }

    /// Drop every record
    ///
    /// Slots are kept and their generations bumped, so handles taken
    /// before the clear stay dead.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(index as u32);
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn is_live(&self, handle: RecordHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .map(|slot| slot.generation == handle.generation && slot.entry.is_some())
            .unwrap_or(false)
    }

    // Callers only pass indices taken from live links
    fn entry(&self, index: u32) -> &Entry {
        match self.slots[index as usize].entry.as_ref() {
            Some(entry) => entry,
            None => unreachable!("linked slot {} is vacant", index),
        }
    }

    fn entry_mut(&mut self, index: u32) -> &mut Entry {
        match self.slots[index as usize].entry.as_mut() {
            Some(entry) => entry,
            None => unreachable!("linked slot {} is vacant", index),
        }
    }

    fn allocate(&mut self, entry: Entry) -> RecordHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return RecordHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        RecordHandle {
            index,
            generation: 0,
        }
    }

    fn link_front(&mut self, record: Box<dyn ParticipantRecord>) -> RecordHandle {
        let old_head = self.head;
        let handle = self.allocate(Entry {
            record,
            prev: None,
            next: old_head,
        });
        match old_head {
            Some(head) => self.entry_mut(head).prev = Some(handle.index),
            None => self.tail = Some(handle.index),
        }
        self.head = Some(handle.index);
        handle
    }

    fn link_after(&mut self, at: u32, record: Box<dyn ParticipantRecord>) -> RecordHandle {
        let next = self.entry(at).next;
        let handle = self.allocate(Entry {
            record,
            prev: Some(at),
            next,
        });
        self.entry_mut(at).next = Some(handle.index);
        match next {
            Some(next) => self.entry_mut(next).prev = Some(handle.index),
            None => self.tail = Some(handle.index),
        }
        handle
    }

    fn unlink(&mut self, index: u32) -> Option<Box<dyn ParticipantRecord>> {
        let slot = &mut self.slots[index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;

        match entry.prev {
            Some(prev) => self.entry_mut(prev).next = entry.next,
            None => self.head = entry.next,
        }
        match entry.next {
            Some(next) => self.entry_mut(next).prev = entry.prev,
            None => self.tail = entry.prev,
        }
        Some(entry.record)
    }
}

impl std::fmt::Debug for IntentionsList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentionsList")
            .field("policy", &self.policy)
            .field("len", &self.len)
            .finish()
    }
}

/// Front-to-back iterator over an `IntentionsList`
pub struct Iter<'a> {
    list: &'a IntentionsList,
    cursor: Option<u32>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a dyn ParticipantRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let entry = self.list.entry(index);
        self.cursor = entry.next;
        Some(entry.record.as_ref())
    }
}
