//! Nesting path of a transaction
//!
//! An `ActionHierarchy` lists `(uid, ActionType)` from the outermost
//! transaction down to the current one. Ancestor checks never look past
//! the owning top-level boundary.

use arbiter_core::{ActionType, Uid};

/// Ordered `(uid, type)` path from outermost to innermost transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionHierarchy {
    entries: Vec<(Uid, ActionType)>,
}

impl ActionHierarchy {
    /// Empty hierarchy with room for `capacity` levels
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append `(uid, kind)` as the new deepest entry
    pub fn add(&mut self, uid: Uid, kind: ActionType) {
        let capacity = self.entries.capacity();
        if self.entries.len() == capacity {
            // grow to 2 * capacity + 1
            self.entries.reserve_exact(capacity + 1);
        }
        self.entries.push((uid, kind));
    }

    /// Whether `target` appears at or above the deepest entry
    ///
    /// The scan runs from the deepest entry upward and stops after the
    /// first `TopLevel` entry.
    pub fn is_ancestor(&self, target: Uid) -> bool {
        for &(uid, kind) in self.entries.iter().rev() {
            if uid == target {
                return true;
            }
            if kind == ActionType::TopLevel {
                break;
            }
        }
        false
    }

    /// Number of leading entries shared with `other`
    pub fn find_common_prefix(&self, other: &ActionHierarchy) -> usize {
        self.entries
            .iter()
            .zip(other.entries.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Drop the deepest entry
    pub fn forget_deepest(&mut self) -> Option<(Uid, ActionType)> {
        self.entries.pop()
    }

    /// Number of entries
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Entry at `index`, 0 being the outermost
    pub fn get(&self, index: usize) -> Option<(Uid, ActionType)> {
        self.entries.get(index).copied()
    }

    /// Deepest entry
    pub fn deepest(&self) -> Option<(Uid, ActionType)> {
        self.entries.last().copied()
    }

    /// Entries from outermost to deepest
    pub fn iter(&self) -> impl Iterator<Item = (Uid, ActionType)> + '_ {
        self.entries.iter().copied()
    }

    /// Current backing capacity
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }
}

impl Default for ActionHierarchy {
    fn default() -> Self {
        Self::with_capacity(5)
    }
}
