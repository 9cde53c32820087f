//! Identifier and classification types
//!
//! - Uid: globally unique, totally ordered transaction/record identifier
//! - ActionType: top-level vs nested transaction
//! - RecordType: integer tag identifying a participant record kind
//! - OrderingPolicy: composite ordering key used by intentions lists

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Process-wide node identity; every Uid minted by this process shares it.
static NODE: Lazy<Uuid> = Lazy::new(Uuid::new_v4);

/// Next sequence number handed out by `Uid::new`.
static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction or a participant record
///
/// A Uid pairs a per-process node UUID (v4) with a monotonically increasing
/// sequence number. Ordering is `(node, sequence)`, so identifiers minted by
/// one process sort in creation order and identifiers from different
/// processes never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid {
    node: Uuid,
    sequence: u64,
}

impl Uid {
    /// Mint a fresh identifier
    pub fn new() -> Self {
        Self {
            node: *NODE,
            sequence: SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The nil identifier; sorts before every minted Uid
    pub const fn nil() -> Self {
        Self {
            node: Uuid::nil(),
            sequence: 0,
        }
    }

    /// Build a Uid from its parts (used when restoring from a log)
    pub fn from_parts(node: Uuid, sequence: u64) -> Self {
        Self { node, sequence }
    }

    /// Node component
    pub fn node(&self) -> Uuid {
        self.node
    }

    /// Sequence component
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// True for `Uid::nil()`
    pub fn is_nil(&self) -> bool {
        self.node.is_nil() && self.sequence == 0
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:x}", self.node, self.sequence)
    }
}

/// Error returned when parsing a Uid from its display form fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidParseError(pub String);

impl fmt::Display for UidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid uid '{}'", self.0)
    }
}

impl std::error::Error for UidParseError {}

impl FromStr for Uid {
    type Err = UidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node, sequence) = s
            .rsplit_once(':')
            .ok_or_else(|| UidParseError(s.to_string()))?;
        let node = Uuid::parse_str(node).map_err(|_| UidParseError(s.to_string()))?;
        let sequence =
            u64::from_str_radix(sequence, 16).map_err(|_| UidParseError(s.to_string()))?;
        Ok(Self { node, sequence })
    }
}

/// Position of a transaction in a nesting hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    /// Outermost transaction; owns the durable outcome
    TopLevel,
    /// Sub-transaction whose effects are provisional until the parent ends
    Nested,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::TopLevel => write!(f, "TOP_LEVEL"),
            ActionType::Nested => write!(f, "NESTED"),
        }
    }
}

/// Integer tag identifying a participant record kind
///
/// Records of the same type are kept physically adjacent in an intentions
/// list, and recovery uses the tag to pick the factory that rebuilds a record
/// from its saved payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordType(pub u32);

impl RecordType {
    /// Lock-manager records
    pub const LOCK: RecordType = RecordType(10);
    /// Records carrying a recoverable object's state
    pub const PERSISTENCE: RecordType = RecordType(20);
    /// Records restoring a recoverable object's state on abort
    pub const RECOVERY: RecordType = RecordType(30);
    /// Interposed (subordinate) coordinators
    pub const INTERPOSED: RecordType = RecordType(100);
    /// First tag available for application-defined records
    pub const USER_DEFINED: RecordType = RecordType(1000);

    /// Raw tag value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key used to order records within an intentions list
///
/// No `Default`: the choice changes how records are grouped in the log and
/// must be configured explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Compare by `(order, record_type)`
    OrderFirst,
    /// Compare by `(record_type, order)`; groups records of a type together
    TypeFirst,
}

impl OrderingPolicy {
    /// Compare two `(order, record_type)` keys under this policy
    pub fn compare(
        &self,
        a: (Uid, RecordType),
        b: (Uid, RecordType),
    ) -> std::cmp::Ordering {
        match self {
            OrderingPolicy::OrderFirst => a.0.cmp(&b.0).then(a.1.cmp(&b.1)),
            OrderingPolicy::TypeFirst => a.1.cmp(&b.1).then(a.0.cmp(&b.0)),
        }
    }
}

impl FromStr for OrderingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_first" => Ok(OrderingPolicy::OrderFirst),
            "type_first" => Ok(OrderingPolicy::TypeFirst),
            other => Err(format!(
                "unknown ordering policy '{}', expected \"order_first\" or \"type_first\"",
                other
            )),
        }
    }
}
