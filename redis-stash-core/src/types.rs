//! Identifier, slot and address types shared by the storage backends

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use crc16::{State, XMODEM};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Total number of hash slots in a Redis Cluster
pub const SLOT_COUNT: u16 = 16384;

/// Calculate the hash slot for a given key
///
/// This implements the Redis Cluster key hashing algorithm:
/// - If the key contains {...}, only the part between the first { and first } is hashed
/// - Otherwise, the entire key is hashed
/// - The hash is CRC-16/XMODEM mod 16384
pub fn calculate_slot(key: &[u8]) -> u16 {
    let hash_key = extract_hash_tag(key);
    State::<XMODEM>::calculate(hash_key) % SLOT_COUNT
}

/// Extract the hash tag from a key
///
/// Hash tags pin multiple keys to one slot: `{user1000}.following` and
/// `{user1000}.followers` hash identically. An empty tag (`{}`) is ignored.
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
            let end = start + 1 + end;
            if end > start + 1 {
                return &key[start + 1..end];
            }
        }
    }
    key
}

/// The composite identifier of one stored entry
///
/// An entry is addressed by `(context, key)` from the host's point of view;
/// the configured prefix is folded in between them. The rendered Redis key is
/// `{<context>:<prefix><key>}` — the braces make Redis hash only the enclosed
/// bytes, which guarantees the data key and its version companion land on the
/// same cluster slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageId {
    context: String,
    prefix: String,
    key: String,
}

impl StorageId {
    /// Build an identifier from its parts. The prefix must not contain braces
    /// (enforced by configuration validation).
    pub fn new(
        context: impl Into<String>,
        key: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            context: context.into(),
            prefix: prefix.into(),
            key: key.into(),
        }
    }

    /// The context portion of the identifier
    pub fn context(&self) -> &str {
        &self.context
    }

    /// The inner key set by the host
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The configured prefix folded into the rendered key
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The full Redis key for the data entry
    pub fn rendered(&self) -> String {
        format!("{{{}:{}{}}}", self.context, self.prefix, self.key)
    }

    /// The companion key holding the entry's version counter
    pub fn version_key(&self) -> String {
        format!("version.of:{}", self.rendered())
    }

    /// The cluster hash slot both keys of this entry map to
    pub fn slot(&self) -> u16 {
        let mut state = State::<XMODEM>::new();
        state.update(self.context.as_bytes());
        state.update(b":");
        state.update(self.prefix.as_bytes());
        state.update(self.key.as_bytes());
        state.get() % SLOT_COUNT
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}:{}{}}}", self.context, self.prefix, self.key)
    }
}

/// A contiguous, inclusive range of hash slots owned by one cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRange {
    start: u16,
    end: u16,
}

impl SlotRange {
    /// Create a slot range, rejecting inverted or out-of-bounds bounds
    pub fn new(start: u16, end: u16) -> StoreResult<Self> {
        if end < start || end >= SLOT_COUNT {
            return Err(StoreError::BadSlotRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First slot of the range (inclusive)
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Last slot of the range (inclusive)
    pub fn end(&self) -> u16 {
        self.end
    }

    /// Check if a slot is within this range
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Order this range against a single slot
    ///
    /// `Less` iff the slot lies above the range, `Greater` iff below, `Equal`
    /// iff contained — consistent with the range-vs-range total order, so one
    /// ordered container serves both insertion and point lookup.
    pub fn cmp_slot(&self, slot: u16) -> Ordering {
        if slot > self.end {
            Ordering::Less
        } else if slot < self.start {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    /// Search bound for locating the range covering `slot` in an ordered map:
    /// the last stored range ordering at or below this probe is the only
    /// candidate that can contain the slot.
    pub fn probe(slot: u16) -> Self {
        Self {
            start: slot,
            end: SLOT_COUNT - 1,
        }
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Host and port of one Redis node, compared structurally
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl NodeAddress {
    /// Create a new node address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The observable state of one versioned entry
///
/// `version` is `0` when the entry does not exist (or an optimistic read gave
/// up); `value` is filled only when it was requested and the version met the
/// caller's threshold; `expiration` is the absolute Unix expiry in seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySnapshot {
    /// Current version counter, `0` when missing
    pub version: i64,
    /// Entry payload, when requested and readable
    pub value: Option<Bytes>,
    /// Absolute expiration time (Unix seconds), when requested
    pub expiration: Option<i64>,
}

impl EntrySnapshot {
    /// Snapshot of a missing entry
    pub fn missing() -> Self {
        Self::default()
    }
}

// https://redis.io/docs/latest/develop/use/keyspace -> 512 MB per key;
// the rendered form spends half on the context, half on the prefixed key,
// minus the colon and braces.
const MAX_KEY_BYTES: usize = 512 * 1000 * 1000;

/// Size limits the storage service reports to its host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Longest accepted context string, in bytes
    pub max_context_size: usize,
    /// Longest accepted key string, in bytes
    pub max_key_size: usize,
    /// Largest accepted value, in bytes
    pub max_value_size: usize,
}

impl Capabilities {
    /// Compute the limits for a given key prefix
    pub fn for_prefix(prefix: &str) -> Self {
        Self {
            max_context_size: MAX_KEY_BYTES / 2 - 1,
            max_key_size: MAX_KEY_BYTES / 2 - 2 - prefix.len(),
            max_value_size: 512 * 1000 * 1000,
        }
    }
}
