//! Ledger entries under tamper-evidence, and read-side query types.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// A single record in the ledger's SHA-256 hash chain.
///
/// `hash` commits to `sequence`, `previous_hash`, and the full event. Editing
/// any of them, or removing an entry, breaks the linkage for that entry and
/// every later one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Strictly increasing position in the ledger, starting at 1.
    pub sequence: u64,
    pub event: Event,
    /// Hash of the preceding entry, or the genesis seed for sequence 1.
    pub previous_hash: String,
    pub hash: String,
}

/// The default previous-hash seed for the first ledger entry.
///
/// 64 hex zeros, which no real SHA-256 digest collides with in practice.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// The last entry a store committed, kept apart from the entries themselves.
///
/// Entries that vanish from the tail leave a chain that still links, so the
/// head is checked against this record as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHead {
    pub sequence: u64,
    pub hash: String,
}

impl ChainHead {
    pub fn of(entry: &LedgerEntry) -> Self {
        Self {
            sequence: entry.sequence,
            hash: entry.hash.clone(),
        }
    }
}

/// Outcome of walking the hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    /// First sequence whose recomputed hash or linkage diverges.
    pub broken_at: Option<u64>,
    /// Number of entries that were fully checked.
    pub checked: u64,
}

impl ChainVerification {
    pub fn intact(checked: u64) -> Self {
        Self {
            valid: true,
            broken_at: None,
            checked,
        }
    }

    pub fn broken(sequence: u64, checked: u64) -> Self {
        Self {
            valid: false,
            broken_at: Some(sequence),
            checked,
        }
    }

    /// Also mark `sequence` broken, keeping whichever break comes first.
    pub fn with_break(self, sequence: u64) -> Self {
        let first = self.broken_at.map_or(sequence, |s| s.min(sequence));
        Self::broken(first, self.checked)
    }
}

/// Read-only query over the ledger by initiating actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQuery {
    pub initiator: String,
    pub event_type: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl EventQuery {
    pub fn by_initiator(initiator: impl Into<String>) -> Self {
        Self {
            initiator: initiator.into(),
            event_type: None,
            limit: 50,
            offset: 0,
        }
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}
