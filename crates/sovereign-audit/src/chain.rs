//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. sequence as 8-byte little-endian
//!   2. previous_hash as UTF-8 bytes
//!   3. canonical JSON of the event, signature included

use std::ops::RangeInclusive;

use sha2::{Digest, Sha256};

use sovereign_contracts::{
    event::Event,
    ledger::{ChainHead, ChainVerification, LedgerEntry},
};

/// Compute the SHA-256 hash for one ledger entry.
///
/// Returns a lowercase 64-character hex string.
///
/// # Panics
///
/// Panics if `event` cannot be serialized to JSON, which cannot happen for
/// an `Event` built from `serde_json::Value` and strings.
pub fn hash_entry(sequence: u64, event: &Event, previous_hash: &str) -> String {
    let event_json = serde_json::to_vec(event).expect("Event must always be serializable to JSON");

    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(&event_json);

    hex::encode(hasher.finalize())
}

/// Walk `entries` and report the first entry that breaks the chain.
///
/// An entry is broken when any of these fail:
///
/// 1. **Continuity**: its sequence is exactly one past the previous entry's
///    (the first entry is sequence 1). A removed entry shows up here, reported
///    at the sequence that is missing.
/// 2. **Linkage**: its `previous_hash` equals the preceding entry's `hash`,
///    or `genesis_seed` for sequence 1.
/// 3. **Correctness**: its `hash` matches the value recomputed from its fields.
///
/// With a `range`, entries before its start are trusted as stored and entries
/// past its end are not visited. An empty ledger is valid.
pub fn verify_entries(
    entries: &[LedgerEntry],
    genesis_seed: &str,
    range: Option<RangeInclusive<u64>>,
) -> ChainVerification {
    let (start, end) = match range {
        Some(r) => (*r.start(), *r.end()),
        None => (1, u64::MAX),
    };

    let mut expected_sequence = 1u64;
    let mut expected_prev = genesis_seed.to_string();
    let mut checked = 0u64;

    for entry in entries {
        if expected_sequence > end {
            break;
        }

        if entry.sequence < start {
            expected_sequence = entry.sequence + 1;
            expected_prev = entry.hash.clone();
            continue;
        }

        if entry.sequence != expected_sequence {
            return ChainVerification::broken(expected_sequence.max(start), checked);
        }

        if entry.previous_hash != expected_prev
            || entry.hash != hash_entry(entry.sequence, &entry.event, &entry.previous_hash)
        {
            return ChainVerification::broken(entry.sequence, checked);
        }

        checked += 1;
        expected_sequence += 1;
        expected_prev = entry.hash.clone();
    }

    ChainVerification::intact(checked)
}

/// Check that `entries` still reach `head` and hold it unchanged.
///
/// Returns the first sequence missing below the head, or the head's own
/// sequence when the entry there differs from the anchor. Entries past the
/// head were committed later and are left to `verify_entries`.
pub fn verify_head(entries: &[LedgerEntry], head: &ChainHead) -> Option<u64> {
    match entries.iter().find(|entry| entry.sequence >= head.sequence) {
        Some(entry) if entry.sequence == head.sequence && entry.hash == head.hash => None,
        Some(entry) if entry.sequence == head.sequence => Some(head.sequence),
        _ => {
            let last = entries
                .iter()
                .map(|entry| entry.sequence)
                .filter(|&sequence| sequence < head.sequence)
                .max()
                .unwrap_or(0);
            Some(last + 1)
        }
    }
}
