//! # sovereign-audit
//!
//! Append-only, SHA-256 hash-chained ledger auditing for the Sovereign kernel.
//!
//! ## Overview
//!
//! Every event the kernel persists is wrapped in a `LedgerEntry` whose hash
//! commits to its sequence, the previous entry's hash, and the full event.
//! Altering any stored entry, even a single byte, or removing one breaks the
//! chain at that sequence and is reported by `verify`.
//!
//! This makes tampering detectable. It does not prevent it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sovereign_audit::HashChainAuditor;
//! use sovereign_core::traits::Auditor;
//!
//! let auditor = HashChainAuditor::new(&config.genesis_seed);
//! let entry = auditor.append(uow.as_mut(), event)?;
//! assert!(auditor.verify(&store.entries()?, None).valid);
//! ```

pub mod auditor;
pub mod chain;

pub use auditor::HashChainAuditor;
pub use chain::{hash_entry, verify_entries, verify_head};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use sovereign_contracts::{
        event::{Event, EventId, EventKind},
        ledger::GENESIS_HASH,
    };
    use sovereign_core::traits::{Auditor, Storage, UnitOfWork};
    use sovereign_store::MemoryStore;

    use super::HashChainAuditor;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn make_event(n: u64) -> Event {
        let mut event = Event {
            id: EventId(format!("evt-{:04}", n)),
            event_type: EventKind::PostLedgerEntry.as_str().to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(n as i64),
            payload: json!({ "account_id": "acct-1", "amount": n as i64 }),
            signature: String::new(),
            causality_chain: vec![],
            metadata: Default::default(),
        };
        event.sign("node-a");
        event
    }

    /// A store holding `n` committed, chained entries.
    fn chained_store(auditor: &HashChainAuditor, n: u64) -> MemoryStore {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        for i in 1..=n {
            auditor.append(uow.as_mut(), make_event(i)).unwrap();
        }
        uow.commit().unwrap();
        store
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_hash_chain_integrity() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 3);

        let result = auditor.verify(&store.entries().unwrap(), None);
        assert!(result.valid, "chain must be valid after sequential appends");
        assert_eq!(result.broken_at, None);
        assert_eq!(result.checked, 3);
    }

    #[test]
    fn test_genesis_link_uses_seed() {
        let auditor = HashChainAuditor::new("seed-for-tests");
        let store = chained_store(&auditor, 2);

        let entries = store.entries().unwrap();
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[0].previous_hash, "seed-for-tests");
        assert_eq!(entries[1].previous_hash, entries[0].hash);
    }

    #[test]
    fn test_default_seed_is_genesis_hash() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 1);
        assert_eq!(store.entries().unwrap()[0].previous_hash, GENESIS_HASH);
    }

    #[test]
    fn test_wrong_seed_breaks_at_first_entry() {
        let writer = HashChainAuditor::new("seed-a");
        let store = chained_store(&writer, 2);

        let reader = HashChainAuditor::new("seed-b");
        assert_eq!(reader.verify(&store.entries().unwrap(), None).broken_at, Some(1));
    }

    #[test]
    fn test_payload_tamper_detected_at_its_sequence() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 10);

        store
            .tamper_with(|entries| entries[6].event.payload = json!({ "amount": 1_000_000 }))
            .unwrap();

        let result = auditor.verify(&store.entries().unwrap(), None);
        assert!(!result.valid);
        assert_eq!(result.broken_at, Some(7));
        assert_eq!(result.checked, 6);
    }

    #[test]
    fn test_relinked_tamper_still_detected() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 5);

        // Rewrite entry 3 and recompute its own hash; entry 4 no longer links to it.
        store
            .tamper_with(|entries| {
                entries[2].event.payload = json!({ "amount": -1 });
                entries[2].hash =
                    super::hash_entry(3, &entries[2].event, &entries[2].previous_hash);
            })
            .unwrap();

        assert_eq!(auditor.verify(&store.entries().unwrap(), None).broken_at, Some(4));
    }

    #[test]
    fn test_verify_empty() {
        let auditor = HashChainAuditor::default();
        let result = auditor.verify(&[], None);
        assert!(result.valid, "an empty ledger must be considered valid");
        assert_eq!(result.checked, 0);
    }

    #[test]
    fn test_range_verification_skips_outside_entries() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 10);
        store
            .tamper_with(|entries| entries[1].event.payload = json!({ "amount": 0 }))
            .unwrap();
        let entries = store.entries().unwrap();

        let tail = auditor.verify(&entries, Some(5..=10));
        assert!(tail.valid, "tampering before the range is out of scope");
        assert_eq!(tail.checked, 6);

        let head = auditor.verify(&entries, Some(1..=3));
        assert_eq!(head.broken_at, Some(2));
    }

    #[test]
    fn test_thousand_entries_with_deleted_entry() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 1000);

        let intact = auditor.verify(&store.entries().unwrap(), None);
        assert!(intact.valid);
        assert_eq!(intact.checked, 1000);

        store.tamper_with(|entries| { entries.remove(499); }).unwrap();

        let result = auditor.verify(&store.entries().unwrap(), None);
        assert!(!result.valid);
        assert_eq!(result.broken_at, Some(500));
    }

    #[test]
    fn test_thousand_entries_with_altered_entry() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 1000);

        store
            .tamper_with(|entries| {
                entries[499].event.metadata.insert("note".into(), "edited".into());
            })
            .unwrap();

        let result = auditor.verify(&store.entries().unwrap(), None);
        assert_eq!(result.broken_at, Some(500));
    }

    #[test]
    fn test_tail_truncation_caught_by_head() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 10);
        let head = store.head().unwrap().expect("commit records a head");
        assert_eq!(auditor.verify_head(&store.entries().unwrap(), &head), None);

        store.tamper_with(|entries| entries.truncate(8)).unwrap();

        let entries = store.entries().unwrap();
        assert!(auditor.verify(&entries, None).valid, "the shortened chain still links");
        assert_eq!(auditor.verify_head(&entries, &head), Some(9));
    }

    #[test]
    fn test_rewritten_head_entry_caught() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 4);
        let head = store.head().unwrap().unwrap();

        store
            .tamper_with(|entries| {
                entries[3].event.payload = json!({ "amount": 0 });
                entries[3].hash =
                    super::hash_entry(4, &entries[3].event, &entries[3].previous_hash);
            })
            .unwrap();

        let entries = store.entries().unwrap();
        assert!(auditor.verify(&entries, None).valid);
        assert_eq!(auditor.verify_head(&entries, &head), Some(4));
    }

    #[test]
    fn test_entries_past_head_are_not_a_break() {
        let auditor = HashChainAuditor::default();
        let store = chained_store(&auditor, 3);
        let head = store.head().unwrap().unwrap();

        let mut uow = store.begin().unwrap();
        auditor.append(uow.as_mut(), make_event(4)).unwrap();
        uow.commit().unwrap();

        assert_eq!(auditor.verify_head(&store.entries().unwrap(), &head), None);
    }
}
