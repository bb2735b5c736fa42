//! # sovereign-store
//!
//! The Ledger Store and Derived State tables of the Sovereign kernel, held
//! in memory behind an atomic unit of work. Units read a snapshot and are
//! checked for conflicting commits only when they commit.
//!
//! Persistence technology is a deployment choice. Anything that implements
//! `sovereign_core::traits::Storage` with the same commit-or-discard
//! semantics can replace `MemoryStore`.

pub mod memory;

pub use memory::{MemoryStore, MemoryUnitOfWork};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use sovereign_contracts::{
        derived::BalanceRecord,
        error::KernelError,
        event::{Event, EventId, EventKind},
        ledger::{ChainHead, LedgerEntry},
    };
    use sovereign_core::traits::{Storage, UnitOfWork};

    use super::MemoryStore;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn make_entry(sequence: u64, id: &str, secs: i64) -> LedgerEntry {
        let event = Event {
            id: EventId::from(id),
            event_type: EventKind::PostLedgerEntry.as_str().to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs),
            payload: json!({ "account_id": "acct-1", "amount": 10 }),
            signature: String::new(),
            causality_chain: vec![],
            metadata: Default::default(),
        };
        LedgerEntry {
            sequence,
            event,
            previous_hash: String::new(),
            hash: format!("h{}", sequence),
        }
    }

    fn balance(id: &str, amount: i64) -> BalanceRecord {
        BalanceRecord {
            account_id: id.to_string(),
            balance: amount,
            version: 1,
            origin_event: EventId::from("evt-1"),
            last_event: EventId::from("evt-1"),
            updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        uow.append_entry(make_entry(1, "evt-1", 0)).unwrap();
        uow.derived_mut().balances.insert("acct-1".into(), balance("acct-1", 10));
        uow.commit().unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.derived_snapshot().unwrap().balances["acct-1"].balance, 10);
    }

    #[test]
    fn test_drop_discards_everything() {
        let store = MemoryStore::new();
        {
            let mut uow = store.begin().unwrap();
            uow.append_entry(make_entry(1, "evt-1", 0)).unwrap();
            uow.derived_mut().balances.insert("acct-1".into(), balance("acct-1", 10));
        }

        assert!(store.is_empty().unwrap());
        assert!(store.derived_snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_unit_reads_its_own_writes() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        uow.append_entry(make_entry(1, "evt-1", 0)).unwrap();

        assert!(uow.find_entry(&EventId::from("evt-1")).is_some());
        assert_eq!(uow.last_entry().map(|e| e.sequence), Some(1));
        assert_eq!(uow.entries().len(), 1);

        uow.derived_mut().balances.insert("acct-1".into(), balance("acct-1", 5));
        assert!(uow.derived().balances.contains_key("acct-1"));
    }

    #[test]
    fn test_sequence_gap_rejected() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        let result = uow.append_entry(make_entry(2, "evt-1", 0));
        assert!(matches!(result, Err(KernelError::Storage { .. })));
    }

    #[test]
    fn test_duplicate_id_rejected_across_commits() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        uow.append_entry(make_entry(1, "evt-1", 0)).unwrap();
        uow.commit().unwrap();

        let mut uow = store.begin().unwrap();
        let result = uow.append_entry(make_entry(2, "evt-1", 1));
        assert!(matches!(result, Err(KernelError::Storage { .. })));
    }

    #[test]
    fn test_events_since_is_exclusive_and_ordered() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        // Appended out of timestamp order on purpose.
        uow.append_entry(make_entry(1, "evt-b", 5)).unwrap();
        uow.append_entry(make_entry(2, "evt-a", 5)).unwrap();
        uow.append_entry(make_entry(3, "evt-c", 1)).unwrap();
        uow.commit().unwrap();

        let all = store.events_since(None).unwrap();
        let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["evt-c", "evt-a", "evt-b"]);

        let later = store.events_since(Some(all[0].timestamp)).unwrap();
        assert_eq!(later.len(), 2, "events at exactly `since` are excluded");
    }

    #[test]
    fn test_open_unit_does_not_block_other_units() {
        let store = MemoryStore::new();
        let mut slow = store.begin().unwrap();
        slow.append_entry(make_entry(1, "evt-slow", 0)).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let shared = &store;
        thread::scope(|scope| {
            scope.spawn(move || {
                let mut fast = shared.begin().unwrap();
                fast.append_entry(make_entry(1, "evt-fast", 1)).unwrap();
                fast.commit().unwrap();
                done_tx.send(()).unwrap();
            });
            done_rx
                .recv_timeout(std::time::Duration::from_secs(5))
                .expect("second unit finished while the first stayed open");
        });

        assert_eq!(store.len().unwrap(), 1);
        // The slow unit's snapshot is stale now.
        assert!(slow.find_entry(&EventId::from("evt-fast")).is_none());
        assert!(matches!(slow.commit(), Err(KernelError::WriteConflict { .. })));
        let ids: Vec<String> = store
            .entries()
            .unwrap()
            .iter()
            .map(|e| e.event.id.to_string())
            .collect();
        assert_eq!(ids, vec!["evt-fast"]);
    }

    #[test]
    fn test_unit_begun_after_commit_sees_it() {
        let store = MemoryStore::new();
        let mut first = store.begin().unwrap();
        first.append_entry(make_entry(1, "evt-1", 0)).unwrap();
        first.commit().unwrap();

        let mut second = store.begin().unwrap();
        assert_eq!(second.last_entry().map(|e| e.sequence), Some(1));
        second.append_entry(make_entry(2, "evt-2", 1)).unwrap();
        second.commit().unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_read_only_unit_never_conflicts() {
        let store = MemoryStore::new();
        let reader = store.begin().unwrap();

        let mut writer = store.begin().unwrap();
        writer.append_entry(make_entry(1, "evt-1", 0)).unwrap();
        writer.commit().unwrap();

        reader.commit().unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_head_tracks_commits_but_not_raw_edits() {
        let store = MemoryStore::new();
        assert_eq!(store.head().unwrap(), None);

        let mut uow = store.begin().unwrap();
        uow.append_entry(make_entry(1, "evt-1", 0)).unwrap();
        uow.append_entry(make_entry(2, "evt-2", 1)).unwrap();
        uow.commit().unwrap();
        let head = ChainHead { sequence: 2, hash: "h2".to_string() };
        assert_eq!(store.head().unwrap(), Some(head.clone()));

        store.tamper_with(|entries| { entries.pop(); }).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.head().unwrap(), Some(head));
    }

    #[test]
    fn test_tamper_with_reindexes() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        uow.append_entry(make_entry(1, "evt-1", 0)).unwrap();
        uow.append_entry(make_entry(2, "evt-2", 1)).unwrap();
        uow.commit().unwrap();

        store.tamper_with(|entries| { entries.remove(0); }).unwrap();

        let uow = store.begin().unwrap();
        assert!(uow.find_entry(&EventId::from("evt-1")).is_none());
        assert_eq!(uow.find_entry(&EventId::from("evt-2")).map(|e| e.sequence), Some(2));
    }
}
