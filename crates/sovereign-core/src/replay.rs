//! Replay of the ledger into derived state.
//!
//! The effective history is the ledger with every contested identifier
//! replaced by the version its latest resolution accepted, minus every write
//! that lost a contest for an aggregate, ordered by (timestamp, id).
//! Rebuilding from it is how disaster recovery, new replicas, and conflict
//! resolution all arrive at the same derived state.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use sovereign_contracts::{
    error::KernelResult,
    event::{Event, EventId, EventKind},
    ledger::LedgerEntry,
    replication::Resolution,
};

use crate::traits::{Projector, UnitOfWork};

/// The events replay applies, in the order it applies them.
///
/// A write superseded by any aggregate resolution stays out, whatever order
/// the resolutions arrived in, so replicas holding the same resolutions
/// replay the same history.
///
/// Fails if a `ConflictResolvedEvent` payload cannot be decoded.
pub fn effective_history(entries: &[LedgerEntry]) -> KernelResult<Vec<Event>> {
    let mut resolutions: Vec<&Event> = entries
        .iter()
        .map(|entry| &entry.event)
        .filter(|event| event.kind() == Some(EventKind::ConflictResolved))
        .collect();
    resolutions.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

    // Later resolutions overwrite earlier ones for the same target.
    let mut accepted: BTreeMap<EventId, Event> = BTreeMap::new();
    // (id, content digest) of every write that lost an aggregate contest.
    let mut overruled: BTreeSet<(EventId, String)> = BTreeSet::new();
    for event in resolutions {
        let resolution = Resolution::from_payload(&event.payload)?;
        match resolution.aggregate {
            Some(_) => overruled.extend(
                resolution
                    .superseded
                    .iter()
                    .map(|loser| (loser.id.clone(), loser.content_digest())),
            ),
            None => {
                accepted.insert(resolution.target().clone(), resolution.accepted);
            }
        }
    }

    let mut history: Vec<Event> = entries
        .iter()
        .filter_map(|entry| {
            if entry.event.kind() == Some(EventKind::ConflictResolved) {
                return Some(entry.event.clone());
            }
            let event = accepted
                .get(&entry.event.id)
                .unwrap_or(&entry.event)
                .clone();
            let lost = !overruled.is_empty()
                && overruled.contains(&(event.id.clone(), event.content_digest()));
            (!lost).then_some(event)
        })
        .collect();
    history.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    Ok(history)
}

/// Clear derived state and reapply the effective history inside `uow`.
///
/// Returns the number of events applied.
pub fn rebuild(uow: &mut dyn UnitOfWork, projector: &dyn Projector) -> KernelResult<usize> {
    let history = effective_history(&uow.entries())?;
    uow.derived_mut().clear();
    for event in &history {
        projector.apply(uow, event)?;
    }
    debug!(events = history.len(), "derived state rebuilt from ledger");
    Ok(history.len())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use sovereign_contracts::{
        event::{Event, EventId, EventKind},
        ledger::LedgerEntry,
        replication::Resolution,
    };

    use super::effective_history;

    fn settle(id: &str, secs: i64, node: &str) -> Event {
        let mut event = Event {
            id: EventId::from(id),
            event_type: EventKind::SettlePayment.as_str().to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            payload: json!({ "payment_id": "pay-1" }),
            signature: String::new(),
            causality_chain: vec![EventId::from("pay-1")],
            metadata: Default::default(),
        };
        event.sign(node);
        event
    }

    fn verdict(accepted: &Event, superseded: &Event, secs: i64) -> Event {
        let resolution = Resolution {
            accepted: accepted.clone(),
            superseded: vec![superseded.clone()],
            policy: "last-write-wins".to_string(),
            rationale: None,
            aggregate: None,
        }
        .for_aggregate("payment:pay-1");
        Event {
            id: resolution.event_id(),
            event_type: EventKind::ConflictResolved.as_str().to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            payload: resolution.to_payload().unwrap(),
            signature: String::new(),
            causality_chain: vec![],
            metadata: Default::default(),
        }
    }

    fn ledger(events: Vec<Event>) -> Vec<LedgerEntry> {
        events
            .into_iter()
            .enumerate()
            .map(|(i, event)| LedgerEntry {
                sequence: i as u64 + 1,
                event,
                previous_hash: String::new(),
                hash: String::new(),
            })
            .collect()
    }

    fn ids(history: &[Event]) -> Vec<&str> {
        history.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_unresolved_ledger_replays_in_timestamp_order() {
        let first = settle("evt-a", 10, "node-a");
        let second = settle("evt-b", 20, "node-b");
        let history = effective_history(&ledger(vec![second, first])).unwrap();
        assert_eq!(ids(&history), vec!["evt-a", "evt-b"]);
    }

    #[test]
    fn test_losing_write_stays_out_of_replay() {
        let local = settle("evt-a", 10, "node-a");
        let remote = settle("evt-b", 20, "node-b");
        let resolved = verdict(&remote, &local, 21);
        let resolution_id = resolved.id.to_string();

        let history = effective_history(&ledger(vec![local, remote, resolved])).unwrap();
        assert_eq!(ids(&history), vec!["evt-b", resolution_id.as_str()]);
    }

    #[test]
    fn test_loser_is_out_whichever_verdict_arrived_first() {
        let a = settle("evt-a", 10, "node-a");
        let b = settle("evt-b", 20, "node-b");
        let c = settle("evt-c", 30, "node-c");
        // Two replicas saw the contest in different orders.
        let one = verdict(&b, &a, 40);
        let two = verdict(&c, &b, 35);

        let forward = effective_history(&ledger(vec![
            a.clone(),
            b.clone(),
            c.clone(),
            one.clone(),
            two.clone(),
        ]))
        .unwrap();
        let backward = effective_history(&ledger(vec![c, two, b, a, one])).unwrap();

        assert_eq!(forward, backward);
        assert!(!ids(&forward).contains(&"evt-a"));
        assert!(!ids(&forward).contains(&"evt-b"));
        assert!(ids(&forward).contains(&"evt-c"));
    }
}
