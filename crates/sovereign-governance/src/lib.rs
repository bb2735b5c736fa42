//! # sovereign-governance
//!
//! The governance domain the Sovereign kernel serves: users, payments, and
//! ledger balances.
//!
//! | Command           | Event                  | Aggregate                |
//! |-------------------|------------------------|--------------------------|
//! | `CreateUser`      | `CreateUserEvent`      | user (`version = 1`)     |
//! | `UpdateUserEmail` | `UpdateUserEmailEvent` | user                     |
//! | `InitiatePayment` | `InitiatePaymentEvent` | payment (`pending`)      |
//! | `SettlePayment`   | `SettlePaymentEvent`   | payment (`settled`)      |
//! | `PostLedgerEntry` | `PostLedgerEntryEvent` | ledger balance           |
//!
//! `ConflictResolvedEvent` has no command. Replication records it, and the
//! projector keeps one conflict row per contested event id or aggregate.

pub mod handlers;
pub mod payloads;
pub mod projector;
pub mod schemas;

use sovereign_contracts::error::KernelResult;
use sovereign_core::HandlerRegistry;
use sovereign_validate::SchemaValidator;

pub use projector::GovernanceProjector;

/// A registry holding one handler per governance command.
pub fn registry() -> KernelResult<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(handlers::CreateUserHandler))?;
    registry.register(Box::new(handlers::UpdateUserEmailHandler))?;
    registry.register(Box::new(handlers::InitiatePaymentHandler))?;
    registry.register(Box::new(handlers::SettlePaymentHandler))?;
    registry.register(Box::new(handlers::PostLedgerEntryHandler))?;
    Ok(registry)
}

/// A payload validator with the custom rules the governance schemas use.
pub fn validator() -> SchemaValidator {
    let mut validator = SchemaValidator::new();
    validator.register_rule(
        schemas::NON_ZERO_AMOUNT,
        Box::new(|payload| match payload.get("amount").and_then(|v| v.as_i64()) {
            Some(0) => Some("amount must not be zero".to_string()),
            _ => None,
        }),
    );
    validator
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc};
    use std::thread;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use sovereign_audit::HashChainAuditor;
    use sovereign_contracts::{
        command::{Command, CommandKind, EventDraft},
        config::KernelConfig,
        derived::PaymentStatus,
        error::KernelError,
        event::{Event, EventId, EventKind},
        ledger::EventQuery,
    };
    use sovereign_core::{
        traits::{Projector, Storage, UnitOfWork},
        Dispatcher, KernelServices, ManualClock,
    };
    use sovereign_store::MemoryStore;

    use super::{registry, validator, GovernanceProjector};

    // ── Helpers ───────────────────────────────────────────────────────────────

    struct Node {
        dispatcher: Dispatcher,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn node() -> Node {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        ));
        let services = KernelServices::new(
            Arc::new(KernelConfig::for_node("node-a")),
            store.clone(),
            Arc::new(HashChainAuditor::default()),
            Arc::new(GovernanceProjector::new()),
            clock.clone(),
        );
        let dispatcher = Dispatcher::new(services, registry().unwrap(), Box::new(validator()));
        Node {
            dispatcher,
            store,
            clock,
        }
    }

    impl Node {
        fn run(&self, command_type: &str, payload: serde_json::Value) -> Result<EventId, KernelError> {
            self.clock.advance(Duration::seconds(1));
            self.dispatcher
                .execute(Command::new(command_type, payload).with_initiator("admin"))
        }

        fn create_user(&self, username: &str) -> EventId {
            self.run(
                "CreateUser",
                json!({ "username": username, "email": format!("{}@x.com", username) }),
            )
            .unwrap()
        }

        fn ledger_len(&self) -> usize {
            self.store.len().unwrap()
        }
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    #[test]
    fn test_registry_covers_every_command() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), CommandKind::ALL.len());
        for kind in CommandKind::ALL {
            assert!(registry.resolve(kind.as_str()).is_ok(), "missing handler for {}", kind);
        }
    }

    // ── Scenario A / B ────────────────────────────────────────────────────────

    #[test]
    fn test_create_user_produces_one_event_and_one_row() {
        let node = node();
        let id = node
            .run("CreateUser", json!({ "username": "alice", "email": "a@x.com" }))
            .unwrap();

        let entries = node.store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.event_type, "CreateUserEvent");

        let state = node.dispatcher.services().derived_snapshot().unwrap();
        assert_eq!(state.users.len(), 1);
        let user = &state.users[id.as_str()];
        assert_eq!(user.username, "alice");
        assert_eq!(user.version, 1);
    }

    #[test]
    fn test_negative_payment_is_rejected_without_trace() {
        let node = node();
        let result = node.run("InitiatePayment", json!({ "amount": -5 }));

        match result {
            Err(e @ KernelError::Validation { .. }) => assert_eq!(e.kind(), "ValidationError"),
            other => panic!("expected Validation, got {:?}", other),
        }
        assert_eq!(node.ledger_len(), 0);
        assert!(node.dispatcher.services().derived_snapshot().unwrap().is_empty());
    }

    // ── Referential checks ────────────────────────────────────────────────────

    #[test]
    fn test_payment_for_unknown_user_is_rejected() {
        let node = node();
        let result = node.run(
            "InitiatePayment",
            json!({ "user_id": "nobody", "amount": 100, "currency": "EUR" }),
        );
        assert!(matches!(result, Err(KernelError::Validation { .. })));
        assert_eq!(node.ledger_len(), 0);
    }

    #[test]
    fn test_duplicate_username_is_rejected() {
        let node = node();
        node.create_user("alice");
        let result = node.run("CreateUser", json!({ "username": "alice", "email": "b@x.com" }));
        assert!(matches!(result, Err(KernelError::Validation { .. })));
        assert_eq!(node.ledger_len(), 1);
    }

    #[test]
    fn test_payment_lifecycle_and_causality() {
        let node = node();
        let user = node.create_user("alice");
        let payment = node
            .run(
                "InitiatePayment",
                json!({ "user_id": user.as_str(), "amount": 2500, "currency": "EUR" }),
            )
            .unwrap();
        let settle = node
            .run("SettlePayment", json!({ "payment_id": payment.as_str() }))
            .unwrap();

        let entries = node.store.entries().unwrap();
        assert_eq!(entries[1].event.causality_chain, vec![user.clone()]);
        assert_eq!(entries[2].event.id, settle);
        assert_eq!(entries[2].event.causality_chain, vec![payment.clone()]);

        let state = node.dispatcher.services().derived_snapshot().unwrap();
        let record = &state.payments[payment.as_str()];
        assert_eq!(record.status, PaymentStatus::Settled);
        assert_eq!(record.version, 2);
        assert_eq!(record.user_id, user.as_str());

        // A settled payment cannot be settled again.
        let again = node.run("SettlePayment", json!({ "payment_id": payment.as_str() }));
        assert!(matches!(again, Err(KernelError::Validation { .. })));
        assert_eq!(node.ledger_len(), 3);
    }

    #[test]
    fn test_update_email_bumps_version() {
        let node = node();
        let user = node.create_user("bob");
        node.run("UpdateUserEmail", json!({ "user_id": user.as_str(), "email": "new@x.com" }))
            .unwrap();

        let state = node.dispatcher.services().derived_snapshot().unwrap();
        let record = &state.users[user.as_str()];
        assert_eq!(record.email, "new@x.com");
        assert_eq!(record.version, 2);
        assert_eq!(record.origin_event, user);
    }

    #[test]
    fn test_ledger_entries_accumulate_and_reject_zero() {
        let node = node();
        node.run("PostLedgerEntry", json!({ "account_id": "ops", "amount": 500 }))
            .unwrap();
        node.run(
            "PostLedgerEntry",
            json!({ "account_id": "ops", "amount": -200, "memo": "refund" }),
        )
        .unwrap();

        let zero = node.run("PostLedgerEntry", json!({ "account_id": "ops", "amount": 0 }));
        match zero {
            Err(KernelError::Validation { reason }) => assert!(reason.contains("zero")),
            other => panic!("expected Validation, got {:?}", other),
        }

        let state = node.dispatcher.services().derived_snapshot().unwrap();
        assert_eq!(state.balances["ops"].balance, 300);
        assert_eq!(state.balances["ops"].version, 2);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let node = node();
        let result = node.run(
            "CreateUser",
            json!({ "username": "eve", "email": "e@x.com", "is_admin": true }),
        );
        assert!(matches!(result, Err(KernelError::Validation { .. })));
    }

    // ── Replay ────────────────────────────────────────────────────────────────

    #[test]
    fn test_replay_twice_is_bit_identical() {
        let node = node();
        let user = node.create_user("alice");
        node.create_user("bob");
        let payment = node
            .run(
                "InitiatePayment",
                json!({ "user_id": user.as_str(), "amount": 10, "currency": "USD" }),
            )
            .unwrap();
        node.run("SettlePayment", json!({ "payment_id": payment.as_str() }))
            .unwrap();
        node.run("PostLedgerEntry", json!({ "account_id": "cash", "amount": 10 }))
            .unwrap();

        let services = node.dispatcher.services();
        let live = services.derived_snapshot().unwrap();

        assert_eq!(services.rebuild().unwrap(), 5);
        let first = services.derived_snapshot().unwrap();
        services.rebuild().unwrap();
        let second = services.derived_snapshot().unwrap();

        assert_eq!(first, live);
        assert_eq!(first.digest(), second.digest());
    }

    // ── Projector ─────────────────────────────────────────────────────────────

    fn raw_event(id: &str, kind: &str, payload: serde_json::Value) -> Event {
        let mut event = Event {
            id: EventId::from(id),
            event_type: kind.to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            payload,
            signature: String::new(),
            causality_chain: vec![],
            metadata: Default::default(),
        };
        event.sign("node-b");
        event
    }

    #[test]
    fn test_projector_rejects_dangling_reference() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        let event = raw_event(
            "evt-1",
            "UpdateUserEmailEvent",
            json!({ "user_id": "ghost", "email": "g@x.com" }),
        );

        let result = GovernanceProjector::new().apply(uow.as_mut(), &event);
        match result {
            Err(e @ KernelError::Projection { .. }) => assert_eq!(e.kind(), "ProjectionError"),
            other => panic!("expected Projection, got {:?}", other),
        }
    }

    #[test]
    fn test_projector_rejects_second_create_for_same_id() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        let projector = GovernanceProjector::new();
        let event = raw_event(
            "evt-1",
            "CreateUserEvent",
            json!({ "username": "alice", "email": "a@x.com" }),
        );

        projector.apply(uow.as_mut(), &event).unwrap();
        assert!(matches!(
            projector.apply(uow.as_mut(), &event),
            Err(KernelError::Projection { .. })
        ));
    }

    #[test]
    fn test_projector_rejects_malformed_payload() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        let event = raw_event("evt-1", "InitiatePaymentEvent", json!({ "amount": "lots" }));

        assert!(matches!(
            GovernanceProjector::new().apply(uow.as_mut(), &event),
            Err(KernelError::Projection { .. })
        ));
    }

    #[test]
    fn test_unknown_event_type_is_noop() {
        let store = MemoryStore::new();
        let mut uow = store.begin().unwrap();
        let event = raw_event("evt-1", "LoyaltyPointsGrantedEvent", json!({ "points": 5 }));

        GovernanceProjector::new().apply(uow.as_mut(), &event).unwrap();
        assert!(uow.derived().is_empty());
    }

    #[test]
    fn test_aggregate_keys_name_the_written_record() {
        let node = node();
        let alice = node.create_user("alice");
        let payment = node
            .run("InitiatePayment", json!({ "user_id": alice.to_string(), "amount": 10, "currency": "EUR" }))
            .unwrap();
        let settle = node
            .run("SettlePayment", json!({ "payment_id": payment.to_string() }))
            .unwrap();
        let post = node
            .run("PostLedgerEntry", json!({ "account_id": "acct-9", "amount": 3 }))
            .unwrap();

        let projector = GovernanceProjector::new();
        let uow = node.store.begin().unwrap();
        let key = |id: &EventId| projector.aggregate(&uow.find_entry(id).unwrap().event);

        assert_eq!(key(&alice), Some(format!("user:{}", alice)));
        assert_eq!(key(&payment), Some(format!("payment:{}", payment)));
        assert_eq!(key(&settle), key(&payment));
        assert_eq!(key(&post), Some("balance:acct-9".to_string()));
        assert_eq!(
            projector.aggregate(&raw_event("evt-x", "LoyaltyPointsGrantedEvent", json!({}))),
            None
        );
    }

    // ── Concurrency ───────────────────────────────────────────────────────────

    #[test]
    fn test_open_unit_does_not_hold_up_commands() {
        let node = node();
        let idle = node.store.begin().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let dispatcher = &node.dispatcher;
        thread::scope(|scope| {
            scope.spawn(move || {
                let result = dispatcher.execute(
                    Command::new("CreateUser", json!({ "username": "bob", "email": "b@x.com" }))
                        .with_initiator("admin"),
                );
                done_tx.send(result.is_ok()).unwrap();
            });
            let committed = done_rx
                .recv_timeout(std::time::Duration::from_secs(5))
                .expect("command finished while another unit was open");
            assert!(committed);
        });

        drop(idle);
        assert_eq!(node.ledger_len(), 1);
    }

    #[test]
    fn test_unit_that_loses_a_race_runs_again() {
        let node = node();
        node.create_user("alice");
        let services = node.dispatcher.services();

        let mut attempts = 0;
        let sequence = services
            .transact(|uow| {
                attempts += 1;
                if attempts == 1 {
                    // Commits while this unit is still open.
                    node.create_user("bob");
                }
                let draft = EventDraft::new(
                    EventKind::PostLedgerEntry,
                    json!({ "account_id": "acct-1", "amount": 5 }),
                );
                let event = services.seal(uow, EventId::from("evt-late"), draft, Default::default());
                services.append_and_project(uow, event).map(|entry| entry.sequence)
            })
            .unwrap();

        assert_eq!(attempts, 2);
        assert_eq!(sequence, 3);
        assert_eq!(node.ledger_len(), 3);
        assert!(services.verify_ledger(None).unwrap().valid);
        assert_eq!(node.store.derived_snapshot().unwrap().balances["acct-1"].balance, 5);
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    #[test]
    fn test_query_events_newest_first_with_paging() {
        let node = node();
        node.create_user("a");
        node.create_user("b");
        node.create_user("c");
        node.clock.advance(Duration::seconds(1));
        node.dispatcher
            .execute(
                Command::new("PostLedgerEntry", json!({ "account_id": "x", "amount": 1 }))
                    .with_initiator("someone-else"),
            )
            .unwrap();

        let services = node.dispatcher.services();
        let all = services.query_events(&EventQuery::by_initiator("admin")).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].timestamp > all[1].timestamp);

        let page = services
            .query_events(&EventQuery::by_initiator("admin").page(1, 1))
            .unwrap();
        assert_eq!(page, vec![all[1].clone()]);

        let typed = services
            .query_events(
                &EventQuery::by_initiator("someone-else").of_type(EventKind::PostLedgerEntry.as_str()),
            )
            .unwrap();
        assert_eq!(typed.len(), 1);
    }

    #[test]
    fn test_ledger_verifies_after_commands() {
        let node = node();
        node.create_user("alice");
        node.create_user("bob");
        let verification = node.dispatcher.services().verify_ledger(None).unwrap();
        assert!(verification.valid);
        assert_eq!(verification.checked, 2);
    }

    #[test]
    fn test_truncated_tail_fails_verification() {
        let node = node();
        for name in ["a", "b", "c", "d"] {
            node.create_user(name);
        }
        node.store.tamper_with(|entries| { entries.pop(); }).unwrap();

        let verification = node.dispatcher.services().verify_ledger(None).unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.broken_at, Some(4));

        let earlier = node.dispatcher.services().verify_ledger(Some(1..=3)).unwrap();
        assert!(earlier.valid, "a range short of the head only checks its own entries");
    }
}
