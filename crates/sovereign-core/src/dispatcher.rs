//! The command dispatcher: validate, then execute inside one unit of work.
//!
//! Pipeline for every command:
//!
//!   Gate → Lookup → Validate → [begin] Handle → Seal → Audit-append → Project [commit]
//!
//! Everything before `begin` is side-effect free. Everything after it is
//! staged in a single unit of work that is either committed whole or dropped
//! whole, so a command either appends exactly one event together with its
//! derived-state change, or leaves no trace at all. Units run against a
//! snapshot, so a command only waits on its own work.

use tracing::{debug, info, warn};

use sovereign_contracts::{
    command::{Command, CommandReceipt},
    error::{KernelError, KernelResult},
    event::EventId,
    gate::{GateContext, GateVerdict},
};

use crate::{
    clock::{EventIdSource, RandomEventIds},
    registry::HandlerRegistry,
    services::KernelServices,
    traits::{CommandGate, PayloadValidator},
};

pub struct Dispatcher {
    services: KernelServices,
    registry: HandlerRegistry,
    validator: Box<dyn PayloadValidator>,
    gate: Option<Box<dyn CommandGate>>,
    ids: Box<dyn EventIdSource>,
}

impl Dispatcher {
    pub fn new(
        services: KernelServices,
        registry: HandlerRegistry,
        validator: Box<dyn PayloadValidator>,
    ) -> Self {
        Self {
            services,
            registry,
            validator,
            gate: None,
            ids: Box::new(RandomEventIds),
        }
    }

    /// Put an admission gate in front of every command.
    pub fn with_gate(mut self, gate: Box<dyn CommandGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Replace the event identifier source.
    pub fn with_id_source(mut self, ids: Box<dyn EventIdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn services(&self) -> &KernelServices {
        &self.services
    }

    /// Execute `command` and return the identifier of the event it produced.
    ///
    /// # Errors
    ///
    /// - `Rejected` / `ApprovalRequired` when the gate refuses the command
    /// - `UnknownCommand` when no handler is registered for the type
    /// - `Validation` when the payload fails its schema or handler checks
    /// - `Projection` when derived state cannot absorb the event
    /// - `Storage` when the unit of work cannot be opened or committed
    /// - `WriteConflict` when every commit attempt lost to a concurrent one
    ///
    /// In every error case nothing is written.
    pub fn execute(&self, command: Command) -> KernelResult<EventId> {
        let command_type = command.command_type.clone();
        match self.run(command) {
            Ok(event_id) => Ok(event_id),
            Err(e) => {
                warn!(
                    node_id = %self.services.node_id(),
                    command_type = %command_type,
                    kind = e.kind(),
                    error = %e,
                    "command failed, no state changed"
                );
                Err(e)
            }
        }
    }

    /// `execute`, wrapped in the response shape external callers receive.
    pub fn submit(&self, command: Command) -> KernelResult<CommandReceipt> {
        self.execute(command).map(CommandReceipt::accepted)
    }

    fn run(&self, command: Command) -> KernelResult<EventId> {
        debug!(
            node_id = %self.services.node_id(),
            command_type = %command.command_type,
            initiator = ?command.initiator(),
            "dispatching command"
        );

        // ── Admission ────────────────────────────────────────────────────────
        if let Some(gate) = &self.gate {
            let ctx = GateContext {
                node_id: self.services.node_id().to_string(),
                command_type: command.command_type.clone(),
                initiator: command.initiator().map(str::to_string),
                metadata: command.metadata.clone(),
            };
            match gate.admit(&ctx)? {
                GateVerdict::Allow => {}
                GateVerdict::Deny { reason } => return Err(KernelError::Rejected { reason }),
                GateVerdict::RequireApproval {
                    reason,
                    approver_role,
                } => {
                    return Err(KernelError::ApprovalRequired {
                        reason,
                        approver_role,
                    })
                }
            }
        }

        // ── Lookup ───────────────────────────────────────────────────────────
        let handler = self.registry.resolve(&command.command_type)?;

        // ── Validation, before anything is opened ────────────────────────────
        let report = self.validator.validate(&command.payload, &handler.schema())?;
        if !report.passed {
            return Err(KernelError::Validation {
                reason: report.summary(),
            });
        }
        handler.validate(&command)?;

        // ── Unit of work ─────────────────────────────────────────────────────
        //
        // Any `?` below drops the unit uncommitted, which discards every
        // staged write. A lost commit race runs handle/seal/append again with
        // the same event id.
        let event_id = self.ids.next_id();
        let entry = self.services.transact(|uow| {
            let draft = handler.handle(&command, uow)?;
            let event = self
                .services
                .seal(uow, event_id.clone(), draft, command.metadata.clone());
            self.services.append_and_project(uow, event)
        })?;

        info!(
            node_id = %self.services.node_id(),
            event_id = %entry.event.id,
            event_type = %entry.event.event_type,
            sequence = entry.sequence,
            "command committed"
        );
        Ok(entry.event.id)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::ops::RangeInclusive;
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    use sovereign_contracts::{
        command::{Command, CommandKind, EventDraft},
        config::KernelConfig,
        derived::DerivedState,
        error::{KernelError, KernelResult},
        event::{Event, EventId, EventKind},
        gate::{GateContext, GateVerdict},
        ledger::{ChainHead, ChainVerification, LedgerEntry, GENESIS_HASH},
        validation::{PayloadSchema, ValidationFailure, ValidationReport},
    };

    use crate::{
        clock::{ManualClock, ScriptedEventIds},
        registry::HandlerRegistry,
        services::KernelServices,
        traits::{
            Auditor, CommandGate, CommandHandler, PayloadValidator, Projector, Storage,
            UnitOfWork,
        },
    };

    use super::Dispatcher;

    // ── Mock storage ─────────────────────────────────────────────────────────

    #[derive(Default, Clone)]
    struct Tables {
        entries: Vec<LedgerEntry>,
        derived: DerivedState,
    }

    #[derive(Default)]
    struct MockStorage {
        tables: Mutex<Tables>,
        /// Commits still to refuse as if another unit had won the race.
        lost_races: Mutex<u32>,
    }

    struct MockUnit<'a> {
        storage: &'a MockStorage,
        staged: Tables,
    }

    impl UnitOfWork for MockUnit<'_> {
        fn find_entry(&self, id: &EventId) -> Option<&LedgerEntry> {
            self.staged.entries.iter().find(|e| &e.event.id == id)
        }

        fn last_entry(&self) -> Option<&LedgerEntry> {
            self.staged.entries.last()
        }

        fn entries(&self) -> Vec<LedgerEntry> {
            self.staged.entries.clone()
        }

        fn append_entry(&mut self, entry: LedgerEntry) -> KernelResult<()> {
            if self.find_entry(&entry.event.id).is_some() {
                return Err(KernelError::storage("duplicate event id"));
            }
            self.staged.entries.push(entry);
            Ok(())
        }

        fn derived(&self) -> &DerivedState {
            &self.staged.derived
        }

        fn derived_mut(&mut self) -> &mut DerivedState {
            &mut self.staged.derived
        }

        fn commit(self: Box<Self>) -> KernelResult<()> {
            let MockUnit { storage, staged } = *self;
            let mut lost_races = storage.lost_races.lock().unwrap();
            if *lost_races > 0 {
                *lost_races -= 1;
                return Err(KernelError::WriteConflict { reason: "ledger head moved".to_string() });
            }
            *storage.tables.lock().unwrap() = staged;
            Ok(())
        }
    }

    impl Storage for MockStorage {
        fn begin(&self) -> KernelResult<Box<dyn UnitOfWork + '_>> {
            let staged = self.tables.lock().unwrap().clone();
            Ok(Box::new(MockUnit { storage: self, staged }))
        }

        fn entries(&self) -> KernelResult<Vec<LedgerEntry>> {
            Ok(self.tables.lock().unwrap().entries.clone())
        }

        fn events_since(&self, since: Option<DateTime<Utc>>) -> KernelResult<Vec<Event>> {
            Ok(self
                .entries()?
                .into_iter()
                .map(|e| e.event)
                .filter(|e| since.map_or(true, |s| e.timestamp > s))
                .collect())
        }

        fn derived_snapshot(&self) -> KernelResult<DerivedState> {
            Ok(self.tables.lock().unwrap().derived.clone())
        }
    }

    // ── Mock collaborators ───────────────────────────────────────────────────

    /// Appends without hashing; only sequence numbering matters here.
    struct MockAuditor;

    impl Auditor for MockAuditor {
        fn append(&self, uow: &mut dyn UnitOfWork, event: Event) -> KernelResult<LedgerEntry> {
            let sequence = uow.last_entry().map_or(1, |e| e.sequence + 1);
            let entry = LedgerEntry {
                sequence,
                event,
                previous_hash: GENESIS_HASH.to_string(),
                hash: format!("hash-{}", sequence),
            };
            uow.append_entry(entry.clone())?;
            Ok(entry)
        }

        fn verify(&self, entries: &[LedgerEntry], _range: Option<RangeInclusive<u64>>) -> ChainVerification {
            ChainVerification::intact(entries.len() as u64)
        }

        fn verify_head(&self, _entries: &[LedgerEntry], _head: &ChainHead) -> Option<u64> {
            None
        }
    }

    /// Counts users; fails on any payload carrying `"explode": true`.
    struct MockProjector;

    impl Projector for MockProjector {
        fn apply(&self, uow: &mut dyn UnitOfWork, event: &Event) -> KernelResult<()> {
            if event.payload.get("explode").is_some() {
                return Err(KernelError::projection(&event.id, "projector refused event"));
            }
            let name = event.payload["username"].as_str().unwrap_or("anon").to_string();
            uow.derived_mut().users.insert(
                name.clone(),
                sovereign_contracts::derived::UserRecord {
                    user_id: name.clone(),
                    username: name,
                    email: String::new(),
                    version: 1,
                    origin_event: event.id.clone(),
                    last_event: event.id.clone(),
                    updated_at: event.timestamp,
                },
            );
            Ok(())
        }
    }

    struct MockValidator {
        pass: bool,
    }

    impl PayloadValidator for MockValidator {
        fn validate(&self, _payload: &serde_json::Value, _schema: &PayloadSchema) -> KernelResult<ValidationReport> {
            if self.pass {
                Ok(ValidationReport::pass())
            } else {
                Ok(ValidationReport {
                    passed: false,
                    failures: vec![ValidationFailure {
                        rule_id: "json-schema".to_string(),
                        message: "field 'email' is missing".to_string(),
                    }],
                })
            }
        }
    }

    struct MockHandler {
        handled: Arc<Mutex<u32>>,
    }

    impl CommandHandler for MockHandler {
        fn kind(&self) -> CommandKind {
            CommandKind::CreateUser
        }

        fn schema(&self) -> PayloadSchema {
            PayloadSchema {
                schema_id: "mock-v1".to_string(),
                json_schema: serde_json::Value::Null,
                rules: vec![],
            }
        }

        fn validate(&self, command: &Command) -> KernelResult<()> {
            if command.payload.get("username").is_none() {
                return Err(KernelError::Validation { reason: "username is required".to_string() });
            }
            Ok(())
        }

        fn handle(&self, command: &Command, _uow: &dyn UnitOfWork) -> KernelResult<EventDraft> {
            *self.handled.lock().unwrap() += 1;
            Ok(EventDraft::new(EventKind::CreateUser, command.payload.clone()))
        }
    }

    struct MockGate {
        verdict: GateVerdict,
    }

    impl CommandGate for MockGate {
        fn admit(&self, _ctx: &GateContext) -> KernelResult<GateVerdict> {
            Ok(self.verdict.clone())
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    struct Harness {
        dispatcher: Dispatcher,
        storage: Arc<MockStorage>,
        handled: Arc<Mutex<u32>>,
    }

    fn harness(validator_passes: bool) -> Harness {
        let storage = Arc::new(MockStorage::default());
        let services = KernelServices::new(
            Arc::new(KernelConfig::for_node("node-a")),
            storage.clone(),
            Arc::new(MockAuditor),
            Arc::new(MockProjector),
            Arc::new(ManualClock::starting_at(Utc.timestamp_opt(1_000, 0).unwrap())),
        );
        let handled = Arc::new(Mutex::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(Box::new(MockHandler { handled: handled.clone() })).unwrap();
        let dispatcher = Dispatcher::new(
            services,
            registry,
            Box::new(MockValidator { pass: validator_passes }),
        );
        Harness { dispatcher, storage, handled }
    }

    fn create_user(name: &str) -> Command {
        Command::new("CreateUser", json!({ "username": name })).with_initiator("admin")
    }

    fn ledger_len(storage: &MockStorage) -> usize {
        storage.entries().unwrap().len()
    }

    // ── Test cases ───────────────────────────────────────────────────────────

    #[test]
    fn test_successful_command_appends_and_projects() {
        let h = harness(true);
        let event_id = h.dispatcher.execute(create_user("alice")).unwrap();

        let entries = h.storage.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.id, event_id);
        assert_eq!(entries[0].event.event_type, "CreateUserEvent");
        assert!(entries[0].event.verify_signature());
        assert_eq!(entries[0].event.origin(), Some("node-a"));
        assert!(h.storage.derived_snapshot().unwrap().users.contains_key("alice"));
    }

    #[test]
    fn test_unknown_command_has_no_side_effects() {
        let h = harness(true);
        let result = h.dispatcher.execute(Command::new("Teleport", json!({})));

        match result {
            Err(KernelError::UnknownCommand { command_type }) => assert_eq!(command_type, "Teleport"),
            other => panic!("expected UnknownCommand, got {:?}", other),
        }
        assert_eq!(ledger_len(&h.storage), 0);
    }

    #[test]
    fn test_known_but_unregistered_command_is_unknown() {
        let h = harness(true);
        let result = h.dispatcher.execute(Command::new("SettlePayment", json!({})));
        assert!(matches!(result, Err(KernelError::UnknownCommand { .. })));
    }

    #[test]
    fn test_schema_failure_never_reaches_handler() {
        let h = harness(false);
        let result = h.dispatcher.execute(create_user("alice"));

        match result {
            Err(KernelError::Validation { reason }) => assert!(reason.contains("email")),
            other => panic!("expected Validation, got {:?}", other),
        }
        assert_eq!(*h.handled.lock().unwrap(), 0, "handle() must not run after a failed validation");
        assert_eq!(ledger_len(&h.storage), 0);
    }

    #[test]
    fn test_handler_validation_failure_has_no_side_effects() {
        let h = harness(true);
        let result = h.dispatcher.execute(Command::new("CreateUser", json!({})));

        assert!(matches!(result, Err(KernelError::Validation { .. })));
        assert_eq!(*h.handled.lock().unwrap(), 0);
        assert_eq!(ledger_len(&h.storage), 0);
    }

    #[test]
    fn test_projection_failure_rolls_back_event() {
        let h = harness(true);
        h.dispatcher.execute(create_user("alice")).unwrap();

        let bad = Command::new("CreateUser", json!({ "username": "bob", "explode": true }));
        let result = h.dispatcher.execute(bad);

        assert!(matches!(result, Err(KernelError::Projection { .. })));
        assert_eq!(ledger_len(&h.storage), 1, "the failed event must not be persisted");
        let snapshot = h.storage.derived_snapshot().unwrap();
        assert!(!snapshot.users.contains_key("bob"));
        assert!(snapshot.users.contains_key("alice"));
    }

    #[test]
    fn test_gate_deny_blocks_before_lookup() {
        let h = harness(true);
        let dispatcher = h.dispatcher.with_gate(Box::new(MockGate {
            verdict: GateVerdict::Deny { reason: "kill switch engaged".to_string() },
        }));

        match dispatcher.execute(create_user("alice")) {
            Err(KernelError::Rejected { reason }) => assert!(reason.contains("kill switch")),
            other => panic!("expected Rejected, got {:?}", other),
        }
        assert_eq!(*h.handled.lock().unwrap(), 0);
        assert_eq!(ledger_len(&h.storage), 0);
    }

    #[test]
    fn test_gate_require_approval_surfaces_role() {
        let h = harness(true);
        let dispatcher = h.dispatcher.with_gate(Box::new(MockGate {
            verdict: GateVerdict::RequireApproval {
                reason: "payments above threshold".to_string(),
                approver_role: "treasurer".to_string(),
            },
        }));

        match dispatcher.execute(create_user("alice")) {
            Err(KernelError::ApprovalRequired { approver_role, .. }) => assert_eq!(approver_role, "treasurer"),
            other => panic!("expected ApprovalRequired, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_event_id_is_rolled_back() {
        let h = harness(true);
        let dispatcher = h
            .dispatcher
            .with_id_source(Box::new(ScriptedEventIds::new(["evt-1", "evt-1"])));

        dispatcher.execute(create_user("alice")).unwrap();
        let result = dispatcher.execute(create_user("bob"));

        assert!(matches!(result, Err(KernelError::Storage { .. })));
        assert_eq!(ledger_len(&h.storage), 1);
        assert!(!h.storage.derived_snapshot().unwrap().users.contains_key("bob"));
    }

    #[test]
    fn test_lost_commit_race_runs_command_again() {
        let h = harness(true);
        *h.storage.lost_races.lock().unwrap() = 2;

        let event_id = h.dispatcher.execute(create_user("alice")).unwrap();

        assert_eq!(*h.handled.lock().unwrap(), 3, "handle() runs once per attempt");
        let entries = h.storage.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.id, event_id, "every attempt seals the same id");
    }

    #[test]
    fn test_commit_races_give_up_eventually() {
        let h = harness(true);
        *h.storage.lost_races.lock().unwrap() = u32::MAX;

        let result = h.dispatcher.execute(create_user("alice"));

        assert!(matches!(result, Err(KernelError::WriteConflict { .. })));
        assert_eq!(*h.handled.lock().unwrap(), crate::services::COMMIT_ATTEMPTS);
        assert_eq!(ledger_len(&h.storage), 0);
    }

    #[test]
    fn test_timestamps_strictly_increase_with_frozen_clock() {
        let h = harness(true);
        h.dispatcher.execute(create_user("a")).unwrap();
        h.dispatcher.execute(create_user("b")).unwrap();
        h.dispatcher.execute(create_user("c")).unwrap();

        let entries = h.storage.entries().unwrap();
        for pair in entries.windows(2) {
            assert!(pair[0].event.timestamp < pair[1].event.timestamp);
        }
    }

    #[test]
    fn test_submit_reports_accepted() {
        let h = harness(true);
        let receipt = h.dispatcher.submit(create_user("alice")).unwrap();
        assert_eq!(receipt.status, "accepted");
        assert_eq!(h.storage.entries().unwrap()[0].event.id, receipt.event_id);
    }
}
