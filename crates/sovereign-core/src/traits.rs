//! Core trait definitions for the Sovereign kernel.
//!
//! These traits are the seams between the kernel and everything it depends on:
//!
//! - `Storage` / `UnitOfWork`: the atomic scope every write happens in
//! - `CommandHandler`: turns one command type into an event draft
//! - `Projector`: the only writer of derived state
//! - `Auditor`: hash-chains ledger entries and verifies them
//! - `PayloadValidator`: structural and semantic payload checks
//! - `CommandGate`: external admission (policy, kill switch, approval)
//! - `ConflictResolver`: picks a winner among colliding events
//!
//! The dispatcher and the replication ingestor only ever talk to these traits,
//! so no concrete storage technology leaks into business logic.

use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};

use sovereign_contracts::{
    command::{Command, CommandKind, EventDraft},
    derived::DerivedState,
    error::KernelResult,
    event::{Event, EventId},
    gate::{GateContext, GateVerdict},
    ledger::{ChainHead, ChainVerification, LedgerEntry},
    replication::Resolution,
    validation::{PayloadSchema, ValidationReport},
};

/// One atomic scope over the ledger and derived state.
///
/// Reads observe everything staged in this unit plus everything committed
/// before it began. Nothing staged is visible to anyone else until
/// `commit()` returns `Ok`. Dropping a unit without committing discards it.
///
/// `commit()` fails with `WriteConflict` when another unit committed after
/// this one began; the caller starts over (see `KernelServices::transact`).
pub trait UnitOfWork {
    fn find_entry(&self, id: &EventId) -> Option<&LedgerEntry>;

    /// The highest-sequence entry, staged or committed.
    fn last_entry(&self) -> Option<&LedgerEntry>;

    /// Every entry in sequence order, staged entries included.
    fn entries(&self) -> Vec<LedgerEntry>;

    /// Stage an entry. Fails if its sequence is not `last + 1` or its event
    /// id already exists.
    fn append_entry(&mut self, entry: LedgerEntry) -> KernelResult<()>;

    fn derived(&self) -> &DerivedState;

    /// Mutable derived state. Only projectors call this.
    fn derived_mut(&mut self) -> &mut DerivedState;

    /// Make every staged change visible at once.
    fn commit(self: Box<Self>) -> KernelResult<()>;
}

/// Durable home of the ledger and derived state.
pub trait Storage: Send + Sync {
    /// Open a unit of work over a snapshot of committed state.
    ///
    /// Never waits for other open units.
    fn begin(&self) -> KernelResult<Box<dyn UnitOfWork + '_>>;

    /// Committed ledger entries in sequence order.
    fn entries(&self) -> KernelResult<Vec<LedgerEntry>>;

    /// The chain head recorded by the last commit, if the store keeps one.
    fn head(&self) -> KernelResult<Option<ChainHead>> {
        Ok(None)
    }

    /// Committed events strictly newer than `since`, ordered by (timestamp, id).
    fn events_since(&self, since: Option<DateTime<Utc>>) -> KernelResult<Vec<Event>>;

    fn derived_snapshot(&self) -> KernelResult<DerivedState>;
}

/// Validates and executes one command type.
pub trait CommandHandler: Send + Sync {
    fn kind(&self) -> CommandKind;

    /// Payload schema checked by the dispatcher before `validate`.
    fn schema(&self) -> PayloadSchema;

    /// Checks beyond the schema. Runs before any unit of work is opened.
    fn validate(&self, command: &Command) -> KernelResult<()>;

    /// Produce the event draft for `command`.
    ///
    /// Runs inside the unit of work and may read derived state through it,
    /// but never writes it.
    fn handle(&self, command: &Command, uow: &dyn UnitOfWork) -> KernelResult<EventDraft>;
}

/// Maps (derived state, event) to new derived state.
///
/// Implementations must be deterministic: replaying the same history from
/// empty state always yields the same snapshot. Unknown event types are
/// a no-op.
pub trait Projector: Send + Sync {
    fn apply(&self, uow: &mut dyn UnitOfWork, event: &Event) -> KernelResult<()>;

    /// Key of the aggregate `event` writes, e.g. `payment:<id>`.
    ///
    /// Replication uses it to find local writes competing with a remote
    /// event that cannot be projected. `None` when the event writes no
    /// aggregate this projector knows.
    fn aggregate(&self, _event: &Event) -> Option<String> {
        None
    }
}

/// Tamper-evidence over the ledger.
pub trait Auditor: Send + Sync {
    /// Link `event` to the current chain head and stage it in `uow`.
    ///
    /// Returns the stored entry with `previous_hash` and `hash` populated.
    fn append(&self, uow: &mut dyn UnitOfWork, event: Event) -> KernelResult<LedgerEntry>;

    /// Walk `entries` in order and report the first broken sequence within
    /// `range` (every entry when `None`).
    fn verify(&self, entries: &[LedgerEntry], range: Option<RangeInclusive<u64>>)
        -> ChainVerification;

    /// The first sequence at which `entries` stop agreeing with `head`, or
    /// `None` when they still end exactly there.
    fn verify_head(&self, entries: &[LedgerEntry], head: &ChainHead) -> Option<u64>;
}

/// Structural and semantic payload validation.
pub trait PayloadValidator: Send + Sync {
    fn validate(
        &self,
        payload: &serde_json::Value,
        schema: &PayloadSchema,
    ) -> KernelResult<ValidationReport>;
}

/// External admission control in front of the dispatcher.
pub trait CommandGate: Send + Sync {
    fn admit(&self, ctx: &GateContext) -> KernelResult<GateVerdict>;
}

/// Picks a winner among events that claim the same identity.
pub trait ConflictResolver: Send + Sync {
    /// Name recorded in every resolution this resolver produces.
    fn policy(&self) -> &'static str;

    /// Choose one of `conflicting` and mark the rest superseded.
    ///
    /// Candidates either share one identifier or are competing writes to one
    /// aggregate.
    ///
    /// An `Err` leaves the conflict unresolved; callers retry later.
    fn resolve(&self, conflicting: &[Event]) -> KernelResult<Resolution>;
}
