//! The shared components one kernel instance runs on.
//!
//! `KernelServices` bundles storage, auditor, projector, clock, and config.
//! The dispatcher and the replication ingestor both hold a clone, so command
//! execution and ingestion follow the same atomic-commit discipline. The
//! administrative operations (rebuild, verify, query) live here too.
//!
//! Units of work run against a snapshot and only meet at commit. A unit that
//! loses the race to another commit is run again from scratch by `transact`.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use sovereign_contracts::{
    command::{EventDraft, INITIATOR_KEY},
    config::KernelConfig,
    derived::DerivedState,
    error::{KernelError, KernelResult},
    event::{Event, EventId},
    ledger::{ChainVerification, EventQuery, LedgerEntry},
};

use crate::{
    clock::Clock,
    replay,
    traits::{Auditor, Projector, Storage, UnitOfWork},
};

/// How many times `transact` runs a unit of work before giving up.
pub const COMMIT_ATTEMPTS: u32 = 16;

#[derive(Clone)]
pub struct KernelServices {
    pub config: Arc<KernelConfig>,
    pub storage: Arc<dyn Storage>,
    pub auditor: Arc<dyn Auditor>,
    pub projector: Arc<dyn Projector>,
    pub clock: Arc<dyn Clock>,
}

impl KernelServices {
    pub fn new(
        config: Arc<KernelConfig>,
        storage: Arc<dyn Storage>,
        auditor: Arc<dyn Auditor>,
        projector: Arc<dyn Projector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            storage,
            auditor,
            projector,
            clock,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// The timestamp for the next local event.
    ///
    /// Never at or before the newest entry in `uow`, so events from this node
    /// are strictly ordered even if the wall clock stalls or steps back.
    pub fn next_timestamp(&self, uow: &dyn UnitOfWork) -> DateTime<Utc> {
        let now = self.clock.now();
        match uow.last_entry() {
            Some(last) if now <= last.event.timestamp => {
                last.event.timestamp + Duration::microseconds(1)
            }
            _ => now,
        }
    }

    /// Turn a handler's draft into a signed event.
    ///
    /// The timestamp also lands after every event in the draft's causality
    /// chain, so replay in (timestamp, id) order never applies an event
    /// before its dependencies.
    pub fn seal(
        &self,
        uow: &dyn UnitOfWork,
        id: EventId,
        draft: EventDraft,
        metadata: BTreeMap<String, String>,
    ) -> Event {
        let mut timestamp = self.next_timestamp(uow);
        let newest_dependency = draft
            .causality_chain
            .iter()
            .filter_map(|dep| uow.find_entry(dep))
            .map(|entry| entry.event.timestamp)
            .max();
        if let Some(dep) = newest_dependency {
            if timestamp <= dep {
                timestamp = dep + Duration::microseconds(1);
            }
        }

        let mut event = Event {
            id,
            event_type: draft.kind.as_str().to_string(),
            timestamp,
            payload: draft.payload,
            signature: String::new(),
            causality_chain: draft.causality_chain,
            metadata,
        };
        event.sign(self.node_id());
        event
    }

    /// Run `work` in a fresh unit of work and commit it.
    ///
    /// When another unit commits first, the staged writes are dropped and
    /// `work` runs again against the new committed state, up to
    /// `COMMIT_ATTEMPTS` times. Any error from `work` discards the unit.
    pub fn transact<T, F>(&self, mut work: F) -> KernelResult<T>
    where
        F: FnMut(&mut dyn UnitOfWork) -> KernelResult<T>,
    {
        let mut attempt = 1;
        loop {
            let mut uow = self.storage.begin()?;
            let value = work(uow.as_mut())?;
            match uow.commit() {
                Ok(()) => return Ok(value),
                Err(KernelError::WriteConflict { reason }) if attempt < COMMIT_ATTEMPTS => {
                    debug!(node_id = %self.node_id(), attempt, %reason, "unit of work lost a commit race; running it again");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Hash-chain and project `event` inside `uow`.
    pub fn append_and_project(
        &self,
        uow: &mut dyn UnitOfWork,
        event: Event,
    ) -> KernelResult<LedgerEntry> {
        let entry = self.auditor.append(uow, event)?;
        self.projector.apply(uow, &entry.event)?;
        Ok(entry)
    }

    /// Clear derived state and replay the whole ledger, atomically.
    pub fn rebuild(&self) -> KernelResult<usize> {
        let applied = self.transact(|uow| replay::rebuild(uow, self.projector.as_ref()))?;
        info!(node_id = %self.node_id(), events = applied, "derived state rebuilt");
        Ok(applied)
    }

    /// Verify the hash chain over `range` (the whole ledger when `None`).
    ///
    /// When the range reaches the recorded chain head, the stored entries
    /// must also still end at that head, so entries cut from the tail are
    /// reported at the first missing sequence.
    pub fn verify_ledger(
        &self,
        range: Option<RangeInclusive<u64>>,
    ) -> KernelResult<ChainVerification> {
        // Head first: entries committed in between only extend past it.
        let head = self
            .storage
            .head()?
            .filter(|head| range.as_ref().map_or(true, |r| *r.end() >= head.sequence));
        let entries = self.storage.entries()?;

        let mut verification = self.auditor.verify(&entries, range.clone());
        if let Some(sequence) = head.and_then(|head| self.auditor.verify_head(&entries, &head)) {
            verification = verification.with_break(sequence);
        }
        if let Some(sequence) = verification.broken_at {
            warn!(
                node_id = %self.node_id(),
                sequence,
                "ledger hash chain broken"
            );
        }
        Ok(verification)
    }

    /// Events initiated by `query.initiator`, newest first.
    pub fn query_events(&self, query: &EventQuery) -> KernelResult<Vec<Event>> {
        let mut events: Vec<Event> = self
            .storage
            .entries()?
            .into_iter()
            .map(|entry| entry.event)
            .filter(|event| {
                event.metadata.get(INITIATOR_KEY).map(String::as_str)
                    == Some(query.initiator.as_str())
            })
            .filter(|event| match &query.event_type {
                Some(event_type) => &event.event_type == event_type,
                None => true,
            })
            .collect();
        events.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
        Ok(events
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    /// Committed events strictly newer than `since`.
    pub fn events_since(&self, since: Option<DateTime<Utc>>) -> KernelResult<Vec<Event>> {
        self.storage.events_since(since)
    }

    pub fn derived_snapshot(&self) -> KernelResult<DerivedState> {
        self.storage.derived_snapshot()
    }
}
