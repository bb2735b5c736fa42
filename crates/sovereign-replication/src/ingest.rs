//! Ingestion of events received from peers.
//!
//! A batch is ingested in one unit of work with the same commit-or-discard
//! discipline as command execution, and derived state is replayed at most
//! once per pass. If any event in the pass fails, the pass is dropped and
//! each event is retried in a unit of its own. An event is either:
//!
//! - appended and projected (new identity, dependencies present),
//! - skipped as a duplicate (same identity, same type and payload),
//! - handed to the conflict resolver (same identity with a different type or
//!   payload, an unknown identity whose signature does not match, or a
//!   signed write that derived state cannot absorb because a local write to
//!   the same aggregate got there first), or
//! - held until the events in its causality chain arrive.
//!
//! Held events, and events whose ingestion failed, are kept per source peer
//! and retried on the next batch from that peer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use sovereign_contracts::{
    command::EventDraft,
    error::{KernelError, KernelResult},
    event::{Event, EventId, EventKind},
    replication::Resolution,
};
use sovereign_core::{
    replay,
    services::KernelServices,
    traits::{ConflictResolver, UnitOfWork},
};

/// Metadata key naming the policy that produced a resolution event.
pub const POLICY_KEY: &str = "resolution_policy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Appended,
    Duplicate,
    /// A new resolution event was recorded.
    Resolved { resolution: EventId },
    /// The same verdict had already been recorded.
    AlreadyResolved { resolution: EventId },
    MissingDependencies { missing: Vec<EventId> },
}

/// Summary of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub received: usize,
    pub appended: Vec<EventId>,
    pub duplicates: usize,
    /// Resolution events recorded by this batch.
    pub resolutions: Vec<EventId>,
    pub already_resolved: usize,
    /// Events still waiting on causal dependencies.
    pub held: usize,
    /// Events whose ingestion failed; kept for the next batch.
    pub failed: Vec<(EventId, String)>,
}

impl IngestReport {
    fn record(&mut self, id: EventId, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Appended => self.appended.push(id),
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::Resolved { resolution } => self.resolutions.push(resolution),
            IngestOutcome::AlreadyResolved { .. } => self.already_resolved += 1,
            IngestOutcome::MissingDependencies { .. } => self.held += 1,
        }
    }

    /// Number of conflicts settled during the batch.
    pub fn conflicts_resolved(&self) -> usize {
        self.resolutions.len()
    }
}

/// Bookkeeping for the events ingested in one unit of work.
struct Pass {
    /// Derived state is stale and gets rebuilt before commit.
    replay: bool,
    /// Greatest (timestamp, id) in the unit so far.
    newest: Option<(DateTime<Utc>, EventId)>,
}

impl Pass {
    fn open(uow: &dyn UnitOfWork) -> Self {
        let newest = uow
            .entries()
            .into_iter()
            .map(|entry| (entry.event.timestamp, entry.event.id))
            .max();
        Self {
            replay: false,
            newest,
        }
    }

    /// Note `event` as part of the unit. True if something already in the
    /// unit sorts after it, so projecting it now would apply it out of order.
    fn arrives_late(&mut self, event: &Event) -> bool {
        let key = (event.timestamp, event.id.clone());
        if matches!(&self.newest, Some(newest) if *newest > key) {
            return true;
        }
        self.newest = Some(key);
        false
    }

    /// Rebuild derived state if anything in the unit was appended unprojected.
    fn finish(self, uow: &mut dyn UnitOfWork, services: &KernelServices) -> KernelResult<()> {
        if self.replay {
            replay::rebuild(uow, services.projector.as_ref())?;
        }
        Ok(())
    }
}

pub struct Ingestor {
    services: KernelServices,
    resolver: Arc<dyn ConflictResolver>,
    /// Source peer → events waiting for a retry.
    held: Mutex<HashMap<String, Vec<Event>>>,
}

impl Ingestor {
    pub fn new(services: KernelServices, resolver: Arc<dyn ConflictResolver>) -> Self {
        Self {
            services,
            resolver,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &KernelServices {
        &self.services
    }

    pub fn policy(&self) -> &'static str {
        self.resolver.policy()
    }

    fn lock_held(&self) -> KernelResult<MutexGuard<'_, HashMap<String, Vec<Event>>>> {
        self.held
            .lock()
            .map_err(|e| KernelError::storage(format!("held-event buffer poisoned: {}", e)))
    }

    /// Number of events from `source` waiting for a retry.
    pub fn held_count(&self, source: &str) -> KernelResult<usize> {
        Ok(self.lock_held()?.get(source).map_or(0, Vec::len))
    }

    /// Timestamp of the earliest event from `source` waiting for a retry.
    pub fn earliest_held(&self, source: &str) -> KernelResult<Option<DateTime<Utc>>> {
        Ok(self
            .lock_held()?
            .get(source)
            .and_then(|events| events.iter().map(|e| e.timestamp).min()))
    }

    /// Ingest `events` received from `source`, together with anything still
    /// held from earlier batches.
    ///
    /// Copies of one event are ingested once. Events are tried in
    /// (timestamp, id) order, and held events are retried after every pass
    /// that appended something, so a dependency that arrives later in the
    /// same batch still unblocks its dependents.
    pub fn ingest_batch(&self, source: &str, events: Vec<Event>) -> KernelResult<IngestReport> {
        let mut report = IngestReport {
            received: events.len(),
            ..IngestReport::default()
        };

        let mut queue = self.lock_held()?.remove(source).unwrap_or_default();
        queue.extend(events);
        let mut queue = distinct(queue);

        let mut failed: Vec<Event> = Vec::new();
        loop {
            let results = self.ingest_pass(source, &queue);
            let mut progressed = false;
            let mut waiting = Vec::new();

            for (event, result) in queue.drain(..).zip(results) {
                let id = event.id.clone();
                match result {
                    Ok(IngestOutcome::MissingDependencies { missing }) => {
                        debug!(event_id = %id, peer = %source, ?missing, "holding event until its dependencies arrive");
                        waiting.push(event);
                    }
                    Ok(outcome) => {
                        progressed |= matches!(
                            outcome,
                            IngestOutcome::Appended | IngestOutcome::Resolved { .. }
                        );
                        report.record(id, outcome);
                    }
                    Err(e) => {
                        warn!(event_id = %id, peer = %source, kind = e.kind(), error = %e, "ingestion failed; will retry");
                        report.failed.push((id, e.to_string()));
                        failed.push(event);
                    }
                }
            }

            queue = waiting;
            if !progressed || queue.is_empty() {
                break;
            }
        }

        report.held = queue.len();
        queue.extend(failed);
        if !queue.is_empty() {
            let mut held = self.lock_held()?;
            let slot = held.entry(source.to_string()).or_default();
            slot.extend(queue);
            *slot = distinct(std::mem::take(slot));
        }
        Ok(report)
    }

    /// One outcome per event in `queue`, in order.
    ///
    /// The pass first runs in a single unit of work. If any event fails
    /// there, nothing from that attempt is kept and every event gets a unit
    /// of its own, so one bad event cannot hold back the rest.
    fn ingest_pass(&self, source: &str, queue: &[Event]) -> Vec<KernelResult<IngestOutcome>> {
        if queue.len() > 1 {
            match self.ingest_together(queue) {
                Ok(outcomes) => return outcomes.into_iter().map(Ok).collect(),
                Err(e) => debug!(
                    peer = %source,
                    events = queue.len(),
                    kind = e.kind(),
                    error = %e,
                    "batch ingestion failed; retrying event by event"
                ),
            }
        }
        queue.iter().map(|event| self.ingest(event.clone())).collect()
    }

    fn ingest_together(&self, queue: &[Event]) -> KernelResult<Vec<IngestOutcome>> {
        self.services.transact(|uow| {
            let mut pass = Pass::open(uow);
            let outcomes = queue
                .iter()
                .map(|event| self.ingest_in(uow, &mut pass, event.clone()))
                .collect::<KernelResult<Vec<_>>>()?;
            pass.finish(uow, &self.services)?;
            Ok(outcomes)
        })
    }

    /// Ingest one event in its own unit of work.
    ///
    /// A signed event that derived state rejects is checked for competing
    /// local writes to the same aggregate; if there are any, the contest goes
    /// to the resolver. Otherwise the projection error is returned.
    pub fn ingest(&self, event: Event) -> KernelResult<IngestOutcome> {
        let attempt = self.services.transact(|uow| {
            let mut pass = Pass::open(uow);
            let outcome = self.ingest_in(uow, &mut pass, event.clone())?;
            pass.finish(uow, &self.services)?;
            Ok(outcome)
        });

        match attempt {
            Err(e @ KernelError::Projection { .. }) => {
                let contest = self
                    .services
                    .transact(|uow| self.resolve_competing(uow, event.clone()))?;
                contest.ok_or(e)
            }
            other => other,
        }
    }

    fn ingest_in(
        &self,
        uow: &mut dyn UnitOfWork,
        pass: &mut Pass,
        remote: Event,
    ) -> KernelResult<IngestOutcome> {
        let signed = remote.verify_signature();
        if !signed {
            warn!(
                event_id = %remote.id,
                signature = %remote.signature,
                "signature does not match event content"
            );
        }

        let local = uow.find_entry(&remote.id).map(|entry| entry.event.clone());
        match local {
            Some(local) if !local.conflicts_with(&remote) => return Ok(IngestOutcome::Duplicate),
            Some(_) => return self.resolve(uow, pass, remote),
            None if !signed => return self.resolve(uow, pass, remote),
            None => {}
        }

        let missing: Vec<EventId> = remote
            .causality_chain
            .iter()
            .filter(|dep| uow.find_entry(dep).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Ok(IngestOutcome::MissingDependencies { missing });
        }

        // Projecting out of (timestamp, id) order would make derived state
        // depend on arrival order, so late arrivals are replayed into place.
        let late = pass.arrives_late(&remote) || remote.kind() == Some(EventKind::ConflictResolved);
        pass.replay |= late;

        let event_id = remote.id.clone();
        if pass.replay {
            self.services.auditor.append(uow, remote)?;
        } else {
            self.services.append_and_project(uow, remote)?;
        }
        debug!(event_id = %event_id, replayed = pass.replay, "remote event appended");
        Ok(IngestOutcome::Appended)
    }

    /// Hand `remote` and every known version of its identity to the resolver
    /// and record the verdict.
    fn resolve(
        &self,
        uow: &mut dyn UnitOfWork,
        pass: &mut Pass,
        remote: Event,
    ) -> KernelResult<IngestOutcome> {
        let target = remote.id.clone();
        let candidates = known_versions(uow, &target, remote)?;
        if candidates.len() < 2 {
            // Only one distinct content: a re-signed or mis-signed copy of a
            // version already held. Nothing to decide.
            return match uow.find_entry(&target) {
                Some(_) => Ok(IngestOutcome::Duplicate),
                None => Err(KernelError::ReplicationConflict {
                    event_id: target.to_string(),
                    reason: "only version offered has an invalid signature".to_string(),
                }),
            };
        }

        let resolution = self.resolver.resolve(&candidates)?;
        let resolution_id = resolution.event_id();
        if uow.find_entry(&resolution_id).is_some() {
            debug!(event_id = %target, resolution = %resolution_id, "conflict already resolved");
            return Ok(IngestOutcome::AlreadyResolved {
                resolution: resolution_id,
            });
        }

        let event = self.record(uow, &resolution, &candidates, vec![target.clone()])?;
        pass.arrives_late(&event);
        pass.replay = true;

        info!(
            event_id = %target,
            resolution = %resolution_id,
            policy = %resolution.policy,
            superseded = resolution.superseded.len(),
            "conflict resolved"
        );
        Ok(IngestOutcome::Resolved {
            resolution: resolution_id,
        })
    }

    /// Settle a signed, not yet stored `remote` that derived state rejected
    /// against the local writes to its aggregate that it did not know about.
    ///
    /// `None` when there is nothing to contest: the event is stored already,
    /// unsigned, touches no known aggregate, or competes with no local write.
    fn resolve_competing(
        &self,
        uow: &mut dyn UnitOfWork,
        remote: Event,
    ) -> KernelResult<Option<IngestOutcome>> {
        if !remote.verify_signature() || uow.find_entry(&remote.id).is_some() {
            return Ok(None);
        }
        let projector = self.services.projector.as_ref();
        let Some(aggregate) = projector.aggregate(&remote) else {
            return Ok(None);
        };

        let known = causal_past(uow, &remote);
        let mut candidates: Vec<Event> = uow
            .entries()
            .into_iter()
            .map(|entry| entry.event)
            .filter(|event| !known.contains(&event.id))
            .filter(|event| projector.aggregate(event).as_deref() == Some(aggregate.as_str()))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        candidates.push(remote.clone());

        let resolution = self.resolver.resolve(&candidates)?.for_aggregate(aggregate.clone());
        let resolution_id = resolution.event_id();
        let remote_id = remote.id.clone();
        self.services.auditor.append(uow, remote)?;

        let outcome = if uow.find_entry(&resolution_id).is_some() {
            IngestOutcome::AlreadyResolved {
                resolution: resolution_id.clone(),
            }
        } else {
            let mut causes: Vec<EventId> = candidates.iter().map(|c| c.id.clone()).collect();
            causes.sort();
            self.record(uow, &resolution, &candidates, causes)?;
            IngestOutcome::Resolved {
                resolution: resolution_id.clone(),
            }
        };
        replay::rebuild(uow, projector)?;

        info!(
            event_id = %remote_id,
            aggregate = %aggregate,
            resolution = %resolution_id,
            policy = %resolution.policy,
            accepted = %resolution.accepted.id,
            "competing writes resolved"
        );
        Ok(Some(outcome))
    }

    /// Seal and stage the `ConflictResolvedEvent` for `resolution`.
    fn record(
        &self,
        uow: &mut dyn UnitOfWork,
        resolution: &Resolution,
        candidates: &[Event],
        causes: Vec<EventId>,
    ) -> KernelResult<Event> {
        let mut draft = EventDraft::new(EventKind::ConflictResolved, resolution.to_payload()?);
        for cause in causes {
            draft = draft.caused_by(cause);
        }
        let metadata = BTreeMap::from([(POLICY_KEY.to_string(), resolution.policy.clone())]);
        let mut event = self
            .services
            .seal(uow, resolution.event_id(), draft, metadata);
        // The verdict must sort after every version it settles, or a peer
        // whose cursor already passed them would never pull it.
        if let Some(newest) = candidates.iter().map(|c| c.timestamp).max() {
            if event.timestamp <= newest {
                event.timestamp = newest + Duration::microseconds(1);
                event.sign(self.services.node_id());
            }
        }
        Ok(self.services.auditor.append(uow, event)?.event)
    }
}

/// One copy per (id, content digest), in (timestamp, id) order.
///
/// A copy whose signature verifies is kept over one whose signature does not.
fn distinct(events: Vec<Event>) -> Vec<Event> {
    let mut by_content: BTreeMap<(EventId, String), Event> = BTreeMap::new();
    for event in events {
        let key = (event.id.clone(), event.content_digest());
        match by_content.get(&key) {
            Some(kept) if kept.verify_signature() || !event.verify_signature() => {}
            _ => {
                by_content.insert(key, event);
            }
        }
    }
    let mut events: Vec<Event> = by_content.into_values().collect();
    events.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    events
}

/// Every stored event `event` depends on, directly or through others.
fn causal_past(uow: &dyn UnitOfWork, event: &Event) -> BTreeSet<EventId> {
    let mut past = BTreeSet::new();
    let mut frontier: Vec<EventId> = event.causality_chain.clone();
    while let Some(id) = frontier.pop() {
        if !past.insert(id.clone()) {
            continue;
        }
        if let Some(entry) = uow.find_entry(&id) {
            frontier.extend(entry.event.causality_chain.iter().cloned());
        }
    }
    past
}

/// The locally stored version of `target`, every version named by earlier
/// resolutions of it, and `remote`, deduplicated by content digest.
///
/// When the only version with a given content has an invalid signature it is
/// still offered, so the resolver sees and rejects it.
fn known_versions(
    uow: &dyn UnitOfWork,
    target: &EventId,
    remote: Event,
) -> KernelResult<Vec<Event>> {
    let mut versions: Vec<Event> = Vec::new();
    if let Some(entry) = uow.find_entry(target) {
        versions.push(entry.event.clone());
    }
    for entry in uow.entries() {
        if entry.event.kind() != Some(EventKind::ConflictResolved) {
            continue;
        }
        let prior = Resolution::from_payload(&entry.event.payload)?;
        if prior.aggregate.is_none() && prior.target() == target {
            versions.push(prior.accepted);
            versions.extend(prior.superseded);
        }
    }
    versions.push(remote);

    let mut by_digest: BTreeMap<String, Event> = BTreeMap::new();
    for version in versions {
        let digest = version.content_digest();
        match by_digest.get(&digest) {
            Some(kept) if kept.verify_signature() || !version.verify_signature() => {}
            _ => {
                by_digest.insert(digest, version);
            }
        }
    }
    Ok(by_digest.into_values().collect())
}
