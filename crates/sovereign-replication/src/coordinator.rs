//! The replication coordinator: one `Idle → Pulling → Pushing → Idle` cycle
//! per peer per round.
//!
//! Every peer has its own state behind its own lock, so a slow or failing
//! peer never holds up another. A peer's cursor only moves after a round with
//! it completes, and never past an event from it that is still held.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sovereign_contracts::{
    error::{KernelError, KernelResult},
    event::Event,
    replication::{PeerPhase, ReplicationCursor},
};

use crate::{ingest::Ingestor, transport::PeerTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerState {
    pub phase: PeerPhase,
    pub cursor: ReplicationCursor,
    pub last_error: Option<String>,
}

/// What one completed round with one peer did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub peer: String,
    pub pulled: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub conflicts_resolved: usize,
    pub held: usize,
    pub failed: usize,
    pub pushed: usize,
    /// Conflicts the peer resolved while absorbing our push.
    pub peer_conflicts_resolved: usize,
    pub cursor: ReplicationCursor,
}

struct PeerSlot {
    transport: Arc<dyn PeerTransport>,
    state: Mutex<PeerState>,
    /// Set while a round runs; a timed-out round may still be finishing.
    in_flight: AtomicBool,
}

impl PeerSlot {
    fn lock(&self) -> KernelResult<MutexGuard<'_, PeerState>> {
        self.state
            .lock()
            .map_err(|e| KernelError::storage(format!("peer state poisoned: {}", e)))
    }

    fn set_phase(&self, phase: PeerPhase) -> KernelResult<()> {
        self.lock()?.phase = phase;
        Ok(())
    }

    fn fail(&self, error: &KernelError) {
        if let Ok(mut state) = self.lock() {
            state.phase = PeerPhase::Idle;
            state.last_error = Some(error.to_string());
        }
    }
}

pub struct ReplicationCoordinator {
    ingestor: Arc<Ingestor>,
    peers: RwLock<BTreeMap<String, Arc<PeerSlot>>>,
}

fn cancelled(peer: &str) -> KernelError {
    KernelError::PeerUnreachable {
        node_id: peer.to_string(),
        reason: "round cancelled before completion".to_string(),
    }
}

impl ReplicationCoordinator {
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self {
            ingestor,
            peers: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    fn local_node(&self) -> &str {
        self.ingestor.services().node_id()
    }

    /// Start replicating with the peer behind `transport`.
    ///
    /// Replacing an existing peer keeps its cursor.
    pub fn add_peer(&self, transport: Arc<dyn PeerTransport>) -> KernelResult<()> {
        let node_id = transport.node_id().to_string();
        if node_id == self.local_node() {
            return Err(KernelError::Config {
                reason: format!("node '{}' cannot replicate with itself", node_id),
            });
        }

        let mut peers = self
            .peers
            .write()
            .map_err(|e| KernelError::storage(format!("peer table poisoned: {}", e)))?;
        let state = match peers.get(&node_id) {
            Some(existing) => existing.lock()?.clone(),
            None => PeerState {
                phase: PeerPhase::Idle,
                cursor: ReplicationCursor::new(node_id.clone()),
                last_error: None,
            },
        };
        peers.insert(
            node_id,
            Arc::new(PeerSlot {
                transport,
                state: Mutex::new(state),
                in_flight: AtomicBool::new(false),
            }),
        );
        Ok(())
    }

    fn slot(&self, node_id: &str) -> KernelResult<Arc<PeerSlot>> {
        self.peers
            .read()
            .map_err(|e| KernelError::storage(format!("peer table poisoned: {}", e)))?
            .get(node_id)
            .cloned()
            .ok_or_else(|| KernelError::Config {
                reason: format!("'{}' is not a configured peer", node_id),
            })
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.peers
            .read()
            .map(|peers| peers.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn peer_state(&self, node_id: &str) -> KernelResult<PeerState> {
        Ok(self.slot(node_id)?.lock()?.clone())
    }

    pub fn cursor(&self, node_id: &str) -> KernelResult<ReplicationCursor> {
        Ok(self.peer_state(node_id)?.cursor)
    }

    /// Run one full round with `node_id`.
    ///
    /// If `token` is cancelled part way, the round stops at the next phase
    /// boundary and the cursor stays where it was. Anything already ingested
    /// stays ingested; the next round sees it as duplicates.
    pub fn sync_peer(&self, node_id: &str, token: &CancellationToken) -> KernelResult<RoundReport> {
        let slot = self.slot(node_id)?;
        if slot.in_flight.swap(true, Ordering::SeqCst) {
            return Err(KernelError::PeerUnreachable {
                node_id: node_id.to_string(),
                reason: "previous round still in flight".to_string(),
            });
        }
        let result = self.run_round(node_id, &slot, token);
        slot.in_flight.store(false, Ordering::SeqCst);
        match &result {
            Ok(report) => info!(
                peer = %node_id,
                pulled = report.pulled,
                pushed = report.pushed,
                appended = report.appended,
                conflicts = report.conflicts_resolved,
                held = report.held,
                "replication round complete"
            ),
            Err(e) => {
                warn!(peer = %node_id, kind = e.kind(), error = %e, "replication round failed");
                slot.fail(e);
            }
        }
        result
    }

    fn run_round(
        &self,
        node_id: &str,
        slot: &PeerSlot,
        token: &CancellationToken,
    ) -> KernelResult<RoundReport> {
        let since = slot.lock()?.cursor.last_synced_timestamp;

        // ── Pull ─────────────────────────────────────────────────────────────
        slot.set_phase(PeerPhase::Pulling)?;
        let pulled = slot.transport.pull(since)?;
        if token.is_cancelled() {
            return Err(cancelled(node_id));
        }
        debug!(peer = %node_id, events = pulled.len(), "pulled events");
        let ingest = self.ingestor.ingest_batch(node_id, pulled.clone())?;

        // ── Push ─────────────────────────────────────────────────────────────
        slot.set_phase(PeerPhase::Pushing)?;
        // Versions the peer just sent are not echoed back; a different
        // version under the same id still is.
        let pulled_digests: HashSet<String> = pulled.iter().map(Event::content_digest).collect();
        let outgoing: Vec<Event> = self
            .ingestor
            .services()
            .events_since(since)?
            .into_iter()
            .filter(|e| e.origin() != Some(node_id) && !pulled_digests.contains(&e.content_digest()))
            .collect();
        let push_report = if outgoing.is_empty() {
            Default::default()
        } else {
            slot.transport.push(outgoing.clone())?
        };
        if token.is_cancelled() {
            return Err(cancelled(node_id));
        }

        // ── Advance ──────────────────────────────────────────────────────────
        let cap = self.ingestor.earliest_held(node_id)?;
        let newest = pulled
            .iter()
            .chain(outgoing.iter())
            .filter(|e| cap.map_or(true, |c| e.timestamp < c))
            .max_by(|a, b| a.order_key().cmp(&b.order_key()));

        let mut state = slot.lock()?;
        if let Some(event) = newest {
            state.cursor.advance(event.id.clone(), event.timestamp);
        }
        state.cursor.pending_events_count = self.ingestor.held_count(node_id)?;
        state.phase = PeerPhase::Idle;
        state.last_error = None;

        Ok(RoundReport {
            peer: node_id.to_string(),
            pulled: pulled.len(),
            appended: ingest.appended.len(),
            duplicates: ingest.duplicates,
            conflicts_resolved: ingest.conflicts_resolved(),
            held: ingest.held,
            failed: ingest.failed.len(),
            pushed: outgoing.len(),
            peer_conflicts_resolved: push_report.conflicts_resolved,
            cursor: state.cursor.clone(),
        })
    }

    /// One round with every peer, one after another.
    ///
    /// A failing peer is logged and skipped; it never stops the others.
    pub fn sync_all(&self, token: &CancellationToken) -> Vec<(String, KernelResult<RoundReport>)> {
        self.peer_ids()
            .into_iter()
            .map(|peer| {
                let result = self.sync_peer(&peer, token);
                (peer, result)
            })
            .collect()
    }
}
