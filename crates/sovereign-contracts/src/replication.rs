//! Replication bookkeeping and conflict-resolution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{KernelError, KernelResult},
    event::{Event, EventId},
};

/// Per-peer bookmark of the last event successfully exchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationCursor {
    pub node_id: String,
    pub last_synced_event_id: Option<EventId>,
    pub last_synced_timestamp: Option<DateTime<Utc>>,
    pub pending_events_count: usize,
}

impl ReplicationCursor {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            last_synced_event_id: None,
            last_synced_timestamp: None,
            pending_events_count: 0,
        }
    }

    /// Move the cursor forward to `timestamp`.
    ///
    /// Never moves backwards: a `timestamp` at or before the current one
    /// leaves the cursor where it is. Returns true if the cursor moved.
    pub fn advance(&mut self, event_id: EventId, timestamp: DateTime<Utc>) -> bool {
        match self.last_synced_timestamp {
            Some(current) if timestamp <= current => false,
            _ => {
                self.last_synced_event_id = Some(event_id);
                self.last_synced_timestamp = Some(timestamp);
                true
            }
        }
    }
}

/// Where a peer is in its replication cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerPhase {
    Idle,
    Pulling,
    Pushing,
}

/// Answer to a replication push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub received_count: usize,
    pub conflicts_resolved: usize,
}

/// The verdict of a conflict resolver.
///
/// Serialized as the payload of a `ConflictResolvedEvent`. The conflicting
/// events themselves are never modified; this record says which one counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub accepted: Event,
    pub superseded: Vec<Event>,
    /// Name of the policy that produced the verdict.
    pub policy: String,
    #[serde(default)]
    pub rationale: Option<String>,
    /// Set when the candidates carry different identifiers and contend for
    /// one aggregate instead. Replay then leaves every superseded event out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<String>,
}

impl Resolution {
    /// The contested identifier.
    pub fn target(&self) -> &EventId {
        &self.accepted.id
    }

    /// What the verdict settles: the contested identifier, or the contested
    /// aggregate for competing writes.
    pub fn subject(&self) -> EventId {
        match &self.aggregate {
            Some(aggregate) => EventId(aggregate.clone()),
            None => self.accepted.id.clone(),
        }
    }

    /// Mark the verdict as settling competing writes to `aggregate`.
    pub fn for_aggregate(mut self, aggregate: impl Into<String>) -> Self {
        self.aggregate = Some(aggregate.into());
        self
    }

    /// Deterministic identifier for the event recording this resolution.
    ///
    /// Derived from the subject, the sorted content digests of every
    /// candidate, and the accepted digest, so two nodes that reach the same verdict on the same
    /// conflict record the same event.
    pub fn event_id(&self) -> EventId {
        let accepted = self.accepted.content_digest();
        let mut candidates: Vec<String> = self
            .superseded
            .iter()
            .map(Event::content_digest)
            .chain(std::iter::once(accepted.clone()))
            .collect();
        candidates.sort();
        candidates.dedup();

        let mut hasher = Sha256::new();
        hasher.update(self.subject().as_str().as_bytes());
        for digest in &candidates {
            hasher.update(b"|");
            hasher.update(digest.as_bytes());
        }
        hasher.update(b"|accepted:");
        hasher.update(accepted.as_bytes());

        let hash = hex::encode(hasher.finalize());
        EventId(format!("resolution-{}", &hash[..32]))
    }

    pub fn to_payload(&self) -> KernelResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| KernelError::Resolution {
            reason: format!("failed to encode resolution: {}", e),
        })
    }

    pub fn from_payload(payload: &serde_json::Value) -> KernelResult<Self> {
        serde_json::from_value(payload.clone()).map_err(|e| KernelError::Resolution {
            reason: format!("failed to decode resolution: {}", e),
        })
    }
}
