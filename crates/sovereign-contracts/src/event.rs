//! Event identity and the immutable event record.
//!
//! An `Event` is the atomic fact unit of the ledger. Once persisted it is
//! never mutated or deleted. The `signature` binds the event's content to
//! the kernel instance that produced it, so a peer can detect an event whose
//! content was altered after signing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Globally unique, immutable event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Create a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The closed set of event types this kernel knows how to project.
///
/// The ledger stores the tag as a plain string, so events of a type this
/// build does not know survive replication and replay as no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CreateUser,
    UpdateUserEmail,
    InitiatePayment,
    SettlePayment,
    PostLedgerEntry,
    ConflictResolved,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::CreateUser,
        EventKind::UpdateUserEmail,
        EventKind::InitiatePayment,
        EventKind::SettlePayment,
        EventKind::PostLedgerEntry,
        EventKind::ConflictResolved,
    ];

    /// The wire tag stored in `Event::event_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CreateUser => "CreateUserEvent",
            EventKind::UpdateUserEmail => "UpdateUserEmailEvent",
            EventKind::InitiatePayment => "InitiatePaymentEvent",
            EventKind::SettlePayment => "SettlePaymentEvent",
            EventKind::PostLedgerEntry => "PostLedgerEntryEvent",
            EventKind::ConflictResolved => "ConflictResolvedEvent",
        }
    }

    /// Resolve a wire tag. Returns `None` for types this build does not know.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of a fact that already happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,

    /// Wire tag selecting the projector case (see `EventKind`).
    #[serde(rename = "type")]
    pub event_type: String,

    /// Logical clock value; wall time in practice.
    pub timestamp: DateTime<Utc>,

    /// Opaque structured data, interpreted only by the matching projector case.
    pub payload: serde_json::Value,

    /// `"<node_id>:<content digest>"`, written by `Event::sign`.
    pub signature: String,

    /// Events this one logically depends on, in order.
    #[serde(default)]
    pub causality_chain: Vec<EventId>,

    /// Free-form annotations such as the initiating actor.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Every field of an `Event` except `signature`, in canonical order.
#[derive(Serialize)]
struct CanonicalContent<'a> {
    id: &'a EventId,
    event_type: &'a str,
    timestamp: &'a DateTime<Utc>,
    payload: &'a serde_json::Value,
    causality_chain: &'a [EventId],
    metadata: &'a BTreeMap<String, String>,
}

impl Event {
    /// SHA-256 (hex) over the canonical JSON of every field except `signature`.
    ///
    /// # Panics
    ///
    /// Panics if the content cannot be serialized to JSON, which cannot
    /// happen for values built from `serde_json::Value` and strings.
    pub fn content_digest(&self) -> String {
        let content = CanonicalContent {
            id: &self.id,
            event_type: &self.event_type,
            timestamp: &self.timestamp,
            payload: &self.payload,
            causality_chain: &self.causality_chain,
            metadata: &self.metadata,
        };
        let bytes =
            serde_json::to_vec(&content).expect("event content must always be serializable");
        hex::encode(Sha256::digest(&bytes))
    }

    /// Stamp the event with the identity of the producing node.
    pub fn sign(&mut self, node_id: &str) {
        self.signature = format!("{}:{}", node_id, self.content_digest());
    }

    /// The node that signed this event, if the signature is well-formed.
    pub fn origin(&self) -> Option<&str> {
        self.signature.split_once(':').map(|(node, _)| node)
    }

    /// True when the signature's digest matches the event's current content.
    pub fn verify_signature(&self) -> bool {
        match self.signature.split_once(':') {
            Some((node, digest)) => !node.is_empty() && digest == self.content_digest(),
            None => false,
        }
    }

    /// True when `other` claims this event's identity with different content.
    ///
    /// Identical type and payload under the same id is a duplicate, not a conflict.
    pub fn conflicts_with(&self, other: &Event) -> bool {
        self.id == other.id
            && (self.event_type != other.event_type || self.payload != other.payload)
    }

    /// The known kind of this event, if any.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }

    /// Ordering key used for replay, replication, and tie-breaks.
    pub fn order_key(&self) -> (DateTime<Utc>, &EventId) {
        (self.timestamp, &self.id)
    }
}
