//! Commands submitted to the kernel and the drafts their handlers produce.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::{EventId, EventKind};

/// Metadata key carrying the identifier of the actor that issued a command.
pub const INITIATOR_KEY: &str = "initiator_id";

/// The closed set of commands the kernel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CreateUser,
    UpdateUserEmail,
    InitiatePayment,
    SettlePayment,
    PostLedgerEntry,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        CommandKind::CreateUser,
        CommandKind::UpdateUserEmail,
        CommandKind::InitiatePayment,
        CommandKind::SettlePayment,
        CommandKind::PostLedgerEntry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::CreateUser => "CreateUser",
            CommandKind::UpdateUserEmail => "UpdateUserEmail",
            CommandKind::InitiatePayment => "InitiatePayment",
            CommandKind::SettlePayment => "SettlePayment",
            CommandKind::PostLedgerEntry => "PostLedgerEntry",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// The event type a successful execution of this command produces.
    pub fn event_kind(&self) -> EventKind {
        match self {
            CommandKind::CreateUser => EventKind::CreateUser,
            CommandKind::UpdateUserEmail => EventKind::UpdateUserEmail,
            CommandKind::InitiatePayment => EventKind::InitiatePayment,
            CommandKind::SettlePayment => EventKind::SettlePayment,
            CommandKind::PostLedgerEntry => EventKind::PostLedgerEntry,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to change system state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub command_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Command {
    pub fn new(command_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            command_type: command_type.into(),
            payload,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach the initiating actor's identifier.
    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.metadata.insert(INITIATOR_KEY.to_string(), initiator.into());
        self
    }

    pub fn initiator(&self) -> Option<&str> {
        self.metadata.get(INITIATOR_KEY).map(String::as_str)
    }
}

/// What a command handler hands back to the dispatcher.
///
/// The dispatcher turns the draft into a full `Event` by assigning the
/// identifier, timestamp, metadata, and signature.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub causality_chain: Vec<EventId>,
}

impl EventDraft {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            causality_chain: Vec::new(),
        }
    }

    pub fn caused_by(mut self, id: EventId) -> Self {
        if !self.causality_chain.contains(&id) {
            self.causality_chain.push(id);
        }
        self
    }
}

/// Response to an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReceipt {
    pub event_id: EventId,
    pub status: String,
}

impl CommandReceipt {
    pub fn accepted(event_id: EventId) -> Self {
        Self {
            event_id,
            status: "accepted".to_string(),
        }
    }
}
