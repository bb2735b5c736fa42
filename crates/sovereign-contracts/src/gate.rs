//! Admission verdict and context types.
//!
//! A command gate consumes a `GateContext` and produces a `GateVerdict`
//! before the dispatcher looks up a handler. Anything other than `Allow`
//! stops the command with no side effects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateVerdict {
    Allow,

    Deny {
        reason: String,
    },

    /// The command needs sign-off from `approver_role` before it may run.
    RequireApproval {
        reason: String,
        approver_role: String,
    },
}

/// Everything the gate needs to decide on a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateContext {
    /// The node evaluating the command.
    pub node_id: String,
    pub command_type: String,
    /// The initiating actor, when the command carries one.
    pub initiator: Option<String>,
    pub metadata: BTreeMap<String, String>,
}
