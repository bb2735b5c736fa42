//! Gate rule types and the policy file schema.
//!
//! A `GatePolicy` is deserialized from TOML and holds an ordered list of
//! `GateRule`s. The first matching rule wins. If none matches, the command
//! is denied.

use serde::{Deserialize, Serialize};

/// The decision a rule produces, spelled kebab-case in TOML.
///
/// ```toml
/// verdict = "allow"
/// verdict = "deny"
/// verdict = "require-approval"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleVerdict {
    Allow,
    Deny,
    RequireApproval,
}

fn any() -> String {
    WILDCARD.to_string()
}

/// Matches every value, including an absent initiator.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRule {
    /// Stable identifier used in logs and denial reasons.
    pub id: String,

    #[serde(default)]
    pub description: String,

    /// Command type pattern, e.g. `"InitiatePayment"` or `"*"`.
    pub command: String,

    /// Initiator pattern. Defaults to `"*"`.
    #[serde(default = "any")]
    pub initiator: String,

    /// Node pattern, so one policy file can serve several nodes. Defaults to `"*"`.
    #[serde(default = "any")]
    pub node: String,

    pub verdict: RuleVerdict,

    pub deny_reason: Option<String>,

    pub approval_reason: Option<String>,

    /// Role that must sign off when `verdict = "require-approval"`.
    pub approver_role: Option<String>,
}

impl GateRule {
    /// True if this rule applies to the given command, initiator, and node.
    ///
    /// A concrete `initiator` pattern never matches a command without one.
    pub fn matches(&self, command: &str, initiator: Option<&str>, node: &str) -> bool {
        let command_matches = self.command == WILDCARD || self.command == command;
        let initiator_matches =
            self.initiator == WILDCARD || initiator == Some(self.initiator.as_str());
        let node_matches = self.node == WILDCARD || self.node == node;
        command_matches && initiator_matches && node_matches
    }
}

/// Top-level structure of a gate policy file.
///
/// ```toml
/// kill_switch = false
///
/// [[rules]]
/// id = "treasury-payments"
/// command = "InitiatePayment"
/// verdict = "require-approval"
/// approval_reason = "payments need treasury sign-off"
/// approver_role = "treasurer"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatePolicy {
    /// When true every command is denied, whatever the rules say.
    #[serde(default)]
    pub kill_switch: bool,

    /// Ordered rules. First match wins.
    #[serde(default)]
    pub rules: Vec<GateRule>,
}
