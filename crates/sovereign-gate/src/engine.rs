//! TOML-driven command gate.
//!
//! Evaluation:
//!
//! 1. If `kill_switch` is engaged, deny.
//! 2. Otherwise the first rule matching command type, initiator, and node
//!    decides.
//! 3. If no rule matched, deny.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use sovereign_contracts::{
    error::{KernelError, KernelResult},
    gate::{GateContext, GateVerdict},
};
use sovereign_core::traits::CommandGate;

use crate::rule::{GatePolicy, RuleVerdict};

/// A `CommandGate` whose rules come from a TOML document.
///
/// The kill switch starts from the policy file and can be flipped at runtime.
#[derive(Debug)]
pub struct TomlCommandGate {
    policy: GatePolicy,
    kill_switch: AtomicBool,
}

impl TomlCommandGate {
    pub fn new(policy: GatePolicy) -> Self {
        let kill_switch = AtomicBool::new(policy.kill_switch);
        Self {
            policy,
            kill_switch,
        }
    }

    /// Parse `s` as a TOML gate policy.
    ///
    /// Returns `KernelError::Config` if the TOML is malformed or does not
    /// match `GatePolicy`.
    pub fn from_toml_str(s: &str) -> KernelResult<Self> {
        let policy: GatePolicy = toml::from_str(s).map_err(|e| KernelError::Config {
            reason: format!("failed to parse gate policy TOML: {}", e),
        })?;
        Ok(Self::new(policy))
    }

    pub fn from_file(path: &Path) -> KernelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| KernelError::Config {
            reason: format!("failed to read gate policy '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn engage_kill_switch(&self) {
        warn!("command gate kill switch engaged");
        self.kill_switch.store(true, Ordering::SeqCst);
    }

    pub fn release_kill_switch(&self) {
        warn!("command gate kill switch released");
        self.kill_switch.store(false, Ordering::SeqCst);
    }

    pub fn kill_switch_engaged(&self) -> bool {
        self.kill_switch.load(Ordering::SeqCst)
    }
}

impl CommandGate for TomlCommandGate {
    fn admit(&self, ctx: &GateContext) -> KernelResult<GateVerdict> {
        if self.kill_switch_engaged() {
            warn!(command_type = %ctx.command_type, "kill switch engaged; denying command");
            return Ok(GateVerdict::Deny {
                reason: "kill switch engaged: all commands are suspended".to_string(),
            });
        }

        let initiator = ctx.initiator.as_deref();
        let matched = self
            .policy
            .rules
            .iter()
            .find(|rule| rule.matches(&ctx.command_type, initiator, &ctx.node_id));

        let Some(rule) = matched else {
            warn!(
                command_type = %ctx.command_type,
                initiator = ?initiator,
                "no gate rule matched; denying by default"
            );
            return Ok(GateVerdict::Deny {
                reason: format!(
                    "denied by default: no gate rule matched command '{}'",
                    ctx.command_type
                ),
            });
        };

        debug!(rule_id = %rule.id, command_type = %ctx.command_type, "gate rule matched");

        Ok(match rule.verdict {
            RuleVerdict::Allow => GateVerdict::Allow,
            RuleVerdict::Deny => GateVerdict::Deny {
                reason: rule
                    .deny_reason
                    .clone()
                    .unwrap_or_else(|| format!("denied by rule '{}'", rule.id)),
            },
            RuleVerdict::RequireApproval => GateVerdict::RequireApproval {
                reason: rule
                    .approval_reason
                    .clone()
                    .unwrap_or_else(|| format!("approval required by rule '{}'", rule.id)),
                approver_role: rule
                    .approver_role
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            },
        })
    }
}
