//! Kernel scenarios the operator CLI can run.
//!
//! Each module wires real kernel nodes together, drives them through one
//! situation, and reports what happened. `execute` returns the outcome for
//! inspection; `run_scenario` prints it.

pub mod concurrent_create;
pub mod invalid_payment;
pub mod ledger_integrity;
pub mod user_onboarding;

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use sovereign_contracts::{command::Command, config::KernelConfig, error::KernelResult};
use sovereign_core::{EventIdSource, ManualClock};

use crate::Node;

/// A node on a manual clock `offset_secs` after a fixed epoch.
pub(crate) fn manual_node(
    config: KernelConfig,
    offset_secs: i64,
    ids: Box<dyn EventIdSource>,
) -> KernelResult<(Node, Arc<ManualClock>)> {
    let epoch: DateTime<Utc> = Utc
        .timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let clock = Arc::new(ManualClock::starting_at(epoch + Duration::seconds(offset_secs)));
    let node = Node::assemble(config, clock.clone(), ids)?;
    Ok((node, clock))
}

pub(crate) fn create_user(username: &str, email: &str) -> Command {
    Command::new("CreateUser", json!({ "username": username, "email": email }))
        .with_initiator("admin")
}

pub fn run_all() -> KernelResult<()> {
    user_onboarding::run_scenario()?;
    invalid_payment::run_scenario()?;
    concurrent_create::run_scenario()?;
    ledger_integrity::run_scenario()?;
    Ok(())
}
