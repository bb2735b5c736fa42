//! Scenario A: User Onboarding
//!
//! One `CreateUser` command on a fresh node appends exactly one
//! `CreateUserEvent` and projects exactly one user row at version 1.

use sovereign_contracts::{config::KernelConfig, error::KernelResult, event::EventId};
use sovereign_core::{traits::Storage, RandomEventIds};

use super::{create_user, manual_node};

#[derive(Debug)]
pub struct Outcome {
    pub event_id: EventId,
    pub event_type: String,
    pub ledger_len: usize,
    pub derived_rows: usize,
    pub user_version: Option<u64>,
    pub chain_valid: bool,
}

pub fn execute() -> KernelResult<Outcome> {
    let (node, _) = manual_node(KernelConfig::for_node("node-a"), 0, Box::new(RandomEventIds))?;

    let event_id = node.execute(create_user("alice", "a@x.com"))?;

    let entries = node.store().entries()?;
    let state = node.services().derived_snapshot()?;
    Ok(Outcome {
        event_type: entries
            .first()
            .map(|entry| entry.event.event_type.clone())
            .unwrap_or_default(),
        ledger_len: entries.len(),
        derived_rows: state.row_count(),
        user_version: state.users.get(event_id.as_str()).map(|user| user.version),
        chain_valid: node.services().verify_ledger(None)?.valid,
        event_id,
    })
}

pub fn run_scenario() -> KernelResult<()> {
    println!("=== Scenario A: User Onboarding ===");
    println!();
    println!("  Command: CreateUser {{ username: \"alice\", email: \"a@x.com\" }}");

    let outcome = execute()?;

    println!("  Event id:               {}", outcome.event_id);
    println!("  Event type:             {}", outcome.event_type);
    println!("  Ledger entries:         {}", outcome.ledger_len);
    println!("  Derived rows:           {}", outcome.derived_rows);
    match outcome.user_version {
        Some(version) => println!("  User row version:       {}", version),
        None => println!("  User row version:       MISSING"),
    }
    println!(
        "  Hash chain:             {}",
        if outcome.chain_valid { "VERIFIED" } else { "BROKEN" }
    );
    println!("  Scenario A complete.");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_event_one_row_version_one() {
        let outcome = execute().unwrap();
        assert_eq!(outcome.event_type, "CreateUserEvent");
        assert_eq!(outcome.ledger_len, 1);
        assert_eq!(outcome.derived_rows, 1);
        assert_eq!(outcome.user_version, Some(1));
        assert!(outcome.chain_valid);
    }
}
