//! Scenario D: Ledger Integrity
//!
//! A thousand events are appended and the hash chain verifies. Entry 500 is
//! then altered in storage, and verification reports the break at 500.
//! Restored, the chain verifies again; deleted, the break is again at 500.
//! Dropping the newest entry leaves an intact chain behind, but the recorded
//! chain head no longer matches, so the break is reported at the last entry.

use serde_json::json;

use sovereign_contracts::{
    command::Command, config::KernelConfig, error::KernelResult, ledger::ChainVerification,
};
use sovereign_core::{traits::Storage, RandomEventIds};

use super::manual_node;
use crate::Node;

pub const EVENTS: usize = 1000;
pub const TAMPERED: u64 = 500;

#[derive(Debug)]
pub struct Outcome {
    pub appended: usize,
    pub intact: ChainVerification,
    pub altered: ChainVerification,
    pub restored: ChainVerification,
    pub deleted: ChainVerification,
    pub truncated: ChainVerification,
}

/// Post `count` ledger entries spread over ten accounts.
pub fn populate(node: &Node, count: usize) -> KernelResult<()> {
    for i in 0..count {
        let amount = (i as i64 % 7) + 1;
        let command = Command::new(
            "PostLedgerEntry",
            json!({ "account_id": format!("acct-{}", i % 10), "amount": amount }),
        )
        .with_initiator("treasury");
        node.execute(command)?;
    }
    Ok(())
}

pub fn execute() -> KernelResult<Outcome> {
    let (node, _) = manual_node(KernelConfig::for_node("node-a"), 0, Box::new(RandomEventIds))?;
    populate(&node, EVENTS)?;
    let appended = node.store().entries()?.len();
    let intact = node.services().verify_ledger(None)?;

    let index = (TAMPERED - 1) as usize;
    let mut original = None;
    node.store().tamper_with(|entries| {
        original = Some(entries[index].clone());
        entries[index]
            .event
            .metadata
            .insert("note".to_string(), "edited after the fact".to_string());
    })?;
    let altered = node.services().verify_ledger(None)?;

    node.store().tamper_with(|entries| {
        if let Some(original) = original.clone() {
            entries[index] = original;
        }
    })?;
    let restored = node.services().verify_ledger(None)?;

    node.store().tamper_with(|entries| {
        entries.remove(index);
    })?;
    let deleted = node.services().verify_ledger(None)?;

    node.store().tamper_with(|entries| {
        if let Some(original) = original {
            entries.insert(index, original);
        }
        entries.pop();
    })?;
    let truncated = node.services().verify_ledger(None)?;

    Ok(Outcome {
        appended,
        intact,
        altered,
        restored,
        deleted,
        truncated,
    })
}

fn describe(verification: &ChainVerification) -> String {
    match verification.broken_at {
        None => format!("VALID ({} entries checked)", verification.checked),
        Some(sequence) => format!(
            "BROKEN at #{} ({} entries checked)",
            sequence, verification.checked
        ),
    }
}

pub fn run_scenario() -> KernelResult<()> {
    println!("=== Scenario D: Ledger Integrity ===");
    println!();

    let outcome = execute()?;

    println!("  Events appended:        {}", outcome.appended);
    println!("  Untouched chain:        {}", describe(&outcome.intact));
    println!("  Entry #{} altered:     {}", TAMPERED, describe(&outcome.altered));
    println!("  Entry #{} restored:    {}", TAMPERED, describe(&outcome.restored));
    println!("  Entry #{} deleted:     {}", TAMPERED, describe(&outcome.deleted));
    println!("  Newest entry dropped:   {}", describe(&outcome.truncated));
    println!("  Scenario D complete.");
    println!();
    Ok(())
}
