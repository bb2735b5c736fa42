//! Scenario B: Invalid Payment
//!
//! `InitiatePayment { amount: -5 }` fails validation before any unit of work
//! opens. The node is left with no events and no derived rows.

use serde_json::json;

use sovereign_contracts::{
    command::Command, config::KernelConfig, error::KernelResult, event::EventId,
};
use sovereign_core::{traits::Storage, RandomEventIds};

use super::manual_node;

#[derive(Debug)]
pub struct Outcome {
    pub result: KernelResult<EventId>,
    pub ledger_len: usize,
    pub derived_rows: usize,
}

pub fn execute() -> KernelResult<Outcome> {
    let (node, _) = manual_node(KernelConfig::for_node("node-a"), 0, Box::new(RandomEventIds))?;

    let result = node.execute(
        Command::new("InitiatePayment", json!({ "amount": -5 })).with_initiator("admin"),
    );

    Ok(Outcome {
        result,
        ledger_len: node.store().entries()?.len(),
        derived_rows: node.services().derived_snapshot()?.row_count(),
    })
}

pub fn run_scenario() -> KernelResult<()> {
    println!("=== Scenario B: Invalid Payment ===");
    println!();
    println!("  Command: InitiatePayment {{ amount: -5 }}");

    let outcome = execute()?;

    match &outcome.result {
        Err(e) => {
            println!("  Rejected:               {}", e.kind());
            println!("  Reason:                 {}", e);
        }
        Ok(id) => println!("  Unexpectedly accepted as {}", id),
    }
    println!("  Ledger entries:         {}", outcome.ledger_len);
    println!("  Derived rows:           {}", outcome.derived_rows);
    println!("  Scenario B complete.");
    println!();
    Ok(())
}
