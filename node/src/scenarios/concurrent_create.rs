//! Scenario C: Concurrent Create
//!
//! Nodes A and B each create a user under the same event id (a simulated
//! identifier collision) with different payloads. B's clock runs ten seconds
//! ahead, so last-write-wins picks B's version. After one replication round
//! started by A, both nodes hold exactly one resolution event and identical
//! derived state.

use chrono::Duration;

use sovereign_contracts::{
    config::{KernelConfig, PeerConfig},
    error::{KernelError, KernelResult},
    event::{EventId, EventKind},
};
use sovereign_core::{traits::Storage, ScriptedEventIds};
use tokio_util::sync::CancellationToken;

use super::{create_user, manual_node};
use crate::Node;

/// The identifier both nodes are made to reuse.
pub const SHARED_ID: &str = "evt-collision-0001";

#[derive(Debug)]
pub struct NodeView {
    pub node_id: String,
    pub ledger_len: usize,
    pub resolutions: Vec<EventId>,
    pub accepted_username: Option<String>,
    pub derived_digest: String,
}

#[derive(Debug)]
pub struct Outcome {
    pub conflicts_resolved: usize,
    pub nodes: Vec<NodeView>,
}

impl Outcome {
    pub fn converged(&self) -> bool {
        self.nodes
            .windows(2)
            .all(|pair| pair[0].derived_digest == pair[1].derived_digest)
    }
}

fn config(node_id: &str, peer: &str) -> KernelConfig {
    let mut config = KernelConfig::for_node(node_id);
    config.replication.peers.push(PeerConfig {
        node_id: peer.to_string(),
    });
    config
}

fn view(node: &Node) -> KernelResult<NodeView> {
    let entries = node.store().entries()?;
    let state = node.services().derived_snapshot()?;
    Ok(NodeView {
        node_id: node.node_id().to_string(),
        ledger_len: entries.len(),
        resolutions: entries
            .iter()
            .filter(|entry| entry.event.kind() == Some(EventKind::ConflictResolved))
            .map(|entry| entry.event.id.clone())
            .collect(),
        accepted_username: state.users.get(SHARED_ID).map(|user| user.username.clone()),
        derived_digest: state.digest(),
    })
}

pub fn execute() -> KernelResult<Outcome> {
    let (a, a_clock) = manual_node(
        config("node-a", "node-b"),
        0,
        Box::new(ScriptedEventIds::new([SHARED_ID])),
    )?;
    let (b, b_clock) = manual_node(
        config("node-b", "node-a"),
        10,
        Box::new(ScriptedEventIds::new([SHARED_ID])),
    )?;
    a.connect(&b)?;
    b.connect(&a)?;

    a_clock.advance(Duration::seconds(1));
    a.execute(create_user("alice", "alice@a.example"))?;
    b_clock.advance(Duration::seconds(1));
    b.execute(create_user("alicia", "alicia@b.example"))?;

    let round = a
        .coordinator()
        .sync_peer(b.node_id(), &CancellationToken::new())?;
    if round.failed > 0 {
        return Err(KernelError::ReplicationConflict {
            event_id: SHARED_ID.to_string(),
            reason: format!("{} event(s) failed to ingest", round.failed),
        });
    }

    Ok(Outcome {
        conflicts_resolved: round.conflicts_resolved,
        nodes: vec![view(&a)?, view(&b)?],
    })
}

pub fn run_scenario() -> KernelResult<()> {
    println!("=== Scenario C: Concurrent Create ===");
    println!();
    println!("  node-a creates 'alice' as {}", SHARED_ID);
    println!("  node-b creates 'alicia' as {} (clock +10s)", SHARED_ID);
    println!("  Policy: last-write-wins");

    let outcome = execute()?;

    println!("  Conflicts resolved:     {}", outcome.conflicts_resolved);
    for node in &outcome.nodes {
        println!(
            "  {}: {} entries, {} resolution(s), accepted user '{}'",
            node.node_id,
            node.ledger_len,
            node.resolutions.len(),
            node.accepted_username.as_deref().unwrap_or("<none>")
        );
    }
    println!(
        "  Derived state:          {}",
        if outcome.converged() { "CONVERGED" } else { "DIVERGED" }
    );
    println!("  Scenario C complete.");
    println!();
    Ok(())
}
