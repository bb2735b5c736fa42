//! # sovereign-node
//!
//! Assembly of a complete kernel node from a `KernelConfig`, plus the
//! scenarios the operator CLI runs.
//!
//! A node is one in-memory store with the hash-chain auditor, the governance
//! projector and handlers, an optional command gate, and the replication
//! stack (ingestor, endpoint, coordinator). Nodes in the same process talk
//! to each other through `LocalPeer` links.

pub mod scenarios;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use sovereign_audit::HashChainAuditor;
use sovereign_contracts::{
    command::{Command, CommandReceipt},
    config::{KernelConfig, ReplicationConfig, ResolutionPolicy},
    error::{KernelError, KernelResult},
    event::EventId,
};
use sovereign_core::{
    traits::ConflictResolver, Clock, Dispatcher, EventIdSource, KernelServices, RandomEventIds,
    SystemClock,
};
use sovereign_gate::TomlCommandGate;
use sovereign_governance::GovernanceProjector;
use sovereign_replication::{
    ArbitratedResolver, Ingestor, LastWriteWins, LocalPeer, PreferredOriginArbiter,
    ReplicationCoordinator, ReplicationEndpoint, ReplicationScheduler,
};
use sovereign_store::MemoryStore;

pub struct Node {
    store: Arc<MemoryStore>,
    dispatcher: Dispatcher,
    ingestor: Arc<Ingestor>,
    endpoint: Arc<ReplicationEndpoint>,
    coordinator: Arc<ReplicationCoordinator>,
}

/// The conflict resolver `config` asks for.
pub fn resolver_for(config: &ReplicationConfig) -> KernelResult<Arc<dyn ConflictResolver>> {
    match config.resolution {
        ResolutionPolicy::LastWriteWins => Ok(Arc::new(LastWriteWins)),
        ResolutionPolicy::Arbitrated => {
            let authority = config.authority.clone().ok_or_else(|| KernelError::Config {
                reason: "arbitrated resolution needs an authority node".to_string(),
            })?;
            Ok(Arc::new(ArbitratedResolver::new(PreferredOriginArbiter::new(
                authority,
            ))))
        }
    }
}

impl Node {
    /// A node on wall-clock time with random event identifiers.
    pub fn from_config(config: KernelConfig) -> KernelResult<Self> {
        Self::assemble(config, Arc::new(SystemClock), Box::new(RandomEventIds))
    }

    /// A node with the given time and identity sources.
    pub fn assemble(
        config: KernelConfig,
        clock: Arc<dyn Clock>,
        ids: Box<dyn EventIdSource>,
    ) -> KernelResult<Self> {
        let config = Arc::new(config);
        let store = Arc::new(MemoryStore::new());
        let services = KernelServices::new(
            Arc::clone(&config),
            store.clone(),
            Arc::new(HashChainAuditor::new(config.genesis_seed.clone())),
            Arc::new(GovernanceProjector::new()),
            clock,
        );

        let mut dispatcher = Dispatcher::new(
            services.clone(),
            sovereign_governance::registry()?,
            Box::new(sovereign_governance::validator()),
        )
        .with_id_source(ids);
        if let Some(path) = &config.gate_policy {
            dispatcher = dispatcher.with_gate(Box::new(TomlCommandGate::from_file(path)?));
        }

        let ingestor = Arc::new(Ingestor::new(services, resolver_for(&config.replication)?));
        info!(
            node_id = %config.node_id,
            resolution = ingestor.policy(),
            gated = config.gate_policy.is_some(),
            "node assembled"
        );

        Ok(Self {
            store,
            dispatcher,
            endpoint: Arc::new(ReplicationEndpoint::new(Arc::clone(&ingestor))),
            coordinator: Arc::new(ReplicationCoordinator::new(Arc::clone(&ingestor))),
            ingestor,
        })
    }

    pub fn node_id(&self) -> &str {
        self.services().node_id()
    }

    pub fn services(&self) -> &KernelServices {
        self.dispatcher.services()
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    pub fn coordinator(&self) -> &Arc<ReplicationCoordinator> {
        &self.coordinator
    }

    pub fn execute(&self, command: Command) -> KernelResult<EventId> {
        self.dispatcher.execute(command)
    }

    pub fn submit(&self, command: Command) -> KernelResult<CommandReceipt> {
        self.dispatcher.submit(command)
    }

    /// Make `peer` one of this node's replication peers.
    pub fn connect(&self, peer: &Node) -> KernelResult<Arc<LocalPeer>> {
        let link = Arc::new(LocalPeer::new(self.node_id(), Arc::clone(&peer.endpoint)));
        self.coordinator.add_peer(link.clone())?;
        Ok(link)
    }

    /// A scheduler for this node's peers, with the configured round timeout.
    pub fn scheduler(&self) -> ReplicationScheduler {
        ReplicationScheduler::from_config(
            Arc::clone(&self.coordinator),
            &self.services().config.replication,
        )
    }
}

/// Assemble one node per config and link every node to the peers its config
/// names.
pub fn cluster(configs: Vec<KernelConfig>) -> KernelResult<Vec<Node>> {
    let mut seen = HashSet::new();
    for config in &configs {
        if !seen.insert(config.node_id.clone()) {
            return Err(KernelError::Config {
                reason: format!("node '{}' is configured twice", config.node_id),
            });
        }
    }

    let nodes = configs
        .into_iter()
        .map(Node::from_config)
        .collect::<KernelResult<Vec<_>>>()?;

    for node in &nodes {
        for peer in &node.services().config.replication.peers {
            let target = nodes
                .iter()
                .find(|n| n.node_id() == peer.node_id)
                .ok_or_else(|| KernelError::Config {
                    reason: format!(
                        "node '{}' lists unknown peer '{}'",
                        node.node_id(),
                        peer.node_id
                    ),
                })?;
            node.connect(target)?;
        }
    }
    Ok(nodes)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
