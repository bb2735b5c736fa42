//! Sovereign node operator CLI.
//!
//! Runs in-process kernel nodes: the built-in scenarios, a single command,
//! ledger verification, replay, and a timed multi-node replication run.
//!
//! Usage:
//!   sovereign-node scenarios all
//!   sovereign-node submit CreateUser '{"username":"alice","email":"a@x.com"}'
//!   sovereign-node verify --events 1000 --tamper 500
//!   sovereign-node replay --events 200
//!   sovereign-node --config node/config/node-a.toml replicate \
//!       --peer-config node/config/node-b.toml --duration-ms 3000

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sovereign_contracts::{
    command::Command as KernelCommand,
    config::{KernelConfig, PeerConfig},
    error::{KernelError, KernelResult},
    event::EventKind,
};
use sovereign_core::traits::Storage;
use sovereign_node::{cluster, scenarios, Node};
use sovereign_replication::IntervalTicker;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Sovereign kernel node.
#[derive(Parser)]
#[command(
    name = "sovereign-node",
    about = "Sovereign event-sourcing kernel node",
    long_about = "Runs in-memory Sovereign kernel nodes: scenarios, command submission,\n\
                  hash-chain verification, replay, and peer replication."
)]
struct Cli {
    /// Node configuration (TOML). Defaults to a node named `node-a`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one or all of the built-in scenarios.
    Scenarios {
        #[arg(value_enum, default_value_t = Scenario::All)]
        which: Scenario,
    },
    /// Submit one command and print the receipt and derived state.
    Submit {
        /// Command type, e.g. `CreateUser`.
        command_type: String,
        /// JSON payload.
        payload: String,
        #[arg(long, default_value = "operator")]
        initiator: String,
    },
    /// Append ledger entries, optionally tamper with one, and verify the chain.
    Verify {
        #[arg(long, default_value_t = 1000)]
        events: usize,
        /// Sequence number of the entry to alter before verifying.
        #[arg(long)]
        tamper: Option<u64>,
        /// First sequence of the verified range.
        #[arg(long, requires = "to")]
        from: Option<u64>,
        /// Last sequence of the verified range.
        #[arg(long, requires = "from")]
        to: Option<u64>,
    },
    /// Append ledger entries, rebuild derived state, and compare digests.
    Replay {
        #[arg(long, default_value_t = 200)]
        events: usize,
    },
    /// Run a cluster with its replication schedulers for a while.
    Replicate {
        /// Config for another node in the cluster. May be repeated.
        #[arg(long = "peer-config")]
        peer_configs: Vec<PathBuf>,
        #[arg(long, default_value_t = 3000)]
        duration_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scenario {
    All,
    UserOnboarding,
    InvalidPayment,
    ConcurrentCreate,
    LedgerIntegrity,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Scenarios { which } => run_scenarios(which),
        Command::Submit {
            command_type,
            payload,
            initiator,
        } => load_config(cli.config.as_deref())
            .and_then(|config| run_submit(config, &command_type, &payload, &initiator)),
        Command::Verify {
            events,
            tamper,
            from,
            to,
        } => load_config(cli.config.as_deref()).and_then(|config| {
            let range = from.zip(to).map(|(from, to)| from..=to);
            run_verify(config, events, tamper, range)
        }),
        Command::Replay { events } => {
            load_config(cli.config.as_deref()).and_then(|config| run_replay(config, events))
        }
        Command::Replicate {
            peer_configs,
            duration_ms,
        } => load_config(cli.config.as_deref())
            .and_then(|config| run_replicate(config, &peer_configs, duration_ms)),
    };

    if let Err(e) = result {
        eprintln!("error [{}]: {}", e.kind(), e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> KernelResult<KernelConfig> {
    match path {
        Some(path) => KernelConfig::from_file(path),
        None => Ok(KernelConfig::for_node("node-a")),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> KernelResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| KernelError::Storage {
        reason: format!("failed to render output: {}", e),
    })
}

// ── Subcommands ───────────────────────────────────────────────────────────────

fn run_scenarios(which: Scenario) -> KernelResult<()> {
    match which {
        Scenario::All => scenarios::run_all(),
        Scenario::UserOnboarding => scenarios::user_onboarding::run_scenario(),
        Scenario::InvalidPayment => scenarios::invalid_payment::run_scenario(),
        Scenario::ConcurrentCreate => scenarios::concurrent_create::run_scenario(),
        Scenario::LedgerIntegrity => scenarios::ledger_integrity::run_scenario(),
    }
}

fn run_submit(
    config: KernelConfig,
    command_type: &str,
    payload: &str,
    initiator: &str,
) -> KernelResult<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| KernelError::Validation {
            reason: format!("payload is not valid JSON: {}", e),
        })?;
    let node = Node::from_config(config)?;

    let receipt = node.submit(KernelCommand::new(command_type, payload).with_initiator(initiator))?;

    println!("{}", to_json(&receipt)?);
    println!("{}", to_json(&node.services().derived_snapshot()?)?);
    Ok(())
}

fn run_verify(
    config: KernelConfig,
    events: usize,
    tamper: Option<u64>,
    range: Option<std::ops::RangeInclusive<u64>>,
) -> KernelResult<()> {
    let node = Node::from_config(config)?;
    scenarios::ledger_integrity::populate(&node, events)?;

    if let Some(sequence) = tamper {
        let index = sequence
            .checked_sub(1)
            .map(|i| i as usize)
            .filter(|i| *i < events)
            .ok_or_else(|| KernelError::Config {
                reason: format!("no entry #{} to tamper with", sequence),
            })?;
        node.store().tamper_with(|entries| {
            entries[index]
                .event
                .metadata
                .insert("tampered".to_string(), "true".to_string());
        })?;
    }

    let verification = node.services().verify_ledger(range)?;
    println!("{}", to_json(&verification)?);
    Ok(())
}

fn run_replay(config: KernelConfig, events: usize) -> KernelResult<()> {
    let node = Node::from_config(config)?;
    scenarios::ledger_integrity::populate(&node, events)?;

    let before = node.services().derived_snapshot()?.digest();
    let applied = node.services().rebuild()?;
    let after = node.services().derived_snapshot()?.digest();

    println!("Events replayed:   {}", applied);
    println!("Digest before:     {}", before);
    println!("Digest after:      {}", after);
    println!(
        "Derived state:     {}",
        if before == after { "IDENTICAL" } else { "DIFFERENT" }
    );
    Ok(())
}

fn run_replicate(config: KernelConfig, peer_paths: &[PathBuf], duration_ms: u64) -> KernelResult<()> {
    let mut configs = vec![config];
    for path in peer_paths {
        configs.push(KernelConfig::from_file(path)?);
    }
    if configs.len() == 1 {
        // No peer configs given: start the peers the local config names, or
        // one default peer, each linked back to the local node.
        let local = configs[0].node_id.clone();
        if configs[0].replication.peers.is_empty() {
            configs[0].replication.peers.push(PeerConfig {
                node_id: "node-b".to_string(),
            });
        }
        let peers: Vec<String> = configs[0]
            .replication
            .peers
            .iter()
            .map(|p| p.node_id.clone())
            .collect();
        for peer in peers {
            let mut peer_config = KernelConfig::for_node(peer);
            peer_config.replication.peers.push(PeerConfig {
                node_id: local.clone(),
            });
            configs.push(peer_config);
        }
    }

    let nodes = cluster(configs)?;
    for node in &nodes {
        let username = node.node_id().replace('-', "_");
        node.execute(
            KernelCommand::new(
                "CreateUser",
                serde_json::json!({ "username": username, "email": format!("{}@sovereign.local", username) }),
            )
            .with_initiator("operator"),
        )?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| KernelError::Config {
            reason: format!("failed to start the async runtime: {}", e),
        })?;

    let shutdown = CancellationToken::new();
    let rounds = runtime.block_on(async {
        let handles: Vec<_> = nodes
            .iter()
            .map(|node| {
                let scheduler = node.scheduler();
                let ticker = IntervalTicker::new(Duration::from_millis(
                    node.services().config.replication.interval_ms,
                ));
                let token = shutdown.clone();
                tokio::spawn(async move { scheduler.run(ticker, token).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        shutdown.cancel();

        let mut rounds = Vec::with_capacity(handles.len());
        for handle in handles {
            rounds.push(handle.await.unwrap_or(0));
        }
        rounds
    });

    let mut digests = Vec::new();
    for (node, rounds) in nodes.iter().zip(rounds) {
        let entries = node.store().entries()?;
        let resolutions = entries
            .iter()
            .filter(|e| e.event.kind() == Some(EventKind::ConflictResolved))
            .count();
        let digest = node.services().derived_snapshot()?.digest();
        println!(
            "{}: {} round(s), {} entries, {} resolution(s), digest {}",
            node.node_id(),
            rounds,
            entries.len(),
            resolutions,
            &digest[..16]
        );
        digests.push(digest);
    }
    let converged = digests.windows(2).all(|pair| pair[0] == pair[1]);
    println!("Cluster: {}", if converged { "CONVERGED" } else { "DIVERGED" });
    Ok(())
}
