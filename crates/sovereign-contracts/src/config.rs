//! Kernel configuration.
//!
//! Built once at process start, usually from a TOML file, and shared by
//! `Arc` with every component that needs it.
//!
//! ```toml
//! node_id = "node-a"
//! gate_policy = "policies/gate.toml"
//!
//! [replication]
//! interval_ms = 5000
//! round_timeout_ms = 2000
//! resolution = "last-write-wins"
//!
//! [[replication.peers]]
//! node_id = "node-b"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{KernelError, KernelResult},
    ledger::GENESIS_HASH,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Identity of this kernel instance; written into every event signature.
    pub node_id: String,

    /// Previous-hash seed for the first ledger entry.
    #[serde(default = "default_genesis_seed")]
    pub genesis_seed: String,

    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Optional path to a command gate policy file.
    #[serde(default)]
    pub gate_policy: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound on one exchange with one peer.
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,

    #[serde(default)]
    pub resolution: ResolutionPolicy,

    /// Preferred origin node for the built-in advisory arbiter.
    #[serde(default)]
    pub authority: Option<String>,

    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            round_timeout_ms: default_round_timeout_ms(),
            resolution: ResolutionPolicy::default(),
            authority: None,
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: String,
}

/// Which conflict resolver the node runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionPolicy {
    #[default]
    LastWriteWins,
    Arbitrated,
}

fn default_genesis_seed() -> String {
    GENESIS_HASH.to_string()
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_round_timeout_ms() -> u64 {
    2_000
}

impl KernelConfig {
    /// A configuration with every default and the given node identity.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            genesis_seed: default_genesis_seed(),
            replication: ReplicationConfig::default(),
            gate_policy: None,
        }
    }

    /// Parse `s` as TOML and validate the result.
    pub fn from_toml_str(s: &str) -> KernelResult<Self> {
        let config: KernelConfig = toml::from_str(s).map_err(|e| KernelError::Config {
            reason: format!("failed to parse kernel config TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. A relative `gate_policy` path is taken relative to
    /// the directory holding the config file.
    pub fn from_file(path: &Path) -> KernelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| KernelError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        if let (Some(policy), Some(dir)) = (config.gate_policy.as_mut(), path.parent()) {
            if policy.is_relative() {
                *policy = dir.join(&*policy);
            }
        }
        Ok(config)
    }

    fn validate(&self) -> KernelResult<()> {
        if self.node_id.trim().is_empty() || self.node_id.contains(':') {
            return Err(KernelError::Config {
                reason: format!("node_id '{}' must be non-empty and contain no ':'", self.node_id),
            });
        }
        if self.replication.resolution == ResolutionPolicy::Arbitrated
            && self.replication.authority.is_none()
        {
            return Err(KernelError::Config {
                reason: "resolution = \"arbitrated\" requires replication.authority".to_string(),
            });
        }
        if self.replication.peers.iter().any(|p| p.node_id == self.node_id) {
            return Err(KernelError::Config {
                reason: format!("node '{}' lists itself as a peer", self.node_id),
            });
        }
        Ok(())
    }
}
