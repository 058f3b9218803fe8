//! The `config.yaml` settings file shared by nodes and the relay.
//!
//! Every section is optional and falls back to its default, so a minimal
//! experiment needs nothing beyond `initial_state`:
//!
//! ```yaml
//! server:
//!   host: localhost
//!   port: 5000
//! sync:
//!   timeout: 2.0
//! step:
//!   interval: 5.0
//! vote:
//!   enabled: true
//!   timeout: 5.0
//!   threshold: 0.66
//! initial_state:
//!   node1: { balance: 100.0, stake: 0.0 }
//!   node2: { balance: 100.0, stake: 0.0 }
//! ```

use {
    serde::Deserialize,
    stakesim_consensus::{config::ConsensusConfig, ledger::Account},
    std::{collections::BTreeMap, path::Path},
    thiserror::Error,
};

/// Errors loading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse settings file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub step: StepSettings,
    #[serde(default)]
    pub vote: VoteSettings,
    #[serde(default)]
    pub forge: ForgeSettings,
    /// Seed accounts at genesis.
    #[serde(default)]
    pub initial_state: BTreeMap<String, Account>,
}

/// Relay endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Bootstrap synchronization.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    /// Seconds to collect sync responses.
    #[serde(default = "default_sync_timeout")]
    pub timeout: f64,
}

/// Relay-driven forging cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSettings {
    /// Seconds between automatic steps.
    #[serde(default = "default_step_interval")]
    pub interval: f64,
}

/// The optional vote-confirmation sub-protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoteSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds to gather a quorum.
    #[serde(default = "default_vote_timeout")]
    pub timeout: f64,
    /// Fraction of known validators required; rounded up.
    #[serde(default = "default_vote_threshold")]
    pub threshold: f64,
}

/// Block production limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgeSettings {
    /// Maximum transactions per forged block.
    #[serde(default = "default_max_block_txs")]
    pub max_block_txs: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_sync_timeout() -> f64 {
    2.0
}
fn default_step_interval() -> f64 {
    5.0
}
fn default_vote_timeout() -> f64 {
    5.0
}
fn default_vote_threshold() -> f64 {
    0.66
}
fn default_max_block_txs() -> usize {
    256
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            timeout: default_sync_timeout(),
        }
    }
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            interval: default_step_interval(),
        }
    }
}

impl Default for VoteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: default_vote_timeout(),
            threshold: default_vote_threshold(),
        }
    }
}

impl Default for ForgeSettings {
    fn default() -> Self {
        Self {
            max_block_txs: default_max_block_txs(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// The relay's `host:port`.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Project the settings onto the consensus engine's config.
    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            vote_enabled: self.vote.enabled,
            vote_timeout: self.vote.timeout,
            vote_threshold: self.vote.threshold,
            sync_timeout: self.sync.timeout,
            max_block_txs: self.forge.max_block_txs,
        }
    }
}
