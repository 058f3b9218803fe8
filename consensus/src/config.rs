//! Consensus engine configuration.
//!
//! Timing parameters are wall-clock seconds; the vote settings gate the
//! optional block-confirmation sub-protocol and its quorum threshold.

use thiserror::Error;

/// Tunables for the consensus engine.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Whether block admission is gated on a quorum of validator votes.
    /// Default: false.
    pub vote_enabled: bool,

    /// Seconds to gather a quorum before a pending block is discarded.
    /// Default: 5.0.
    pub vote_timeout: f64,

    /// Fraction of known validators whose votes are required; rounded up.
    /// Default: 0.66.
    pub vote_threshold: f64,

    /// Seconds to collect sync responses after a sync request.
    /// Default: 2.0.
    pub sync_timeout: f64,

    /// Upper bound on transactions drawn from the mempool per forged block.
    /// Default: 256.
    pub max_block_txs: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            vote_enabled: false,
            vote_timeout: 5.0,
            vote_threshold: 0.66,
            sync_timeout: 2.0,
            max_block_txs: 256,
        }
    }
}

impl ConsensusConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.vote_threshold > 0.0 && self.vote_threshold <= 1.0) {
            return Err(ConfigError::InvalidVoteThreshold(self.vote_threshold));
        }
        if self.vote_timeout <= 0.0 {
            return Err(ConfigError::InvalidTimeout("vote.timeout"));
        }
        if self.sync_timeout <= 0.0 {
            return Err(ConfigError::InvalidTimeout("sync.timeout"));
        }
        if self.max_block_txs == 0 {
            return Err(ConfigError::InvalidMaxBlockTxs);
        }
        Ok(())
    }
}

/// Errors in consensus configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("vote.threshold must be in (0.0, 1.0], got {0}")]
    InvalidVoteThreshold(f64),
    #[error("{0} must be > 0")]
    InvalidTimeout(&'static str),
    #[error("forge.max_block_txs must be > 0")]
    InvalidMaxBlockTxs,
}
