//! Error taxonomy for the consensus engine's command surface.

use {
    crate::{chain::ChainError, ledger::LedgerError},
    thiserror::Error,
};

/// Errors surfaced by engine commands (transaction creation, forging).
///
/// Display strings double as the short failure reasons shown to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("not a validator")]
    NotValidator {
        /// Who the election picked instead, if anyone.
        selected: Option<String>,
    },

    #[error("nothing to forge")]
    NothingToForge,

    #[error("{0}")]
    Ledger(#[from] LedgerError),

    #[error("block rejected: {0}")]
    Chain(#[from] ChainError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
