//! The in-memory wallet ledger.
//!
//! Accounts map an id to a `(balance, stake)` pair; every transition is the
//! application of a single validated transaction and keeps both components
//! non-negative. The ledger is the replay target for chain validation, so
//! it is cheap to clone and to overwrite from a snapshot.

use {
    crate::types::{Transaction, TxKind},
    serde::{Deserialize, Serialize},
    std::collections::BTreeMap,
    thiserror::Error,
};

/// Reasons a transaction cannot be applied to a ledger state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("invalid amount")]
    NonPositiveAmount,

    #[error("self-transfer rejected")]
    SelfTransfer,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("insufficient stake")]
    InsufficientStake,
}

/// A single account's funds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Freely spendable tokens.
    #[serde(default)]
    pub balance: f64,
    /// Tokens locked for election weight.
    #[serde(default)]
    pub stake: f64,
}

/// All accounts known to the active chain state.
///
/// Unknown accounts read as `(0, 0)`. The map is ordered so that every
/// iteration (in particular the validator listing used by the election) is
/// deterministic across peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletLedger {
    accounts: BTreeMap<String, Account>,
}

impl WalletLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger seeded from an initial-state configuration.
    pub fn seeded(initial: BTreeMap<String, Account>) -> Self {
        Self { accounts: initial }
    }

    /// Spendable balance of `id` (0 for unknown accounts).
    pub fn balance(&self, id: &str) -> f64 {
        self.accounts.get(id).map(|a| a.balance).unwrap_or(0.0)
    }

    /// Staked amount of `id` (0 for unknown accounts).
    pub fn stake(&self, id: &str) -> f64 {
        self.accounts.get(id).map(|a| a.stake).unwrap_or(0.0)
    }

    /// All accounts in id order.
    pub fn accounts(&self) -> &BTreeMap<String, Account> {
        &self.accounts
    }

    /// Check whether `tx` is applicable to the current state, without
    /// mutating anything.
    pub fn check(&self, tx: &Transaction) -> Result<(), LedgerError> {
        if tx.amount <= 0.0 {
            return Err(LedgerError::NonPositiveAmount);
        }
        match tx.kind {
            TxKind::Transfer => {
                if tx.sender == tx.receiver {
                    return Err(LedgerError::SelfTransfer);
                }
                if self.balance(&tx.sender) < tx.amount {
                    return Err(LedgerError::InsufficientBalance);
                }
            }
            TxKind::Stake => {
                if self.balance(&tx.sender) < tx.amount {
                    return Err(LedgerError::InsufficientBalance);
                }
            }
            TxKind::Unstake => {
                if self.stake(&tx.sender) < tx.amount {
                    return Err(LedgerError::InsufficientStake);
                }
            }
        }
        Ok(())
    }

    /// Apply `tx`, or reject it without changing any account.
    pub fn apply(&mut self, tx: &Transaction) -> Result<(), LedgerError> {
        self.check(tx)?;
        match tx.kind {
            TxKind::Transfer => {
                self.entry(&tx.sender).balance -= tx.amount;
                self.entry(&tx.receiver).balance += tx.amount;
            }
            TxKind::Stake => {
                let account = self.entry(&tx.sender);
                account.balance -= tx.amount;
                account.stake += tx.amount;
            }
            TxKind::Unstake => {
                let account = self.entry(&tx.sender);
                account.stake -= tx.amount;
                account.balance += tx.amount;
            }
        }
        Ok(())
    }

    /// Overwrite this ledger from a snapshot (reorg and sync paths).
    pub fn set_state(&mut self, snapshot: WalletLedger) {
        self.accounts = snapshot.accounts;
    }

    /// Ids with positive stake, with their stakes, sorted by id.
    ///
    /// This is the known-validators set used for election weights and for
    /// quorum sizing when voting is enabled.
    pub fn staked_validators(&self) -> Vec<(String, f64)> {
        self.accounts
            .iter()
            .filter(|(_, a)| a.stake > 0.0)
            .map(|(id, a)| (id.clone(), a.stake))
            .collect()
    }

    /// Ids with positive balance, with their balances, sorted by id.
    /// Election fallback for when nobody has staked yet.
    pub fn positive_balances(&self) -> Vec<(String, f64)> {
        self.accounts
            .iter()
            .filter(|(_, a)| a.balance > 0.0)
            .map(|(id, a)| (id.clone(), a.balance))
            .collect()
    }

    fn entry(&mut self, id: &str) -> &mut Account {
        self.accounts.entry(id.to_string()).or_default()
    }
}
