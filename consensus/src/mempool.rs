//! The pending-transaction pool.
//!
//! Transactions are kept in arrival order and deduplicated by identity.
//! A transaction leaves the pool when a block carrying it lands on the
//! active chain, and comes back through [`Mempool::reinject`] when a reorg
//! rewinds such a block without the new branch carrying it too.

use {
    crate::{
        ledger::WalletLedger,
        types::{Block, Transaction},
    },
    log::info,
    std::collections::HashSet,
};

/// FIFO pool of pending transactions, deduplicated by identity.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    pending: Vec<Transaction>,
    ids: HashSet<String>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.ids.contains(&tx.id())
    }

    /// Pending transactions in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.pending.iter()
    }

    /// Add a transaction unless an identical one is already pending.
    /// Returns whether the pool changed.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if !self.ids.insert(tx.id()) {
            return false;
        }
        self.pending.push(tx);
        true
    }

    /// Drop every transaction that appears in `block` (finalization).
    pub fn remove_committed(&mut self, block: &Block) {
        let committed: HashSet<String> = block.transactions.iter().map(|tx| tx.id()).collect();
        if committed.is_empty() {
            return;
        }
        self.pending.retain(|tx| !committed.contains(&tx.id()));
        self.ids.retain(|id| !committed.contains(id));
    }

    /// Drop everything that is already finalized on the given active chain.
    pub fn purge_on_chain(&mut self, active: &[Block]) {
        let on_chain: HashSet<String> = active
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.id()))
            .collect();
        self.pending.retain(|tx| !on_chain.contains(&tx.id()));
        self.ids.retain(|id| !on_chain.contains(id));
    }

    /// Push rewound transactions back into the pool after a reorg,
    /// deduplicating against both the pool and the new active chain.
    /// Returns how many transactions were recovered.
    pub fn reinject(&mut self, rewound: Vec<Transaction>, active: &[Block]) -> usize {
        let on_chain: HashSet<String> = active
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.id()))
            .collect();
        let mut recovered = 0;
        for tx in rewound {
            if on_chain.contains(&tx.id()) {
                continue;
            }
            if self.insert(tx.clone()) {
                info!("recovered rewound transaction: {tx}");
                recovered += 1;
            }
        }
        recovered
    }

    /// Select up to `max` transactions in FIFO order that are sequentially
    /// applicable starting from `state`. Non-applicable transactions are
    /// skipped, not removed; selected ones stay pending until the block
    /// carrying them is finalized.
    pub fn select_applicable(&self, state: &WalletLedger, max: usize) -> Vec<Transaction> {
        let mut scratch = state.clone();
        let mut batch = Vec::new();
        for tx in &self.pending {
            if batch.len() >= max {
                break;
            }
            if scratch.apply(tx).is_ok() {
                batch.push(tx.clone());
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::Account,
        types::{Block, TxKind},
    };
    use std::collections::BTreeMap;

    fn tx(sender: &str, receiver: &str, amount: f64, ts: f64) -> Transaction {
        Transaction::with_timestamp(sender, receiver, amount, ts, TxKind::Transfer)
    }

    fn funded(id: &str, balance: f64) -> WalletLedger {
        let mut map = BTreeMap::new();
        map.insert(
            id.to_string(),
            Account {
                balance,
                stake: 0.0,
            },
        );
        WalletLedger::seeded(map)
    }

    #[test]
    fn test_insert_deduplicates_by_identity() {
        let mut pool = Mempool::new();
        let t = tx("a", "b", 1.0, 1.0);
        assert!(pool.insert(t.clone()));
        assert!(!pool.insert(t.clone()));
        assert_eq!(pool.len(), 1);
        // Same fields, different timestamp: a different transaction.
        assert!(pool.insert(tx("a", "b", 1.0, 2.0)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_remove_committed() {
        let mut pool = Mempool::new();
        let t1 = tx("a", "b", 1.0, 1.0);
        let t2 = tx("a", "b", 2.0, 2.0);
        pool.insert(t1.clone());
        pool.insert(t2.clone());

        let block = Block::with_timestamp(1, "p", "v", vec![t1.clone()], 3.0);
        pool.remove_committed(&block);
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&t1));
        assert!(pool.contains(&t2));
    }

    #[test]
    fn test_reinject_skips_chain_and_pool_duplicates() {
        let mut pool = Mempool::new();
        let on_chain = tx("a", "b", 1.0, 1.0);
        let already_pending = tx("a", "b", 2.0, 2.0);
        let fresh = tx("a", "b", 3.0, 3.0);
        pool.insert(already_pending.clone());

        let active = vec![
            Block::genesis(),
            Block::with_timestamp(1, "p", "v", vec![on_chain.clone()], 4.0),
        ];
        let recovered = pool.reinject(
            vec![on_chain.clone(), already_pending.clone(), fresh.clone()],
            &active,
        );
        assert_eq!(recovered, 1);
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&fresh));
        assert!(!pool.contains(&on_chain));
    }

    #[test]
    fn test_select_applicable_is_fifo_and_sequential() {
        let mut pool = Mempool::new();
        // Balance 10: the first 8-token transfer fits, the second does not,
        // the later 2-token transfer still does.
        pool.insert(tx("a", "b", 8.0, 1.0));
        pool.insert(tx("a", "b", 8.0, 2.0));
        pool.insert(tx("a", "b", 2.0, 3.0));

        let batch = pool.select_applicable(&funded("a", 10.0), 16);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].amount, 8.0);
        assert_eq!(batch[1].amount, 2.0);
        // Selection does not drain the pool.
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_select_applicable_respects_batch_limit() {
        let mut pool = Mempool::new();
        for i in 0..10 {
            pool.insert(tx("a", "b", 1.0, i as f64));
        }
        let batch = pool.select_applicable(&funded("a", 100.0), 4);
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn test_purge_on_chain() {
        let mut pool = Mempool::new();
        let t1 = tx("a", "b", 1.0, 1.0);
        let t2 = tx("a", "b", 2.0, 2.0);
        pool.insert(t1.clone());
        pool.insert(t2.clone());
        let active = vec![Block::with_timestamp(1, "p", "v", vec![t1.clone()], 3.0)];
        pool.purge_on_chain(&active);
        assert!(!pool.contains(&t1));
        assert!(pool.contains(&t2));
    }
}
