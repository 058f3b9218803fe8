//! The chain store: every accepted block, the active chain, and the live
//! ledger, plus the fork-choice and reorganization machinery.
//!
//! The store keeps a hash-indexed map of every block it has ever accepted
//! (side branches included) and a designated active chain from genesis to
//! `head`. The live ledger always equals the deterministic replay of the
//! active chain from the genesis state. Fork-choice is longest-chain with a
//! keep-current-head tie-break: an equal-height rival is stored but not
//! adopted until its branch grows strictly longer.

use {
    crate::{
        ledger::{LedgerError, WalletLedger},
        types::{Block, Transaction},
    },
    log::{info, warn},
    std::collections::{HashMap, HashSet},
    thiserror::Error,
};

/// Reasons a block or candidate chain is not accepted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
    #[error("hash mismatch at height {index}")]
    HashMismatch { index: u64 },

    #[error("parent unknown")]
    UnknownParent,

    #[error("bad height {got} (expected {expected})")]
    NonSequentialIndex { got: u64, expected: u64 },

    #[error("transaction not applicable at height {index}: {source}")]
    NotApplicable {
        index: u64,
        #[source]
        source: LedgerError,
    },

    #[error("genesis does not match")]
    ForeignGenesis,

    #[error("empty chain")]
    EmptyChain,
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// What happened when a block was offered to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum AdoptOutcome {
    /// The block extended the active chain directly.
    Extended,
    /// A longer branch replaced the active chain. `reinjected` carries the
    /// rewound transactions that are not present on the new branch and must
    /// go back to the mempool.
    Reorged { reinjected: Vec<Transaction> },
    /// The block was stored on a side branch; the head did not move.
    SideBranch,
}

/// Hash-indexed block store with an active chain and its replayed ledger.
#[derive(Debug, Clone)]
pub struct ChainStore {
    /// Every block ever accepted, main chain and side branches alike.
    blocks_by_hash: HashMap<String, Block>,
    /// The active sequence genesis..=head; `active[i].index == i`.
    active: Vec<Block>,
    /// Post-state of `head`; always equals the replay of `active`.
    ledger: WalletLedger,
    /// Seed state at genesis, kept for replays.
    genesis_state: WalletLedger,
}

impl ChainStore {
    /// A store holding only the genesis block, with the given seed state.
    pub fn new(genesis_state: WalletLedger) -> Self {
        let genesis = Block::genesis();
        let mut blocks_by_hash = HashMap::new();
        blocks_by_hash.insert(genesis.hash.clone(), genesis.clone());
        Self {
            blocks_by_hash,
            active: vec![genesis],
            ledger: genesis_state.clone(),
            genesis_state,
        }
    }

    /// Rebuild a store from a persisted active chain.
    pub fn from_blocks(blocks: &[Block], genesis_state: WalletLedger) -> Result<Self> {
        let mut store = Self::new(genesis_state);
        store.reorganize_to(blocks)?;
        Ok(store)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// The tip of the active chain.
    pub fn head(&self) -> &Block {
        // The active chain always holds at least genesis.
        &self.active[self.active.len() - 1]
    }

    /// The genesis block.
    pub fn genesis(&self) -> &Block {
        &self.active[0]
    }

    /// Height of the head (genesis = 0).
    pub fn height(&self) -> u64 {
        self.head().index
    }

    /// The active chain, genesis first.
    pub fn active(&self) -> &[Block] {
        &self.active
    }

    /// Live ledger at the head.
    pub fn ledger(&self) -> &WalletLedger {
        &self.ledger
    }

    /// Whether a block with this hash is stored (on any branch).
    pub fn contains(&self, hash: &str) -> bool {
        self.blocks_by_hash.contains_key(hash)
    }

    /// Look up a stored block by hash.
    pub fn get(&self, hash: &str) -> Option<&Block> {
        self.blocks_by_hash.get(hash)
    }

    /// Every stored block, in no particular order.
    pub fn all_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks_by_hash.values()
    }

    // ── Validation ──────────────────────────────────────────────────────

    /// Full validity check without mutating the store: hash integrity,
    /// parent presence, height continuity, and sequential applicability of
    /// the transactions starting from the parent's post-state.
    pub fn validate_block(&self, block: &Block) -> Result<()> {
        if block.is_genesis() {
            return if block.hash == self.genesis().hash {
                Ok(())
            } else {
                Err(ChainError::ForeignGenesis)
            };
        }
        let parent = self
            .blocks_by_hash
            .get(&block.prev_hash)
            .ok_or(ChainError::UnknownParent)?;
        if block.index != parent.index + 1 {
            return Err(ChainError::NonSequentialIndex {
                got: block.index,
                expected: parent.index + 1,
            });
        }
        if block.compute_hash() != block.hash {
            return Err(ChainError::HashMismatch { index: block.index });
        }
        let mut state = self.state_at(&block.prev_hash)?;
        apply_block(&mut state, block)
    }

    /// Validate a complete candidate chain (genesis..=tip) received during
    /// sync: genesis match, linkage, hash integrity, dense heights, and a
    /// full replay from the genesis state.
    pub fn validate_candidate(&self, blocks: &[Block]) -> bool {
        if blocks.is_empty() || blocks[0].hash != self.genesis().hash {
            return false;
        }
        for (i, block) in blocks.iter().enumerate().skip(1) {
            if block.index != i as u64
                || block.prev_hash != blocks[i - 1].hash
                || block.compute_hash() != block.hash
            {
                return false;
            }
        }
        self.replay(&blocks[1..]).is_ok()
    }

    // ── Fork-choice ─────────────────────────────────────────────────────

    /// Offer a block to the store and run fork-choice.
    ///
    /// Structural failures (hash, parent, height) reject the block without
    /// storing it. An applicability failure while extending the head
    /// discards the block. An applicability failure while replaying a
    /// longer branch abandons the reorganization but leaves the block
    /// stored; the head is never left inconsistent.
    pub fn try_adopt(&mut self, block: Block) -> Result<AdoptOutcome> {
        if block.is_genesis() {
            // Nothing to adopt; a matching genesis is already the root.
            return if block.hash == self.genesis().hash {
                Ok(AdoptOutcome::SideBranch)
            } else {
                Err(ChainError::ForeignGenesis)
            };
        }

        let parent = self
            .blocks_by_hash
            .get(&block.prev_hash)
            .ok_or(ChainError::UnknownParent)?;
        if block.index != parent.index + 1 {
            return Err(ChainError::NonSequentialIndex {
                got: block.index,
                expected: parent.index + 1,
            });
        }
        if block.compute_hash() != block.hash {
            return Err(ChainError::HashMismatch { index: block.index });
        }

        let hash = block.hash.clone();
        self.blocks_by_hash.insert(hash.clone(), block.clone());

        if block.prev_hash == self.head().hash {
            // Direct extension of the active chain.
            let mut state = self.ledger.clone();
            if let Err(e) = apply_block(&mut state, &block) {
                self.blocks_by_hash.remove(&hash);
                return Err(e);
            }
            info!("extending chain with block {} ({})", block.index, block.short_hash());
            self.ledger = state;
            self.active.push(block);
            Ok(AdoptOutcome::Extended)
        } else if block.index > self.height() {
            // A strictly longer rival branch: attempt a reorganization.
            self.reorg_to_tip(&hash)
        } else {
            info!(
                "block {} ({}) stored on side branch, head stays at {}",
                block.index,
                block.short_hash(),
                self.height()
            );
            Ok(AdoptOutcome::SideBranch)
        }
    }

    /// Walk back from the taller of the two blocks until heights match,
    /// then walk both back in lockstep until they meet. Both hashes must
    /// refer to stored blocks.
    pub fn find_common_ancestor(&self, a: &str, b: &str) -> Option<&Block> {
        let mut a = self.blocks_by_hash.get(a)?;
        let mut b = self.blocks_by_hash.get(b)?;
        while a.index > b.index {
            a = self.blocks_by_hash.get(&a.prev_hash)?;
        }
        while b.index > a.index {
            b = self.blocks_by_hash.get(&b.prev_hash)?;
        }
        while a.hash != b.hash {
            a = self.blocks_by_hash.get(&a.prev_hash)?;
            b = self.blocks_by_hash.get(&b.prev_hash)?;
        }
        Some(a)
    }

    /// Adopt a complete candidate chain (sync path). Stores every block of
    /// the candidate and runs fork-choice on its tip; the usual longest-
    /// chain and tie-break rules apply.
    pub fn reorganize_to(&mut self, blocks: &[Block]) -> Result<AdoptOutcome> {
        if blocks.is_empty() {
            return Err(ChainError::EmptyChain);
        }
        if blocks[0].hash != self.genesis().hash {
            return Err(ChainError::ForeignGenesis);
        }
        if blocks.len() == 1 {
            return Ok(AdoptOutcome::SideBranch);
        }
        for (i, block) in blocks.iter().enumerate().skip(1) {
            if block.prev_hash != blocks[i - 1].hash {
                return Err(ChainError::UnknownParent);
            }
            if block.index != blocks[i - 1].index + 1 {
                return Err(ChainError::NonSequentialIndex {
                    got: block.index,
                    expected: blocks[i - 1].index + 1,
                });
            }
            if block.compute_hash() != block.hash {
                return Err(ChainError::HashMismatch { index: block.index });
            }
            self.blocks_by_hash
                .insert(block.hash.clone(), block.clone());
        }
        let tip = &blocks[blocks.len() - 1];
        if tip.hash == self.head().hash {
            return Ok(AdoptOutcome::SideBranch);
        }
        if tip.index > self.height() {
            self.reorg_to_tip(&tip.hash.clone())
        } else {
            Ok(AdoptOutcome::SideBranch)
        }
    }

    /// Replay `blocks` on a fresh copy of the genesis state.
    pub fn replay(&self, blocks: &[Block]) -> Result<WalletLedger> {
        let mut state = self.genesis_state.clone();
        for block in blocks {
            apply_block(&mut state, block)?;
        }
        Ok(state)
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Switch the active chain to the stored branch ending at `tip_hash`.
    ///
    /// On success the rewound transactions that do not reappear on the new
    /// branch are returned for mempool reinjection. On replay failure the
    /// old head stays and the offending branch remains stored.
    fn reorg_to_tip(&mut self, tip_hash: &str) -> Result<AdoptOutcome> {
        let new_active = self.branch_path(tip_hash)?;
        let state = self.replay(&new_active[1..])?;

        let ancestor_index = self
            .find_common_ancestor(&self.head().hash.clone(), tip_hash)
            .map(|b| b.index)
            .unwrap_or(0) as usize;

        let new_ids: HashSet<String> = new_active
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.id()))
            .collect();
        let reinjected: Vec<Transaction> = self.active[ancestor_index + 1..]
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| !new_ids.contains(&tx.id()))
            .cloned()
            .collect();

        info!(
            "reorganized chain: new head {} at height {}, rewound {} blocks, {} txs to reinject",
            &tip_hash[..8.min(tip_hash.len())],
            new_active[new_active.len() - 1].index,
            self.active.len() - 1 - ancestor_index,
            reinjected.len()
        );

        self.active = new_active;
        self.ledger = state;
        Ok(AdoptOutcome::Reorged { reinjected })
    }

    /// Ledger state after the branch ending at `hash`, on any branch.
    /// The head's state is served from the live ledger without a replay.
    fn state_at(&self, hash: &str) -> Result<WalletLedger> {
        if hash == self.head().hash {
            return Ok(self.ledger.clone());
        }
        let path = self.branch_path(hash)?;
        self.replay(&path[1..])
    }

    /// The full path genesis..=tip following `prev_hash` pointers.
    fn branch_path(&self, tip_hash: &str) -> Result<Vec<Block>> {
        let mut path = Vec::new();
        let mut cursor = self
            .blocks_by_hash
            .get(tip_hash)
            .ok_or(ChainError::UnknownParent)?;
        loop {
            path.push(cursor.clone());
            if cursor.is_genesis() {
                break;
            }
            cursor = self
                .blocks_by_hash
                .get(&cursor.prev_hash)
                .ok_or(ChainError::UnknownParent)?;
        }
        path.reverse();
        Ok(path)
    }
}

/// Apply every transaction of `block` to `state` in order, mapping the
/// first failure to a chain error.
fn apply_block(state: &mut WalletLedger, block: &Block) -> Result<()> {
    for tx in &block.transactions {
        state.apply(tx).map_err(|source| {
            warn!(
                "block {} carries a non-applicable transaction: {}",
                block.index, source
            );
            ChainError::NotApplicable {
                index: block.index,
                source,
            }
        })?;
    }
    Ok(())
}
