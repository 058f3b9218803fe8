//! Vote tracking for the optional block-confirmation sub-protocol.
//!
//! When voting is enabled, a received block is held *pending* until a
//! quorum of distinct staked validators has voted for its hash, or until
//! its timer expires. Votes that arrive before their block are buffered by
//! hash and drained when the block shows up; if it never does, the buffer
//! entry is dropped on the same timeout path.

use {
    crate::types::Block,
    log::debug,
    std::collections::{HashMap, HashSet},
};

/// Distinct voters required: `ceil(threshold × validator_count)`, never
/// below one.
pub fn quorum_size(threshold: f64, validator_count: usize) -> usize {
    let count = validator_count.max(1);
    let needed = (threshold * count as f64).ceil() as usize;
    needed.max(1)
}

/// What recording a vote did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The vote was counted; the tally for the block is attached.
    Counted(usize),
    /// The voter had already voted for this block.
    Duplicate,
    /// No pending block with this hash; the vote was buffered.
    Buffered,
}

#[derive(Debug, Default)]
struct PendingBlock {
    block: Block,
    voters: HashSet<String>,
}

/// Per-candidate-block vote bookkeeping.
#[derive(Debug, Default)]
pub struct VoteTracker {
    pending: HashMap<String, PendingBlock>,
    early: HashMap<String, HashSet<String>>,
}

impl VoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a block with this hash is awaiting quorum.
    pub fn is_pending(&self, hash: &str) -> bool {
        self.pending.contains_key(hash)
    }

    /// Number of distinct voters recorded for a pending block.
    pub fn votes_for(&self, hash: &str) -> usize {
        self.pending.get(hash).map(|p| p.voters.len()).unwrap_or(0)
    }

    /// Hold a block until its votes reach quorum. Early votes buffered for
    /// its hash are drained into the tally. Replaces nothing: a block
    /// already pending keeps its collected votes.
    pub fn stash(&mut self, block: Block) {
        let hash = block.hash.clone();
        let entry = self
            .pending
            .entry(hash.clone())
            .or_insert_with(|| PendingBlock {
                block,
                voters: HashSet::new(),
            });
        if let Some(early) = self.early.remove(&hash) {
            debug!(
                "draining {} buffered early votes for block {}",
                early.len(),
                &hash[..8.min(hash.len())]
            );
            entry.voters.extend(early);
        }
    }

    /// Record a vote. Duplicate votes are ignored; votes for unknown
    /// blocks are buffered for a possible late arrival.
    pub fn record(&mut self, hash: &str, voter: &str) -> VoteOutcome {
        match self.pending.get_mut(hash) {
            Some(entry) => {
                if entry.voters.insert(voter.to_string()) {
                    VoteOutcome::Counted(entry.voters.len())
                } else {
                    VoteOutcome::Duplicate
                }
            }
            None => {
                self.early
                    .entry(hash.to_string())
                    .or_default()
                    .insert(voter.to_string());
                VoteOutcome::Buffered
            }
        }
    }

    /// Remove and return a pending block (quorum reached).
    pub fn take(&mut self, hash: &str) -> Option<Block> {
        self.early.remove(hash);
        self.pending.remove(hash).map(|p| p.block)
    }

    /// Drop a pending block and its buffered votes (timeout). Returns the
    /// discarded block if there was one.
    pub fn expire(&mut self, hash: &str) -> Option<Block> {
        self.early.remove(hash);
        self.pending.remove(hash).map(|p| p.block)
    }

    /// Whether early votes are buffered for this hash.
    pub fn has_early(&self, hash: &str) -> bool {
        self.early.contains_key(hash)
    }
}
