//! Block and transaction records with their canonical hashing contract.
//!
//! Both records are immutable value types. A block's `hash` field is the
//! hex-encoded SHA-256 digest of a canonical binary encoding of its other
//! fields; a transaction's identity is the full
//! `(sender, receiver, amount, timestamp, kind)` tuple, digested the same
//! way by [`Transaction::id`]. The encoding is length-prefixed so that no
//! two distinct field tuples can produce the same byte stream, and every
//! peer derives the same digest from the same record.

use {
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::time::{SystemTime, UNIX_EPOCH},
};

/// Wall-clock seconds since the Unix epoch, as a real number.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Feed a string into the hasher as `u64-le length || utf-8 bytes`.
fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

// ── Transactions ────────────────────────────────────────────────────────────

/// The three supported transaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    /// Move tokens from `sender`'s balance to `receiver`'s balance.
    Transfer,
    /// Lock part of `sender`'s balance as stake. `receiver` is ignored.
    Stake,
    /// Release part of `sender`'s stake back to its balance.
    Unstake,
}

impl TxKind {
    /// One-byte tag used by the canonical encoding.
    fn tag(self) -> u8 {
        match self {
            TxKind::Transfer => 0,
            TxKind::Stake => 1,
            TxKind::Unstake => 2,
        }
    }
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxKind::Transfer => write!(f, "transfer"),
            TxKind::Stake => write!(f, "stake"),
            TxKind::Unstake => write!(f, "unstake"),
        }
    }
}

/// A pending or committed value transfer between two accounts.
///
/// Identity is the full field tuple: the mempool treats two transactions
/// with equal fields as the same item, keyed by [`Transaction::id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Originating account id.
    pub sender: String,
    /// Destination account id (ignored for stake/unstake).
    pub receiver: String,
    /// Amount moved; must be strictly positive to be applicable.
    pub amount: f64,
    /// Creation time, used for ordering and identity.
    pub timestamp: f64,
    /// What the transaction does.
    pub kind: TxKind,
}

impl Transaction {
    /// Create a transaction stamped with the current wall-clock time.
    pub fn new(sender: &str, receiver: &str, amount: f64, kind: TxKind) -> Self {
        Self::with_timestamp(sender, receiver, amount, unix_now(), kind)
    }

    /// Create a transaction with an explicit timestamp.
    pub fn with_timestamp(
        sender: &str,
        receiver: &str,
        amount: f64,
        timestamp: f64,
        kind: TxKind,
    ) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            amount,
            timestamp,
            kind,
        }
    }

    /// Hex SHA-256 digest of the identity tuple. Stable across peers.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        self.write_canonical(&mut hasher);
        hex::encode(hasher.finalize())
    }

    /// Feed the canonical encoding of the identity tuple into `hasher`.
    fn write_canonical(&self, hasher: &mut Sha256) {
        hash_str(hasher, &self.sender);
        hash_str(hasher, &self.receiver);
        hasher.update(self.amount.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update([self.kind.tag()]);
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {} amount {}",
            self.kind, self.sender, self.receiver, self.amount
        )
    }
}

// ── Blocks ──────────────────────────────────────────────────────────────────

/// A forged block.
///
/// `hash` is always the canonical digest of the remaining fields; blocks
/// received from the wire are re-checked against [`Block::compute_hash`]
/// before entering the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Height; genesis is 0.
    pub index: u64,
    /// Parent block's `hash`; empty for genesis.
    pub prev_hash: String,
    /// Hex digest over `(index, prev_hash, validator, transactions, timestamp)`.
    pub hash: String,
    /// Account id of the forger; empty for genesis.
    pub validator: String,
    /// Ordered transactions; order is significant for state replay.
    pub transactions: Vec<Transaction>,
    /// Forging time.
    pub timestamp: f64,
}

impl Block {
    /// Forge a block at the current wall-clock time. The hash is computed
    /// and sealed here.
    pub fn forge(
        index: u64,
        prev_hash: &str,
        validator: &str,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self::with_timestamp(index, prev_hash, validator, transactions, unix_now())
    }

    /// Forge a block with an explicit timestamp.
    pub fn with_timestamp(
        index: u64,
        prev_hash: &str,
        validator: &str,
        transactions: Vec<Transaction>,
        timestamp: f64,
    ) -> Self {
        let mut block = Self {
            index,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
            validator: validator.to_string(),
            transactions,
            timestamp,
        };
        block.hash = block.compute_hash();
        block
    }

    /// The genesis block every peer starts from. Identical everywhere.
    pub fn genesis() -> Self {
        Self::with_timestamp(0, "", "", Vec::new(), 0.0)
    }

    /// Whether this is the height-0 block.
    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Recompute the canonical digest from the block's fields.
    ///
    /// Field order matches the hashing contract:
    /// `(index, prev_hash, validator, transactions, timestamp)`, each
    /// transaction contributing its full identity tuple in list order.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hash_str(&mut hasher, &self.prev_hash);
        hash_str(&mut hasher, &self.validator);
        hasher.update((self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            tx.write_canonical(&mut hasher);
        }
        hasher.update(self.timestamp.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Shortened hash for log lines.
    pub fn short_hash(&self) -> &str {
        self.hash.get(..8).unwrap_or(&self.hash)
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Block {} | hash={}... | validator={} | txs={}",
            self.index,
            self.short_hash(),
            self.validator,
            self.transactions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(sender: &str, receiver: &str, amount: f64, ts: f64) -> Transaction {
        Transaction::with_timestamp(sender, receiver, amount, ts, TxKind::Transfer)
    }

    #[test]
    fn test_genesis_is_identical_everywhere() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.index, 0);
        assert!(a.prev_hash.is_empty());
        assert!(a.validator.is_empty());
        assert!(a.is_genesis());
    }

    #[test]
    fn test_block_hash_matches_compute_hash() {
        let genesis = Block::genesis();
        let block = Block::with_timestamp(
            1,
            &genesis.hash,
            "node1",
            vec![transfer("node1", "node2", 5.0, 10.0)],
            11.0,
        );
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_block_hash_changes_with_every_field() {
        let base = Block::with_timestamp(1, "parent", "node1", vec![], 10.0);
        let other_index = Block::with_timestamp(2, "parent", "node1", vec![], 10.0);
        let other_parent = Block::with_timestamp(1, "parent2", "node1", vec![], 10.0);
        let other_validator = Block::with_timestamp(1, "parent", "node2", vec![], 10.0);
        let other_time = Block::with_timestamp(1, "parent", "node1", vec![], 12.0);
        let other_txs = Block::with_timestamp(
            1,
            "parent",
            "node1",
            vec![transfer("a", "b", 1.0, 1.0)],
            10.0,
        );
        for other in [
            other_index,
            other_parent,
            other_validator,
            other_time,
            other_txs,
        ] {
            assert_ne!(base.hash, other.hash);
        }
    }

    #[test]
    fn test_transaction_order_is_significant() {
        let t1 = transfer("a", "b", 1.0, 1.0);
        let t2 = transfer("b", "c", 2.0, 2.0);
        let forward = Block::with_timestamp(1, "p", "v", vec![t1.clone(), t2.clone()], 5.0);
        let reversed = Block::with_timestamp(1, "p", "v", vec![t2, t1], 5.0);
        assert_ne!(forward.hash, reversed.hash);
    }

    #[test]
    fn test_tx_identity_covers_kind() {
        let transfer = Transaction::with_timestamp("a", "a", 3.0, 7.0, TxKind::Stake);
        let unstake = Transaction::with_timestamp("a", "a", 3.0, 7.0, TxKind::Unstake);
        assert_ne!(transfer.id(), unstake.id());
    }

    #[test]
    fn test_tx_identity_is_stable() {
        let tx = transfer("node1", "node2", 12.5, 99.25);
        assert_eq!(tx.id(), tx.clone().id());
    }

    #[test]
    fn test_string_fields_are_length_prefixed() {
        // "ab"+"c" and "a"+"bc" must not collide.
        let t1 = transfer("ab", "c", 1.0, 1.0);
        let t2 = transfer("a", "bc", 1.0, 1.0);
        assert_ne!(t1.id(), t2.id());
    }
}
