//! Protocol messages exchanged between nodes through the relay.
//!
//! This is the tagged union every frame on the wire carries (wrapped in the
//! transport envelope, which adds the sender id). The networking crate owns
//! serialization and framing; the variants here are the protocol itself.

use {
    crate::types::{Block, Transaction},
    serde::{Deserialize, Serialize},
};

/// Sender id the relay uses for its own messages (steps, shutdown notices).
pub const SERVER_ID: &str = "server";

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Announce presence after connecting.
    Hello,
    /// Announce departure; the relay also emits this on disconnects.
    Bye,
    /// A broadcast pending transaction.
    Transaction(Transaction),
    /// A freshly forged (or relayed) block.
    Block(Block),
    /// Relay-issued tick prompting the elected node to forge.
    Step,
    /// A validator's vote to accept a pending block.
    BlockVote {
        voter_id: String,
        block_hash: String,
    },
    /// Ask every peer for its chain.
    SyncRequest,
    /// A full chain, genesis to head, answering a sync request.
    SyncResponse { blocks: Vec<Block> },
}

impl Message {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello => "hello",
            Message::Bye => "bye",
            Message::Transaction(_) => "transaction",
            Message::Block(_) => "block",
            Message::Step => "step",
            Message::BlockVote { .. } => "block_vote",
            Message::SyncRequest => "sync_request",
            Message::SyncResponse { .. } => "sync_response",
        }
    }
}
