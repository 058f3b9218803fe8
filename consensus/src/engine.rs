//! The consensus state machine.
//!
//! The engine owns the chain store, the mempool, the vote tracker, and the
//! sync session, and is the single place any of them is mutated. It is
//! deterministic and I/O-free: inbound messages, commands, and timer
//! expirations come in through method calls; outbound messages and timer
//! requests come back in an [`EngineOutput`] for the hosting runtime to
//! execute. Forging, voting, acceptance, and reorganization are therefore
//! atomic with respect to one another.

use {
    crate::{
        chain::{AdoptOutcome, ChainStore},
        config::ConsensusConfig,
        election,
        error::{EngineError, Result},
        ledger::WalletLedger,
        mempool::Mempool,
        message::{Message, SERVER_ID},
        types::{Block, Transaction, TxKind},
        votes::{quorum_size, VoteOutcome, VoteTracker},
    },
    log::{debug, info, warn},
    std::collections::BTreeSet,
};

/// A timer the hosting runtime must arm; expiry is delivered back through
/// [`ConsensusEngine::on_vote_timeout`] / [`ConsensusEngine::on_sync_deadline`].
#[derive(Debug, Clone, PartialEq)]
pub enum TimerRequest {
    /// Discard the pending block (or its early-vote buffer) if still
    /// unresolved when the timer fires.
    VoteTimeout { block_hash: String, seconds: f64 },
    /// Close the sync collection window.
    SyncDeadline { seconds: f64 },
}

/// Result of processing one input: what to send, what to arm, and whether
/// the head moved or the node should shut down.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EngineOutput {
    /// Messages to broadcast through the relay.
    pub outbound: Vec<Message>,
    /// Timers to arm.
    pub timers: Vec<TimerRequest>,
    /// The active chain's head changed (persist the chain).
    pub head_changed: bool,
    /// The node should disconnect and exit.
    pub shutdown: bool,
}

impl EngineOutput {
    fn merge(&mut self, other: EngineOutput) {
        self.outbound.extend(other.outbound);
        self.timers.extend(other.timers);
        self.head_changed |= other.head_changed;
        self.shutdown |= other.shutdown;
    }
}

/// The per-node consensus state machine.
pub struct ConsensusEngine {
    identity: String,
    config: ConsensusConfig,
    chain: ChainStore,
    mempool: Mempool,
    votes: VoteTracker,
    known_nodes: BTreeSet<String>,
    sync_in_progress: bool,
    sync_responses: Vec<(String, Vec<Block>)>,
}

impl ConsensusEngine {
    /// A fresh engine starting from genesis with the given seed state.
    pub fn new(identity: &str, config: ConsensusConfig, genesis_state: WalletLedger) -> Self {
        Self::with_chain(identity, config, ChainStore::new(genesis_state))
    }

    /// An engine resuming from a previously built chain store (persistence).
    pub fn with_chain(identity: &str, config: ConsensusConfig, chain: ChainStore) -> Self {
        let mut known_nodes = BTreeSet::new();
        known_nodes.insert(identity.to_string());
        Self {
            identity: identity.to_string(),
            config,
            chain,
            mempool: Mempool::new(),
            votes: VoteTracker::new(),
            known_nodes,
            sync_in_progress: false,
            sync_responses: Vec::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn chain(&self) -> &ChainStore {
        &self.chain
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn known_nodes(&self) -> &BTreeSet<String> {
        &self.known_nodes
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_in_progress
    }

    // ── Inbound messages ────────────────────────────────────────────────

    /// Feed one inbound message through the state machine.
    pub fn handle_message(&mut self, sender: &str, message: Message) -> EngineOutput {
        debug!("handling {} from {sender}", message.kind());
        match message {
            Message::Hello => self.on_hello(sender),
            Message::Bye => self.on_bye(sender),
            Message::Step => self.on_step(),
            Message::Transaction(tx) => self.on_transaction(tx),
            Message::Block(block) => self.on_block(block),
            Message::BlockVote {
                voter_id,
                block_hash,
            } => self.on_block_vote(&voter_id, &block_hash),
            Message::SyncRequest => self.on_sync_request(sender),
            Message::SyncResponse { blocks } => self.on_sync_response(sender, blocks),
        }
    }

    fn on_hello(&mut self, sender: &str) -> EngineOutput {
        info!("node {sender} joined");
        self.known_nodes.insert(sender.to_string());
        EngineOutput::default()
    }

    fn on_bye(&mut self, sender: &str) -> EngineOutput {
        if sender == SERVER_ID {
            info!("relay is shutting down, exiting");
            return EngineOutput {
                shutdown: true,
                ..EngineOutput::default()
            };
        }
        info!("node {sender} left");
        self.known_nodes.remove(sender);
        EngineOutput::default()
    }

    fn on_step(&mut self) -> EngineOutput {
        match election::elect_validator(self.chain.ledger(), &self.chain.head().hash) {
            Some(winner) if winner == self.identity => match self.forge(false) {
                Ok(output) => output,
                Err(EngineError::NothingToForge) => {
                    info!("selected to forge but the mempool is empty");
                    EngineOutput::default()
                }
                Err(e) => {
                    warn!("forging after step failed: {e}");
                    EngineOutput::default()
                }
            },
            Some(winner) => {
                info!(
                    "not selected to forge this block (selected validator: {winner})"
                );
                EngineOutput::default()
            }
            None => {
                warn!("no validator could be elected at the current head");
                EngineOutput::default()
            }
        }
    }

    fn on_transaction(&mut self, tx: Transaction) -> EngineOutput {
        if tx.sender == self.identity {
            // Our own broadcast coming back around.
            return EngineOutput::default();
        }
        if let Err(e) = self.chain.ledger().check(&tx) {
            warn!("rejected {} from {}: {e}", tx.kind, tx.sender);
            return EngineOutput::default();
        }
        if self.mempool.insert(tx.clone()) {
            info!("queued {tx}");
        }
        EngineOutput::default()
    }

    fn on_block(&mut self, block: Block) -> EngineOutput {
        if self.chain.contains(&block.hash) {
            return EngineOutput::default();
        }
        if self.config.vote_enabled {
            if let Err(e) = self.chain.validate_block(&block) {
                warn!("block {} failed validation: {e}", block.index);
                return EngineOutput::default();
            }
            self.admit_pending(block)
        } else {
            self.install(block)
        }
    }

    fn on_block_vote(&mut self, voter_id: &str, block_hash: &str) -> EngineOutput {
        if !self.config.vote_enabled {
            debug!("ignoring block vote from {voter_id}: voting disabled");
            return EngineOutput::default();
        }
        if self.chain.ledger().stake(voter_id) <= 0.0 {
            warn!("ignoring block vote from {voter_id}: not a validator");
            return EngineOutput::default();
        }
        if self.chain.contains(block_hash) {
            // Quorum already reached and the block installed.
            return EngineOutput::default();
        }
        let first_for_hash = !self.votes.is_pending(block_hash) && !self.votes.has_early(block_hash);
        match self.votes.record(block_hash, voter_id) {
            VoteOutcome::Duplicate => EngineOutput::default(),
            VoteOutcome::Counted(tally) => {
                info!(
                    "vote from {voter_id} for block {}: {tally} collected",
                    &block_hash[..8.min(block_hash.len())]
                );
                self.check_quorum(block_hash)
            }
            VoteOutcome::Buffered => {
                debug!("buffered early vote from {voter_id} for unknown block");
                let mut output = EngineOutput::default();
                if first_for_hash {
                    // Bound the buffer's lifetime with the usual vote timer.
                    output.timers.push(TimerRequest::VoteTimeout {
                        block_hash: block_hash.to_string(),
                        seconds: self.config.vote_timeout,
                    });
                }
                output
            }
        }
    }

    fn on_sync_request(&mut self, sender: &str) -> EngineOutput {
        info!("received sync request from {sender}, sending chain");
        EngineOutput {
            outbound: vec![Message::SyncResponse {
                blocks: self.chain.active().to_vec(),
            }],
            ..EngineOutput::default()
        }
    }

    fn on_sync_response(&mut self, sender: &str, blocks: Vec<Block>) -> EngineOutput {
        self.known_nodes.insert(sender.to_string());
        if !self.sync_in_progress {
            debug!("sync response from {sender} outside a sync window, ignoring");
            return EngineOutput::default();
        }
        info!(
            "collected sync response from {sender}: {} blocks",
            blocks.len()
        );
        self.sync_responses.push((sender.to_string(), blocks));
        EngineOutput::default()
    }

    // ── Commands ────────────────────────────────────────────────────────

    /// Create, validate, pool, and broadcast a transfer.
    pub fn transfer(&mut self, receiver: &str, amount: f64) -> Result<EngineOutput> {
        self.create_transaction(receiver, amount, TxKind::Transfer)
    }

    /// Lock part of our balance as stake.
    pub fn stake(&mut self, amount: f64) -> Result<EngineOutput> {
        let identity = self.identity.clone();
        self.create_transaction(&identity, amount, TxKind::Stake)
    }

    /// Release part of our stake.
    pub fn unstake(&mut self, amount: f64) -> Result<EngineOutput> {
        let identity = self.identity.clone();
        self.create_transaction(&identity, amount, TxKind::Unstake)
    }

    fn create_transaction(
        &mut self,
        receiver: &str,
        amount: f64,
        kind: TxKind,
    ) -> Result<EngineOutput> {
        let tx = Transaction::new(&self.identity, receiver, amount, kind);
        self.chain.ledger().check(&tx)?;
        self.mempool.insert(tx.clone());
        info!("sent {tx}");
        Ok(EngineOutput {
            outbound: vec![Message::Transaction(tx)],
            ..EngineOutput::default()
        })
    }

    /// Forge a block from the mempool and broadcast it.
    ///
    /// Without `force`, the election at the current head must select us.
    /// `force` bypasses the election check only; the applicability filter
    /// still runs.
    pub fn forge(&mut self, force: bool) -> Result<EngineOutput> {
        if force {
            warn!("forcing block forge, skipping validator check");
        } else {
            let selected =
                election::elect_validator(self.chain.ledger(), &self.chain.head().hash);
            if selected.as_deref() != Some(self.identity.as_str()) {
                return Err(EngineError::NotValidator { selected });
            }
        }

        let batch = self
            .mempool
            .select_applicable(self.chain.ledger(), self.config.max_block_txs);
        if batch.is_empty() {
            return Err(EngineError::NothingToForge);
        }

        let head = self.chain.head();
        let block = Block::forge(head.index + 1, &head.hash, &self.identity, batch);
        info!(
            "forged block {} ({}) with {} transactions",
            block.index,
            block.short_hash(),
            block.transactions.len()
        );

        let mut output = EngineOutput {
            outbound: vec![Message::Block(block.clone())],
            ..EngineOutput::default()
        };
        if self.config.vote_enabled {
            // Our own block goes through the same confirmation gate as
            // everyone else's.
            output.merge(self.admit_pending(block));
        } else {
            output.merge(self.install(block));
        }
        Ok(output)
    }

    /// Start (or restart) a sync session: solicit chains from every peer
    /// and arm the collection deadline.
    pub fn request_sync(&mut self) -> EngineOutput {
        self.sync_responses.clear();
        self.sync_in_progress = true;
        info!("sent sync request to the network");
        EngineOutput {
            outbound: vec![Message::SyncRequest],
            timers: vec![TimerRequest::SyncDeadline {
                seconds: self.config.sync_timeout,
            }],
            ..EngineOutput::default()
        }
    }

    // ── Timer expirations ───────────────────────────────────────────────

    /// The confirmation window for a pending block (or the lifetime of an
    /// early-vote buffer) elapsed.
    pub fn on_vote_timeout(&mut self, block_hash: &str) -> EngineOutput {
        if let Some(block) = self.votes.expire(block_hash) {
            if !self.chain.contains(block_hash) {
                warn!(
                    "vote timeout for block {} ({}), discarding pending state",
                    block.index,
                    block.short_hash()
                );
            }
        }
        EngineOutput::default()
    }

    /// The sync collection window closed: pick the longest valid chain
    /// among the responses and the local chain, ties keeping local.
    pub fn on_sync_deadline(&mut self) -> EngineOutput {
        if !self.sync_in_progress {
            return EngineOutput::default();
        }
        self.sync_in_progress = false;
        let responses = std::mem::take(&mut self.sync_responses);
        if responses.is_empty() {
            warn!("no sync responses received, keeping local chain");
            return EngineOutput::default();
        }

        let mut best: Option<(String, Vec<Block>)> = None;
        let mut best_len = self.chain.active().len();
        for (sender, blocks) in responses {
            let head = blocks.last().map(|b| b.short_hash()).unwrap_or("-");
            info!(
                "sync response from {sender}: length {} head {head}",
                blocks.len()
            );
            if blocks.len() > best_len && self.chain.validate_candidate(&blocks) {
                best_len = blocks.len();
                best = Some((sender, blocks));
            }
        }

        let Some((sender, blocks)) = best else {
            info!("local chain is already the best known chain");
            return EngineOutput::default();
        };

        info!(
            "adopting chain from {sender}: length {} (local was {})",
            blocks.len(),
            self.chain.active().len()
        );
        match self.chain.reorganize_to(&blocks) {
            Ok(outcome) => EngineOutput {
                head_changed: self.finalize_adoption(outcome),
                ..EngineOutput::default()
            },
            Err(e) => {
                warn!("sync reorganization failed: {e}");
                EngineOutput::default()
            }
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Run fork-choice on a block and settle the mempool accordingly.
    fn install(&mut self, block: Block) -> EngineOutput {
        match self.chain.try_adopt(block.clone()) {
            Ok(outcome) => EngineOutput {
                head_changed: self.finalize_adoption(outcome),
                ..EngineOutput::default()
            },
            Err(e) => {
                warn!("block {} rejected: {e}", block.index);
                EngineOutput::default()
            }
        }
    }

    /// Settle the mempool after the chain store accepted a block or a
    /// candidate chain. Returns whether the head moved.
    fn finalize_adoption(&mut self, outcome: AdoptOutcome) -> bool {
        match outcome {
            AdoptOutcome::Extended => {
                self.mempool.purge_on_chain(self.chain.active());
                true
            }
            AdoptOutcome::Reorged { reinjected } => {
                self.mempool.reinject(reinjected, self.chain.active());
                self.mempool.purge_on_chain(self.chain.active());
                true
            }
            AdoptOutcome::SideBranch => false,
        }
    }

    /// Hold a validated block for confirmation: vote for it if we are a
    /// staked validator, arm its timeout, and install it right away if the
    /// drained early votes already make quorum.
    fn admit_pending(&mut self, block: Block) -> EngineOutput {
        let hash = block.hash.clone();
        let index = block.index;
        self.votes.stash(block);

        let mut output = EngineOutput::default();
        if self.chain.ledger().stake(&self.identity) > 0.0 {
            let identity = self.identity.clone();
            self.votes.record(&hash, &identity);
            output.outbound.push(Message::BlockVote {
                voter_id: identity,
                block_hash: hash.clone(),
            });
            info!(
                "voted to accept block {index} ({})",
                &hash[..8.min(hash.len())]
            );
        }
        output.timers.push(TimerRequest::VoteTimeout {
            block_hash: hash.clone(),
            seconds: self.config.vote_timeout,
        });
        output.merge(self.check_quorum(&hash));
        output
    }

    /// Install a pending block once its distinct-voter tally reaches
    /// `ceil(threshold × |known validators|)`.
    fn check_quorum(&mut self, block_hash: &str) -> EngineOutput {
        if !self.votes.is_pending(block_hash) {
            return EngineOutput::default();
        }
        let validator_count = self.chain.ledger().staked_validators().len();
        let needed = quorum_size(self.config.vote_threshold, validator_count);
        let tally = self.votes.votes_for(block_hash);
        debug!(
            "block {} vote tally {tally}/{needed} ({validator_count} validators)",
            &block_hash[..8.min(block_hash.len())]
        );
        if tally < needed {
            return EngineOutput::default();
        }
        let Some(block) = self.votes.take(block_hash) else {
            return EngineOutput::default();
        };
        info!(
            "block {} confirmed with {tally}/{needed} votes, installing",
            block.index
        );
        self.install(block)
    }
}
