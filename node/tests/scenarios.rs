//! End-to-end consensus scenarios over an in-process cluster.
//!
//! The harness wires several engines together with a synchronous message
//! "relay": every outbound message cascades to all other nodes, with two
//! fault-injection knobs. `deafen` mirrors the relay's `drop` command (the
//! node stops receiving; its own traffic still propagates) and `isolate`
//! models a full partition (nothing in, nothing out). Timers are collected
//! and fired explicitly, so every scenario is deterministic.

use {
    stakesim_consensus::{
        config::ConsensusConfig,
        engine::{ConsensusEngine, EngineOutput, TimerRequest},
        ledger::{Account, WalletLedger},
        message::{Message, SERVER_ID},
        types::Transaction,
    },
    std::collections::{BTreeMap, HashSet, VecDeque},
};

struct Cluster {
    nodes: Vec<(String, ConsensusEngine)>,
    config: ConsensusConfig,
    accounts: BTreeMap<String, Account>,
    deafened: HashSet<String>,
    isolated: HashSet<String>,
    timers: Vec<(String, TimerRequest)>,
}

impl Cluster {
    fn new(config: ConsensusConfig, accounts: &[(&str, f64, f64)], ids: &[&str]) -> Self {
        let accounts: BTreeMap<String, Account> = accounts
            .iter()
            .map(|(id, balance, stake)| {
                (
                    id.to_string(),
                    Account {
                        balance: *balance,
                        stake: *stake,
                    },
                )
            })
            .collect();
        let mut cluster = Self {
            nodes: Vec::new(),
            config,
            accounts,
            deafened: HashSet::new(),
            isolated: HashSet::new(),
            timers: Vec::new(),
        };
        for id in ids {
            cluster.add_node(id);
        }
        cluster
    }

    /// Bring up another node with the shared genesis state (it has seen
    /// nothing yet, like a process joining late).
    fn add_node(&mut self, id: &str) {
        let engine = ConsensusEngine::new(
            id,
            self.config.clone(),
            WalletLedger::seeded(self.accounts.clone()),
        );
        self.nodes.push((id.to_string(), engine));
    }

    fn engine(&self, id: &str) -> &ConsensusEngine {
        &self
            .nodes
            .iter()
            .find(|(node_id, _)| node_id == id)
            .expect("unknown node")
            .1
    }

    fn engine_mut(&mut self, id: &str) -> &mut ConsensusEngine {
        &mut self
            .nodes
            .iter_mut()
            .find(|(node_id, _)| node_id == id)
            .expect("unknown node")
            .1
    }

    /// Relay-style drop: `id` stops receiving deliveries.
    fn deafen(&mut self, id: &str) {
        self.deafened.insert(id.to_string());
    }

    /// Full partition: nothing reaches `id`, nothing leaves it.
    fn isolate(&mut self, id: &str) {
        self.isolated.insert(id.to_string());
    }

    fn reconnect(&mut self, id: &str) {
        self.isolated.remove(id);
    }

    /// Run a command on one node and cascade whatever it produced.
    fn command(
        &mut self,
        id: &str,
        run: impl FnOnce(&mut ConsensusEngine) -> EngineOutput,
    ) -> EngineOutput {
        let output = run(self.engine_mut(id));
        let mut queue = VecDeque::new();
        self.enqueue(id, output.clone(), &mut queue);
        self.pump(queue);
        output
    }

    /// Deliver a relay `Step` to every reachable node, in node order.
    fn step(&mut self) {
        for i in 0..self.nodes.len() {
            let id = self.nodes[i].0.clone();
            if self.deafened.contains(&id) || self.isolated.contains(&id) {
                continue;
            }
            let output = self.nodes[i].1.handle_message(SERVER_ID, Message::Step);
            let mut queue = VecDeque::new();
            self.enqueue(&id, output, &mut queue);
            self.pump(queue);
        }
    }

    /// Fire every timer armed by `id` (vote timeouts and sync deadlines).
    fn fire_timers(&mut self, id: &str) {
        let due: Vec<TimerRequest> = {
            let mut due = Vec::new();
            self.timers.retain(|(owner, timer)| {
                if owner == id {
                    due.push(timer.clone());
                    false
                } else {
                    true
                }
            });
            due
        };
        for timer in due {
            let output = match &timer {
                TimerRequest::VoteTimeout { block_hash, .. } => {
                    self.engine_mut(id).on_vote_timeout(block_hash)
                }
                TimerRequest::SyncDeadline { .. } => self.engine_mut(id).on_sync_deadline(),
            };
            let mut queue = VecDeque::new();
            self.enqueue(id, output, &mut queue);
            self.pump(queue);
        }
    }

    fn enqueue(
        &mut self,
        sender: &str,
        output: EngineOutput,
        queue: &mut VecDeque<(String, Message)>,
    ) {
        for timer in output.timers {
            self.timers.push((sender.to_string(), timer));
        }
        if self.isolated.contains(sender) {
            return;
        }
        for message in output.outbound {
            queue.push_back((sender.to_string(), message));
        }
    }

    fn pump(&mut self, mut queue: VecDeque<(String, Message)>) {
        while let Some((sender, message)) = queue.pop_front() {
            for i in 0..self.nodes.len() {
                let id = self.nodes[i].0.clone();
                if id == sender
                    || self.deafened.contains(&id)
                    || self.isolated.contains(&id)
                    || self.isolated.contains(&sender)
                {
                    continue;
                }
                let output = self.nodes[i].1.handle_message(&sender, message.clone());
                self.enqueue(&id, output, &mut queue);
            }
        }
    }
}

/// Pull the transaction out of a command's outbound messages.
fn sent_tx(output: &EngineOutput) -> Transaction {
    output
        .outbound
        .iter()
        .find_map(|m| match m {
            Message::Transaction(tx) => Some(tx.clone()),
            _ => None,
        })
        .expect("command should have broadcast a transaction")
}

// ── S1: single transfer over two relay steps ────────────────────────────────

#[test]
fn single_transfer_across_steps() {
    let accounts = [("node1", 100.0, 0.0), ("node2", 100.0, 0.0)];
    let mut cluster = Cluster::new(ConsensusConfig::default(), &accounts, &["node1", "node2"]);

    cluster.command("node1", |e| e.stake(10.0).unwrap());
    cluster.step();
    assert_eq!(cluster.engine("node1").chain().height(), 1);
    assert_eq!(cluster.engine("node2").chain().height(), 1);

    cluster.command("node1", |e| e.transfer("node2", 10.0).unwrap());
    cluster.step();

    for id in ["node1", "node2"] {
        let chain = cluster.engine(id).chain();
        assert_eq!(chain.height(), 2, "{id} should be at height 2");
        assert_eq!(chain.ledger().balance("node2"), 110.0);
        assert_eq!(chain.ledger().balance("node1"), 80.0);
        assert_eq!(chain.ledger().stake("node1"), 10.0);
    }
    // Both peers agree on the head and the ledger.
    assert_eq!(
        cluster.engine("node1").chain().head().hash,
        cluster.engine("node2").chain().head().hash
    );
    assert_eq!(
        cluster.engine("node1").chain().ledger(),
        cluster.engine("node2").chain().ledger()
    );
}

// ── S2 + S3: equal-height fork, then longer-branch switch ───────────────────

#[test]
fn fork_stays_sided_until_longer_then_reorgs_with_mempool_recovery() {
    let accounts = [("node1", 100.0, 0.0), ("node2", 100.0, 0.0)];
    let mut cluster = Cluster::new(ConsensusConfig::default(), &accounts, &["node1", "node2"]);

    // Both stake 10; one step commits both stake transactions.
    cluster.command("node1", |e| e.stake(10.0).unwrap());
    cluster.command("node2", |e| e.stake(10.0).unwrap());
    cluster.step();
    assert_eq!(cluster.engine("node1").chain().height(), 1);
    assert_eq!(cluster.engine("node1").chain().ledger().stake("node1"), 10.0);
    assert_eq!(cluster.engine("node1").chain().ledger().stake("node2"), 10.0);

    // node2 stops receiving; both forge rivals at the same height.
    cluster.deafen("node2");
    let tx5 = sent_tx(&cluster.command("node1", |e| e.transfer("node2", 5.0).unwrap()));
    cluster.command("node1", |e| e.forge(true).unwrap());
    let tx7 = sent_tx(&cluster.command("node2", |e| e.transfer("node1", 7.0).unwrap()));
    cluster.command("node2", |e| e.forge(true).unwrap());

    // S2: node1 saw node2's rival block but keeps its own head.
    let node1_chain = cluster.engine("node1").chain();
    let node2_head = cluster.engine("node2").chain().head().hash.clone();
    assert_eq!(node1_chain.height(), 2);
    assert_eq!(node1_chain.head().validator, "node1");
    assert!(
        node1_chain.contains(&node2_head),
        "rival block must be stored as a side branch"
    );
    assert_ne!(node1_chain.head().hash, node2_head);

    // S3: node2 extends its branch past node1's head.
    let tx3 = sent_tx(&cluster.command("node2", |e| e.transfer("node1", 3.0).unwrap()));
    cluster.command("node2", |e| e.forge(true).unwrap());

    // node1 switched to the longer branch.
    assert_eq!(
        cluster.engine("node1").chain().head().hash,
        cluster.engine("node2").chain().head().hash
    );
    assert_eq!(cluster.engine("node1").chain().height(), 3);

    // node1's rewound transfer is back in its mempool; the transactions
    // finalized on the new branch are not.
    let mempool = cluster.engine("node1").mempool();
    assert!(mempool.contains(&tx5), "rewound tx must be reinjected");
    assert!(!mempool.contains(&tx7));
    assert!(!mempool.contains(&tx3));
    // The mempool never overlaps the active chain.
    let node1 = cluster.engine("node1");
    let on_chain: HashSet<String> = node1
        .chain()
        .active()
        .iter()
        .flat_map(|b| b.transactions.iter().map(|tx| tx.id()))
        .collect();
    assert!(node1.mempool().iter().all(|tx| !on_chain.contains(&tx.id())));
}

// ── S4: double-spend across a reorg ─────────────────────────────────────────

#[test]
fn double_spend_resolves_to_exactly_one_branch() {
    let accounts = [
        ("node1", 100.0, 0.0),
        ("node2", 100.0, 0.0),
        ("node3", 100.0, 0.0),
    ];
    let mut cluster = Cluster::new(
        ConsensusConfig::default(),
        &accounts,
        &["node1", "node2", "node3"],
    );

    // node1, fully partitioned, spends 30 on node2 and forges block X.
    cluster.isolate("node1");
    let tx_to_node2 = sent_tx(&cluster.command("node1", |e| e.transfer("node2", 30.0).unwrap()));
    cluster.command("node1", |e| e.forge(true).unwrap());
    assert_eq!(cluster.engine("node1").chain().height(), 1);
    assert_eq!(cluster.engine("node1").chain().ledger().balance("node2"), 130.0);

    // Meanwhile node3 builds two blocks the rest of the network adopts.
    cluster.command("node3", |e| e.transfer("node2", 5.0).unwrap());
    cluster.command("node3", |e| e.forge(true).unwrap());
    cluster.command("node3", |e| e.transfer("node2", 7.0).unwrap());
    cluster.command("node3", |e| e.forge(true).unwrap());
    assert_eq!(cluster.engine("node2").chain().height(), 2);
    assert_eq!(cluster.engine("node1").chain().height(), 1);

    // node1 reconnects and double-spends the same 30 towards node3.
    cluster.reconnect("node1");
    cluster.command("node1", |e| e.transfer("node3", 30.0).unwrap());
    cluster.command("node3", |e| e.forge(true).unwrap());

    // The longest chain's tip has an unknown parent for node1, so only a
    // sync can move it over.
    assert_eq!(cluster.engine("node1").chain().height(), 1);
    cluster.command("node1", |e| e.request_sync());
    cluster.fire_timers("node1");

    let node1 = cluster.engine("node1");
    assert_eq!(
        node1.chain().head().hash,
        cluster.engine("node3").chain().head().hash
    );
    // Exactly one of the two 30-token spends is finalized.
    assert_eq!(node1.chain().ledger().balance("node1"), 70.0);
    // node2 lost the credit from the discarded block X.
    assert_eq!(node1.chain().ledger().balance("node2"), 112.0);
    assert_eq!(node1.chain().ledger().balance("node3"), 118.0);
    // The discarded transfer is back in the mempool.
    assert!(node1.mempool().contains(&tx_to_node2));
}

// ── S5: voting quorum failure ───────────────────────────────────────────────

#[test]
fn missing_quorum_discards_pending_block() {
    let config = ConsensusConfig {
        vote_enabled: true,
        vote_threshold: 0.8,
        ..ConsensusConfig::default()
    };
    let accounts = [
        ("node1", 100.0, 10.0),
        ("node2", 100.0, 10.0),
        ("node3", 100.0, 10.0),
    ];
    let mut cluster = Cluster::new(config, &accounts, &["node1", "node2", "node3"]);

    // node3 is cut off entirely: its vote can never arrive.
    cluster.isolate("node3");

    cluster.command("node1", |e| e.transfer("node2", 5.0).unwrap());
    cluster.command("node1", |e| e.forge(true).unwrap());

    // Two of three votes collected (forger + node2); quorum is
    // ceil(0.8 × 3) = 3, so nothing is installed.
    assert_eq!(cluster.engine("node1").chain().height(), 0);
    assert_eq!(cluster.engine("node2").chain().height(), 0);

    cluster.fire_timers("node1");
    cluster.fire_timers("node2");

    // The pending block is gone and the head never moved.
    assert_eq!(cluster.engine("node1").chain().height(), 0);
    assert_eq!(cluster.engine("node2").chain().height(), 0);
}

/// Counterpart to S5: with a reachable quorum the same block lands.
#[test]
fn quorum_installs_pending_block_everywhere() {
    let config = ConsensusConfig {
        vote_enabled: true,
        vote_threshold: 0.8,
        ..ConsensusConfig::default()
    };
    let accounts = [
        ("node1", 100.0, 10.0),
        ("node2", 100.0, 10.0),
        ("node3", 100.0, 10.0),
    ];
    let mut cluster = Cluster::new(config, &accounts, &["node1", "node2", "node3"]);

    cluster.command("node1", |e| e.transfer("node2", 5.0).unwrap());
    cluster.command("node1", |e| e.forge(true).unwrap());

    for id in ["node1", "node2", "node3"] {
        assert_eq!(cluster.engine(id).chain().height(), 1, "{id} should confirm");
        assert_eq!(cluster.engine(id).chain().ledger().balance("node2"), 105.0);
    }
}

// ── S6: sync on startup ─────────────────────────────────────────────────────

#[test]
fn late_node_syncs_to_live_chain() {
    let accounts = [("node1", 100.0, 10.0), ("node2", 100.0, 0.0)];
    let mut cluster = Cluster::new(ConsensusConfig::default(), &accounts, &["node1"]);

    for i in 0..5 {
        cluster.command("node1", |e| e.transfer("sink", 1.0 + i as f64).unwrap());
        cluster.command("node1", |e| e.forge(true).unwrap());
    }
    assert_eq!(cluster.engine("node1").chain().height(), 5);

    // node2 joins with an empty chain and syncs.
    cluster.add_node("node2");
    cluster.command("node2", |e| e.request_sync());
    cluster.fire_timers("node2");

    let node1 = cluster.engine("node1");
    let node2 = cluster.engine("node2");
    assert_eq!(node2.chain().head().hash, node1.chain().head().hash);
    assert_eq!(node2.chain().height(), 5);
    // node2's wallet equals the replay of the chain from genesis.
    assert_eq!(node2.chain().ledger(), node1.chain().ledger());

    // Syncing again with no network changes is a no-op.
    let head_before = node2.chain().head().hash.clone();
    cluster.command("node2", |e| e.request_sync());
    cluster.fire_timers("node2");
    assert_eq!(cluster.engine("node2").chain().head().hash, head_before);
}
