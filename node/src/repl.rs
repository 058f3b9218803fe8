//! The interactive command surface of a node.
//!
//! Commands arrive as text lines (from stdin in the binary, or synthetic
//! lines in tests), run against the consensus engine, and answer on stdout
//! with a success/failure status and a short reason on failure.

use {
    stakesim_consensus::{
        engine::{ConsensusEngine, EngineOutput},
        message::Message,
        types::Block,
    },
    std::collections::HashMap,
};

/// What a dispatched command asks the runtime to do.
#[derive(Debug, PartialEq)]
pub enum ReplOutcome {
    /// The command ran; broadcast/arm whatever the engine returned.
    Handled(Option<EngineOutput>),
    /// The user asked to quit.
    Exit,
}

/// Parse and execute one command line.
pub fn dispatch(engine: &mut ConsensusEngine, line: &str) -> ReplOutcome {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&name, args)) = parts.split_first() else {
        return ReplOutcome::Handled(None);
    };

    match name {
        "tx" => ReplOutcome::Handled(cmd_tx(engine, args)),
        "stake" => ReplOutcome::Handled(cmd_stake(engine, args)),
        "unstake" => ReplOutcome::Handled(cmd_unstake(engine, args)),
        "forge" => ReplOutcome::Handled(cmd_forge(engine, args)),
        "sync" => ReplOutcome::Handled(Some(engine.request_sync())),
        "chain" => {
            print_chain(engine);
            ReplOutcome::Handled(None)
        }
        "wallet" => {
            print_wallet(engine);
            ReplOutcome::Handled(None)
        }
        "mempool" => {
            print_mempool(engine);
            ReplOutcome::Handled(None)
        }
        "nodes" => {
            print_nodes(engine);
            ReplOutcome::Handled(None)
        }
        "info" => {
            println!("Node ID: {}", engine.identity());
            print_nodes(engine);
            print_chain(engine);
            print_wallet(engine);
            print_mempool(engine);
            ReplOutcome::Handled(None)
        }
        "help" => {
            print_help();
            ReplOutcome::Handled(None)
        }
        "exit" => ReplOutcome::Exit,
        other => {
            println!("unknown command: {other}. Type 'help' for available commands.");
            ReplOutcome::Handled(None)
        }
    }
}

fn cmd_tx(engine: &mut ConsensusEngine, args: &[&str]) -> Option<EngineOutput> {
    let [receiver, amount] = args else {
        println!("usage: tx <to> <amount>");
        return None;
    };
    let Ok(amount) = amount.parse::<f64>() else {
        println!("usage: tx <to> <amount>");
        return None;
    };
    match engine.transfer(receiver, amount) {
        Ok(output) => {
            println!("ok: sent transfer of {amount} to {receiver}");
            Some(output)
        }
        Err(e) => {
            println!("tx failed: {e}");
            None
        }
    }
}

fn cmd_stake(engine: &mut ConsensusEngine, args: &[&str]) -> Option<EngineOutput> {
    let Some(amount) = parse_single_amount(args, "stake") else {
        return None;
    };
    match engine.stake(amount) {
        Ok(output) => {
            println!("ok: staking {amount}");
            Some(output)
        }
        Err(e) => {
            println!("stake failed: {e}");
            None
        }
    }
}

fn cmd_unstake(engine: &mut ConsensusEngine, args: &[&str]) -> Option<EngineOutput> {
    let Some(amount) = parse_single_amount(args, "unstake") else {
        return None;
    };
    match engine.unstake(amount) {
        Ok(output) => {
            println!("ok: unstaking {amount}");
            Some(output)
        }
        Err(e) => {
            println!("unstake failed: {e}");
            None
        }
    }
}

fn cmd_forge(engine: &mut ConsensusEngine, args: &[&str]) -> Option<EngineOutput> {
    let force = args.first() == Some(&"--force");
    match engine.forge(force) {
        Ok(output) => {
            let forged = output.outbound.iter().find_map(|m| match m {
                Message::Block(block) => Some(block.index),
                _ => None,
            });
            match forged {
                Some(index) => println!("ok: forged block {index}"),
                None => println!("ok"),
            }
            Some(output)
        }
        Err(e) => {
            println!("forge failed: {e}");
            None
        }
    }
}

fn parse_single_amount(args: &[&str], name: &str) -> Option<f64> {
    let [amount] = args else {
        println!("usage: {name} <amount>");
        return None;
    };
    match amount.parse::<f64>() {
        Ok(amount) => Some(amount),
        Err(_) => {
            println!("usage: {name} <amount>");
            None
        }
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  tx <to> <amount>   - transfer tokens");
    println!("  stake <amount>     - stake tokens to participate in validation");
    println!("  unstake <amount>   - unstake tokens");
    println!("  forge [--force]    - forge a new block (--force bypasses the election)");
    println!("  sync               - request blockchain sync from other nodes");
    println!("  chain              - print the block tree");
    println!("  wallet             - show account state");
    println!("  mempool            - show pending transactions");
    println!("  nodes              - show known nodes");
    println!("  info               - show everything above");
    println!("  exit               - save and quit");
}

fn print_nodes(engine: &ConsensusEngine) {
    let nodes: Vec<&str> = engine.known_nodes().iter().map(String::as_str).collect();
    println!("Known nodes: {}", nodes.join(", "));
}

fn print_wallet(engine: &ConsensusEngine) {
    println!("========== Account State ==========");
    for (id, account) in engine.chain().ledger().accounts() {
        println!(
            " Account {id} | Balance={:.2} | Stake={:.2}",
            account.balance, account.stake
        );
    }
    println!("===================================");
}

fn print_mempool(engine: &ConsensusEngine) {
    println!("========== Pending Transactions ==========");
    for tx in engine.mempool().iter() {
        println!("  {tx}");
    }
    println!("==========================================");
}

/// Print every stored branch as a tree rooted at genesis, marking which
/// blocks are on the active chain.
fn print_chain(engine: &ConsensusEngine) {
    println!("========== Blockchain Structure ==========");
    let chain = engine.chain();
    let mut children: HashMap<&str, Vec<&Block>> = HashMap::new();
    for block in chain.all_blocks() {
        if !block.is_genesis() {
            children.entry(block.prev_hash.as_str()).or_default().push(block);
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| a.hash.cmp(&b.hash));
    }
    let active: std::collections::HashSet<&str> =
        chain.active().iter().map(|b| b.hash.as_str()).collect();

    fn walk(
        block: &Block,
        prefix: &str,
        children: &HashMap<&str, Vec<&Block>>,
        active: &std::collections::HashSet<&str>,
    ) {
        let marker = if active.contains(block.hash.as_str()) {
            "(main)"
        } else {
            "(fork)"
        };
        println!(
            "{prefix}Block {} | hash={}... | validator={} | tx_count={} {marker}",
            block.index,
            block.short_hash(),
            block.validator,
            block.transactions.len()
        );
        if let Some(kids) = children.get(block.hash.as_str()) {
            for (i, child) in kids.iter().enumerate() {
                let last = i == kids.len() - 1;
                let branch = format!("{prefix}{}", if last { "└── " } else { "├── " });
                walk(child, &branch, children, active);
            }
        }
    }

    walk(chain.genesis(), "", &children, &active);
    println!("==========================================");
}
