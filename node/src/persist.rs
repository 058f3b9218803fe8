//! On-disk persistence of the active chain.
//!
//! Each node owns a `data_node_<id>/` directory holding `blocks.json`, the
//! serialized active chain from genesis to head. The file is rewritten
//! after every head change and loaded (replay-validated) on startup before
//! sync. Side branches are not persisted; a restarted node re-learns them
//! from the network if they are still relevant.

use {
    log::{info, warn},
    stakesim_consensus::{
        chain::ChainStore,
        ledger::WalletLedger,
        types::Block,
    },
    std::{
        fs,
        io,
        path::{Path, PathBuf},
    },
};

const BLOCKS_FILE: &str = "blocks.json";

/// The data directory for a node id, relative to the working directory.
pub fn data_dir(node_id: &str) -> PathBuf {
    PathBuf::from(format!("data_node_{node_id}"))
}

/// Write the active chain to `<dir>/blocks.json`.
pub fn save_chain(dir: &Path, active: &[Block]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(active)?;
    fs::write(dir.join(BLOCKS_FILE), json)?;
    info!("chain saved to {}", dir.display());
    Ok(())
}

/// Read a previously saved chain, if any.
pub fn load_chain(dir: &Path) -> io::Result<Option<Vec<Block>>> {
    let path = dir.join(BLOCKS_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let blocks: Vec<Block> = serde_json::from_str(&raw)?;
    Ok(Some(blocks))
}

/// Build the startup chain store: resume from a saved chain when one
/// exists and replays cleanly, otherwise start fresh from genesis. A
/// corrupt or invalid file is logged and ignored.
pub fn restore_chain(dir: &Path, genesis_state: WalletLedger) -> ChainStore {
    match load_chain(dir) {
        Ok(Some(blocks)) => match ChainStore::from_blocks(&blocks, genesis_state.clone()) {
            Ok(store) => {
                info!(
                    "restored chain from {}: height {}",
                    dir.display(),
                    store.height()
                );
                store
            }
            Err(e) => {
                warn!("saved chain failed validation ({e}), starting fresh");
                ChainStore::new(genesis_state)
            }
        },
        Ok(None) => ChainStore::new(genesis_state),
        Err(e) => {
            warn!("cannot load saved chain ({e}), starting fresh");
            ChainStore::new(genesis_state)
        }
    }
}
