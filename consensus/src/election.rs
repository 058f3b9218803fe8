//! Deterministic stake-weighted validator election.
//!
//! Every peer with the same active state and the same head hash must elect
//! the same forger. The candidate list is taken from the active ledger
//! (stake-weighted; balance-weighted as a fallback when nobody has staked),
//! sorted by account id to remove iteration nondeterminism. The head hash
//! seeds the draw: its leading hex digits parse to an unsigned integer,
//! which maps to a point in `[0, total_weight)`; the winner is the account
//! whose cumulative weight slice contains that point.

use {crate::ledger::WalletLedger, log::warn};

/// Number of leading hex digits of the head hash used as the seed.
const SEED_HEX_DIGITS: usize = 16;

/// Pick the validator expected to forge on top of the block with
/// `head_hash`. Returns `None` when no account has stake or balance.
pub fn elect_validator(ledger: &WalletLedger, head_hash: &str) -> Option<String> {
    let mut candidates = ledger.staked_validators();
    if candidates.is_empty() {
        warn!("no validators with stake > 0, falling back to balance-weighted selection");
        candidates = ledger.positive_balances();
    }
    if candidates.is_empty() {
        warn!("no election candidates at all (stake = 0 and balance = 0 everywhere)");
        return None;
    }

    let total: f64 = candidates.iter().map(|(_, weight)| weight).sum();
    let draw = seed_fraction(head_hash) * total;

    let mut accumulated = 0.0;
    for (id, weight) in &candidates {
        accumulated += weight;
        if draw < accumulated {
            return Some(id.clone());
        }
    }
    // Rounding can leave the draw at the very end of the range.
    candidates.last().map(|(id, _)| id.clone())
}

/// Whether `identity` wins the election at `head_hash`.
pub fn is_elected(ledger: &WalletLedger, head_hash: &str, identity: &str) -> bool {
    elect_validator(ledger, head_hash).as_deref() == Some(identity)
}

/// Map the hash prefix to a fraction in `[0, 1)`.
fn seed_fraction(head_hash: &str) -> f64 {
    let prefix = head_hash.get(..SEED_HEX_DIGITS).unwrap_or(head_hash);
    let seed = u64::from_str_radix(prefix, 16).unwrap_or(0);
    seed as f64 / ((u64::MAX as f64) + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ledger::Account, types::Block};
    use std::collections::BTreeMap;

    fn ledger(seed: &[(&str, f64, f64)]) -> WalletLedger {
        let map: BTreeMap<String, Account> = seed
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
        WalletLedger::seeded(map)
    }

    #[test]
    fn test_same_head_hash_same_winner() {
        let state = ledger(&[("node1", 0.0, 10.0), ("node2", 0.0, 20.0), ("node3", 0.0, 30.0)]);
        let head = Block::genesis().hash;
        let first = elect_validator(&state, &head);
        for _ in 0..10 {
            assert_eq!(elect_validator(&state, &head), first);
        }
    }

    #[test]
    fn test_equal_states_agree_regardless_of_construction_order() {
        let a = ledger(&[("node1", 0.0, 10.0), ("node2", 0.0, 20.0)]);
        let b = ledger(&[("node2", 0.0, 20.0), ("node1", 0.0, 10.0)]);
        for head in ["00ff".repeat(16), "a1b2".repeat(16), "7777".repeat(16)] {
            assert_eq!(elect_validator(&a, &head), elect_validator(&b, &head));
        }
    }

    #[test]
    fn test_single_staked_validator_always_wins() {
        let state = ledger(&[("node1", 100.0, 5.0), ("node2", 100.0, 0.0)]);
        for head in ["00".repeat(32), "ff".repeat(32), "3c".repeat(32)] {
            assert_eq!(elect_validator(&state, &head), Some("node1".to_string()));
        }
    }

    #[test]
    fn test_balance_fallback_when_nobody_staked() {
        let state = ledger(&[("node1", 100.0, 0.0), ("node2", 50.0, 0.0)]);
        let winner = elect_validator(&state, &"ab".repeat(32)).unwrap();
        assert!(winner == "node1" || winner == "node2");
    }

    #[test]
    fn test_no_candidates_elects_nobody() {
        assert_eq!(elect_validator(&WalletLedger::new(), &"00".repeat(32)), None);
        let broke = ledger(&[("node1", 0.0, 0.0)]);
        assert_eq!(elect_validator(&broke, &"00".repeat(32)), None);
    }

    #[test]
    fn test_weights_bias_the_draw() {
        // With a 9:1 stake split, the heavy validator should win the large
        // majority of distinct seeds.
        let state = ledger(&[("heavy", 0.0, 900.0), ("light", 0.0, 100.0)]);
        let mut heavy_wins = 0;
        for i in 0..1000u64 {
            let head = format!("{:016x}{}", i.wrapping_mul(0x9e3779b97f4a7c15), "0".repeat(48));
            if elect_validator(&state, &head).as_deref() == Some("heavy") {
                heavy_wins += 1;
            }
        }
        assert!(
            (850..=950).contains(&heavy_wins),
            "expected ~900 heavy wins, got {heavy_wins}"
        );
    }

    #[test]
    fn test_extreme_seeds_stay_in_range() {
        let state = ledger(&[("node1", 0.0, 1.0), ("node2", 0.0, 1.0)]);
        assert_eq!(
            elect_validator(&state, &"0".repeat(64)),
            Some("node1".to_string())
        );
        // An all-ones seed maps to the end of the range but must still land
        // on the last slice.
        assert_eq!(
            elect_validator(&state, &"f".repeat(64)),
            Some("node2".to_string())
        );
    }

    #[test]
    fn test_is_elected() {
        let state = ledger(&[("node1", 0.0, 10.0)]);
        let head = "12".repeat(32);
        assert!(is_elected(&state, &head, "node1"));
        assert!(!is_elected(&state, &head, "node2"));
    }
}
