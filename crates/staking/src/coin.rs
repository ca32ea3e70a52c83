//! Stakeable coins.

use std::cmp::Ordering;

use unite_primitives::amount::Amount;
use unite_primitives::buf::Buf32;
use unite_primitives::params::{Height, Time};
use unite_state::script::Script;
use unite_state::transaction::OutPoint;

/// A coin that is potentially stakeable: a confirmed transaction output
/// together with where it was confirmed.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Coin {
    /// Hash of the block containing the coin.
    pub block_hash: Buf32,
    /// Height the coin was confirmed at.
    pub block_height: Height,
    /// Time of the containing block, a kernel ingredient.
    pub block_time: Time,
    pub out_point: OutPoint,
    pub value: Amount,
    pub script_pubkey: Script,
}

impl Coin {
    /// Depth of the coin below the given chain height; a coin in the
    /// tip has depth one.
    pub fn depth_at(&self, chain_height: Height) -> Height {
        chain_height.saturating_sub(self.block_height) + 1
    }
}

/// Orders coins the way the proposer should try them: bigger amounts
/// first (better kernel chances per slot), then older coins, then by
/// outpoint for stability.
impl Ord for Coin {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .value
            .cmp(&self.value)
            .then(self.block_height.cmp(&other.block_height))
            .then(self.out_point.cmp(&other.out_point))
            .then(self.block_time.cmp(&other.block_time))
            .then(self.block_hash.cmp(&other.block_hash))
            .then(self.script_pubkey.cmp(&other.script_pubkey))
    }
}

impl PartialOrd for Coin {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stakeable coins in proposal order.
pub type CoinSet = std::collections::BTreeSet<Coin>;

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(value: Amount, height: Height, txid: u8) -> Coin {
        Coin {
            block_hash: Buf32::new([txid; 32]),
            block_height: height,
            block_time: 0,
            out_point: OutPoint::new(Buf32::new([txid; 32]), 0),
            value,
            script_pubkey: Script::empty(),
        }
    }

    #[test]
    fn test_ordering_prefers_large_then_old() {
        let mut set = CoinSet::new();
        set.insert(coin(5, 10, 1));
        set.insert(coin(50, 90, 2));
        set.insert(coin(50, 10, 3));
        let order: Vec<Amount> = set.iter().map(|c| c.value).collect();
        assert_eq!(order, vec![50, 50, 5]);
        let heights: Vec<Height> = set.iter().map(|c| c.block_height).collect();
        assert_eq!(heights, vec![10, 90, 10]);
    }

    #[test]
    fn test_depth() {
        let c = coin(5, 10, 1);
        assert_eq!(c.depth_at(10), 1);
        assert_eq!(c.depth_at(15), 6);
    }
}
