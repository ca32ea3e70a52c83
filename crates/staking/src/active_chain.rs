//! Read-only views over the node's chain state.
//!
//! The base chain (storage, mempool, networking) is an external
//! collaborator; these traits are the narrow interface the finalization
//! core consumes. Callers take the chain lock before the block index
//! map lock, and either before the state repository lock.

use std::sync::Arc;

use unite_primitives::buf::Buf32;
use unite_primitives::params::{Depth, Height};
use unite_state::block::{Block, BlockIndex};
use unite_state::transaction::OutPoint;

use crate::coin::Coin;

/// Whether the node considers itself caught up with the network.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SyncStatus {
    #[default]
    Synced,
    SyncingBlockchain,
}

/// View over the currently active (best) chain.
pub trait ActiveChain: Send + Sync {
    /// The current tip, `None` before genesis is connected.
    fn tip(&self) -> Option<Arc<BlockIndex>>;

    /// Height of the tip; genesis is height zero.
    fn height(&self) -> Height;

    fn at_height(&self, height: Height) -> Option<Arc<BlockIndex>>;

    /// Block at the given depth: depth 1 is the tip.
    fn at_depth(&self, depth: Depth) -> Option<Arc<BlockIndex>> {
        if depth == 0 {
            return None;
        }
        let height = self.height().checked_sub(depth - 1)?;
        self.at_height(height)
    }

    /// Looks up any known block by hash, on or off the active chain.
    fn get_block_index(&self, hash: &Buf32) -> Option<Arc<BlockIndex>>;

    fn contains(&self, index: &BlockIndex) -> bool {
        self.at_height(index.height)
            .is_some_and(|i| i.block_hash == index.block_hash)
    }

    /// For a fork block, the last ancestor that is on the active chain.
    /// Returns the block itself if it is on the active chain.
    fn find_fork_origin(&self, index: &BlockIndex) -> Option<Arc<BlockIndex>> {
        let mut walk = self.get_block_index(&index.block_hash)?;
        while !self.contains(&walk) {
            walk = self.get_block_index(&walk.prev_hash?)?;
        }
        Some(walk)
    }

    /// Unspent output lookup against the current chainstate.
    fn get_utxo(&self, outpoint: &OutPoint) -> Option<Coin>;

    /// Digest of the current UTXO set, committed by coinbase meta
    /// inputs.
    fn compute_snapshot_hash(&self) -> Buf32;

    /// Hands a freshly proposed block to the validation pipeline.
    fn process_new_block(&self, block: Block) -> bool;

    /// Reads a block body from disk, if available.
    fn read_block(&self, index: &BlockIndex) -> Option<Block>;

    fn sync_status(&self) -> SyncStatus;
}

/// Lookup over every known block index entry, including forks.
pub trait BlockIndexMap: Send + Sync {
    fn lookup(&self, hash: &Buf32) -> Option<Arc<BlockIndex>>;

    fn for_each(&self, f: &mut dyn FnMut(&Buf32, &Arc<BlockIndex>));
}

/// Minimal view of the P2P layer the proposer needs.
pub trait Network: Send + Sync {
    fn node_count(&self) -> usize;
}
