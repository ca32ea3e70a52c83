//! A scriptable in-memory chain implementing the read-only chain
//! traits, for driving the repository, processor and proposer in tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use unite_primitives::buf::Buf32;
use unite_primitives::hash;
use unite_primitives::params::Height;
use unite_staking::active_chain::{ActiveChain, BlockIndexMap, Network, SyncStatus};
use unite_staking::coin::Coin;
use unite_state::block::{Block, BlockIndex};
use unite_state::transaction::OutPoint;

#[derive(Default)]
struct Inner {
    by_hash: HashMap<Buf32, Arc<BlockIndex>>,
    main_chain: Vec<Arc<BlockIndex>>,
    utxos: HashMap<OutPoint, Coin>,
    blocks: HashMap<Buf32, Block>,
    submitted: Vec<Block>,
    sync_status: SyncStatus,
    node_count: usize,
    snapshot_hash: Buf32,
}

/// In-memory chain: a main chain vector plus arbitrary fork entries.
pub struct TestChain {
    inner: Mutex<Inner>,
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TestChain {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sync_status: SyncStatus::Synced,
                node_count: 1,
                ..Inner::default()
            }),
        }
    }

    fn make_index(height: Height, parent: Option<&Arc<BlockIndex>>, salt: u8) -> BlockIndex {
        let mut seed = [0u8; 8];
        seed[..4].copy_from_slice(&height.to_le_bytes());
        seed[4] = salt;
        BlockIndex {
            block_hash: hash::sha256d(&seed),
            prev_hash: parent.map(|p| p.block_hash),
            height,
            time: height * 16,
            bits: 0x207fffff,
            stake_modifier: Buf32::zero(),
            has_block_data: true,
        }
    }

    /// Appends a new block index to the main chain and returns it.
    pub fn add_main_block(&self) -> Arc<BlockIndex> {
        let mut inner = self.inner.lock();
        let height = inner.main_chain.len() as Height;
        let parent = inner.main_chain.last().cloned();
        let index = Arc::new(Self::make_index(height, parent.as_ref(), 0));
        inner.by_hash.insert(index.block_hash, index.clone());
        inner.main_chain.push(index.clone());
        index
    }

    /// Registers a fork block on top of the given parent without
    /// touching the main chain.
    pub fn add_fork_block(&self, parent: &Arc<BlockIndex>, salt: u8) -> Arc<BlockIndex> {
        let mut inner = self.inner.lock();
        let index = Arc::new(Self::make_index(parent.height + 1, Some(parent), salt));
        inner.by_hash.insert(index.block_hash, index.clone());
        index
    }

    pub fn put_block(&self, index: &BlockIndex, block: Block) {
        self.inner.lock().blocks.insert(index.block_hash, block);
    }

    pub fn put_utxo(&self, coin: Coin) {
        self.inner.lock().utxos.insert(coin.out_point, coin);
    }

    pub fn set_sync_status(&self, status: SyncStatus) {
        self.inner.lock().sync_status = status;
    }

    pub fn set_node_count(&self, count: usize) {
        self.inner.lock().node_count = count;
    }

    pub fn set_snapshot_hash(&self, hash: Buf32) {
        self.inner.lock().snapshot_hash = hash;
    }

    /// Blocks handed to `process_new_block` so far.
    pub fn submitted_blocks(&self) -> Vec<Block> {
        self.inner.lock().submitted.clone()
    }
}

impl ActiveChain for TestChain {
    fn tip(&self) -> Option<Arc<BlockIndex>> {
        self.inner.lock().main_chain.last().cloned()
    }

    fn height(&self) -> Height {
        let inner = self.inner.lock();
        inner.main_chain.len().saturating_sub(1) as Height
    }

    fn at_height(&self, height: Height) -> Option<Arc<BlockIndex>> {
        self.inner.lock().main_chain.get(height as usize).cloned()
    }

    fn get_block_index(&self, hash: &Buf32) -> Option<Arc<BlockIndex>> {
        self.inner.lock().by_hash.get(hash).cloned()
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.inner.lock().utxos.get(outpoint).cloned()
    }

    fn compute_snapshot_hash(&self) -> Buf32 {
        self.inner.lock().snapshot_hash
    }

    fn process_new_block(&self, block: Block) -> bool {
        self.inner.lock().submitted.push(block);
        true
    }

    fn read_block(&self, index: &BlockIndex) -> Option<Block> {
        self.inner.lock().blocks.get(&index.block_hash).cloned()
    }

    fn sync_status(&self) -> SyncStatus {
        self.inner.lock().sync_status
    }
}

impl BlockIndexMap for TestChain {
    fn lookup(&self, hash: &Buf32) -> Option<Arc<BlockIndex>> {
        self.inner.lock().by_hash.get(hash).cloned()
    }

    fn for_each(&self, f: &mut dyn FnMut(&Buf32, &Arc<BlockIndex>)) {
        let entries: Vec<(Buf32, Arc<BlockIndex>)> = {
            let inner = self.inner.lock();
            inner.by_hash.iter().map(|(h, i)| (*h, i.clone())).collect()
        };
        for (hash, index) in &entries {
            f(hash, index);
        }
    }
}

impl Network for TestChain {
    fn node_count(&self) -> usize {
        self.inner.lock().node_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_chain_growth() {
        let chain = TestChain::new();
        let genesis = chain.add_main_block();
        let b1 = chain.add_main_block();
        assert_eq!(genesis.height, 0);
        assert_eq!(b1.height, 1);
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.tip().unwrap().block_hash, b1.block_hash);
        assert!(chain.contains(&b1));
    }

    #[test]
    fn test_fork_origin_resolution() {
        let chain = TestChain::new();
        let _g = chain.add_main_block();
        let b1 = chain.add_main_block();
        let _b2 = chain.add_main_block();
        let f2 = chain.add_fork_block(&b1, 1);
        let f3 = chain.add_fork_block(&f2, 1);
        assert!(!chain.contains(&f3));
        let origin = chain.find_fork_origin(&f3).unwrap();
        assert_eq!(origin.block_hash, b1.block_hash);
        // A main chain block is its own fork origin.
        let origin = chain.find_fork_origin(&b1).unwrap();
        assert_eq!(origin.block_hash, b1.block_hash);
    }
}
