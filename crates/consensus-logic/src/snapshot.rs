//! Bookkeeping of UTXO-set snapshots per checkpoint.
//!
//! The snapshot payloads themselves live with the snapshot subsystem;
//! this index tracks which checkpoint heights have a snapshot, keeps
//! the fixed-size window of them, and coordinates two-phase removal
//! (entries scheduled for removal are only dropped once the caller
//! confirms the on-disk snapshot is gone).

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use tracing::debug;

use unite_primitives::buf::Buf32;
use unite_primitives::params::Height;
use unite_staking::ActiveChain;
use unite_state::block::BlockIndex;

/// A snapshot the index knows about.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotCheckpoint {
    pub height: Height,
    pub finalized: bool,
    pub snapshot_hash: Buf32,
    pub block_hash: Buf32,
}

#[derive(Default)]
struct IndexInner {
    by_height: BTreeMap<Height, SnapshotCheckpoint>,
    for_removal: BTreeSet<Buf32>,
}

pub struct SnapshotIndex {
    max_snapshots: u32,
    min_finalized_snapshots: u32,
    inner: Mutex<IndexInner>,
}

impl SnapshotIndex {
    pub fn new(max_snapshots: u32, min_finalized_snapshots: u32) -> Self {
        assert!(min_finalized_snapshots > 0);
        assert!(min_finalized_snapshots < max_snapshots);
        Self {
            max_snapshots,
            min_finalized_snapshots,
            inner: Mutex::new(IndexInner::default()),
        }
    }

    /// Adds a snapshot for a block, evicting an old entry when the
    /// window is full. Returns the snapshot hashes that must be deleted
    /// from disk; each must be acknowledged via [`confirm_removed`].
    ///
    /// Eviction rules: a snapshot at an already-known height replaces
    /// the old one; a snapshot below the current top evicts the highest
    /// entry (the node switched branches and the high snapshots are on
    /// a dead fork); otherwise the lowest non-essential entry goes.
    ///
    /// [`confirm_removed`]: SnapshotIndex::confirm_removed
    pub fn add_snapshot_hash(&self, snapshot_hash: Buf32, block_index: &BlockIndex) -> Vec<Buf32> {
        let mut inner = self.inner.lock();
        let height = block_index.height;

        if let Some(replaced) = inner.by_height.insert(
            height,
            SnapshotCheckpoint {
                height,
                finalized: false,
                snapshot_hash,
                block_hash: block_index.block_hash,
            },
        ) {
            inner.for_removal.insert(replaced.snapshot_hash);
            return self.removal_list(&mut inner);
        }

        if inner.by_height.len() as u32 > self.max_snapshots {
            let top = *inner.by_height.keys().next_back().expect("non-empty");
            if height < top {
                self.remove_highest(&mut inner);
            } else {
                self.remove_lowest(&mut inner);
            }
        }
        debug!(height, snapshot = %snapshot_hash, "added snapshot");
        self.removal_list(&mut inner)
    }

    /// Marks the snapshots on the branch of `block_index` up to its
    /// height as finalized and schedules non-finalized entries below it
    /// for removal. Returns the hashes to delete from disk.
    pub fn finalize_snapshots(
        &self,
        chain: &dyn ActiveChain,
        block_index: &BlockIndex,
    ) -> Vec<Buf32> {
        let mut inner = self.inner.lock();
        let mut stale = Vec::new();
        for (height, checkpoint) in inner.by_height.iter_mut() {
            if *height > block_index.height {
                continue;
            }
            let on_branch = chain
                .at_height(*height)
                .is_some_and(|i| i.block_hash == checkpoint.block_hash);
            if on_branch {
                checkpoint.finalized = true;
            } else {
                stale.push(*height);
            }
        }
        for height in stale {
            let removed = inner.by_height.remove(&height).expect("collected above");
            inner.for_removal.insert(removed.snapshot_hash);
        }
        self.removal_list(&mut inner)
    }

    pub fn get_snapshot_hash(&self, block_index: &BlockIndex) -> Option<Buf32> {
        let inner = self.inner.lock();
        inner
            .by_height
            .get(&block_index.height)
            .filter(|cp| cp.block_hash == block_index.block_hash)
            .map(|cp| cp.snapshot_hash)
    }

    pub fn get_latest_finalized_snapshot_hash(&self) -> Option<Buf32> {
        let inner = self.inner.lock();
        inner
            .by_height
            .values()
            .rev()
            .find(|cp| cp.finalized)
            .map(|cp| cp.snapshot_hash)
    }

    /// All checkpoints a snapshot exists for, lowest first.
    pub fn get_snapshot_checkpoints(&self) -> Vec<SnapshotCheckpoint> {
        self.inner.lock().by_height.values().cloned().collect()
    }

    /// Confirms that a snapshot scheduled for removal is gone from
    /// disk.
    pub fn confirm_removed(&self, snapshot_hash: &Buf32) {
        self.inner.lock().for_removal.remove(snapshot_hash);
    }

    fn removal_list(&self, inner: &mut IndexInner) -> Vec<Buf32> {
        inner.for_removal.iter().copied().collect()
    }

    /// Removes the lowest entry, sparing the highest
    /// `min_finalized_snapshots` finalized ones.
    fn remove_lowest(&self, inner: &mut IndexInner) {
        let mut essential: BTreeSet<Height> = BTreeSet::new();
        for cp in inner.by_height.values().rev() {
            if cp.finalized && (essential.len() as u32) < self.min_finalized_snapshots {
                essential.insert(cp.height);
            }
        }
        let victim = inner
            .by_height
            .keys()
            .find(|h| !essential.contains(h))
            .copied();
        if let Some(height) = victim {
            let removed = inner.by_height.remove(&height).expect("just found");
            inner.for_removal.insert(removed.snapshot_hash);
        }
    }

    /// Removes the highest entry (used when a lower fork takes over).
    fn remove_highest(&self, inner: &mut IndexInner) {
        if let Some(height) = inner.by_height.keys().next_back().copied() {
            let removed = inner.by_height.remove(&height).expect("just found");
            inner.for_removal.insert(removed.snapshot_hash);
        }
    }
}
