//! Drives the state repository as blocks and commits arrive.

use std::sync::Arc;

use tracing::{debug, warn};

use unite_finality::{FinalizationState, InitStatus};
use unite_primitives::params::{Height, Parameters};
use unite_staking::ActiveChain;
use unite_state::block::{Block, BlockIndex};
use unite_state::transaction::Transaction;

use crate::repository::StateRepository;
use crate::snapshot::SnapshotIndex;

/// DoS score assigned to a peer whose commits disagreed with the block.
pub const COMMITS_MISMATCH_DOS_SCORE: u32 = 100;

type MisbehaviorHandler = Box<dyn Fn(&BlockIndex, u32) + Send + Sync>;

pub struct StateProcessor {
    params: Arc<Parameters>,
    repo: Arc<StateRepository>,
    active_chain: Arc<dyn ActiveChain>,
    snapshots: Arc<SnapshotIndex>,

    /// Called when a commits-derived state turns out to disagree with
    /// the full block; the networking layer scores the commits sender.
    misbehavior_handler: Option<MisbehaviorHandler>,
}

impl StateProcessor {
    pub fn new(
        params: Arc<Parameters>,
        repo: Arc<StateRepository>,
        active_chain: Arc<dyn ActiveChain>,
        snapshots: Arc<SnapshotIndex>,
    ) -> Self {
        Self {
            params,
            repo,
            active_chain,
            snapshots,
            misbehavior_handler: None,
        }
    }

    pub fn set_misbehavior_handler(&mut self, handler: MisbehaviorHandler) {
        self.misbehavior_handler = Some(handler);
    }

    /// Ingests the finalizer commits of a block (no full block data).
    /// Creates the state if this is the first sighting; a state that
    /// was already processed is left untouched.
    pub fn process_new_commits(&self, block_index: &BlockIndex, txs: &[Transaction]) -> bool {
        debug!(hash = %block_index.block_hash, height = block_index.height, "processing commits");
        let mut repo = self.repo.lock();
        let Some(state) = repo.find_or_create(block_index, InitStatus::FromCommits) else {
            debug!(hash = %block_index.block_hash, "cannot find or create finalization state");
            return false;
        };
        match state.init_status() {
            InitStatus::New => state.process_new_commits(block_index, txs),
            InitStatus::FromCommits | InitStatus::Completed => {
                debug!(hash = %block_index.block_hash, "state already processed");
            }
        }
        true
    }

    /// Processes a full block that is not (yet) the active tip.
    pub fn process_new_tip_candidate(&self, block_index: &BlockIndex, block: &Block) -> bool {
        debug!(hash = %block_index.block_hash, height = block_index.height, "processing candidate tip");
        let mut repo = self.repo.lock();
        self.process_new_tip_worker(&mut repo, block_index, block)
    }

    /// Processes the new active tip: advances the state, triggers
    /// snapshot generation at epoch ends, and trims the repository when
    /// finalization moved.
    pub fn process_new_tip(&self, block_index: &BlockIndex, block: &Block) -> bool {
        debug!(hash = %block_index.block_hash, height = block_index.height, "processing tip");
        let mut repo = self.repo.lock();
        if !self.process_new_tip_worker(&mut repo, block_index, block) {
            return false;
        }

        // The last block of an epoch commits to a snapshot of the UTXO
        // set one block earlier; have it generated ahead of time.
        if block_index.height > 0
            && !self.repo.restoring()
            && (block_index.height + 1) % self.params.epoch_length == 0
        {
            let snapshot_hash = self.active_chain.compute_snapshot_hash();
            // Snapshot payload deletion is the snapshot subsystem's job;
            // here the eviction is acknowledged right away.
            for removed in self.snapshots.add_snapshot_hash(snapshot_hash, block_index) {
                self.snapshots.confirm_removed(&removed);
            }
        }

        if let Some(checkpoint_height) = self.finalization_happened(&mut repo, block_index) {
            // Forks below the finalized checkpoint can no longer become
            // active; their states are dead weight.
            repo.trim_until_height(checkpoint_height);
            drop(repo);
            if let Some(checkpoint_index) = self.active_chain.at_height(checkpoint_height) {
                for removed in self
                    .snapshots
                    .finalize_snapshots(self.active_chain.as_ref(), &checkpoint_index)
                {
                    self.snapshots.confirm_removed(&removed);
                }
            }
        }
        true
    }

    fn process_new_tip_worker(
        &self,
        repo: &mut crate::repository::RepositoryGuard<'_>,
        block_index: &BlockIndex,
        block: &Block,
    ) -> bool {
        let Some(state) = repo.find_or_create(block_index, InitStatus::FromCommits) else {
            debug!(hash = %block_index.block_hash, "cannot find or create finalization state");
            return false;
        };

        match state.init_status() {
            InitStatus::New => {
                state.process_new_tip(block_index, block);
            }
            InitStatus::FromCommits => {
                debug!(
                    hash = %block_index.block_hash,
                    height = block_index.height,
                    "state was built from commits, confirming"
                );
                let prev_hash = block_index
                    .prev_hash
                    .expect("commits of the genesis block are never processed");
                let parent_index = self
                    .active_chain
                    .get_block_index(&prev_hash)
                    .expect("parent of a processed block is known");
                let ancestor_state = repo
                    .find(&parent_index)
                    .expect("parent state exists for a commits-derived state");
                let mut new_state = FinalizationState::from_parent(ancestor_state);
                new_state.process_new_tip(block_index, block);
                if !repo.confirm(block_index, new_state) {
                    warn!(
                        hash = %block_index.block_hash,
                        height = block_index.height,
                        "state from commits disagrees with the full block, overwriting"
                    );
                    if let Some(handler) = &self.misbehavior_handler {
                        handler(block_index, COMMITS_MISMATCH_DOS_SCORE);
                    }
                }
            }
            InitStatus::Completed => {
                debug!(hash = %block_index.block_hash, "state already processed");
            }
        }
        true
    }

    /// Whether the block advanced the last finalized epoch relative to
    /// its parent; if so, returns the finalized checkpoint height.
    fn finalization_happened(
        &self,
        repo: &mut crate::repository::RepositoryGuard<'_>,
        block_index: &BlockIndex,
    ) -> Option<Height> {
        let prev_hash = block_index.prev_hash?;
        let parent_index = self.active_chain.get_block_index(&prev_hash)?;
        let prev_epoch = repo.find(&parent_index)?.last_finalized_epoch();
        let state = repo.find(block_index)?;
        let new_epoch = state.last_finalized_epoch();
        if new_epoch == prev_epoch {
            return None;
        }
        assert!(new_epoch > prev_epoch, "finalization can only advance");
        Some(state.epoch_checkpoint_height(new_epoch))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use unite_db::InMemoryStateDb;
    use unite_primitives::params::Parameters;
    use unite_test_utils::TestChain;

    use super::*;

    struct Fixture {
        chain: Arc<TestChain>,
        repo: Arc<StateRepository>,
        proc: StateProcessor,
    }

    impl Fixture {
        fn new() -> Self {
            let params = Arc::new(Parameters::reg_test()); // epoch length 5
            let chain = Arc::new(TestChain::new());
            let state_db = Arc::new(InMemoryStateDb::new(params.clone()));
            let repo = Arc::new(StateRepository::new(
                params.clone(),
                chain.clone(),
                state_db,
            ));
            let snapshots = Arc::new(SnapshotIndex::new(5, 1));
            let proc = StateProcessor::new(params, repo.clone(), chain.clone(), snapshots);
            Fixture { chain, repo, proc }
        }

        fn add_block(&self) -> Arc<unite_state::block::BlockIndex> {
            let index = self.chain.add_main_block();
            assert!(self.proc.process_new_tip(&index, &Block::default()));
            index
        }

        fn add_blocks(&self, n: usize) {
            for _ in 0..n {
                self.add_block();
            }
        }

        fn has_state_at(&self, height: u32) -> bool {
            let index = self.chain.at_height(height).unwrap();
            self.repo.lock().find(&index).is_some()
        }
    }

    use unite_staking::ActiveChain as _;

    #[test]
    fn test_states_created_per_block() {
        let f = Fixture::new();
        f.add_blocks(11);
        for h in 0..=10 {
            assert!(f.has_state_at(h), "missing state at height {h}");
        }
        let repo = f.repo.lock();
        // An empty mid-epoch block leaves the state data unchanged...
        let a = repo.find(&f.chain.at_height(4).unwrap()).unwrap();
        let b = repo.find(&f.chain.at_height(5).unwrap()).unwrap();
        assert_eq!(a, b);
        // ...but crossing the epoch boundary transitions it.
        let c = repo.find(&f.chain.at_height(6).unwrap()).unwrap();
        assert_ne!(b, c);
    }

    #[test]
    fn test_trimming_follows_finalization() {
        let f = Fixture::new();
        // Genesis + three full epochs (heights 0..=15).
        f.add_blocks(16);
        for h in 1..=15 {
            assert!(f.has_state_at(h), "missing state at height {h}");
        }

        // The first block of epoch 4 finalizes epoch 1 (insta
        // justification trails by two epochs); everything below the
        // finalized checkpoint at height 5 goes away.
        f.add_blocks(1);
        assert!(f.has_state_at(0)); // genesis state is special
        for h in 1..=4 {
            assert!(!f.has_state_at(h), "state at height {h} should be gone");
        }
        for h in 5..=16 {
            assert!(f.has_state_at(h), "missing state at height {h}");
        }

        // The next epoch start finalizes epoch 2 (checkpoint height 10).
        f.add_blocks(5);
        for h in 5..=9 {
            assert!(!f.has_state_at(h), "state at height {h} should be gone");
        }
        for h in 10..=21 {
            assert!(f.has_state_at(h), "missing state at height {h}");
        }
    }

    #[test]
    fn test_trimming_removes_stale_forks() {
        let f = Fixture::new();
        f.add_blocks(8);
        // A fork off height 3.
        let fork_parent = f.chain.at_height(3).unwrap();
        let fork = f.chain.add_fork_block(&fork_parent, 7);
        assert!(f.proc.process_new_tip_candidate(&fork, &Block::default()));
        assert!(f.repo.lock().find(&fork).is_some());

        // March to the first trim (height 16 starts epoch 4, trims
        // below height 5); the fork's origin is at height 3.
        f.add_blocks(9);
        assert!(f.repo.lock().find(&fork).is_none());
    }

    #[test]
    fn test_out_of_order_processing_rejected() {
        let f = Fixture::new();
        f.add_blocks(3);
        let b3 = f.chain.add_main_block();
        let b4 = f.chain.add_main_block();

        // b4 cannot be processed before b3.
        assert!(!f.proc.process_new_commits(&b4, &[]));
        assert!(!f.proc.process_new_tip_candidate(&b4, &Block::default()));
        assert!(!f.proc.process_new_tip(&b4, &Block::default()));

        // Commits for b3 are as good as a full block for building b4.
        assert!(f.proc.process_new_commits(&b3, &[]));
        assert!(f.proc.process_new_tip_candidate(&b4, &Block::default()));
        assert!(f.proc.process_new_tip(&b4, &Block::default()));
    }

    #[test]
    fn test_commits_then_block_confirms() {
        let f = Fixture::new();
        f.add_blocks(3);
        let index = f.chain.add_main_block();

        assert!(f.proc.process_new_commits(&index, &[]));
        {
            let repo = f.repo.lock();
            assert_eq!(
                repo.find(&index).unwrap().init_status(),
                InitStatus::FromCommits
            );
        }

        // Same content from the full block: the state is confirmed.
        assert!(f.proc.process_new_tip_candidate(&index, &Block::default()));
        {
            let repo = f.repo.lock();
            assert_eq!(
                repo.find(&index).unwrap().init_status(),
                InitStatus::Completed
            );
        }

        // Reprocessing is a no-op.
        assert!(f.proc.process_new_tip(&index, &Block::default()));
    }

    #[test]
    fn test_commits_mismatch_scores_sender() {
        use std::sync::atomic::{AtomicU32, Ordering};

        use unite_primitives::buf::Buf20;
        use unite_state::transaction::{Transaction, TxOut, TxPayload, TxType};

        let mut f = Fixture::new();
        let score = Arc::new(AtomicU32::new(0));
        let score_in_handler = score.clone();
        f.proc.set_misbehavior_handler(Box::new(move |_, s| {
            score_in_handler.fetch_add(s, Ordering::SeqCst);
        }));

        f.add_blocks(3);
        let index = f.chain.add_main_block();

        // Commits claim a deposit that the actual block does not have.
        let params = Parameters::reg_test();
        let mut deposit = Transaction::new(TxType::Deposit);
        deposit.payload = Some(TxPayload::Deposit {
            validator_address: Buf20::new([1; 20]),
        });
        deposit.vout.push(TxOut::new(
            params.min_deposit_size,
            unite_state::script::Script::empty(),
        ));
        assert!(f.proc.process_new_commits(&index, &[deposit]));

        assert!(f.proc.process_new_tip(&index, &Block::default()));
        assert_eq!(score.load(Ordering::SeqCst), COMMITS_MISMATCH_DOS_SCORE);

        // The block-derived state won.
        let repo = f.repo.lock();
        let state = repo.find(&index).unwrap();
        assert_eq!(state.init_status(), InitStatus::Completed);
        assert!(state.validator(&Buf20::new([1; 20])).is_none());
    }

    #[test]
    fn test_restore_from_disk_replays_chain() {
        let f = Fixture::new();
        for _ in 0..12 {
            let index = f.chain.add_main_block();
            f.chain.put_block(&index, Block::default());
            assert!(f.proc.process_new_tip(&index, &Block::default()));
        }
        let tip = f.chain.tip().unwrap();
        let expected = f.repo.lock().find(&tip).unwrap().clone();

        // Wipe and replay.
        f.repo.lock().reset();
        f.repo.restore_from_disk(false, &f.proc).unwrap();
        let repo = f.repo.lock();
        assert_eq!(repo.find(&tip).unwrap(), &expected);
    }
}
