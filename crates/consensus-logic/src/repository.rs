//! The repository of finalization states, one per unfinalized block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use unite_db::StateDb;
use unite_finality::{FinalizationState, InitStatus};
use unite_primitives::buf::Buf32;
use unite_primitives::params::{Height, Parameters};
use unite_staking::ActiveChain;
use unite_state::block::BlockIndex;

use crate::errors::ProcessError;

struct RepoInner {
    genesis: FinalizationState,
    states: HashMap<Buf32, FinalizationState>,
}

/// Maps blocks to the finalization state after them.
///
/// States are compact plain data cloned from their parent; the
/// repository owns them and they live exactly as long as their block is
/// retained (trimming drops everything below the finalized checkpoint).
/// All access goes through [`StateRepository::lock`]; references
/// borrowed from the guard are only valid while the lock is held, which
/// is exactly the original locking discipline.
pub struct StateRepository {
    params: Arc<Parameters>,
    active_chain: Arc<dyn ActiveChain>,
    state_db: Arc<dyn StateDb>,
    inner: Mutex<RepoInner>,
    restoring: AtomicBool,
}

impl StateRepository {
    pub fn new(
        params: Arc<Parameters>,
        active_chain: Arc<dyn ActiveChain>,
        state_db: Arc<dyn StateDb>,
    ) -> Self {
        let genesis = FinalizationState::genesis(params.clone());
        Self {
            params,
            active_chain,
            state_db,
            inner: Mutex::new(RepoInner {
                genesis,
                states: HashMap::new(),
            }),
            restoring: AtomicBool::new(false),
        }
    }

    pub fn parameters(&self) -> &Arc<Parameters> {
        &self.params
    }

    /// Takes the repository lock.
    pub fn lock(&self) -> RepositoryGuard<'_> {
        RepositoryGuard {
            repo: self,
            inner: self.inner.lock(),
        }
    }

    /// Whether a restore from disk is in progress (snapshot generation
    /// is suppressed during restore).
    pub fn restoring(&self) -> bool {
        self.restoring.load(Ordering::SeqCst)
    }

    /// Rebuilds the repository on startup.
    ///
    /// In pruning mode only the tip's persisted state is loaded;
    /// otherwise the whole chain is replayed through the processor. A
    /// block that cannot be read back is fatal.
    pub fn restore_from_disk(
        &self,
        prune_mode: bool,
        processor: &crate::processor::StateProcessor,
    ) -> Result<(), ProcessError> {
        struct RestoringFlag<'a>(&'a AtomicBool);
        impl Drop for RestoringFlag<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::SeqCst);
            }
        }
        self.restoring.store(true, Ordering::SeqCst);
        let _flag = RestoringFlag(&self.restoring);

        if prune_mode {
            let Some(tip) = self.active_chain.tip() else {
                self.lock().reset();
                return Ok(());
            };
            let state = self.state_db.load_for(&tip)?;
            let mut guard = self.lock();
            guard.reset();
            match state {
                Some(state) => {
                    info!(tip = %tip.block_hash, "restored finalization state from tip");
                    guard.inner.states.insert(tip.block_hash, state);
                }
                None => warn!(tip = %tip.block_hash, "no persisted state at tip, starting fresh"),
            }
            return Ok(());
        }

        info!("restoring state repository by replaying the chain");
        self.lock().reset();
        for height in 1..=self.active_chain.height() {
            let index = self
                .active_chain
                .at_height(height)
                .expect("active chain is contiguous");
            let block = self
                .active_chain
                .read_block(&index)
                .ok_or(ProcessError::UnreadableBlock(index.block_hash))?;
            if !processor.process_new_tip(&index, &block) {
                return Err(ProcessError::MissingParentState(index.block_hash));
            }
        }
        Ok(())
    }

    /// Persists the currently cached states.
    pub fn save_to_disk(&self) -> Result<(), ProcessError> {
        let states = {
            let guard = self.lock();
            guard.inner.states.clone()
        };
        self.state_db.save(&states)?;
        Ok(())
    }
}

pub struct RepositoryGuard<'a> {
    repo: &'a StateRepository,
    inner: MutexGuard<'a, RepoInner>,
}

impl RepositoryGuard<'_> {
    pub fn genesis_state(&self) -> &FinalizationState {
        &self.inner.genesis
    }

    pub fn find(&self, block_index: &BlockIndex) -> Option<&FinalizationState> {
        if block_index.is_genesis() {
            return Some(&self.inner.genesis);
        }
        self.inner.states.get(&block_index.block_hash)
    }

    pub fn find_mut(&mut self, block_index: &BlockIndex) -> Option<&mut FinalizationState> {
        if block_index.is_genesis() {
            return Some(&mut self.inner.genesis);
        }
        self.inner.states.get_mut(&block_index.block_hash)
    }

    /// State at the active chain's tip.
    pub fn tip_state(&self) -> Option<&FinalizationState> {
        let tip = self.repo.active_chain.tip()?;
        self.find(&tip)
    }

    /// Finds the state for a block, creating it from the parent's state
    /// when absent. The parent state must exist and be initialized at
    /// least to `required_parent_status` (the genesis state always
    /// qualifies).
    pub fn find_or_create(
        &mut self,
        block_index: &BlockIndex,
        required_parent_status: InitStatus,
    ) -> Option<&mut FinalizationState> {
        if self.find(block_index).is_some() {
            return self.find_mut(block_index);
        }
        self.create(block_index, required_parent_status)
    }

    fn create(
        &mut self,
        block_index: &BlockIndex,
        required_parent_status: InitStatus,
    ) -> Option<&mut FinalizationState> {
        let prev_hash = block_index.prev_hash?;
        let parent_is_genesis = block_index.height == 1;
        let parent_state = if parent_is_genesis {
            Some(&self.inner.genesis)
        } else {
            self.inner.states.get(&prev_hash)
        }?;
        if !parent_is_genesis && parent_state.init_status() < required_parent_status {
            return None;
        }
        let state = FinalizationState::from_parent(parent_state);
        self.inner.states.insert(block_index.block_hash, state);
        self.inner.states.get_mut(&block_index.block_hash)
    }

    /// Replaces a state that was processed from commits with one
    /// processed from the full block. Returns whether they agreed.
    pub fn confirm(&mut self, block_index: &BlockIndex, new_state: FinalizationState) -> bool {
        assert_eq!(
            new_state.init_status(),
            InitStatus::Completed,
            "confirming state must come from a full block"
        );
        let old_state = self
            .inner
            .states
            .get(&block_index.block_hash)
            .expect("only existing states can be confirmed");
        assert_eq!(
            old_state.init_status(),
            InitStatus::FromCommits,
            "only commits-derived states are confirmed"
        );
        let matched = old_state.data() == new_state.data();
        self.inner
            .states
            .insert(block_index.block_hash, new_state);
        matched
    }

    /// Discards every state whose block, or fork origin on the active
    /// chain, is below the given height. The genesis state survives.
    pub fn trim_until_height(&mut self, height: Height) {
        debug!(height, "trimming state repository");
        let chain = &self.repo.active_chain;
        self.inner.states.retain(|hash, _| {
            let Some(index) = chain.get_block_index(hash) else {
                // The block index no longer knows the block; the state
                // has nothing to be attached to.
                return false;
            };
            let origin = if chain.contains(&index) {
                Some(index)
            } else {
                chain.find_fork_origin(&index)
            };
            match origin {
                Some(origin) => origin.height >= height,
                None => false,
            }
        });
    }

    /// Drops everything and reinstates the pristine genesis state.
    pub fn reset(&mut self) {
        debug!("resetting state repository");
        self.inner.states.clear();
        self.inner.genesis = FinalizationState::genesis(self.repo.params.clone());
    }

    pub fn state_count(&self) -> usize {
        self.inner.states.len()
    }
}
