//! The proposer loop: one cooperative thread iterating all wallets,
//! waking once per staking timestamp slot or on external events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use unite_primitives::params::{Parameters, Time};
use unite_staking::active_chain::{ActiveChain, Network, SyncStatus};

use crate::block_builder::BlockBuilder;
use crate::logic::ProposerLogic;
use crate::waiter::Waiter;
use crate::wallet::{MultiWallet, ProposerStatus, StakingWallet, TransactionPicker};

/// Everything one proposal iteration needs.
pub struct ProposerContext {
    pub params: Arc<Parameters>,
    pub multi_wallet: Arc<dyn MultiWallet>,
    pub network: Arc<dyn Network>,
    pub active_chain: Arc<dyn ActiveChain>,
    pub transaction_picker: Arc<dyn TransactionPicker>,
    pub block_builder: Arc<BlockBuilder>,
    pub logic: Arc<ProposerLogic>,
}

impl ProposerContext {
    fn set_status_of_all_wallets(&self, status: ProposerStatus) {
        for wallet in self.multi_wallet.wallets() {
            wallet.set_proposer_status(status);
        }
    }

    /// One pass over all wallets for the current slot.
    pub fn run_iteration(&self, now: Time, interrupted: &AtomicBool) {
        if self.network.node_count() == 0 {
            debug!("not proposing, no peers");
            self.set_status_of_all_wallets(ProposerStatus::NotProposingNoPeers);
            return;
        }
        if self.active_chain.sync_status() != SyncStatus::Synced {
            debug!("not proposing, syncing blockchain");
            self.set_status_of_all_wallets(ProposerStatus::NotProposingSyncingBlockchain);
            return;
        }
        for wallet in self.multi_wallet.wallets() {
            if interrupted.load(Ordering::SeqCst) {
                return;
            }
            self.propose_with_wallet(wallet.as_ref(), now);
        }
    }

    fn propose_with_wallet(&self, wallet: &dyn StakingWallet, now: Time) {
        let wallet_name = wallet.name();
        if wallet.is_locked() {
            debug!(wallet = %wallet_name, "not proposing, wallet locked");
            wallet.set_proposer_status(ProposerStatus::NotProposingWalletLocked);
            return;
        }
        let coins = wallet.stakeable_coins();
        if coins.is_empty() {
            debug!(wallet = %wallet_name, "not proposing, not enough balance");
            wallet.set_proposer_status(ProposerStatus::NotProposingNotEnoughBalance);
            return;
        }
        wallet.set_proposer_status(ProposerStatus::IsProposing);

        let Some(tip) = self.active_chain.tip() else {
            return;
        };
        let Some(eligible) = self.logic.try_propose(&coins, now) else {
            debug!(wallet = %wallet_name, "not proposing this time");
            return;
        };
        debug!(
            wallet = %wallet_name,
            outpoint = ?eligible.coin.out_point,
            height = eligible.target_height,
            "proposing"
        );

        let picked = self.transaction_picker.pick_transactions();
        let fees = picked.total_fees();
        let snapshot_hash = self.active_chain.compute_snapshot_hash();

        let Some(block) = self.block_builder.build_block(
            &tip,
            &snapshot_hash,
            &eligible,
            &coins,
            picked.transactions,
            fees,
            wallet,
        ) else {
            debug!(wallet = %wallet_name, "failed to assemble block");
            return;
        };

        let hash = block.hash();
        if self.active_chain.process_new_block(block) {
            info!(wallet = %wallet_name, block = %hash, "proposed new block");
        } else {
            warn!(wallet = %wallet_name, block = %hash, "failed to propose block");
        }
    }
}

enum LifecycleState {
    Initialized,
    Started(JoinHandle<()>),
    Stopped,
}

/// Owns the proposer thread.
pub struct Proposer {
    context: Arc<ProposerContext>,
    waiter: Arc<Waiter>,
    interrupted: Arc<AtomicBool>,
    state: LifecycleState,
}

impl Proposer {
    pub fn new(context: ProposerContext) -> Self {
        Self {
            context: Arc::new(context),
            waiter: Arc::new(Waiter::new()),
            interrupted: Arc::new(AtomicBool::new(false)),
            state: LifecycleState::Initialized,
        }
    }

    /// Wakes the loop before its slot timer fires (new block, wallet
    /// unlocked, balance changed).
    pub fn wake(&self) {
        self.waiter.wake();
    }

    pub fn start(&mut self) {
        if !matches!(self.state, LifecycleState::Initialized) {
            debug!("proposer already started, not starting again");
            return;
        }
        let context = self.context.clone();
        let waiter = self.waiter.clone();
        let interrupted = self.interrupted.clone();
        let handle = std::thread::Builder::new()
            .name("unite-proposer".into())
            .spawn(move || run(context, waiter, interrupted))
            .expect("spawning the proposer thread");
        self.state = LifecycleState::Started(handle);
        info!("proposer started");
    }

    pub fn stop(&mut self) {
        let LifecycleState::Started(handle) =
            std::mem::replace(&mut self.state, LifecycleState::Stopped)
        else {
            debug!("proposer not started, nothing to stop");
            return;
        };
        info!("stopping proposer thread");
        self.interrupted.store(true, Ordering::SeqCst);
        self.waiter.wake();
        let _ = handle.join();
        info!("proposer stopped");
    }
}

impl Drop for Proposer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(context: Arc<ProposerContext>, waiter: Arc<Waiter>, interrupted: Arc<AtomicBool>) {
    info!("proposer thread started");
    let slot = Duration::from_secs(
        context.params.block_stake_timestamp_interval_seconds as u64,
    );
    while !interrupted.load(Ordering::SeqCst) {
        context.run_iteration(now_seconds(), &interrupted);
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        waiter.wait_up_to(slot);
    }
    info!("proposer thread stopping");
}

fn now_seconds() -> Time {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time goes forward")
        .as_secs() as Time
}
