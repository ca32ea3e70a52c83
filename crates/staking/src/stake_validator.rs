//! Validation of the staking part of a block: kernel acceptance, stake
//! maturity, duplicate-stake tracking and the remote-staking balance
//! invariant.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use unite_primitives::amount::Amount;
use unite_primitives::buf::Buf32;
use unite_primitives::difficulty::{self, Difficulty};
use unite_primitives::params::Parameters;
use unite_state::block::Block;
use unite_state::transaction::{OutPoint, Transaction};

use crate::active_chain::ActiveChain;
use crate::block_validation_info::BlockValidationInfo;
use crate::coin::Coin;
use crate::proof_of_stake;
use crate::validation_result::{BlockValidationError, BlockValidationResult};

pub struct StakeValidator {
    params: Arc<Parameters>,
    active_chain: Arc<dyn ActiveChain>,

    /// Outpoints that have already produced a block the node accepted.
    /// Guarded by its own lock, taken after the chain locks.
    known_stakes: Mutex<HashSet<OutPoint>>,
}

impl StakeValidator {
    pub fn new(params: Arc<Parameters>, active_chain: Arc<dyn ActiveChain>) -> Self {
        Self {
            params,
            active_chain,
            known_stakes: Mutex::new(HashSet::new()),
        }
    }

    /// Proof-of-stake kernel acceptance: the kernel hash, read as a
    /// 256-bit integer, must not exceed the target weighted by the
    /// staked amount.
    pub fn check_kernel(&self, stake: Amount, kernel_hash: &Buf32, bits: Difficulty) -> bool {
        let Some(target) = difficulty::expand_compact(bits) else {
            return false;
        };
        difficulty::hash_to_uint(kernel_hash) <= difficulty::weighted_target(target, stake)
    }

    /// Remembers an outpoint as having staked a block.
    pub fn remember_piece_of_stake(&self, outpoint: OutPoint) {
        self.known_stakes.lock().insert(outpoint);
    }

    /// Forgets a remembered outpoint (on disconnect of the block).
    pub fn forget_piece_of_stake(&self, outpoint: &OutPoint) {
        self.known_stakes.lock().remove(outpoint);
    }

    pub fn is_piece_of_stake_known(&self, outpoint: &OutPoint) -> bool {
        self.known_stakes.lock().contains(outpoint)
    }

    /// Full staking check of a block: the staking coin exists and is
    /// mature, the kernel meets the weighted target, the stake was not
    /// used before, and remote-staking inputs are repaid in full.
    pub fn check_stake(
        &self,
        block: &Block,
        info: Option<&mut BlockValidationInfo>,
    ) -> BlockValidationResult {
        if let Some(info) = &info {
            if let Some(result) = info.check_stake_result() {
                return result.clone();
            }
        }
        let result = self.check_stake_now(block);
        if let Some(info) = info {
            info.set_check_stake(result.clone());
        }
        result
    }

    fn check_stake_now(&self, block: &Block) -> BlockValidationResult {
        let mut result = BlockValidationResult::ok();

        let Some(staking_input) = block.staking_input() else {
            result.add_error(BlockValidationError::NoStakingInput);
            return result;
        };
        let stake_ref = staking_input.prevout;

        let Some(coin) = self.active_chain.get_utxo(&stake_ref) else {
            result.add_error(BlockValidationError::StakeNotFound);
            return result;
        };

        let depth = coin.depth_at(self.active_chain.height());
        if depth < self.params.stake_maturity {
            result.add_error(BlockValidationError::StakeImmature);
        }

        let prev_index = self
            .active_chain
            .get_block_index(&block.header.prev_block_hash);
        let kernel_hash =
            proof_of_stake::compute_kernel_hash(prev_index.as_deref(), &coin, block.header.time);
        if !self.check_kernel(coin.value, &kernel_hash, block.header.bits) {
            result.add_error(BlockValidationError::StakeNotEligible);
        }

        if self.is_piece_of_stake_known(&stake_ref) {
            result.add_error(BlockValidationError::DuplicateStake);
        }

        if let Some(coinbase) = block.vtx.first() {
            result.combine(self.check_remote_staking_outputs(coinbase));
        }

        if !result.is_valid() {
            debug!(block = %block.hash(), %result, "stake check failed");
        }
        result
    }

    /// For every remote-staking input, the outputs paying scripts with
    /// the same owner hash must add up to at least the consumed value.
    fn check_remote_staking_outputs(&self, coinbase: &Transaction) -> BlockValidationResult {
        let mut result = BlockValidationResult::ok();
        let mut remote_inputs: HashMap<Buf32, Amount> = HashMap::new();

        // Input 0 is the meta input; everything after it spends coins.
        for input in coinbase.vin.iter().skip(1) {
            let Some(coin) = self.active_chain.get_utxo(&input.prevout) else {
                result.add_error(BlockValidationError::TransactionInputNotFound);
                continue;
            };
            if let Some(owner) = coin.script_pubkey.remote_staking_owner() {
                *remote_inputs.entry(owner).or_insert(0) += coin.value;
            }
        }

        if remote_inputs.is_empty() {
            return result;
        }

        let mut remote_outputs: HashMap<Buf32, Amount> = HashMap::new();
        for output in &coinbase.vout {
            if let Some(owner) = output.script_pubkey.remote_staking_owner() {
                *remote_outputs.entry(owner).or_insert(0) += output.value;
            }
        }

        for (owner, spent) in &remote_inputs {
            let repaid = remote_outputs.get(owner).copied().unwrap_or(0);
            if repaid < *spent {
                result.add_error(BlockValidationError::RemoteStakingInputBiggerThanOutput);
            }
        }
        result
    }
}
