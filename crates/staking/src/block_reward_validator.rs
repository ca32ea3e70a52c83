//! Validation of the coinbase reward outputs.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use unite_primitives::amount::Amount;
use unite_primitives::params::{self, Height, Parameters};
use unite_state::block::BlockIndex;
use unite_state::transaction::{Transaction, TxOut};

use crate::active_chain::ActiveChain;

/// Why a coinbase's reward outputs were rejected. The display strings
/// are the stable wire rejection reasons.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum BlockRewardError {
    #[error("bad-cb-too-few-outputs")]
    TooFewOutputs,
    #[error("bad-cb-amount")]
    Amount,
    #[error("bad-cb-spends-too-little")]
    SpendsTooLittle,
    #[error("bad-cb-spends-too-much")]
    SpendsTooMuch,
    #[error("bad-cb-finalization-reward")]
    FinalizationReward,
}

/// Where the deferred share of block rewards goes.
///
/// The deferred `(1 − immediate_reward_fraction)` share of each block
/// of an epoch is paid in the coinbase of the first block of the
/// next-but-one epoch, one output per rewarded block, to that block's
/// own reward script.
pub trait FinalizationRewardLogic: Send + Sync {
    /// Number of finalization reward outputs a coinbase at this height
    /// must carry.
    fn number_of_reward_outputs(&self, height: Height) -> usize;

    /// The expected output amounts, in order.
    fn reward_amounts(&self, height: Height) -> Vec<Amount>;

    /// The expected outputs with destination scripts. `None` when the
    /// rewarded blocks cannot be read back from disk.
    fn rewards(&self, height: Height) -> Option<Vec<TxOut>>;
}

/// Reward logic derived purely from the parameters and the active
/// chain.
pub struct EpochRewardLogic {
    params: Arc<Parameters>,
    chain: Arc<dyn ActiveChain>,
}

impl EpochRewardLogic {
    pub fn new(params: Arc<Parameters>, chain: Arc<dyn ActiveChain>) -> Self {
        Self { params, chain }
    }

    /// Height range of the epoch paid out by a coinbase at `height`,
    /// if any: the epoch that ended two epochs back.
    fn rewarded_heights(&self, height: Height) -> Option<std::ops::RangeInclusive<Height>> {
        if !params::is_epoch_start(&self.params, height) {
            return None;
        }
        let epoch = params::epoch_of(&self.params, height);
        if epoch < 3 {
            return None;
        }
        let rewarded = epoch - 2;
        Some(
            params::epoch_start_height(&self.params, rewarded)
                ..=params::epoch_checkpoint_height(&self.params, rewarded),
        )
    }
}

impl FinalizationRewardLogic for EpochRewardLogic {
    fn number_of_reward_outputs(&self, height: Height) -> usize {
        match self.rewarded_heights(height) {
            Some(_) => self.params.epoch_length as usize,
            None => 0,
        }
    }

    fn reward_amounts(&self, height: Height) -> Vec<Amount> {
        let Some(heights) = self.rewarded_heights(height) else {
            return Vec::new();
        };
        heights
            .map(|h| {
                params::block_reward(&self.params, h) - params::immediate_block_reward(&self.params, h)
            })
            .collect()
    }

    fn rewards(&self, height: Height) -> Option<Vec<TxOut>> {
        let heights = self.rewarded_heights(height)?;
        let amounts = self.reward_amounts(height);
        let mut outputs = Vec::with_capacity(amounts.len());
        for (h, amount) in heights.zip(amounts) {
            let index = self.chain.at_height(h)?;
            let block = self.chain.read_block(&index)?;
            let script = block.vtx.first()?.vout.first()?.script_pubkey.clone();
            outputs.push(TxOut::new(amount, script));
        }
        Some(outputs)
    }
}

pub struct BlockRewardValidator {
    params: Arc<Parameters>,
    chain: Arc<dyn ActiveChain>,
    logic: Arc<dyn FinalizationRewardLogic>,
}

impl BlockRewardValidator {
    pub fn new(
        params: Arc<Parameters>,
        chain: Arc<dyn ActiveChain>,
        logic: Arc<dyn FinalizationRewardLogic>,
    ) -> Self {
        Self {
            params,
            chain,
            logic,
        }
    }

    /// Checks the coinbase's outputs against the reward rules:
    /// the first output is capped at the immediate reward plus fees,
    /// the next `k` outputs are the finalization rewards, the rest must
    /// return at least the staked principal plus fees and may not mint
    /// beyond the rewards.
    pub fn check_block_rewards(
        &self,
        tx: &Transaction,
        index: &BlockIndex,
        input_amount: Amount,
        fees: Amount,
    ) -> Result<(), BlockRewardError> {
        let height = index.height;
        let num_rewards = self.logic.number_of_reward_outputs(height);
        if tx.vout.len() < 1 + num_rewards {
            return Err(BlockRewardError::TooFewOutputs);
        }

        let immediate_reward = params::immediate_block_reward(&self.params, height);
        if tx.vout[0].value > immediate_reward + fees {
            debug!(
                height,
                got = tx.vout[0].value,
                cap = immediate_reward + fees,
                "coinbase claims too much immediate reward"
            );
            return Err(BlockRewardError::Amount);
        }

        let mut finalization_total: Amount = 0;
        if num_rewards > 0 {
            let actual = &tx.vout[1..1 + num_rewards];
            if self.grandparent_block_available(index) {
                let expected = self.logic.rewards(height);
                match expected {
                    Some(expected) if actual == expected.as_slice() => {}
                    _ => return Err(BlockRewardError::FinalizationReward),
                }
            } else {
                // Without the rewarded blocks on disk only the amounts
                // can be checked.
                let expected = self.logic.reward_amounts(height);
                let amounts: Vec<Amount> = actual.iter().map(|o| o.value).collect();
                if amounts != expected {
                    return Err(BlockRewardError::FinalizationReward);
                }
            }
            finalization_total = actual.iter().map(|o| o.value).sum();
        }

        let total_out = tx.value_out();
        if total_out > input_amount + immediate_reward + finalization_total + fees {
            return Err(BlockRewardError::Amount);
        }
        if total_out < input_amount + fees {
            return Err(BlockRewardError::SpendsTooLittle);
        }
        let principal_out: Amount = tx.vout[1 + num_rewards..].iter().map(|o| o.value).sum();
        if principal_out > input_amount {
            return Err(BlockRewardError::SpendsTooMuch);
        }
        Ok(())
    }

    /// Whether the block two behind the one being validated is readable.
    fn grandparent_block_available(&self, index: &BlockIndex) -> bool {
        let parent = index
            .prev_hash
            .and_then(|hash| self.chain.get_block_index(&hash));
        let grandparent = parent
            .and_then(|p| p.prev_hash)
            .and_then(|hash| self.chain.get_block_index(&hash));
        grandparent.is_some_and(|g| g.has_block_data)
    }
}
