//! The slot search: which of the wallet's coins, if any, may propose
//! the next block.

use std::sync::Arc;

use tracing::trace;

use unite_primitives::params::{self, Parameters, Time};
use unite_staking::coin::CoinSet;
use unite_staking::proof_of_stake;
use unite_staking::{ActiveChain, StakeValidator};

use crate::eligible_coin::EligibleCoin;

pub struct ProposerLogic {
    params: Arc<Parameters>,
    active_chain: Arc<dyn ActiveChain>,
    stake_validator: Arc<StakeValidator>,
}

impl ProposerLogic {
    pub fn new(
        params: Arc<Parameters>,
        active_chain: Arc<dyn ActiveChain>,
        stake_validator: Arc<StakeValidator>,
    ) -> Self {
        Self {
            params,
            active_chain,
            stake_validator,
        }
    }

    /// Tries every coin against the current masked timestamp slot;
    /// the first kernel below the weighted target wins. Coins come
    /// pre-sorted largest first, which maximizes the chance of an
    /// early hit.
    pub fn try_propose(&self, coins: &CoinSet, now: Time) -> Option<EligibleCoin> {
        let tip = self.active_chain.tip()?;
        let target_height = tip.height + 1;
        let target_time = params::masked_timestamp(&self.params, now);
        let target_difficulty = params::difficulty_at(&self.params, target_height);

        for coin in coins {
            let kernel_hash =
                proof_of_stake::compute_kernel_hash(Some(&tip), coin, target_time);
            if self
                .stake_validator
                .check_kernel(coin.value, &kernel_hash, target_difficulty)
            {
                trace!(
                    outpoint = ?coin.out_point,
                    target_height,
                    "found eligible coin"
                );
                return Some(EligibleCoin {
                    coin: coin.clone(),
                    kernel_hash,
                    reward: params::immediate_block_reward(&self.params, target_height),
                    target_height,
                    target_time,
                    target_difficulty,
                });
            }
        }
        None
    }
}
