//! Assembles and signs proposed blocks.

use std::sync::Arc;

use tracing::{debug, warn};

use unite_primitives::amount::Amount;
use unite_primitives::buf::Buf32;
use unite_primitives::params::{Parameters, Settings};
use unite_staking::coin::CoinSet;
use unite_staking::proof_of_stake;
use unite_staking::FinalizationRewardLogic;
use unite_state::block::{Block, BlockHeader, BlockIndex};
use unite_state::script::Script;
use unite_state::transaction::{OutPoint, Transaction, TxIn, TxOut, TxType};

use crate::eligible_coin::EligibleCoin;
use crate::wallet::StakingWallet;

pub struct BlockBuilder {
    params: Arc<Parameters>,
    settings: Settings,
    reward_logic: Arc<dyn FinalizationRewardLogic>,
}

impl BlockBuilder {
    pub fn new(
        params: Arc<Parameters>,
        settings: Settings,
        reward_logic: Arc<dyn FinalizationRewardLogic>,
    ) -> Self {
        Self {
            params,
            settings,
            reward_logic,
        }
    }

    /// Splits an amount into pieces no larger than the threshold. The
    /// pieces differ by at most one base unit so no dust piece is
    /// created for the remainder.
    fn split_amount(amount: Amount, threshold: Amount) -> Vec<Amount> {
        let mut number_of_pieces = amount / threshold;
        if amount % threshold > 0 {
            number_of_pieces += 1;
        }
        let mut pieces = vec![amount / number_of_pieces; number_of_pieces as usize];
        let number_of_full_pieces = (amount % number_of_pieces) as usize;
        for piece in pieces.iter_mut().take(number_of_full_pieces) {
            *piece += 1;
        }
        pieces
    }

    /// Builds the coinbase: meta input, staking input, combined stake
    /// inputs, then the reward output, the finalization reward outputs
    /// and the returned principal.
    pub fn build_coinbase_transaction(
        &self,
        snapshot_hash: &Buf32,
        eligible_coin: &EligibleCoin,
        coins: &CoinSet,
        fees: Amount,
        wallet: &dyn StakingWallet,
    ) -> Option<Transaction> {
        let mut tx = Transaction::new(TxType::Coinbase);

        // Meta input carrying height and snapshot hash.
        tx.vin.push(TxIn::with_script_sig(
            OutPoint::null(),
            Script::meta_input(eligible_coin.target_height, snapshot_hash),
        ));

        // The staking input.
        tx.vin.push(TxIn::new(eligible_coin.coin.out_point));

        // Combine further coins while the total stays within the cap.
        // Skipping over a too-big coin keeps the outcome independent of
        // the iteration order: a later, smaller coin may still fit.
        let mut combined_total = eligible_coin.coin.value;
        for coin in coins {
            if *coin == eligible_coin.coin {
                continue;
            }
            let new_total = combined_total + coin.value;
            if self.settings.stake_combine_maximum > 0
                && new_total > self.settings.stake_combine_maximum
            {
                continue;
            }
            combined_total = new_total;
            tx.vin.push(TxIn::new(coin.out_point));
        }

        // Fees and block reward. If no reward address is configured the
        // reward returns to the staking script. The output is added
        // even when the reward is zero (past the finite supply).
        let reward = fees + eligible_coin.reward;
        let reward_script = match (&self.settings.reward_address, reward > 0) {
            (Some(address), true) => Script::pub_key_hash(address),
            _ => eligible_coin.coin.script_pubkey.clone(),
        };
        tx.vout.push(TxOut::new(reward, reward_script));

        // Finalization reward outputs, dictated by the reward logic.
        let num_rewards = self
            .reward_logic
            .number_of_reward_outputs(eligible_coin.target_height);
        let mut finalization_total: Amount = 0;
        if num_rewards > 0 {
            let Some(rewards) = self.reward_logic.rewards(eligible_coin.target_height) else {
                warn!(
                    height = eligible_coin.target_height,
                    "cannot build finalization rewards, rewarded blocks unavailable"
                );
                return None;
            };
            finalization_total = rewards.iter().map(|o| o.value).sum();
            tx.vout.extend(rewards);
        }

        // Return the staked principal, split to keep pieces stakeable.
        let threshold = self.settings.stake_split_threshold;
        if threshold > 0 && combined_total > threshold {
            for piece in Self::split_amount(combined_total, threshold) {
                tx.vout
                    .push(TxOut::new(piece, eligible_coin.coin.script_pubkey.clone()));
            }
        } else {
            tx.vout.push(TxOut::new(
                combined_total,
                eligible_coin.coin.script_pubkey.clone(),
            ));
        }

        assert_eq!(
            tx.value_out(),
            combined_total + reward + finalization_total,
            "coinbase outputs must account for stake and rewards exactly"
        );

        if !wallet.sign_coinbase_transaction(&mut tx) {
            debug!("failed to sign coinbase transaction");
            return None;
        }
        Some(tx)
    }

    /// Assembles a full block around the eligible coin and signs it.
    pub fn build_block(
        &self,
        prev_block: &BlockIndex,
        snapshot_hash: &Buf32,
        eligible_coin: &EligibleCoin,
        coins: &CoinSet,
        txs: Vec<Transaction>,
        fees: Amount,
        wallet: &dyn StakingWallet,
    ) -> Option<Block> {
        let coinbase =
            self.build_coinbase_transaction(snapshot_hash, eligible_coin, coins, fees, wallet)?;

        let mut vtx = Vec::with_capacity(1 + txs.len());
        vtx.push(coinbase);
        // Non-coinbase transactions go in lexicographic txid order.
        let mut txs = txs;
        txs.sort_by_key(Transaction::txid);
        vtx.extend(txs);

        let mut block = Block {
            header: BlockHeader {
                version: 1,
                prev_block_hash: prev_block.block_hash,
                merkle_root: Buf32::zero(),
                witness_merkle_root: Buf32::zero(),
                finalizer_commits_merkle_root: Buf32::zero(),
                time: eligible_coin.target_time,
                bits: eligible_coin.target_difficulty,
            },
            vtx,
            signature: Vec::new(),
        };

        let merkle = block.merkle_root();
        if merkle.mutated {
            debug!("duplicate transactions while constructing merkle tree");
            return None;
        }
        block.header.merkle_root = merkle.root;

        let witness = block.witness_merkle_root();
        if witness.mutated {
            debug!("duplicate transactions while constructing witness merkle tree");
            return None;
        }
        block.header.witness_merkle_root = witness.root;
        block.header.finalizer_commits_merkle_root = block.finalizer_commits_merkle_root().root;

        if !self.sign_block(&mut block, wallet) {
            debug!("failed to sign block");
            return None;
        }
        Some(block)
    }

    fn sign_block(&self, block: &mut Block, wallet: &dyn StakingWallet) -> bool {
        let keys = proof_of_stake::extract_block_signing_keys_from_block(block);
        if keys.is_empty() {
            debug!("could not extract staking keys from block");
            return false;
        }
        let block_hash = block.hash();
        for key in &keys {
            if let Some(signature) = wallet.sign_block_hash(key, &block_hash) {
                block.signature = signature;
                return true;
            }
        }
        debug!("no wallet key could sign the block");
        false
    }
}
