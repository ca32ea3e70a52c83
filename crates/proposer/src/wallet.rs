//! Traits the proposer needs from the wallet and mempool subsystems.

use std::sync::Arc;

use unite_primitives::amount::Amount;
use unite_primitives::buf::Buf32;
use unite_staking::coin::CoinSet;
use unite_staking::proof_of_stake::SigningKey;
use unite_state::transaction::Transaction;

/// What a proposer is currently doing, per wallet.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ProposerStatus {
    #[default]
    NotProposing,
    IsProposing,
    NotProposingNoPeers,
    NotProposingSyncingBlockchain,
    NotProposingWalletLocked,
    NotProposingNotEnoughBalance,
}

/// The slice of a wallet the proposer interacts with. Implementations
/// guard their own state; calls happen with the chain lock already
/// held, matching the global lock order.
pub trait StakingWallet: Send + Sync {
    fn name(&self) -> String;

    fn is_locked(&self) -> bool;

    /// Confirmed, mature coins this wallet can stake right now.
    fn stakeable_coins(&self) -> CoinSet;

    /// Attaches the wallet's witnesses to a coinbase transaction.
    fn sign_coinbase_transaction(&self, tx: &mut Transaction) -> bool;

    /// Compact signature over a block hash with the key matching the
    /// given public key, if the wallet holds it.
    fn sign_block_hash(&self, key: &SigningKey, block_hash: &Buf32) -> Option<Vec<u8>>;

    fn set_proposer_status(&self, status: ProposerStatus);

    fn proposer_status(&self) -> ProposerStatus;
}

pub trait MultiWallet: Send + Sync {
    fn wallets(&self) -> Vec<Arc<dyn StakingWallet>>;
}

#[derive(Clone, Debug, Default)]
pub struct PickTransactionsResult {
    pub transactions: Vec<Transaction>,
    pub fees: Vec<Amount>,
}

impl PickTransactionsResult {
    pub fn total_fees(&self) -> Amount {
        self.fees.iter().sum()
    }
}

/// Selects the transactions to include in a proposed block.
pub trait TransactionPicker: Send + Sync {
    fn pick_transactions(&self) -> PickTransactionsResult;
}
